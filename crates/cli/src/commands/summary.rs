//! Results file summary

use anyhow::{Context, Result};
use bench_lib::results::ResultSet;
use std::path::Path;

use crate::output::{print_memory, print_scenarios, print_warning, OutputFormat};

pub fn run(file: &Path, format: OutputFormat) -> Result<()> {
    let results = ResultSet::load(file)
        .with_context(|| format!("Failed to read results file {}", file.display()))?;

    if !results.scenarios().is_empty() || results.memory().is_empty() {
        print_scenarios(&results, format);
    }
    if !results.memory().is_empty() {
        print_memory(&results, format);
    }

    if matches!(format, OutputFormat::Table) {
        for advisory in results.advisories() {
            print_warning(&format!(
                "{} ({:.3}s) is slower than {} ({:.3}s)",
                advisory.warm_label, advisory.warm_mean, advisory.cold_label, advisory.cold_mean
            ));
        }
    }

    Ok(())
}
