//! Memory overhead benchmark

use anyhow::{Context, Result};
use bench_lib::attach::{AttachMechanism, EphemeralContainer, ExternalTool};
use bench_lib::memory::MemorySampler;
use bench_lib::results::{ResultSet, ResultsRecorder};
use bench_lib::{HarnessConfig, MechanismKind, RunLogger, ScenarioRunner};
use chrono::Utc;
use std::path::PathBuf;

use super::{mechanisms, Harness};
use crate::output::{print_info, print_memory, print_success};
use crate::{Cli, MechanismArg};

pub struct MemoryOptions {
    pub mechanism: MechanismArg,
    pub output: Option<PathBuf>,
    pub fresh: bool,
}

pub async fn run(cli: &Cli, config: HarnessConfig, options: MemoryOptions) -> Result<()> {
    let kinds = mechanisms(options.mechanism);
    let recorder = ResultsRecorder::new(
        options
            .output
            .clone()
            .unwrap_or_else(|| config.memory_results.clone()),
    );
    if options.fresh {
        recorder.clear().context("Failed to clear results file")?;
    }

    let logger = RunLogger::new(&config.namespace);
    let harness = Harness::connect(cli, config).await?;
    let config = &harness.config;

    logger.log_run_started(env!("CARGO_PKG_VERSION"), kinds.len());
    recorder
        .record_run_started(Utc::now())
        .context("Failed to write results file")?;

    let runner = ScenarioRunner::new(harness.reconciler.clone(), config);
    let sampler = MemorySampler::new(harness.api.clone(), &config.namespace);
    let external = ExternalTool::for_memory(config);
    let ephemeral = EphemeralContainer::from_config(harness.api.clone(), config);

    let mut results = ResultSet::new();
    for kind in kinds {
        let mechanism: &dyn AttachMechanism = match kind {
            MechanismKind::ExternalTool => &external,
            MechanismKind::EphemeralContainer => &ephemeral,
        };
        let label = format!("{}_MEMORY", mechanism.label());
        print_info(&format!("Running {} against {}", label, runner.target()));

        let outcome = match runner.run_memory_scenario(mechanism, &sampler).await {
            Ok(outcome) => outcome,
            Err(e) => {
                logger.log_scenario_failed(&label, &e.to_string());
                return Err(e).with_context(|| format!("Scenario {} failed", label));
            }
        };

        recorder
            .record_memory_outcome(&outcome)
            .context("Failed to write results file")?;
        for (label, readings) in &outcome.snapshots {
            let total: u64 = readings.iter().map(|r| r.kib).sum();
            logger.log_memory_sampled(label, readings.len(), total);
            results.add_memory(label, readings.clone());
        }
    }

    print_memory(&results, cli.format);

    let path = recorder.path().display().to_string();
    logger.log_run_finished(&path);
    print_success(&format!("Results appended to {}", path));
    Ok(())
}
