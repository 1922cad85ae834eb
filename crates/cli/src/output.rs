//! Output formatting utilities

use bench_lib::results::ResultSet;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Row for the start-up latency table
#[derive(Debug, Tabled, Serialize)]
pub struct ScenarioRow {
    #[tabled(rename = "Scenario")]
    pub label: String,
    #[tabled(rename = "Samples")]
    pub samples: usize,
    #[tabled(rename = "Mean")]
    pub mean: String,
}

/// Row for the memory table
#[derive(Debug, Tabled, Serialize)]
pub struct MemoryRow {
    #[tabled(rename = "Snapshot")]
    pub label: String,
    #[tabled(rename = "Container")]
    pub container: String,
    #[tabled(rename = "Memory")]
    pub memory: String,
}

/// Print a table from a list of items
pub fn print_table<T: Tabled + Serialize>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No items found".yellow());
                return;
            }
            let table = Table::new(items).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(&items) {
                println!("{}", json);
            }
        }
    }
}

pub fn scenario_rows(results: &ResultSet) -> Vec<ScenarioRow> {
    results
        .scenarios()
        .iter()
        .map(|(label, samples)| ScenarioRow {
            label: label.clone(),
            samples: samples.len(),
            mean: results
                .mean(label)
                .map(format_seconds)
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect()
}

/// One row per container; snapshots without readings get a single placeholder row
pub fn memory_rows(results: &ResultSet) -> Vec<MemoryRow> {
    let mut rows = Vec::new();
    for (label, readings) in results.memory() {
        if readings.is_empty() {
            rows.push(MemoryRow {
                label: label.clone(),
                container: "-".to_string(),
                memory: "not sampled yet".to_string(),
            });
        }
        for reading in readings {
            rows.push(MemoryRow {
                label: label.clone(),
                container: reading.container.clone(),
                memory: format_kib(reading.kib),
            });
        }
    }
    rows
}

pub fn print_scenarios(results: &ResultSet, format: OutputFormat) {
    print_table(&scenario_rows(results), format);
}

pub fn print_memory(results: &ResultSet, format: OutputFormat) {
    print_table(&memory_rows(results), format);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format KiB as human-readable string
pub fn format_kib(kib: u64) -> String {
    const MI: u64 = 1024;
    const GI: u64 = MI * 1024;

    if kib >= GI {
        format!("{:.2}Gi", kib as f64 / GI as f64)
    } else if kib >= MI {
        format!("{:.2}Mi", kib as f64 / MI as f64)
    } else {
        format!("{}Ki", kib)
    }
}

/// Format seconds, switching to milliseconds below one second
pub fn format_seconds(seconds: f64) -> String {
    if seconds >= 1.0 {
        format!("{:.3}s", seconds)
    } else {
        format!("{:.1}ms", seconds * 1000.0)
    }
}
