//! Debug-attach benchmark CLI
//!
//! Measures start-up latency and memory overhead of the namespace-joining
//! attach tool against Kubernetes ephemeral containers.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use bench_lib::BenchMetrics;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Debug-attach benchmark harness
#[derive(Parser)]
#[command(name = "attach-bench")]
#[command(author, version, about = "Benchmark harness for debug-attach mechanisms", long_about = None)]
pub struct Cli {
    /// Harness configuration file (TOML, YAML or JSON)
    #[arg(long, env = "ATTACH_BENCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to kubeconfig file (uses default if not specified)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Namespace for the target and session pods
    #[arg(long, short)]
    pub namespace: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Write harness metrics in Prometheus text format to this file
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Measure cold and warm start-up latency
    Startup {
        /// Mechanisms to benchmark
        #[arg(long, short, default_value = "all")]
        mechanism: MechanismArg,

        /// Temperatures to benchmark
        #[arg(long, short, default_value = "all")]
        temperature: TemperatureArg,

        /// Trials per scenario (overrides the configured repeat count)
        #[arg(long, short)]
        repeat: Option<u32>,

        /// Results file (overrides the configured path)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Truncate the results file before recording
        #[arg(long)]
        fresh: bool,
    },

    /// Measure memory overhead of an attached session
    Memory {
        /// Mechanisms to benchmark
        #[arg(long, short, default_value = "all")]
        mechanism: MechanismArg,

        /// Delay before the post-attach sample, in milliseconds
        #[arg(long)]
        settle_delay_ms: Option<u64>,

        /// Results file (overrides the configured path)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Truncate the results file before recording
        #[arg(long)]
        fresh: bool,
    },

    /// Open an interactive debug session on the target pod (not timed)
    Attach {
        /// Mechanism to attach with
        #[arg(long, short, default_value = "external-tool")]
        mechanism: SingleMechanismArg,

        /// Delete the target and session pods once the session ends
        #[arg(long)]
        cleanup: bool,
    },

    /// Summarize a results file
    Summary {
        /// Results file to read
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MechanismArg {
    All,
    ExternalTool,
    Ephemeral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SingleMechanismArg {
    ExternalTool,
    Ephemeral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TemperatureArg {
    All,
    Cold,
    Warm,
}

fn init_tracing(json: bool, verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json, cli.verbose);

    match &cli.command {
        Commands::Startup {
            mechanism,
            temperature,
            repeat,
            output,
            fresh,
        } => {
            let config = config::load(&cli, *repeat, None)?;
            let options = commands::startup::StartupOptions {
                mechanism: *mechanism,
                temperature: *temperature,
                output: output.clone(),
                fresh: *fresh,
            };
            commands::startup::run(&cli, config, options).await?;
        }
        Commands::Memory {
            mechanism,
            settle_delay_ms,
            output,
            fresh,
        } => {
            let config = config::load(&cli, None, *settle_delay_ms)?;
            let options = commands::memory::MemoryOptions {
                mechanism: *mechanism,
                output: output.clone(),
                fresh: *fresh,
            };
            commands::memory::run(&cli, config, options).await?;
        }
        Commands::Attach { mechanism, cleanup } => {
            let config = config::load(&cli, None, None)?;
            commands::attach::run(&cli, config, *mechanism, *cleanup).await?;
        }
        Commands::Summary { file } => {
            commands::summary::run(file, cli.format)?;
        }
    }

    if let Some(path) = &cli.metrics_out {
        std::fs::write(path, BenchMetrics::new().encode_text())
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    }

    Ok(())
}
