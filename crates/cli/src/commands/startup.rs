//! Start-up latency benchmark

use anyhow::{Context, Result};
use bench_lib::attach::{AttachMechanism, EphemeralContainer, ExternalTool};
use bench_lib::results::{ResultSet, ResultsRecorder};
use bench_lib::{BenchmarkScenario, HarnessConfig, MechanismKind, RunLogger, ScenarioRunner, Temperature};
use chrono::Utc;
use std::path::PathBuf;

use super::{mechanisms, Harness};
use crate::output::{print_info, print_scenarios, print_success, print_warning};
use crate::{Cli, MechanismArg, TemperatureArg};

pub struct StartupOptions {
    pub mechanism: MechanismArg,
    pub temperature: TemperatureArg,
    pub output: Option<PathBuf>,
    pub fresh: bool,
}

/// Scenarios in run order: per mechanism, cold before warm
pub fn plan(
    mechanism: MechanismArg,
    temperature: TemperatureArg,
    repeat_count: u32,
) -> bench_lib::Result<Vec<BenchmarkScenario>> {
    let temperatures = match temperature {
        TemperatureArg::All => vec![Temperature::Cold, Temperature::Warm],
        TemperatureArg::Cold => vec![Temperature::Cold],
        TemperatureArg::Warm => vec![Temperature::Warm],
    };

    let mut scenarios = Vec::new();
    for kind in mechanisms(mechanism) {
        for temperature in &temperatures {
            scenarios.push(BenchmarkScenario::new(kind, *temperature, repeat_count)?);
        }
    }
    Ok(scenarios)
}

pub async fn run(cli: &Cli, config: HarnessConfig, options: StartupOptions) -> Result<()> {
    // Reject bad scenarios before touching the cluster
    let scenarios = plan(options.mechanism, options.temperature, config.repeat_count)
        .context("Invalid benchmark plan")?;

    let recorder = ResultsRecorder::new(
        options
            .output
            .clone()
            .unwrap_or_else(|| config.startup_results.clone()),
    );
    if options.fresh {
        recorder.clear().context("Failed to clear results file")?;
    }

    let logger = RunLogger::new(&config.namespace);
    let harness = Harness::connect(cli, config).await?;
    let config = &harness.config;

    logger.log_run_started(env!("CARGO_PKG_VERSION"), scenarios.len());
    recorder
        .record_run_started(Utc::now())
        .context("Failed to write results file")?;

    let runner = ScenarioRunner::new(harness.reconciler.clone(), config);
    let external = ExternalTool::from_config(config);
    let ephemeral = EphemeralContainer::from_config(harness.api.clone(), config);

    let mut results = ResultSet::new();
    for scenario in &scenarios {
        let mechanism: &dyn AttachMechanism = match scenario.mechanism() {
            MechanismKind::ExternalTool => &external,
            MechanismKind::EphemeralContainer => &ephemeral,
        };
        print_info(&format!(
            "Running {} ({} trials against {})",
            scenario.label(),
            scenario.repeat_count(),
            runner.target()
        ));

        let outcome = match runner.run_scenario(scenario, mechanism).await {
            Ok(outcome) => outcome,
            Err(e) => {
                logger.log_scenario_failed(scenario.label(), &e.to_string());
                return Err(e).with_context(|| format!("Scenario {} failed", scenario.label()));
            }
        };

        let mean = recorder
            .record_outcome(&outcome)
            .context("Failed to write results file")?;
        logger.log_scenario_finished(outcome.label(), outcome.samples().len(), mean);
        results.add_outcome(&outcome);
    }

    print_scenarios(&results, cli.format);
    for advisory in results.advisories() {
        logger.log_advisory(
            &advisory.warm_label,
            advisory.warm_mean,
            &advisory.cold_label,
            advisory.cold_mean,
        );
        print_warning(&format!(
            "{} ({:.3}s) is slower than {} ({:.3}s)",
            advisory.warm_label, advisory.warm_mean, advisory.cold_label, advisory.cold_mean
        ));
    }

    let path = recorder.path().display().to_string();
    logger.log_run_finished(&path);
    print_success(&format!("Results appended to {}", path));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_orders_cold_before_warm() {
        let scenarios = plan(MechanismArg::All, TemperatureArg::All, 5).unwrap();
        let labels: Vec<&str> = scenarios.iter().map(|s| s.label()).collect();
        assert_eq!(
            labels,
            vec![
                "LAMBDA_COLD_STARTUP",
                "LAMBDA_WARM_STARTUP",
                "EPHEM_COLD_STARTUP",
                "EPHEM_WARM_STARTUP",
            ]
        );
        assert!(scenarios.iter().all(|s| s.repeat_count() == 5));
    }

    #[test]
    fn test_plan_filters() {
        let scenarios = plan(MechanismArg::Ephemeral, TemperatureArg::Warm, 1).unwrap();
        assert_eq!(scenarios.len(), 1);
        assert_eq!(scenarios[0].label(), "EPHEM_WARM_STARTUP");
    }

    #[test]
    fn test_plan_rejects_zero_repeat() {
        assert!(plan(MechanismArg::All, TemperatureArg::All, 0).is_err());
    }
}
