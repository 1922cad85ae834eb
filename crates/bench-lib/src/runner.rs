//! Benchmark scenario runner
//!
//! A scenario moves through Setup, Trial, Teardown and Done. Teardown runs
//! whether or not the trials succeeded, so a failed trial never leaves pods
//! behind for the next scenario.

use crate::attach::{AttachMechanism, AttachTarget, ColdReset, MechanismKind};
use crate::cluster::{PodTemplate, Reconciler};
use crate::config::HarnessConfig;
use crate::error::{BenchError, Result};
use crate::memory::{MemoryReading, MemorySampler};
use crate::observability::BenchMetrics;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Temperature {
    Cold,
    Warm,
}

impl Temperature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Temperature::Cold => "cold",
            Temperature::Warm => "warm",
        }
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One benchmark scenario; `repeat_count` is always at least 1
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BenchmarkScenario {
    mechanism: MechanismKind,
    temperature: Temperature,
    repeat_count: u32,
    label: String,
}

impl BenchmarkScenario {
    pub fn new(mechanism: MechanismKind, temperature: Temperature, repeat_count: u32) -> Result<Self> {
        if repeat_count == 0 {
            return Err(BenchError::InvalidScenario(format!(
                "{} {} scenario needs at least one trial",
                temperature, mechanism
            )));
        }

        let label = format!(
            "{}_{}_STARTUP",
            mechanism.label_prefix(),
            temperature.as_str().to_uppercase()
        );
        Ok(Self {
            mechanism,
            temperature,
            repeat_count,
            label,
        })
    }

    pub fn mechanism(&self) -> MechanismKind {
        self.mechanism
    }

    pub fn temperature(&self) -> Temperature {
        self.temperature
    }

    pub fn repeat_count(&self) -> u32 {
        self.repeat_count
    }

    /// Results label, e.g. `LAMBDA_COLD_STARTUP`
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// One timed trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub scenario_id: String,
    pub trial_index: u32,
    pub elapsed_seconds: f64,
}

/// Finished scenario; samples are in trial order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioOutcome {
    scenario: BenchmarkScenario,
    samples: Vec<Sample>,
}

impl ScenarioOutcome {
    pub fn scenario(&self) -> &BenchmarkScenario {
        &self.scenario
    }

    pub fn label(&self) -> &str {
        self.scenario.label()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn elapsed_seconds(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.elapsed_seconds).collect()
    }

    pub fn mean(&self) -> f64 {
        // Never empty: repeat_count >= 1 and every trial yields a sample
        self.samples.iter().map(|s| s.elapsed_seconds).sum::<f64>() / self.samples.len() as f64
    }
}

/// Labeled memory snapshots taken by a memory scenario, in order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryOutcome {
    pub snapshots: Vec<(String, Vec<MemoryReading>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Setup,
    Trial,
    Teardown,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Setup => "setup",
            Phase::Trial => "trial",
            Phase::Teardown => "teardown",
            Phase::Done => "done",
        };
        f.write_str(s)
    }
}

/// Runs scenarios strictly one after another against one target pod
pub struct ScenarioRunner {
    reconciler: Reconciler,
    target: AttachTarget,
    template: PodTemplate,
    reuse_target: bool,
    settle_delay: Duration,
    metrics: BenchMetrics,
}

impl ScenarioRunner {
    pub fn new(reconciler: Reconciler, config: &HarnessConfig) -> Self {
        Self {
            reconciler,
            target: AttachTarget::new(&config.namespace, &config.target_pod),
            template: config.target_template(),
            reuse_target: config.reuse_target,
            settle_delay: config.settle_delay,
            metrics: BenchMetrics::new(),
        }
    }

    pub fn target(&self) -> &AttachTarget {
        &self.target
    }

    /// Run every trial of `scenario` with `mechanism`, then tear down
    pub async fn run_scenario(
        &self,
        scenario: &BenchmarkScenario,
        mechanism: &dyn AttachMechanism,
    ) -> Result<ScenarioOutcome> {
        if scenario.mechanism() != mechanism.kind() {
            return Err(BenchError::InvalidScenario(format!(
                "{} expects the {} mechanism, got {}",
                scenario.label(),
                scenario.mechanism(),
                mechanism.kind()
            )));
        }

        info!(
            label = %scenario.label(),
            mechanism = %scenario.mechanism(),
            temperature = %scenario.temperature(),
            repeat_count = scenario.repeat_count(),
            target = %self.target,
            "Starting scenario"
        );

        let trials = self.setup_and_trials(scenario, mechanism).await;
        let samples = self.finish(scenario.label(), mechanism, trials).await?;

        Ok(ScenarioOutcome {
            scenario: scenario.clone(),
            samples,
        })
    }

    /// Sample memory before and after attaching, then tear down
    ///
    /// Produces `<PREFIX>_POD_IDLE`, `<PREFIX>_POD_ATTACHED` and, for mechanisms
    /// with a session pod, `<PREFIX>_SESSION`.
    pub async fn run_memory_scenario(
        &self,
        mechanism: &dyn AttachMechanism,
        sampler: &MemorySampler,
    ) -> Result<MemoryOutcome> {
        let label = format!("{}_MEMORY", mechanism.label());
        info!(label = %label, mechanism = %mechanism.kind(), target = %self.target, "Starting memory scenario");

        let snapshots = self.memory_snapshots(mechanism, sampler).await;
        let snapshots = self.finish(&label, mechanism, snapshots).await?;
        Ok(MemoryOutcome { snapshots })
    }

    async fn setup_and_trials(
        &self,
        scenario: &BenchmarkScenario,
        mechanism: &dyn AttachMechanism,
    ) -> Result<Vec<Sample>> {
        self.enter(scenario.label(), Phase::Setup);
        if scenario.temperature() == Temperature::Cold {
            // Leftovers from an earlier run would make the first trial warm
            self.apply_cold_reset(mechanism).await?;
        }
        self.deploy_target().await?;

        if scenario.temperature() == Temperature::Warm {
            let primed = self.attach_once(mechanism).await?;
            debug!(label = %scenario.label(), elapsed_ms = primed.as_millis(), "Priming invocation finished");
        }

        self.enter(scenario.label(), Phase::Trial);
        let mut samples = Vec::with_capacity(scenario.repeat_count() as usize);
        for trial_index in 0..scenario.repeat_count() {
            // No-op unless a cold reset removed the target
            self.deploy_target().await?;

            let started = Instant::now();
            let elapsed = self.attach_once(mechanism).await?;
            // Guard against mechanisms measuring from a later start
            let elapsed = elapsed.min(started.elapsed());
            let elapsed_seconds = elapsed.as_secs_f64();

            info!(
                label = %scenario.label(),
                trial = trial_index + 1,
                of = scenario.repeat_count(),
                elapsed_secs = elapsed_seconds,
                "Trial finished"
            );
            self.metrics.observe_trial(
                scenario.mechanism().as_str(),
                scenario.temperature().as_str(),
                elapsed_seconds,
            );
            samples.push(Sample {
                scenario_id: scenario.label().to_string(),
                trial_index,
                elapsed_seconds,
            });

            if scenario.temperature() == Temperature::Cold {
                self.apply_cold_reset(mechanism).await?;
            }
        }

        Ok(samples)
    }

    async fn memory_snapshots(
        &self,
        mechanism: &dyn AttachMechanism,
        sampler: &MemorySampler,
    ) -> Result<Vec<(String, Vec<MemoryReading>)>> {
        let prefix = mechanism.label();
        let mut snapshots = Vec::new();

        self.enter(prefix, Phase::Setup);
        self.apply_cold_reset(mechanism).await?;
        self.deploy_target().await?;

        self.enter(prefix, Phase::Trial);
        let idle = sampler.sample(&self.target.pod).await?;
        snapshots.push((format!("{}_POD_IDLE", prefix), idle));

        self.attach_once(mechanism).await?;
        if !self.settle_delay.is_zero() {
            info!(delay_ms = self.settle_delay.as_millis(), "Waiting for the metrics pipeline to catch up");
            tokio::time::sleep(self.settle_delay).await;
        }

        let attached = sampler.sample(&self.target.pod).await?;
        snapshots.push((format!("{}_POD_ATTACHED", prefix), attached));

        if let Some(session) = mechanism.session_pod() {
            let session_readings = sampler.sample(session).await?;
            snapshots.push((format!("{}_SESSION", prefix), session_readings));
        }

        Ok(snapshots)
    }

    async fn attach_once(&self, mechanism: &dyn AttachMechanism) -> Result<Duration> {
        let handle = mechanism.invoke(&self.target).await?;
        mechanism.await_completion(handle).await
    }

    async fn deploy_target(&self) -> Result<()> {
        self.reconciler
            .deploy_pod(&self.target.namespace, &self.target.pod, &self.template)
            .await?;
        Ok(())
    }

    async fn apply_cold_reset(&self, mechanism: &dyn AttachMechanism) -> Result<()> {
        let pod = match mechanism.cold_reset() {
            ColdReset::DeleteSessionPod(name) => name,
            ColdReset::DeleteTargetPod => self.target.pod.clone(),
        };
        self.reconciler.delete_pod(&self.target.namespace, &pod).await?;
        Ok(())
    }

    /// Tear down after `work`, keeping the first error
    async fn finish<T>(
        &self,
        label: &str,
        mechanism: &dyn AttachMechanism,
        work: Result<T>,
    ) -> Result<T> {
        if let Err(e) = &work {
            warn!(label = %label, error = %e, "Scenario failed, tearing down");
        }

        self.enter(label, Phase::Teardown);
        let teardown = self.teardown(mechanism).await;

        match (work, teardown) {
            (Ok(value), Ok(())) => {
                self.enter(label, Phase::Done);
                Ok(value)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(teardown_error)) => {
                warn!(label = %label, error = %teardown_error, "Teardown failed after scenario failure");
                Err(e)
            }
        }
    }

    async fn teardown(&self, mechanism: &dyn AttachMechanism) -> Result<()> {
        let namespace = &self.target.namespace;
        let mut first_error = None;

        if let Some(session) = mechanism.session_pod() {
            if let Err(e) = self.reconciler.delete_pod(namespace, session).await {
                first_error = Some(e);
            }
        }

        if self.reuse_target {
            debug!(pod = %self.target.pod, "Keeping target pod for the next scenario");
        } else if let Err(e) = self.reconciler.delete_pod(namespace, &self.target.pod).await {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn enter(&self, label: &str, phase: Phase) {
        debug!(label = %label, phase = %phase, "Scenario phase");
    }
}
