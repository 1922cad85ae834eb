//! Benchmark harness for debug-attach mechanisms on Kubernetes
//!
//! This crate provides the core functionality for:
//! - Reconciling the target and debug-session pods by polling
//! - Driving the external attach tool and ephemeral containers
//! - Running cold, warm and memory scenarios
//! - Persisting and reading back results
//! - Metrics and structured logging

pub mod attach;
pub mod cluster;
pub mod config;
pub mod error;
#[cfg(test)]
pub(crate) mod fakes;
pub mod memory;
pub mod observability;
pub mod results;
pub mod runner;
pub mod wait;

pub use attach::{AttachMechanism, AttachTarget, EphemeralContainer, ExternalTool, MechanismKind};
pub use cluster::{ClusterApi, KubeCluster, Reconciler};
pub use config::HarnessConfig;
pub use error::{BenchError, Result};
pub use observability::{BenchMetrics, RunLogger};
pub use runner::{BenchmarkScenario, ScenarioOutcome, ScenarioRunner, Temperature};
