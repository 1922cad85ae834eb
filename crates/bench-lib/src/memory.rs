//! Per-container memory readings from the resource-usage snapshot
//!
//! The snapshot comes from a separately scheduled metrics pipeline and may lag
//! behind pod state. Callers that want a post-attach reading should wait a
//! settle delay before sampling.

use crate::cluster::ClusterApi;
use crate::error::{BenchError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Memory usage of one container in KiB
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryReading {
    pub container: String,
    pub kib: u64,
}

impl MemoryReading {
    pub fn new(container: impl Into<String>, kib: u64) -> Self {
        Self {
            container: container.into(),
            kib,
        }
    }
}

/// Parse a memory quantity into KiB
///
/// `Ki` is what the metrics pipeline normally reports; `Mi`, `Gi` and plain
/// byte counts are converted.
pub fn parse_memory_kib(quantity: &str) -> Result<u64> {
    let quantity = quantity.trim();
    let invalid = || BenchError::Quantity(quantity.to_string());

    let (digits, multiplier) = if let Some(v) = quantity.strip_suffix("Ki") {
        (v, 1)
    } else if let Some(v) = quantity.strip_suffix("Mi") {
        (v, 1024)
    } else if let Some(v) = quantity.strip_suffix("Gi") {
        (v, 1024 * 1024)
    } else {
        let bytes: u64 = quantity.parse().map_err(|_| invalid())?;
        return Ok(bytes / 1024);
    };

    let value: u64 = digits.parse().map_err(|_| invalid())?;
    value.checked_mul(multiplier).ok_or_else(invalid)
}

/// Samples per-container memory for pods in one namespace
pub struct MemorySampler {
    api: Arc<dyn ClusterApi>,
    namespace: String,
}

impl MemorySampler {
    pub fn new(api: Arc<dyn ClusterApi>, namespace: impl Into<String>) -> Self {
        Self {
            api,
            namespace: namespace.into(),
        }
    }

    /// Readings for every container of `pod_name` in the current snapshot
    ///
    /// A pod the pipeline has not sampled yet yields an empty list.
    pub async fn sample(&self, pod_name: &str) -> Result<Vec<MemoryReading>> {
        let snapshot = self.api.list_pod_usage(&self.namespace).await?;

        let mut readings = Vec::new();
        for pod in snapshot.iter().filter(|p| p.pod_name == pod_name) {
            for container in &pod.containers {
                readings.push(MemoryReading::new(
                    container.name.clone(),
                    parse_memory_kib(&container.memory)?,
                ));
            }
        }

        debug!(
            pod = %pod_name,
            namespace = %self.namespace,
            containers = readings.len(),
            "Sampled pod memory"
        );
        Ok(readings)
    }
}
