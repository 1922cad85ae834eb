//! Cluster state access and reconciliation
//!
//! [`ClusterApi`] is the narrow slice of the Kubernetes API the harness
//! needs. [`Reconciler`] drives namespaces and pods toward a desired state on
//! top of it using polling only.

mod kube_api;
mod reconciler;

pub use kube_api::KubeCluster;
pub use reconciler::{ReconcileConfig, Reconciler};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Observed lifecycle phase of a pod that exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
    /// Deletion requested but the pod is still visible
    Terminating,
}

impl PodPhase {
    /// Map the API's phase string and deletion marker to a phase
    pub fn from_status(phase: Option<&str>, deleting: bool) -> Self {
        if deleting {
            return PodPhase::Terminating;
        }
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            // A freshly created pod may not report a phase yet
            None => PodPhase::Pending,
            Some(_) => PodPhase::Unknown,
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
            PodPhase::Terminating => "Terminating",
        };
        f.write_str(s)
    }
}

/// A pod as last observed through the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedPod {
    pub namespace: String,
    pub name: String,
    pub phase: PodPhase,
    /// Names from `status.ephemeralContainerStatuses`; `None` while the field is absent
    pub ephemeral_containers: Option<Vec<String>>,
}

/// Desired spec of a single-container pod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodTemplate {
    pub container_name: String,
    pub image: String,
    pub command: Vec<String>,
    pub restart_policy: String,
}

impl PodTemplate {
    pub fn new(container_name: &str, image: &str, command: Vec<String>) -> Self {
        Self {
            container_name: container_name.to_string(),
            image: image.to_string(),
            command,
            restart_policy: "Never".to_string(),
        }
    }
}

/// One container entry of a resource-usage snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerUsage {
    pub name: String,
    /// Raw quantity string, e.g. `"1234Ki"`
    pub memory: String,
}

/// One pod entry of a resource-usage snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodUsage {
    pub pod_name: String,
    pub containers: Vec<ContainerUsage>,
}

/// Cluster operations used by the harness
///
/// Implementations resolve "not found" on reads to `None` (or an empty list)
/// and report every other failure as an error.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Names of all namespaces
    async fn list_namespaces(&self) -> Result<Vec<String>>;

    async fn create_namespace(&self, name: &str) -> Result<()>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<ObservedPod>>;

    async fn create_pod(&self, namespace: &str, name: &str, template: &PodTemplate) -> Result<()>;

    /// Request deletion; a pod that is already gone is not an error
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    /// Current resource-usage snapshot for all pods in a namespace
    async fn list_pod_usage(&self, namespace: &str) -> Result<Vec<PodUsage>>;
}
