//! Idempotent namespace and pod reconciliation
//!
//! Every operation observes before it acts and polls after it acts; nothing
//! about cluster state is assumed.

use super::{ClusterApi, ObservedPod, PodPhase, PodTemplate};
use crate::error::{BenchError, Result};
use crate::observability::BenchMetrics;
use crate::wait::{await_condition, retry, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for reconciliation polling
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Interval between pod state polls (default: 10 ms)
    pub pod_poll_interval: Duration,
    /// Upper bound on any single wait for a pod to converge
    pub reconcile_timeout: Duration,
    /// Retry policy for transient API failures
    pub retry: RetryPolicy,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            pod_poll_interval: Duration::from_millis(10),
            reconcile_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }
}

/// Drives namespaces and pods toward a desired state
#[derive(Clone)]
pub struct Reconciler {
    api: Arc<dyn ClusterApi>,
    config: ReconcileConfig,
    metrics: BenchMetrics,
}

impl Reconciler {
    pub fn new(api: Arc<dyn ClusterApi>, config: ReconcileConfig) -> Self {
        Self {
            api,
            config,
            metrics: BenchMetrics::new(),
        }
    }

    /// The underlying cluster API, for completion checks that poll pod status
    pub fn api(&self) -> Arc<dyn ClusterApi> {
        Arc::clone(&self.api)
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Create the namespace unless it is already listed
    pub async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let api = self.api.as_ref();
        let namespaces = retry(&self.config.retry, "list namespaces", || api.list_namespaces()).await?;

        if namespaces.iter().any(|ns| ns == name) {
            info!(namespace = %name, "Using existing namespace");
            return Ok(());
        }

        info!(namespace = %name, "Creating namespace");
        retry(&self.config.retry, "create namespace", || api.create_namespace(name)).await?;
        self.metrics.inc_mutation("create_namespace");
        Ok(())
    }

    /// Observe a pod once, resolving "not found" to `None`
    pub async fn observe_pod(&self, namespace: &str, name: &str) -> Result<Option<ObservedPod>> {
        let api = self.api.as_ref();
        retry(&self.config.retry, "get pod", || api.get_pod(namespace, name)).await
    }

    /// Make sure the pod exists and has left `Pending`
    ///
    /// An existing pod is returned as observed without any mutating request.
    /// A pod still terminating from an earlier deletion is waited out first.
    pub async fn deploy_pod(
        &self,
        namespace: &str,
        name: &str,
        template: &PodTemplate,
    ) -> Result<ObservedPod> {
        match self.observe_pod(namespace, name).await? {
            Some(pod) if pod.phase != PodPhase::Terminating => {
                info!(pod = %name, namespace = %namespace, phase = %pod.phase, "Pod already exists");
                return Ok(pod);
            }
            Some(_) => {
                info!(pod = %name, namespace = %namespace, "Pod is terminating, waiting before recreating it");
                self.wait_absent(namespace, name).await?;
            }
            None => {}
        }

        info!(pod = %name, namespace = %namespace, image = %template.image, "Pod does not exist, creating it");
        let api = self.api.as_ref();
        retry(&self.config.retry, "create pod", || {
            api.create_pod(namespace, name, template)
        })
        .await?;
        self.metrics.inc_mutation("create_pod");

        let policy = self.config.retry;
        let what = format!("pod {}/{} to leave Pending", namespace, name);
        let pod = await_condition(
            &what,
            self.config.pod_poll_interval,
            self.config.reconcile_timeout,
            move || async move {
                let observed = retry(&policy, "get pod", || api.get_pod(namespace, name)).await?;
                // Not yet visible counts as still pending
                Ok(observed.filter(|pod| pod.phase != PodPhase::Pending))
            },
        )
        .await
        .map_err(|e| self.note_timeout(e))?;

        info!(pod = %name, namespace = %namespace, phase = %pod.phase, "Pod created");
        Ok(pod)
    }

    /// Delete the pod if present and wait until it is gone
    ///
    /// Returns whether a deletion was issued.
    pub async fn delete_pod(&self, namespace: &str, name: &str) -> Result<bool> {
        if self.observe_pod(namespace, name).await?.is_none() {
            debug!(pod = %name, namespace = %namespace, "Pod does not exist, nothing to delete");
            return Ok(false);
        }

        info!(pod = %name, namespace = %namespace, "Deleting pod");
        let api = self.api.as_ref();
        retry(&self.config.retry, "delete pod", || api.delete_pod(namespace, name)).await?;
        self.metrics.inc_mutation("delete_pod");

        self.wait_absent(namespace, name).await?;
        info!(pod = %name, namespace = %namespace, "Pod deleted");
        Ok(true)
    }

    /// Poll until the pod can no longer be found
    async fn wait_absent(&self, namespace: &str, name: &str) -> Result<()> {
        let api = self.api.as_ref();
        let policy = self.config.retry;
        let what = format!("pod {}/{} to disappear", namespace, name);

        await_condition(
            &what,
            self.config.pod_poll_interval,
            self.config.reconcile_timeout,
            move || async move {
                let observed = retry(&policy, "get pod", || api.get_pod(namespace, name)).await?;
                Ok(if observed.is_none() { Some(()) } else { None })
            },
        )
        .await
        .map_err(|e| self.note_timeout(e))
    }

    fn note_timeout(&self, error: BenchError) -> BenchError {
        if matches!(error, BenchError::TimedOut { .. }) {
            self.metrics.inc_wait_timeouts();
        }
        error
    }
}
