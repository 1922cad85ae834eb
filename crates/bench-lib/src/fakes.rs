//! In-memory fake of the cluster API for unit tests
//!
//! `FakeCluster` models just enough eventual consistency to exercise the
//! reconciler: new pods stay `Pending` for a configurable number of polls,
//! deleted pods stay `Terminating` for a configurable number of polls, and
//! ephemeral container statuses can be scheduled to appear later.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cluster::{ClusterApi, ObservedPod, PodPhase, PodTemplate, PodUsage};
use crate::error::{BenchError, Result};

#[derive(Debug, Clone)]
struct FakePod {
    pending_left: u32,
    /// Polls left before a deleted pod disappears
    deleting_left: Option<u32>,
    ephemeral: Option<Vec<String>>,
    /// Scheduled ephemeral container and the polls left until it shows up
    ephemeral_pending: Option<(String, u32)>,
}

impl FakePod {
    fn observe(&self, namespace: &str, name: &str) -> ObservedPod {
        let phase = if self.deleting_left.is_some() {
            PodPhase::Terminating
        } else if self.pending_left > 0 {
            PodPhase::Pending
        } else {
            PodPhase::Running
        };

        ObservedPod {
            namespace: namespace.to_string(),
            name: name.to_string(),
            phase,
            ephemeral_containers: self.ephemeral.clone(),
        }
    }
}

/// In-memory cluster backed by a `HashMap<(namespace, name), pod>`.
#[derive(Debug, Default)]
pub struct FakeCluster {
    namespaces: Mutex<Vec<String>>,
    pods: Mutex<HashMap<(String, String), FakePod>>,
    usage: Mutex<BTreeMap<String, Vec<PodUsage>>>,
    created: Mutex<Vec<(String, PodTemplate)>>,
    events: Mutex<Vec<String>>,
    pending_polls: u32,
    delete_polls: u32,
    mutations: AtomicUsize,
    get_calls: AtomicUsize,
    failing_gets: AtomicU32,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(self, name: &str) -> Self {
        self.namespaces.lock().unwrap().push(name.to_string());
        self
    }

    /// Number of polls a newly created pod reports `Pending`
    pub fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Number of polls a deleted pod keeps reporting `Terminating`
    pub fn with_delete_polls(mut self, polls: u32) -> Self {
        self.delete_polls = polls;
        self
    }

    /// Make the next `count` pod reads fail with a transient error
    pub fn fail_next_gets(&self, count: u32) {
        self.failing_gets.store(count, Ordering::SeqCst);
    }

    /// Add a running pod the way an external tool would, bypassing the reconciler
    pub fn insert_running_pod(&self, namespace: &str, name: &str) {
        self.pods.lock().unwrap().insert(
            (namespace.to_string(), name.to_string()),
            FakePod {
                pending_left: 0,
                deleting_left: None,
                ephemeral: None,
                ephemeral_pending: None,
            },
        );
        self.events
            .lock()
            .unwrap()
            .push(format!("external {}", name));
    }

    /// Report `container` in the pod's ephemeral statuses after `after_polls` reads
    pub fn schedule_ephemeral(&self, namespace: &str, name: &str, container: &str, after_polls: u32) {
        let mut pods = self.pods.lock().unwrap();
        if let Some(pod) = pods.get_mut(&(namespace.to_string(), name.to_string())) {
            if after_polls == 0 {
                pod.ephemeral
                    .get_or_insert_with(Vec::new)
                    .push(container.to_string());
            } else {
                pod.ephemeral_pending = Some((container.to_string(), after_polls));
            }
        }
    }

    pub fn set_usage(&self, namespace: &str, usage: Vec<PodUsage>) {
        self.usage
            .lock()
            .unwrap()
            .insert(namespace.to_string(), usage);
    }

    /// Inspect a pod without counting as a poll
    pub fn pod(&self, namespace: &str, name: &str) -> Option<ObservedPod> {
        self.pods
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .map(|p| p.observe(namespace, name))
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces.lock().unwrap().clone()
    }

    /// Templates passed to `create_pod` for the given pod name, in order
    pub fn created_templates(&self, name: &str) -> Vec<PodTemplate> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, t)| t.clone())
            .collect()
    }

    /// Mutating requests in order, e.g. `"create busybox"`, `"delete cntr"`
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn record(&self, event: String) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        Ok(self.namespaces())
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let mut namespaces = self.namespaces.lock().unwrap();
        if namespaces.iter().any(|ns| ns == name) {
            return Err(BenchError::api("create namespace", "already exists"));
        }
        namespaces.push(name.to_string());
        drop(namespaces);
        self.record(format!("create namespace {}", name));
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<ObservedPod>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);

        let failing = self.failing_gets.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_gets.store(failing - 1, Ordering::SeqCst);
            return Err(BenchError::transient("get pod", "injected failure"));
        }

        let key = (namespace.to_string(), name.to_string());
        let mut pods = self.pods.lock().unwrap();
        let Some(pod) = pods.get_mut(&key) else {
            return Ok(None);
        };

        let observed = pod.observe(namespace, name);

        // Advance the simulated cluster by one poll
        let deleting = pod.deleting_left;
        match deleting {
            Some(0) => {
                pods.remove(&key);
                return Ok(None);
            }
            Some(left) => pod.deleting_left = Some(left - 1),
            None => {}
        }
        pod.pending_left = pod.pending_left.saturating_sub(1);
        if let Some((container, left)) = pod.ephemeral_pending.take() {
            if left <= 1 {
                pod.ephemeral.get_or_insert_with(Vec::new).push(container);
            } else {
                pod.ephemeral_pending = Some((container, left - 1));
            }
        }

        Ok(Some(observed))
    }

    async fn create_pod(&self, namespace: &str, name: &str, template: &PodTemplate) -> Result<()> {
        let key = (namespace.to_string(), name.to_string());
        let mut pods = self.pods.lock().unwrap();
        if pods.contains_key(&key) {
            return Err(BenchError::api("create pod", "already exists"));
        }
        pods.insert(
            key,
            FakePod {
                pending_left: self.pending_polls,
                deleting_left: None,
                ephemeral: None,
                ephemeral_pending: None,
            },
        );
        drop(pods);

        self.created
            .lock()
            .unwrap()
            .push((name.to_string(), template.clone()));
        self.record(format!("create {}", name));
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let key = (namespace.to_string(), name.to_string());
        let mut pods = self.pods.lock().unwrap();
        if let Some(pod) = pods.get_mut(&key) {
            if pod.deleting_left.is_none() {
                if self.delete_polls == 0 {
                    pods.remove(&key);
                } else {
                    pod.deleting_left = Some(self.delete_polls);
                }
            }
        }
        drop(pods);

        self.record(format!("delete {}", name));
        Ok(())
    }

    async fn list_pod_usage(&self, namespace: &str) -> Result<Vec<PodUsage>> {
        Ok(self
            .usage
            .lock()
            .unwrap()
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> PodTemplate {
        PodTemplate::new("container", "busybox", vec!["sleep".into(), "3600".into()])
    }

    #[tokio::test]
    async fn test_fake_pod_lifecycle() {
        let fake = FakeCluster::new().with_pending_polls(1).with_delete_polls(1);

        fake.create_pod("default", "busybox", &template()).await.unwrap();
        let first = fake.get_pod("default", "busybox").await.unwrap().unwrap();
        assert_eq!(first.phase, PodPhase::Pending);
        let second = fake.get_pod("default", "busybox").await.unwrap().unwrap();
        assert_eq!(second.phase, PodPhase::Running);

        fake.delete_pod("default", "busybox").await.unwrap();
        let terminating = fake.get_pod("default", "busybox").await.unwrap().unwrap();
        assert_eq!(terminating.phase, PodPhase::Terminating);
        assert!(fake.get_pod("default", "busybox").await.unwrap().is_none());

        assert_eq!(fake.events(), vec!["create busybox", "delete busybox"]);
    }

    #[tokio::test]
    async fn test_fake_scheduled_ephemeral_container() {
        let fake = FakeCluster::new();
        fake.insert_running_pod("default", "busybox");
        fake.schedule_ephemeral("default", "busybox", "debugger", 2);

        let first = fake.get_pod("default", "busybox").await.unwrap().unwrap();
        assert!(first.ephemeral_containers.is_none());
        let second = fake.get_pod("default", "busybox").await.unwrap().unwrap();
        assert!(second.ephemeral_containers.is_none());
        let third = fake.get_pod("default", "busybox").await.unwrap().unwrap();
        assert_eq!(third.ephemeral_containers, Some(vec!["debugger".to_string()]));
    }
}
