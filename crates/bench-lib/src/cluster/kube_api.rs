//! `ClusterApi` backed by a live Kubernetes API server

use super::{ClusterApi, ContainerUsage, ObservedPod, PodPhase, PodTemplate, PodUsage};
use crate::error::{BenchError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, Namespace, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, PostParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Kubernetes API client scoped to what the harness needs
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    /// Bound on the namespace listing used by `ensure_namespace`
    namespace_query_timeout: Duration,
}

impl KubeCluster {
    pub fn new(client: Client, namespace_query_timeout: Duration) -> Self {
        Self {
            client,
            namespace_query_timeout,
        }
    }

    /// Connect using an explicit kubeconfig, or the default discovery chain
    pub async fn connect(
        kubeconfig: Option<&Path>,
        namespace_query_timeout: Duration,
    ) -> Result<Self> {
        let client = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| BenchError::api("read kubeconfig", e.to_string()))?;
                let config =
                    kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .map_err(|e| BenchError::api("load kubeconfig", e.to_string()))?;
                Client::try_from(config).map_err(|e| BenchError::api("connect", e.to_string()))?
            }
            None => Client::try_default()
                .await
                .map_err(|e| BenchError::api("connect", e.to_string()))?,
        };

        info!(
            default_namespace = %client.default_namespace(),
            "Kubernetes API client initialized"
        );
        Ok(Self::new(client, namespace_query_timeout))
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// `metrics.k8s.io/v1beta1` pod metrics, read as dynamic objects
    fn pod_metrics(&self, namespace: &str) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics");
        let resource = ApiResource::from_gvk_with_plural(&gvk, "pods");
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }
}

/// Whether a kube error means the object does not exist
fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}

/// Classify a kube error into the harness taxonomy
fn classify(operation: &str, error: kube::Error) -> BenchError {
    let retryable = match &error {
        kube::Error::Api(response) => response.code == 429 || response.code >= 500,
        kube::Error::HyperError(_) | kube::Error::Service(_) => true,
        _ => false,
    };

    if retryable {
        BenchError::transient(operation, error.to_string())
    } else {
        BenchError::api(operation, error.to_string())
    }
}

fn observe(namespace: &str, name: &str, pod: &Pod) -> ObservedPod {
    let status = pod.status.as_ref();
    let phase = PodPhase::from_status(
        status.and_then(|s| s.phase.as_deref()),
        pod.metadata.deletion_timestamp.is_some(),
    );
    let ephemeral_containers = status
        .and_then(|s| s.ephemeral_container_statuses.as_ref())
        .map(|statuses| statuses.iter().map(|c| c.name.clone()).collect());

    ObservedPod {
        namespace: namespace.to_string(),
        name: name.to_string(),
        phase,
        ephemeral_containers,
    }
}

/// Build the API object for a single-container pod
fn build_pod(namespace: &str, name: &str, template: &PodTemplate) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: template.container_name.clone(),
                image: Some(template.image.clone()),
                command: Some(template.command.clone()),
                ..Default::default()
            }],
            restart_policy: Some(template.restart_policy.clone()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Extract per-container usage from a `PodMetrics` object
fn parse_pod_usage(object: &DynamicObject) -> Option<PodUsage> {
    let pod_name = object.metadata.name.clone()?;
    let containers = object
        .data
        .get("containers")
        .and_then(|c| c.as_array())
        .map(|containers| {
            containers
                .iter()
                .filter_map(|c| {
                    let name = c.get("name")?.as_str()?;
                    let memory = c.get("usage")?.get("memory")?.as_str()?;
                    Some(ContainerUsage {
                        name: name.to_string(),
                        memory: memory.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(PodUsage {
        pod_name,
        containers,
    })
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());

        let listed = tokio::time::timeout(
            self.namespace_query_timeout,
            api.list(&ListParams::default()),
        )
        .await
        .map_err(|_| {
            BenchError::transient(
                "list namespaces",
                format!("no response within {:?}", self.namespace_query_timeout),
            )
        })?;

        match listed {
            Ok(list) => Ok(list
                .items
                .into_iter()
                .filter_map(|ns| ns.metadata.name)
                .collect()),
            Err(e) if is_not_found(&e) => Ok(Vec::new()),
            Err(e) => Err(classify("list namespaces", e)),
        }
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        api.create(&PostParams::default(), &namespace)
            .await
            .map_err(|e| classify("create namespace", e))?;
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<ObservedPod>> {
        match self.pods(namespace).get_opt(name).await {
            Ok(pod) => Ok(pod.map(|p| observe(namespace, name, &p))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(classify("get pod", e)),
        }
    }

    async fn create_pod(&self, namespace: &str, name: &str, template: &PodTemplate) -> Result<()> {
        let pod = build_pod(namespace, name, template);
        debug!(pod = %name, namespace = %namespace, image = %template.image, "Pod manifest built");

        self.pods(namespace)
            .create(&PostParams::default(), &pod)
            .await
            .map_err(|e| classify("create pod", e))?;
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        match self.pods(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(classify("delete pod", e)),
        }
    }

    async fn list_pod_usage(&self, namespace: &str) -> Result<Vec<PodUsage>> {
        let list = match self.pod_metrics(namespace).list(&ListParams::default()).await {
            Ok(list) => list,
            Err(e) if is_not_found(&e) => return Ok(Vec::new()),
            Err(e) => return Err(classify("list pod metrics", e)),
        };

        Ok(list.items.iter().filter_map(parse_pod_usage).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerStatus, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::error::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn test_classify_errors() {
        assert!(is_not_found(&api_error(404)));
        assert!(!is_not_found(&api_error(500)));
        assert!(classify("get pod", api_error(503)).is_retryable());
        assert!(classify("get pod", api_error(429)).is_retryable());
        assert!(!classify("get pod", api_error(403)).is_retryable());
    }

    #[test]
    fn test_build_pod() {
        let template = PodTemplate::new("container", "busybox", vec!["sleep".into(), "3600".into()]);
        let pod = build_pod("bench", "busybox", &template);

        assert_eq!(pod.metadata.name.as_deref(), Some("busybox"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("bench"));
        let spec = pod.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(spec.containers[0].name, "container");
        assert_eq!(spec.containers[0].image.as_deref(), Some("busybox"));
        assert_eq!(
            spec.containers[0].command,
            Some(vec!["sleep".to_string(), "3600".to_string()])
        );
    }

    #[test]
    fn test_observe_pod_status() {
        let mut pod = Pod::default();
        pod.status = Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        });
        let observed = observe("bench", "busybox", &pod);
        assert_eq!(observed.phase, PodPhase::Running);
        assert_eq!(observed.ephemeral_containers, None);

        pod.status = Some(PodStatus {
            phase: Some("Running".to_string()),
            ephemeral_container_statuses: Some(vec![ContainerStatus {
                name: "debugger-x7k2q".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        pod.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        let observed = observe("bench", "busybox", &pod);
        assert_eq!(observed.phase, PodPhase::Terminating);
        assert_eq!(
            observed.ephemeral_containers,
            Some(vec!["debugger-x7k2q".to_string()])
        );
    }

    #[test]
    fn test_parse_pod_usage() {
        let object: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "metrics.k8s.io/v1beta1",
            "kind": "PodMetrics",
            "metadata": { "name": "busybox", "namespace": "default" },
            "timestamp": "2024-01-01T00:00:00Z",
            "window": "15s",
            "containers": [
                { "name": "container", "usage": { "cpu": "0", "memory": "412Ki" } },
                { "name": "broken", "usage": { "cpu": "0" } }
            ]
        }))
        .unwrap();

        let usage = parse_pod_usage(&object).unwrap();
        assert_eq!(usage.pod_name, "busybox");
        assert_eq!(
            usage.containers,
            vec![ContainerUsage {
                name: "container".to_string(),
                memory: "412Ki".to_string(),
            }]
        );
    }
}
