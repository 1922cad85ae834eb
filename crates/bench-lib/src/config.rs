//! Harness configuration
//!
//! Everything that identifies cluster objects or tunes timing lives in one
//! [`HarnessConfig`] value that is passed down explicitly.

use crate::cluster::{PodTemplate, ReconcileConfig};
use crate::error::Result;
use crate::wait::RetryPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Harness configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HarnessConfig {
    /// Namespace all pods live in (created if missing, never deleted)
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Name of the pod that gets debugged
    #[serde(default = "default_target_pod")]
    pub target_pod: String,

    #[serde(default = "default_target_image")]
    pub target_image: String,

    #[serde(default = "default_target_container")]
    pub target_container: String,

    #[serde(default = "default_target_command")]
    pub target_command: Vec<String>,

    /// Pod the external tool creates to host its debug session
    #[serde(default = "default_session_pod")]
    pub session_pod: String,

    /// Container runtime socket on the node
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Image used by the external tool
    #[serde(default = "default_debug_image")]
    pub debug_image: String,

    /// Image used for ephemeral containers
    #[serde(default = "default_ephemeral_debug_image")]
    pub ephemeral_debug_image: String,

    /// Path of the external attach tool binary
    #[serde(default = "default_tool_program")]
    pub tool_program: String,

    #[serde(default = "default_kubectl_program")]
    pub kubectl_program: String,

    /// Launcher placed before kubectl, e.g. `["sudo"]`
    #[serde(default)]
    pub kubectl_prefix: Vec<String>,

    /// Command executed by the external tool in timed trials
    #[serde(default = "default_probe_command")]
    pub probe_command: String,

    /// Command executed by the external tool in memory scenarios
    #[serde(default = "default_memory_probe_command")]
    pub memory_probe_command: String,

    #[serde(default = "default_repeat_count")]
    pub repeat_count: u32,

    #[serde(default = "default_pod_poll_interval", rename = "pod_poll_interval_ms", with = "millis")]
    pub pod_poll_interval: Duration,

    #[serde(default = "default_ephemeral_poll_interval", rename = "ephemeral_poll_interval_us", with = "micros")]
    pub ephemeral_poll_interval: Duration,

    #[serde(default = "default_namespace_query_timeout", rename = "namespace_query_timeout_ms", with = "millis")]
    pub namespace_query_timeout: Duration,

    /// Upper bound for any single reconciliation wait
    #[serde(default = "default_reconcile_timeout", rename = "reconcile_timeout_ms", with = "millis")]
    pub reconcile_timeout: Duration,

    /// Upper bound for one attach: external tool run or ephemeral container status
    #[serde(default = "default_attach_timeout", rename = "attach_timeout_ms", with = "millis")]
    pub attach_timeout: Duration,

    /// Delay before a post-attach memory sample; the metrics pipeline lags
    #[serde(default = "default_settle_delay", rename = "settle_delay_ms", with = "millis")]
    pub settle_delay: Duration,

    #[serde(default = "default_startup_results")]
    pub startup_results: PathBuf,

    #[serde(default = "default_memory_results")]
    pub memory_results: PathBuf,

    /// Keep the target pod between scenarios instead of deleting it
    #[serde(default)]
    pub reuse_target: bool,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_target_pod() -> String {
    "busybox".to_string()
}

fn default_target_image() -> String {
    "busybox".to_string()
}

fn default_target_container() -> String {
    "container".to_string()
}

fn default_target_command() -> Vec<String> {
    vec!["sleep".to_string(), "3600".to_string()]
}

fn default_session_pod() -> String {
    "cntr".to_string()
}

fn default_socket_path() -> String {
    "/run/k3s/containerd/containerd.sock".to_string()
}

fn default_debug_image() -> String {
    "onestone070/lambda-cntr:latest".to_string()
}

fn default_ephemeral_debug_image() -> String {
    "onestone070/lambda-cntr:ephem".to_string()
}

fn default_tool_program() -> String {
    "./target/release/lambda-cntr".to_string()
}

fn default_kubectl_program() -> String {
    "kubectl".to_string()
}

fn default_probe_command() -> String {
    "true".to_string()
}

fn default_memory_probe_command() -> String {
    "sleep 30".to_string()
}

fn default_repeat_count() -> u32 {
    20
}

fn default_pod_poll_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_ephemeral_poll_interval() -> Duration {
    Duration::from_micros(100)
}

fn default_namespace_query_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_reconcile_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_attach_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_settle_delay() -> Duration {
    Duration::from_secs(15)
}

fn default_startup_results() -> PathBuf {
    PathBuf::from("start-up.txt")
}

fn default_memory_results() -> PathBuf {
    PathBuf::from("memory.txt")
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            target_pod: default_target_pod(),
            target_image: default_target_image(),
            target_container: default_target_container(),
            target_command: default_target_command(),
            session_pod: default_session_pod(),
            socket_path: default_socket_path(),
            debug_image: default_debug_image(),
            ephemeral_debug_image: default_ephemeral_debug_image(),
            tool_program: default_tool_program(),
            kubectl_program: default_kubectl_program(),
            kubectl_prefix: Vec::new(),
            probe_command: default_probe_command(),
            memory_probe_command: default_memory_probe_command(),
            repeat_count: default_repeat_count(),
            pod_poll_interval: default_pod_poll_interval(),
            ephemeral_poll_interval: default_ephemeral_poll_interval(),
            namespace_query_timeout: default_namespace_query_timeout(),
            reconcile_timeout: default_reconcile_timeout(),
            attach_timeout: default_attach_timeout(),
            settle_delay: default_settle_delay(),
            startup_results: default_startup_results(),
            memory_results: default_memory_results(),
            reuse_target: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from an optional file, then `ATTACH_BENCH_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("ATTACH_BENCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(" ")
                    .with_list_parse_key("target_command")
                    .with_list_parse_key("kubectl_prefix"),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Reconciler settings derived from this configuration
    pub fn reconcile(&self) -> ReconcileConfig {
        ReconcileConfig {
            pod_poll_interval: self.pod_poll_interval,
            reconcile_timeout: self.reconcile_timeout,
            retry: self.retry,
        }
    }

    /// Desired spec of the target pod
    pub fn target_template(&self) -> PodTemplate {
        PodTemplate::new(
            &self.target_container,
            &self.target_image,
            self.target_command.clone(),
        )
    }
}

/// Serde adapter for durations stored as whole milliseconds
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Serde adapter for durations stored as whole microseconds
pub(crate) mod micros {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_micros)
    }
}
