//! Ephemeral container injection through `kubectl debug`
//!
//! The debug request runs in the background; the attach counts as complete
//! once the target pod reports an ephemeral container that was not there when
//! the request was made. On a fresh pod that is the first time the status list
//! shows up at all.

use super::{
    check_exit, read_stderr, reap, AttachMechanism, AttachTarget, ColdReset, MechanismKind,
    SessionHandle,
};
use crate::cluster::ClusterApi;
use crate::config::HarnessConfig;
use crate::error::{BenchError, Result};
use crate::wait::{await_condition, retry, RetryPolicy};
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct EphemeralSettings {
    pub kubectl_program: String,
    /// Launcher placed before kubectl, e.g. `sudo`
    pub kubectl_prefix: Vec<String>,
    pub debug_image: String,
    pub poll_interval: Duration,
    pub attach_timeout: Duration,
    pub retry: RetryPolicy,
}

impl EphemeralSettings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            kubectl_program: config.kubectl_program.clone(),
            kubectl_prefix: config.kubectl_prefix.clone(),
            debug_image: config.ephemeral_debug_image.clone(),
            poll_interval: config.ephemeral_poll_interval,
            attach_timeout: config.attach_timeout,
            retry: config.retry,
        }
    }
}

enum Completion {
    Ready(Duration),
    Exited(ExitStatus),
}

/// Ephemeral container mechanism; completion is a pod status field appearing
pub struct EphemeralContainer {
    api: Arc<dyn ClusterApi>,
    settings: EphemeralSettings,
}

impl EphemeralContainer {
    pub fn new(api: Arc<dyn ClusterApi>, settings: EphemeralSettings) -> Self {
        Self { api, settings }
    }

    pub fn from_config(api: Arc<dyn ClusterApi>, config: &HarnessConfig) -> Self {
        Self::new(api, EphemeralSettings::from_config(config))
    }

    /// Full argv: `[prefix..] kubectl debug -n <namespace> [-it] <pod> --image=<image>`
    pub fn command_line(&self, target: &AttachTarget, interactive: bool) -> Vec<String> {
        let mut argv = self.settings.kubectl_prefix.clone();
        argv.push(self.settings.kubectl_program.clone());
        argv.extend(["debug".to_string(), "-n".to_string(), target.namespace.clone()]);
        if interactive {
            argv.push("-it".to_string());
        }
        argv.push(target.pod.clone());
        argv.push(format!("--image={}", self.settings.debug_image));
        argv
    }

    fn command(&self, target: &AttachTarget, interactive: bool) -> Result<(String, Command)> {
        let argv = self.command_line(target, interactive);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| BenchError::InvalidScenario("empty kubectl command line".to_string()))?;
        let mut command = Command::new(program);
        command.args(args);
        Ok((program.clone(), command))
    }

    /// Open an interactive debug shell on the caller's terminal; never timed
    pub async fn attach_interactive(&self, target: &AttachTarget) -> Result<()> {
        let (program, mut command) = self.command(target, true)?;
        info!(target = %target, image = %self.settings.debug_image, "Attaching ephemeral container interactively");

        let status = command
            .status()
            .await
            .map_err(|source| BenchError::Spawn {
                program: program.clone(),
                source,
            })?;
        check_exit(&program, status, b"")
    }

    fn program(&self) -> &str {
        self.settings
            .kubectl_prefix
            .first()
            .unwrap_or(&self.settings.kubectl_program)
    }

    async fn ephemeral_names(&self, target: &AttachTarget) -> Result<Vec<String>> {
        let observed = retry(&self.settings.retry, "get pod", || {
            self.api.get_pod(&target.namespace, &target.pod)
        })
        .await?;
        Ok(observed
            .and_then(|p| p.ephemeral_containers)
            .unwrap_or_default())
    }

    async fn fail_with_stderr(&self, mut child: Child, status: ExitStatus) -> BenchError {
        let stderr = read_stderr(&mut child).await;
        BenchError::ToolFailed {
            program: self.program().to_string(),
            status: status.to_string(),
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        }
    }
}

/// True when `observed` lists a container outside `known`; an empty list counts
fn has_new_container(observed: Option<&[String]>, known: &[String]) -> bool {
    match observed {
        Some([]) => known.is_empty(),
        Some(names) => names.iter().any(|name| !known.contains(name)),
        None => false,
    }
}

#[async_trait]
impl AttachMechanism for EphemeralContainer {
    fn kind(&self) -> MechanismKind {
        MechanismKind::EphemeralContainer
    }

    fn session_pod(&self) -> Option<&str> {
        None
    }

    fn cold_reset(&self) -> ColdReset {
        // Ephemeral containers cannot be removed from a pod
        ColdReset::DeleteTargetPod
    }

    async fn invoke(&self, target: &AttachTarget) -> Result<SessionHandle> {
        let (program, mut command) = self.command(target, false)?;
        let known = self.ephemeral_names(target).await?;
        debug!(
            target = %target,
            argv = ?self.command_line(target, false),
            known = known.len(),
            "Requesting ephemeral container"
        );

        let started = Instant::now();
        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BenchError::Spawn { program, source })?;

        Ok(SessionHandle::pending(target.clone(), started, Some(child)).with_known_ephemeral(known))
    }

    async fn await_completion(&self, mut handle: SessionHandle) -> Result<Duration> {
        if let Some(elapsed) = handle.finished {
            return Ok(elapsed);
        }

        let api = self.api.as_ref();
        let policy = self.settings.retry;
        let started = handle.started;
        let namespace = handle.target.namespace.as_str();
        let pod = handle.target.pod.as_str();
        let what = format!("ephemeral container status on {}", handle.target);

        let known = std::mem::take(&mut handle.known_ephemeral);
        let known = known.as_slice();
        let mut child = handle.child.take();
        let child_slot = &mut child;

        let outcome = await_condition(
            &what,
            self.settings.poll_interval,
            self.settings.attach_timeout,
            move || {
                let exited = match child_slot.as_mut() {
                    Some(c) => c.try_wait(),
                    None => Ok(None),
                };
                async move {
                    let observed = retry(&policy, "get pod", || api.get_pod(namespace, pod)).await?;
                    let names = observed.and_then(|p| p.ephemeral_containers);
                    if has_new_container(names.as_deref(), known) {
                        return Ok(Some(Completion::Ready(started.elapsed())));
                    }
                    match exited? {
                        Some(status) if !status.success() => Ok(Some(Completion::Exited(status))),
                        _ => Ok(None),
                    }
                }
            },
        )
        .await;

        match outcome {
            Ok(Completion::Ready(elapsed)) => {
                if let Some(child) = child {
                    reap(self.program(), child).await;
                }
                debug!(target = %handle.target, elapsed_ms = elapsed.as_millis(), "Ephemeral container observed");
                Ok(elapsed)
            }
            Ok(Completion::Exited(status)) => match child {
                Some(child) => Err(self.fail_with_stderr(child, status).await),
                None => Err(BenchError::ToolFailed {
                    program: self.program().to_string(),
                    status: status.to_string(),
                    stderr: String::new(),
                }),
            },
            Err(e) => {
                if let Some(child) = child {
                    reap(self.program(), child).await;
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeCluster;

    fn settings(program: &str, prefix: &[&str]) -> EphemeralSettings {
        EphemeralSettings {
            kubectl_program: program.to_string(),
            kubectl_prefix: prefix.iter().map(|s| s.to_string()).collect(),
            debug_image: "debug:ephem".to_string(),
            poll_interval: Duration::from_micros(100),
            attach_timeout: Duration::from_secs(5),
            retry: RetryPolicy::none(),
        }
    }

    fn target() -> AttachTarget {
        AttachTarget::new("default", "busybox")
    }

    #[test]
    fn test_command_line() {
        let fake = Arc::new(FakeCluster::new());
        let mechanism = EphemeralContainer::new(fake, settings("kubectl", &["sudo"]));

        assert_eq!(
            mechanism.command_line(&target(), false),
            vec!["sudo", "kubectl", "debug", "-n", "default", "busybox", "--image=debug:ephem"]
        );
        assert_eq!(
            mechanism.command_line(&target(), true),
            vec!["sudo", "kubectl", "debug", "-n", "default", "-it", "busybox", "--image=debug:ephem"]
        );
        assert_eq!(mechanism.cold_reset(), ColdReset::DeleteTargetPod);
        assert!(mechanism.session_pod().is_none());
    }

    #[tokio::test]
    async fn test_completion_waits_for_ephemeral_status() {
        let fake = Arc::new(FakeCluster::new());
        fake.insert_running_pod("default", "busybox");
        fake.schedule_ephemeral("default", "busybox", "debugger-abc", 3);
        // `true` stands in for kubectl and exits successfully right away
        let mechanism = EphemeralContainer::new(fake.clone(), settings("true", &[]));

        let handle = mechanism.invoke(&target()).await.unwrap();
        let elapsed = mechanism.await_completion(handle).await.unwrap();

        assert!(elapsed < Duration::from_secs(5));
        assert!(fake.get_calls() >= 4);
    }

    #[test]
    fn test_new_container_detection() {
        let known = vec!["debugger-old".to_string()];
        let fresh = vec!["debugger-old".to_string(), "debugger-new".to_string()];

        assert!(!has_new_container(None, &[]));
        assert!(has_new_container(Some(&[][..]), &[]));
        assert!(!has_new_container(Some(known.as_slice()), &known));
        assert!(has_new_container(Some(fresh.as_slice()), &known));
    }

    #[tokio::test]
    async fn test_already_attached_target_waits_for_new_container() {
        let fake = Arc::new(FakeCluster::new());
        fake.insert_running_pod("default", "busybox");
        fake.schedule_ephemeral("default", "busybox", "debugger-old", 0);
        fake.schedule_ephemeral("default", "busybox", "debugger-new", 4);
        let mechanism = EphemeralContainer::new(fake.clone(), settings("true", &[]));

        let handle = mechanism.invoke(&target()).await.unwrap();
        assert_eq!(handle.known_ephemeral, vec!["debugger-old".to_string()]);
        mechanism.await_completion(handle).await.unwrap();

        // One read for the baseline, then polls until the new container shows up
        assert!(fake.get_calls() >= 5);
    }

    #[tokio::test]
    async fn test_already_attached_target_lets_request_run() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("requested");
        let fake = Arc::new(FakeCluster::new());
        fake.insert_running_pod("default", "busybox");
        fake.schedule_ephemeral("default", "busybox", "debugger-old", 0);
        let script = format!("sleep 0.3; touch {}", marker.display());
        let mut settings = settings("kubectl", &["sh", "-c", script.as_str()]);
        settings.attach_timeout = Duration::from_secs(1);
        let mechanism = EphemeralContainer::new(fake, settings);

        let handle = mechanism.invoke(&target()).await.unwrap();
        let result = mechanism.await_completion(handle).await;

        // The old container never counts, so the request runs to completion
        assert!(matches!(result, Err(BenchError::TimedOut { .. })));
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_long_running_request_is_reaped() {
        let fake = Arc::new(FakeCluster::new());
        fake.insert_running_pod("default", "busybox");
        fake.schedule_ephemeral("default", "busybox", "debugger-abc", 2);
        // `sh -c "sleep 30" kubectl debug ...` keeps running like `kubectl debug -it`
        let mechanism = EphemeralContainer::new(fake, settings("kubectl", &["sh", "-c", "sleep 30"]));

        let started = Instant::now();
        let handle = mechanism.invoke(&target()).await.unwrap();
        mechanism.await_completion(handle).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_failed_request_is_surfaced() {
        let fake = Arc::new(FakeCluster::new());
        fake.insert_running_pod("default", "busybox");
        let mechanism = EphemeralContainer::new(fake, settings("false", &[]));

        let handle = mechanism.invoke(&target()).await.unwrap();
        let result = mechanism.await_completion(handle).await;
        assert!(matches!(result, Err(BenchError::ToolFailed { .. })));
    }

    #[tokio::test]
    async fn test_completion_times_out() {
        let fake = Arc::new(FakeCluster::new());
        fake.insert_running_pod("default", "busybox");
        let mut settings = settings("true", &[]);
        settings.attach_timeout = Duration::from_millis(20);
        let mechanism = EphemeralContainer::new(fake, settings);

        let handle = mechanism.invoke(&target()).await.unwrap();
        let result = mechanism.await_completion(handle).await;
        assert!(matches!(result, Err(BenchError::TimedOut { .. })));
    }
}
