//! Namespace-joining attach tool driven as a blocking subprocess

use super::{check_exit, AttachMechanism, AttachTarget, ColdReset, MechanismKind, SessionHandle};
use crate::config::HarnessConfig;
use crate::error::{BenchError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ExternalToolSettings {
    pub program: String,
    pub socket_path: String,
    pub debug_image: String,
    /// Pod the tool creates to host its session
    pub session_pod: String,
    /// Command run by `execute`
    pub command: String,
    /// Upper bound for one invocation; the process is killed past it
    pub timeout: Duration,
}

impl ExternalToolSettings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            program: config.tool_program.clone(),
            socket_path: config.socket_path.clone(),
            debug_image: config.debug_image.clone(),
            session_pod: config.session_pod.clone(),
            command: config.probe_command.clone(),
            timeout: config.attach_timeout,
        }
    }
}

/// External tool; completion is process exit
#[derive(Debug, Clone)]
pub struct ExternalTool {
    settings: ExternalToolSettings,
}

impl ExternalTool {
    pub fn new(settings: ExternalToolSettings) -> Self {
        Self { settings }
    }

    /// Tool running the trivial probe command used for timed trials
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(ExternalToolSettings::from_config(config))
    }

    /// Tool running the long-lived command used while memory is sampled
    pub fn for_memory(config: &HarnessConfig) -> Self {
        Self::new(ExternalToolSettings {
            command: config.memory_probe_command.clone(),
            ..ExternalToolSettings::from_config(config)
        })
    }

    pub fn settings(&self) -> &ExternalToolSettings {
        &self.settings
    }

    fn common_args(&self, target: &AttachTarget) -> [String; 6] {
        [
            "-s".to_string(),
            self.settings.socket_path.clone(),
            "-n".to_string(),
            target.namespace.clone(),
            "-i".to_string(),
            self.settings.debug_image.clone(),
        ]
    }

    /// `execute <pod> <command> -s <socket> -n <namespace> -i <image>`
    pub fn execute_args(&self, target: &AttachTarget) -> Vec<String> {
        let mut args = vec![
            "execute".to_string(),
            target.pod.clone(),
            self.settings.command.clone(),
        ];
        args.extend(self.common_args(target));
        args
    }

    /// `attach <pod> -s <socket> -n <namespace> -i <image>`
    pub fn attach_args(&self, target: &AttachTarget) -> Vec<String> {
        let mut args = vec!["attach".to_string(), target.pod.clone()];
        args.extend(self.common_args(target));
        args
    }

    /// Open an interactive session on the caller's terminal; never timed
    pub async fn attach_interactive(&self, target: &AttachTarget) -> Result<()> {
        let args = self.attach_args(target);
        info!(program = %self.settings.program, args = ?args, "Attaching interactively");

        let status = Command::new(&self.settings.program)
            .args(&args)
            .status()
            .await
            .map_err(|source| BenchError::Spawn {
                program: self.settings.program.clone(),
                source,
            })?;

        check_exit(&self.settings.program, status, b"")
    }
}

#[async_trait]
impl AttachMechanism for ExternalTool {
    fn kind(&self) -> MechanismKind {
        MechanismKind::ExternalTool
    }

    fn session_pod(&self) -> Option<&str> {
        Some(&self.settings.session_pod)
    }

    fn cold_reset(&self) -> ColdReset {
        ColdReset::DeleteSessionPod(self.settings.session_pod.clone())
    }

    async fn invoke(&self, target: &AttachTarget) -> Result<SessionHandle> {
        let args = self.execute_args(target);
        debug!(program = %self.settings.program, args = ?args, "Invoking external tool");

        let started = Instant::now();
        let running = Command::new(&self.settings.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();
        let output = match timeout(self.settings.timeout, running).await {
            Ok(result) => result.map_err(|source| BenchError::Spawn {
                program: self.settings.program.clone(),
                source,
            })?,
            Err(_) => {
                let waited = started.elapsed();
                warn!(program = %self.settings.program, target = %target, waited_ms = waited.as_millis(), "External tool did not finish, killed");
                return Err(BenchError::TimedOut {
                    what: format!("{} on {}", self.settings.program, target),
                    waited,
                });
            }
        };
        let elapsed = started.elapsed();

        check_exit(&self.settings.program, output.status, &output.stderr)?;
        Ok(SessionHandle::completed(target.clone(), started, elapsed))
    }

    async fn await_completion(&self, handle: SessionHandle) -> Result<Duration> {
        // invoke only returns once the process has exited
        Ok(handle.finished.unwrap_or_else(|| handle.started.elapsed()))
    }
}
