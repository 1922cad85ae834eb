//! Attach mechanisms
//!
//! Both mechanisms sit behind [`AttachMechanism`], so the scenario runner
//! never branches on which one it drives. Their completion boundaries differ:
//! the external tool is done when its process exits, an ephemeral container is
//! done when the target pod reports an ephemeral container it did not report
//! before the request.

mod ephemeral;
mod external_tool;

pub use ephemeral::{EphemeralContainer, EphemeralSettings};
pub use external_tool::{ExternalTool, ExternalToolSettings};

use crate::error::{BenchError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tracing::debug;

/// Which attach mechanism a scenario exercises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MechanismKind {
    ExternalTool,
    EphemeralContainer,
}

impl MechanismKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MechanismKind::ExternalTool => "external_tool",
            MechanismKind::EphemeralContainer => "ephemeral_container",
        }
    }

    /// Prefix of every results label produced for this mechanism
    pub fn label_prefix(&self) -> &'static str {
        match self {
            MechanismKind::ExternalTool => "LAMBDA",
            MechanismKind::EphemeralContainer => "EPHEM",
        }
    }
}

impl fmt::Display for MechanismKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What has to be deleted to put the next trial back into a cold state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColdReset {
    /// Delete the mechanism's debug-session pod
    DeleteSessionPod(String),
    /// Delete the target pod; the next trial redeploys it
    DeleteTargetPod,
}

/// The pod a mechanism attaches to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachTarget {
    pub namespace: String,
    pub pod: String,
}

impl AttachTarget {
    pub fn new(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
        }
    }
}

impl fmt::Display for AttachTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod)
    }
}

/// An in-flight attach, created by [`AttachMechanism::invoke`]
#[derive(Debug)]
pub struct SessionHandle {
    pub target: AttachTarget,
    /// Taken immediately before the mechanism was invoked
    pub started: Instant,
    /// Set when invocation already observed completion
    pub finished: Option<Duration>,
    /// Process still running in the background, if any
    pub child: Option<Child>,
    /// Ephemeral containers the target already had before invocation
    pub known_ephemeral: Vec<String>,
}

impl SessionHandle {
    /// A session whose completion was observed during invocation
    pub fn completed(target: AttachTarget, started: Instant, elapsed: Duration) -> Self {
        Self {
            target,
            started,
            finished: Some(elapsed),
            child: None,
            known_ephemeral: Vec::new(),
        }
    }

    /// A session still converging, optionally backed by a running process
    pub fn pending(target: AttachTarget, started: Instant, child: Option<Child>) -> Self {
        Self {
            target,
            started,
            finished: None,
            child,
            known_ephemeral: Vec::new(),
        }
    }

    pub fn with_known_ephemeral(mut self, names: Vec<String>) -> Self {
        self.known_ephemeral = names;
        self
    }
}

/// A way of attaching a debugging environment to a running pod
#[async_trait]
pub trait AttachMechanism: Send + Sync {
    fn kind(&self) -> MechanismKind;

    /// Prefix used for results labels
    fn label(&self) -> &'static str {
        self.kind().label_prefix()
    }

    /// Name of the separate pod this mechanism creates, if it creates one
    fn session_pod(&self) -> Option<&str>;

    fn cold_reset(&self) -> ColdReset;

    /// Start attaching to `target`
    async fn invoke(&self, target: &AttachTarget) -> Result<SessionHandle>;

    /// Block until the attach is complete; returns the time since invocation started
    async fn await_completion(&self, handle: SessionHandle) -> Result<Duration>;
}

/// Turn a finished process into `ToolFailed` unless it exited successfully
pub(crate) fn check_exit(program: &str, status: ExitStatus, stderr: &[u8]) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    Err(BenchError::ToolFailed {
        program: program.to_string(),
        status: status.to_string(),
        stderr: String::from_utf8_lossy(stderr).trim().to_string(),
    })
}

/// Kill a background process if it is still running and wait for it
pub(crate) async fn reap(program: &str, mut child: Child) {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(program, status = %status, "Background process already exited");
        }
        _ => {
            if let Err(e) = child.start_kill() {
                debug!(program, error = %e, "Failed to signal background process");
            }
            match child.wait().await {
                Ok(status) => debug!(program, status = %status, "Background process reaped"),
                Err(e) => debug!(program, error = %e, "Failed to reap background process"),
            }
        }
    }
}

/// Drain whatever the process wrote to its piped stderr
pub(crate) async fn read_stderr(child: &mut Child) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Some(mut stderr) = child.stderr.take() {
        // Best effort; the exit status is what matters
        let _ = stderr.read_to_end(&mut buffer).await;
    }
    buffer
}
