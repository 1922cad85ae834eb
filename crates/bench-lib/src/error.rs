//! Error types for the benchmark harness

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    /// A cluster API call failed with something other than "not found"
    #[error("cluster API {operation} failed: {message}")]
    Api {
        operation: String,
        message: String,
        /// Whether a retry has a chance of succeeding (throttling, 5xx, transport)
        retryable: bool,
    },

    #[error("timed out after {waited:?} waiting for {what}")]
    TimedOut { what: String, waited: Duration },

    #[error("{program} exited unsuccessfully ({status}): {stderr}")]
    ToolFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("no samples recorded for {0}")]
    EmptySamples(String),

    #[error("unparseable memory quantity: {0:?}")]
    Quantity(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl BenchError {
    pub fn api(operation: impl Into<String>, message: impl Into<String>) -> Self {
        BenchError::Api {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        BenchError::Api {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BenchError::Api { retryable: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
