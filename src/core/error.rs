// src/core/error.rs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use strum::Display;
use thiserror::Error;

/// Failure of a single (target, scanner) pair. Never escapes the orchestrator:
/// it is folded into the `ScanRun` of the pair that produced it.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{tool} is not available: {reason}")]
    Unavailable { tool: String, reason: String },

    #[error("{tool} did not finish within {}s", .after.as_secs())]
    Timeout { tool: String, after: Duration },

    #[error("{tool} failed{}: {stderr}", .status.map(|c| format!(" with exit status {c}")).unwrap_or_default())]
    Execution {
        tool: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("could not parse {format} output: {message}")]
    MalformedOutput {
        format: &'static str,
        message: String,
    },

    #[error("I/O error while talking to {tool}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    pub fn malformed(format: &'static str, message: impl Into<String>) -> Self {
        Self::MalformedOutput {
            format,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable { .. } => ErrorKind::ToolUnavailable,
            Self::Timeout { .. } => ErrorKind::ToolTimeout,
            Self::Execution { .. } | Self::Io { .. } => ErrorKind::ToolExecutionError,
            Self::MalformedOutput { .. } => ErrorKind::MalformedOutput,
        }
    }
}

/// Serializable projection of `ToolError`, recorded on failed runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
pub enum ErrorKind {
    ToolUnavailable,
    ToolTimeout,
    ToolExecutionError,
    MalformedOutput,
}

/// Invalid input detected before anything is dispatched. Aborts the session.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("target does not exist: {}", .0.display())]
    TargetNotFound(PathBuf),

    #[error("not a directory: {} (drop --directory to scan a single file)", .0.display())]
    NotADirectory(PathBuf),

    #[error("not a file: {} (use --directory to scan a directory)", .0.display())]
    NotAFile(PathBuf),

    #[error("invalid image reference: {0:?}")]
    InvalidImageRef(String),

    #[error("none of the requested scanners can handle target {0}")]
    UnsupportedTarget(String),

    #[error("no adapter registered for scanner {0}")]
    ScannerNotRegistered(String),

    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_projection() {
        let timeout = ToolError::Timeout {
            tool: "grype".to_string(),
            after: Duration::from_secs(5),
        };
        assert_eq!(timeout.kind(), ErrorKind::ToolTimeout);
        assert_eq!(timeout.to_string(), "grype did not finish within 5s");

        let io = ToolError::Io {
            tool: "clamd".to_string(),
            source: std::io::Error::other("broken pipe"),
        };
        assert_eq!(io.kind(), ErrorKind::ToolExecutionError);
    }

    #[test]
    fn test_execution_message_without_exit_code() {
        let err = ToolError::Execution {
            tool: "trivy".to_string(),
            status: None,
            stderr: "killed".to_string(),
        };
        assert_eq!(err.to_string(), "trivy failed: killed");

        let err = ToolError::Execution {
            tool: "grype".to_string(),
            status: Some(2),
            stderr: "db update failed".to_string(),
        };
        assert_eq!(err.to_string(), "grype failed with exit status 2: db update failed");
    }
}
