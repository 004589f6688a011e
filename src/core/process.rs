// src/core/process.rs

//! The one seam every process-based adapter goes through: a command, its
//! arguments and a time bound in, exit status and captured output back.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::ErrorKind as IoErrorKind;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::core::error::ToolError;
use crate::core::models::Availability;

static RE_VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.\d+(\.\d+)?").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Value following `flag` in the argument list, if any.
    #[cfg(test)]
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ToolError>;
}

/// Runs tools as child processes. A child that outlives its time bound is killed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ToolError> {
        debug!(command = %spec.command_line(), timeout_secs = spec.timeout.as_secs(), "Spawning external tool.");

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                IoErrorKind::NotFound | IoErrorKind::PermissionDenied => ToolError::Unavailable {
                    tool: spec.program.clone(),
                    reason: e.to_string(),
                },
                _ => ToolError::Io {
                    tool: spec.program.clone(),
                    source: e,
                },
            })?;

        match timeout(spec.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let result = CommandOutput {
                    status: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                };
                debug!(program = %spec.program, status = ?result.status, stdout_bytes = result.stdout.len(), "External tool exited.");
                Ok(result)
            }
            Ok(Err(e)) => Err(ToolError::Io {
                tool: spec.program.clone(),
                source: e,
            }),
            Err(_) => {
                // Dropping the wait future kills the child.
                warn!(program = %spec.program, timeout_secs = spec.timeout.as_secs(), "External tool timed out, killed.");
                Err(ToolError::Timeout {
                    tool: spec.program.clone(),
                    after: spec.timeout,
                })
            }
        }
    }
}

/// Outcome of a binary-presence probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub availability: Availability,
    pub version: Option<String>,
}

/// Runs the tool's version command to learn whether it is installed.
pub async fn probe_tool(runner: &dyn CommandRunner, spec: &CommandSpec) -> Probe {
    match runner.run(spec).await {
        Ok(output) if output.success() => Probe {
            availability: Availability::Available,
            version: version_line(&output.stdout),
        },
        Ok(output) => {
            debug!(program = %spec.program, status = ?output.status, "Version probe exited unsuccessfully.");
            Probe {
                availability: Availability::Unreachable,
                version: None,
            }
        }
        Err(ToolError::Unavailable { reason, .. }) => {
            debug!(program = %spec.program, %reason, "Tool is not installed.");
            Probe {
                availability: Availability::NotInstalled,
                version: None,
            }
        }
        Err(e) => {
            debug!(program = %spec.program, error = %e, "Version probe failed.");
            Probe {
                availability: Availability::Unreachable,
                version: None,
            }
        }
    }
}

/// First line that carries a dotted version number, e.g. `Version: 0.74.0`.
fn version_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| RE_VERSION.is_match(l))
        .map(str::to_string)
}


#[cfg(test)]
mod tests {
    use super::mock::ScriptedRunner;
    use super::*;

    #[test]
    fn test_command_line_and_flag_value() {
        let spec = CommandSpec::new("oscap", Duration::from_secs(1))
            .args(["xccdf", "eval", "--results", "/tmp/out.xml"])
            .arg("/tmp/ds.xml");
        assert_eq!(spec.command_line(), "oscap xccdf eval --results /tmp/out.xml /tmp/ds.xml");
        assert_eq!(spec.flag_value("--results"), Some("/tmp/out.xml"));
        assert_eq!(spec.flag_value("--profile"), None);
    }

    #[tokio::test]
    async fn test_probe_reports_version() {
        let runner = ScriptedRunner::new().then_ok(0, "Application:   grype\nVersion:             0.74.0\nBuildDate: x\n");
        let spec = CommandSpec::new("grype", Duration::from_secs(1)).arg("version");
        let probe = probe_tool(&runner, &spec).await;
        assert_eq!(probe.availability, Availability::Available);
        assert_eq!(probe.version.as_deref(), Some("Version:             0.74.0"));
    }

    #[tokio::test]
    async fn test_probe_missing_binary() {
        let runner = ScriptedRunner::new();
        let spec = CommandSpec::new("trivy", Duration::from_secs(1)).arg("--version");
        let probe = probe_tool(&runner, &spec).await;
        assert_eq!(probe.availability, Availability::NotInstalled);
        assert!(probe.version.is_none());
    }

    #[tokio::test]
    async fn test_tokio_runner_missing_program_is_unavailable() {
        let spec = CommandSpec::new("scanward-definitely-not-a-binary", Duration::from_secs(5));
        let err = TokioCommandRunner.run(&spec).await.unwrap_err();
        assert!(matches!(err, ToolError::Unavailable { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tokio_runner_times_out() {
        let spec = CommandSpec::new("sleep", Duration::from_millis(100)).arg("5");
        let err = TokioCommandRunner.run(&spec).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tokio_runner_captures_output() {
        let spec = CommandSpec::new("sh", Duration::from_secs(5)).args(["-c", "echo out; echo err >&2; exit 3"]);
        let output = TokioCommandRunner.run(&spec).await.unwrap();
        assert_eq!(output.status, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.success());
    }
}
