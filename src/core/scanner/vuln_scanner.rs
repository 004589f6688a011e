// src/core/scanner/vuln_scanner.rs

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use strum::{Display, EnumString};
use tracing::{info, warn};

use super::ScannerAdapter;
use crate::config::Config;
use crate::core::error::ToolError;
use crate::core::models::{Availability, ScanRun, ScanTarget, ScannerKind, Severity, TargetKind};
use crate::core::normalizer;
use crate::core::process::{probe_tool, CommandRunner, CommandSpec};

/// Which external tool answers vulnerability scans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum VulnBackend {
    #[default]
    Grype,
    Trivy,
}

impl VulnBackend {
    fn program(self) -> &'static str {
        match self {
            Self::Grype => "grype",
            Self::Trivy => "trivy",
        }
    }

    fn version_args(self) -> &'static [&'static str] {
        match self {
            Self::Grype => &["version"],
            Self::Trivy => &["--version"],
        }
    }
}

/// Image or filesystem vulnerability scanning through grype or trivy.
pub struct VulnAdapter {
    kind: ScannerKind,
    backend: VulnBackend,
    runner: Arc<dyn CommandRunner>,
    tool_timeout: Duration,
    probe_timeout: Duration,
    severity_filter: Vec<Severity>,
}

impl VulnAdapter {
    pub fn new(
        kind: ScannerKind,
        backend: VulnBackend,
        runner: Arc<dyn CommandRunner>,
        tool_timeout: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            kind,
            backend,
            runner,
            tool_timeout,
            probe_timeout,
            severity_filter: Vec::new(),
        }
    }

    pub fn from_config(kind: ScannerKind, config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(kind, config.vuln_backend, runner, config.tool_timeout, config.probe_timeout)
            .with_severity_filter(config.severity_filter.clone())
    }

    /// Severities the tool is asked to report. Only trivy filters natively;
    /// grype always reports every match.
    pub fn with_severity_filter(mut self, severities: Vec<Severity>) -> Self {
        self.severity_filter = severities;
        self
    }

    fn probe_spec(&self) -> CommandSpec {
        CommandSpec::new(self.backend.program(), self.probe_timeout)
            .args(self.backend.version_args().iter().copied())
    }

    /// Builds the tool invocation for one target, always requesting JSON.
    pub fn scan_spec(&self, target: &ScanTarget) -> CommandSpec {
        let spec = CommandSpec::new(self.backend.program(), self.tool_timeout);
        match self.backend {
            VulnBackend::Grype => {
                let source = match target.kind {
                    TargetKind::Image => format!("docker:{}", target.locator),
                    TargetKind::File => format!("file:{}", target.locator),
                    TargetKind::Directory => format!("dir:{}", target.locator),
                };
                spec.arg(source).args(["-o", "json", "-q"])
            }
            VulnBackend::Trivy => {
                let subcommand = match target.kind {
                    TargetKind::Image => "image",
                    TargetKind::File | TargetKind::Directory => "fs",
                };
                let mut spec = spec.args([subcommand, "--quiet", "--format", "json"]);
                if !self.severity_filter.is_empty() {
                    let list = self
                        .severity_filter
                        .iter()
                        .map(|s| s.to_string().to_uppercase())
                        .collect::<Vec<_>>()
                        .join(",");
                    spec = spec.args(["--severity".to_string(), list]);
                }
                spec.arg(target.locator.clone())
            }
        }
    }
}

#[async_trait]
impl ScannerAdapter for VulnAdapter {
    fn kind(&self) -> ScannerKind {
        self.kind
    }

    async fn invoke(&self, target: &ScanTarget) -> Result<ScanRun, ToolError> {
        let started_at = Utc::now();
        info!(%target, backend = %self.backend, scanner = %self.kind, "Starting vulnerability scan.");

        let probe = probe_tool(self.runner.as_ref(), &self.probe_spec()).await;
        if probe.availability != Availability::Available {
            warn!(backend = %self.backend, availability = %probe.availability, "Vulnerability scanner is not usable.");
            return Ok(ScanRun::unavailable(self.kind, target.clone(), started_at, probe.availability));
        }

        let spec = self.scan_spec(target);
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(ToolError::Execution {
                tool: spec.program,
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }

        let findings = normalizer::normalize(self.kind, target, &output.stdout)?;
        info!(%target, findings = findings.len(), "Vulnerability scan finished.");
        Ok(ScanRun::completed(self.kind, target.clone(), started_at, findings)
            .with_exit_status(output.status)
            .with_tool_version(probe.version))
    }
}
