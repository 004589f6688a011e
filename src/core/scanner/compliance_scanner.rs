// src/core/scanner/compliance_scanner.rs

use async_trait::async_trait;
use chrono::{Local, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ScannerAdapter;
use crate::config::Config;
use crate::core::error::ToolError;
use crate::core::models::{Availability, ComplianceStats, ScanRun, ScanTarget, ScannerKind};
use crate::core::normalizer;
use crate::core::process::{probe_tool, CommandRunner, CommandSpec, Probe};

const OSCAP: &str = "oscap";

static RE_PROFILE_TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*Title:\s*(.+?)\s*$").unwrap());
static RE_PROFILE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*Id:\s*(\S+)\s*$").unwrap());
static RE_BARE_PROFILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(xccdf_\S+_profile_\S+)\s*$").unwrap());

/// A profile advertised by a SCAP datastream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub valid: bool,
    pub detail: String,
}

/// XCCDF evaluation through the `oscap` command line tool.
pub struct ComplianceAdapter {
    runner: Arc<dyn CommandRunner>,
    tool_timeout: Duration,
    probe_timeout: Duration,
    profile: Option<String>,
    results_dir: PathBuf,
    sequence: AtomicUsize,
}

impl ComplianceAdapter {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        tool_timeout: Duration,
        probe_timeout: Duration,
        results_dir: PathBuf,
    ) -> Self {
        Self {
            runner,
            tool_timeout,
            probe_timeout,
            profile: None,
            results_dir,
            sequence: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(
            runner,
            config.tool_timeout,
            config.probe_timeout,
            config.results_dir.clone(),
        )
        .with_profile(config.compliance_profile.clone())
    }

    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    pub async fn probe(&self) -> Probe {
        let spec = CommandSpec::new(OSCAP, self.probe_timeout).arg("--version");
        probe_tool(self.runner.as_ref(), &spec).await
    }

    /// Lists the profiles of a datastream (`oscap info`).
    pub async fn list_profiles(&self, datastream: &Path) -> Result<Vec<Profile>, ToolError> {
        let spec = CommandSpec::new(OSCAP, self.tool_timeout)
            .arg("info")
            .arg(datastream.display().to_string());
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(ToolError::Execution {
                tool: OSCAP.to_string(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        let profiles = parse_profiles(&output.stdout);
        debug!(datastream = %datastream.display(), profiles = profiles.len(), "Listed datastream profiles.");
        Ok(profiles)
    }

    /// Validates a source datastream (`oscap ds sds-validate`).
    pub async fn validate_datastream(&self, datastream: &Path) -> Result<Validation, ToolError> {
        let spec = CommandSpec::new(OSCAP, self.tool_timeout)
            .args(["ds", "sds-validate"])
            .arg(datastream.display().to_string());
        let output = self.runner.run(&spec).await?;
        let valid = output.success();
        let detail = if valid {
            output.stdout.trim().to_string()
        } else {
            output.stderr.trim().to_string()
        };
        Ok(Validation { valid, detail })
    }

    fn results_path(&self, datastream: &Path) -> PathBuf {
        let stem = datastream
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "datastream".to_string());
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        self.results_dir
            .join(format!("xccdf_results_{stem}_{stamp}_{seq}.xml"))
    }

    pub fn eval_spec(&self, datastream: &Path, results: &Path) -> CommandSpec {
        let mut spec = CommandSpec::new(OSCAP, self.tool_timeout)
            .args(["xccdf", "eval", "--results"])
            .arg(results.display().to_string());
        if let Some(profile) = &self.profile {
            spec = spec.args(["--profile", profile.as_str()]);
        }
        spec.arg(datastream.display().to_string())
    }
}

#[async_trait]
impl ScannerAdapter for ComplianceAdapter {
    fn kind(&self) -> ScannerKind {
        ScannerKind::Compliance
    }

    async fn invoke(&self, target: &ScanTarget) -> Result<ScanRun, ToolError> {
        let started_at = Utc::now();
        info!(%target, profile = ?self.profile, "Starting compliance scan.");

        let probe = self.probe().await;
        if probe.availability != Availability::Available {
            warn!(availability = %probe.availability, "oscap is not usable.");
            return Ok(ScanRun::unavailable(
                ScannerKind::Compliance,
                target.clone(),
                started_at,
                probe.availability,
            ));
        }

        let datastream = PathBuf::from(&target.locator);
        tokio::fs::create_dir_all(&self.results_dir)
            .await
            .map_err(|e| ToolError::Io {
                tool: OSCAP.to_string(),
                source: e,
            })?;
        let results = self.results_path(&datastream);
        let spec = self.eval_spec(&datastream, &results);
        let output = self.runner.run(&spec).await?;

        // 0: every rule passed, 2: at least one rule failed, anything else is an error.
        if !matches!(output.status, Some(0) | Some(2)) {
            return Err(ToolError::Execution {
                tool: OSCAP.to_string(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        let xml = match tokio::fs::read_to_string(&results).await {
            Ok(xml) => xml,
            Err(e) => {
                warn!(results = %results.display(), error = %e, "oscap produced no results file.");
                return Err(ToolError::Execution {
                    tool: OSCAP.to_string(),
                    status: output.status,
                    stderr: output.stderr.trim().to_string(),
                });
            }
        };

        let findings = normalizer::normalize(ScannerKind::Compliance, target, &xml)?;
        let stats = ComplianceStats::from_findings(&findings);
        info!(%target, pass = stats.pass, fail = stats.fail, score = ?stats.score, "Compliance scan finished.");

        Ok(ScanRun::completed(ScannerKind::Compliance, target.clone(), started_at, findings)
            .with_exit_status(output.status)
            .with_tool_version(probe.version)
            .with_compliance(stats)
            .with_artifact(results))
    }
}

/// Reads profiles from `oscap info` output. Newer releases print `Title:` / `Id:`
/// pairs, older ones list bare profile ids.
pub fn parse_profiles(info: &str) -> Vec<Profile> {
    let mut profiles = Vec::new();
    let mut in_profiles = false;
    let mut pending_title: Option<String> = None;

    for line in info.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("Profiles:") {
            in_profiles = true;
            continue;
        }
        if !in_profiles {
            continue;
        }
        // Section headers end the profile block.
        if !line.starts_with(char::is_whitespace) && !trimmed.is_empty() {
            in_profiles = false;
            continue;
        }
        if let Some(caps) = RE_PROFILE_TITLE.captures(line) {
            pending_title = Some(caps[1].to_string());
        } else if let Some(caps) = RE_PROFILE_ID.captures(line) {
            profiles.push(Profile {
                id: caps[1].to_string(),
                title: pending_title.take(),
            });
        } else if let Some(caps) = RE_BARE_PROFILE.captures(line) {
            profiles.push(Profile {
                id: caps[1].to_string(),
                title: None,
            });
        }
    }
    profiles
}
