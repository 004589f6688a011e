// src/core/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use strum::{Display, EnumIter, EnumString};

use crate::core::error::{ErrorKind, ToolError};

// --- Targets ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TargetKind {
    File,
    Directory,
    Image,
}

/// What a scanner is pointed at: a file, a directory or a container image reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ScanTarget {
    pub kind: TargetKind,
    pub locator: String,
    /// Only meaningful for directories.
    #[serde(default)]
    pub recursive: bool,
}

impl ScanTarget {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            kind: TargetKind::File,
            locator: path.as_ref().display().to_string(),
            recursive: false,
        }
    }

    pub fn directory(path: impl AsRef<Path>, recursive: bool) -> Self {
        Self {
            kind: TargetKind::Directory,
            locator: path.as_ref().display().to_string(),
            recursive,
        }
    }

    pub fn image(reference: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Image,
            locator: reference.into(),
            recursive: false,
        }
    }

    pub fn path(&self) -> Option<PathBuf> {
        match self.kind {
            TargetKind::File | TargetKind::Directory => Some(PathBuf::from(&self.locator)),
            TargetKind::Image => None,
        }
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TargetKind::Image => write!(f, "image:{}", self.locator),
            _ => f.write_str(&self.locator),
        }
    }
}

// --- Scanners ---

#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ScannerKind {
    Malware,
    VulnImage,
    VulnFs,
    Compliance,
    Permissions,
}

impl ScannerKind {
    /// Whether this scanner can be pointed at a target of the given kind.
    pub fn accepts(self, kind: TargetKind) -> bool {
        match self {
            Self::Malware | Self::VulnFs | Self::Permissions => {
                matches!(kind, TargetKind::File | TargetKind::Directory)
            }
            Self::VulnImage => kind == TargetKind::Image,
            Self::Compliance => kind == TargetKind::File,
        }
    }
}

// --- Severity ---

/// Common severity vocabulary.
///
/// The vulnerability taxonomy is declared in ascending order so the derived
/// ordering reads `Critical > High > Medium > Low > Negligible > Unknown`.
/// Compliance outcomes and malware verdicts follow; comparing across
/// vocabularies is meaningless and only the map ordering relies on it.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Unknown,
    Negligible,
    Low,
    Medium,
    High,
    Critical,
    // compliance (XCCDF rule-result outcomes)
    NotSelected,
    NotApplicable,
    Pass,
    Error,
    Fail,
    // malware
    Clean,
    Found,
}

impl Severity {
    /// Maps grype / trivy severity strings. Anything outside the taxonomy is `Unknown`.
    pub fn from_vulnerability(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "critical" => Self::Critical,
            "high" => Self::High,
            "medium" => Self::Medium,
            "low" => Self::Low,
            "negligible" => Self::Negligible,
            _ => Self::Unknown,
        }
    }

    /// Maps the text of an XCCDF `<result>` element.
    pub fn from_xccdf_result(outcome: &str) -> Self {
        match outcome.trim() {
            "pass" => Self::Pass,
            "fail" => Self::Fail,
            "error" => Self::Error,
            "notapplicable" => Self::NotApplicable,
            "notselected" => Self::NotSelected,
            _ => Self::Unknown,
        }
    }

    /// Explicit "no issue" markers. They still produce findings so counts stay auditable.
    pub fn is_clean(self) -> bool {
        matches!(
            self,
            Self::Clean | Self::Pass | Self::NotApplicable | Self::NotSelected
        )
    }
}

// --- Findings ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    pub target: ScanTarget,
    pub scanner: ScannerKind,
    /// Signature name, CVE id or XCCDF rule id.
    pub identifier: String,
    pub severity: Severity,
    pub message: String,
    /// The tool's own fragment this finding was built from.
    pub raw: String,
}

/// Rule-result tally for one compliance evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComplianceStats {
    pub pass: usize,
    pub fail: usize,
    pub error: usize,
    pub unknown: usize,
    pub notapplicable: usize,
    pub notselected: usize,
    pub total: usize,
    /// `pass / (pass + fail) * 100`; absent when no rule passed or failed.
    pub score: Option<f64>,
}

impl ComplianceStats {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut stats = Self::default();
        for finding in findings {
            match finding.severity {
                Severity::Pass => stats.pass += 1,
                Severity::Fail => stats.fail += 1,
                Severity::Error => stats.error += 1,
                Severity::NotApplicable => stats.notapplicable += 1,
                Severity::NotSelected => stats.notselected += 1,
                _ => stats.unknown += 1,
            }
        }
        stats.total = findings.len();
        stats.score = compliance_score(stats.pass, stats.fail);
        stats
    }
}

/// Ignores error / notapplicable / notselected outcomes.
pub fn compliance_score(pass: usize, fail: usize) -> Option<f64> {
    let decided = pass + fail;
    if decided == 0 {
        return None;
    }
    Some(pass as f64 * 100.0 / decided as f64)
}

// --- Runs ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Availability {
    Available,
    Unreachable,
    NotInstalled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Unavailable,
    Failed { kind: ErrorKind, message: String },
}

/// Result of one (target, scanner) invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanRun {
    pub scanner: ScannerKind,
    pub target: ScanTarget,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub availability: Availability,
    pub status: RunStatus,
    pub exit_status: Option<i32>,
    pub tool_version: Option<String>,
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance: Option<ComplianceStats>,
    /// Raw result file kept next to the summary (XCCDF results).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
}

impl ScanRun {
    pub fn completed(
        scanner: ScannerKind,
        target: ScanTarget,
        started_at: DateTime<Utc>,
        findings: Vec<Finding>,
    ) -> Self {
        Self {
            scanner,
            target,
            started_at,
            finished_at: Utc::now(),
            availability: Availability::Available,
            status: RunStatus::Completed,
            exit_status: None,
            tool_version: None,
            findings,
            compliance: None,
            artifact: None,
        }
    }

    pub fn unavailable(
        scanner: ScannerKind,
        target: ScanTarget,
        started_at: DateTime<Utc>,
        availability: Availability,
    ) -> Self {
        Self {
            availability,
            status: RunStatus::Unavailable,
            ..Self::completed(scanner, target, started_at, Vec::new())
        }
    }

    pub fn failed(
        scanner: ScannerKind,
        target: ScanTarget,
        started_at: DateTime<Utc>,
        error: &ToolError,
    ) -> Self {
        if let ToolError::Unavailable { .. } = error {
            return Self::unavailable(scanner, target, started_at, Availability::NotInstalled);
        }
        let exit_status = match error {
            ToolError::Execution { status, .. } => *status,
            _ => None,
        };
        Self {
            status: RunStatus::Failed {
                kind: error.kind(),
                message: error.to_string(),
            },
            exit_status,
            ..Self::completed(scanner, target, started_at, Vec::new())
        }
    }

    pub fn with_exit_status(mut self, status: Option<i32>) -> Self {
        self.exit_status = status;
        self
    }

    pub fn with_tool_version(mut self, version: Option<String>) -> Self {
        self.tool_version = version;
        self
    }

    pub fn with_compliance(mut self, stats: ComplianceStats) -> Self {
        self.compliance = Some(stats);
        self
    }

    pub fn with_artifact(mut self, path: PathBuf) -> Self {
        self.artifact = Some(path);
        self
    }
}

// --- Session summary ---

/// Clean / infected tally over malware runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MalwareTally {
    pub total: usize,
    pub clean: usize,
    pub infected: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanSummary {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub runs_per_scanner: BTreeMap<ScannerKind, usize>,
    pub severity_totals: BTreeMap<Severity, usize>,
    pub failed_runs: usize,
    pub unavailable_runs: usize,
    pub runs: Vec<ScanRun>,
}

impl ScanSummary {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            runs_per_scanner: BTreeMap::new(),
            severity_totals: BTreeMap::new(),
            failed_runs: 0,
            unavailable_runs: 0,
            runs: Vec::new(),
        }
    }

    /// Appends a closed run and updates the aggregate counters.
    pub fn record(&mut self, run: ScanRun) {
        *self.runs_per_scanner.entry(run.scanner).or_default() += 1;
        for finding in &run.findings {
            *self.severity_totals.entry(finding.severity).or_default() += 1;
        }
        match run.status {
            RunStatus::Failed { .. } => self.failed_runs += 1,
            RunStatus::Unavailable => self.unavailable_runs += 1,
            RunStatus::Completed => {}
        }
        self.runs.push(run);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn total_findings(&self) -> usize {
        self.severity_totals.values().sum()
    }

    /// True when runs were attempted but no tool could be reached for any of them.
    pub fn all_unavailable(&self) -> bool {
        !self.runs.is_empty()
            && self
                .runs
                .iter()
                .all(|run| run.availability != Availability::Available)
    }

    pub fn malware_tally(&self) -> MalwareTally {
        let mut tally = MalwareTally::default();
        for run in self.runs.iter().filter(|r| r.scanner == ScannerKind::Malware) {
            if run.status != RunStatus::Completed {
                continue;
            }
            tally.total += 1;
            if run.findings.iter().any(|f| f.severity == Severity::Found) {
                tally.infected += 1;
            } else {
                tally.clean += 1;
            }
        }
        tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;
    use std::time::Duration;

    fn finding(severity: Severity) -> Finding {
        Finding {
            target: ScanTarget::image("alpine:3.19"),
            scanner: ScannerKind::VulnImage,
            identifier: "CVE-2024-0001".to_string(),
            severity,
            message: String::new(),
            raw: String::new(),
        }
    }

    #[test]
    fn test_vulnerability_severity_order() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Negligible);
        assert!(Severity::Negligible > Severity::Unknown);
    }

    #[test]
    fn test_severity_labels_agree() {
        for severity in Severity::iter() {
            let json = serde_json::to_string(&severity).unwrap();
            assert_eq!(json, format!("\"{severity}\""));
        }
    }

    #[test]
    fn test_unrecognized_severity_is_unknown() {
        assert_eq!(Severity::from_vulnerability("Informational"), Severity::Unknown);
        assert_eq!(Severity::from_vulnerability("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::from_vulnerability(" high "), Severity::High);
        assert_eq!(Severity::from_xccdf_result("notchecked"), Severity::Unknown);
        assert_eq!(Severity::from_xccdf_result("notselected"), Severity::NotSelected);
    }

    #[test]
    fn test_scanner_kind_parsing_and_acceptance() {
        assert_eq!(ScannerKind::from_str("vuln-image").unwrap(), ScannerKind::VulnImage);
        assert_eq!(ScannerKind::Compliance.to_string(), "compliance");
        assert!(ScannerKind::Malware.accepts(TargetKind::Directory));
        assert!(!ScannerKind::Malware.accepts(TargetKind::Image));
        assert!(ScannerKind::VulnImage.accepts(TargetKind::Image));
        assert!(!ScannerKind::Compliance.accepts(TargetKind::Directory));
        assert!(ScannerKind::Permissions.accepts(TargetKind::Directory));
        assert!(!ScannerKind::Permissions.accepts(TargetKind::Image));
    }

    #[test]
    fn test_target_display() {
        assert_eq!(ScanTarget::image("nginx:latest").to_string(), "image:nginx:latest");
        assert_eq!(ScanTarget::file("/tmp/a").to_string(), "/tmp/a");
        assert!(ScanTarget::image("nginx").path().is_none());
    }

    #[test]
    fn test_compliance_score_undefined_without_decisions() {
        assert_eq!(compliance_score(0, 0), None);
        assert_eq!(compliance_score(3, 1), Some(75.0));
        assert_eq!(compliance_score(0, 4), Some(0.0));
    }

    #[test]
    fn test_compliance_stats_buckets() {
        let findings = vec![
            finding(Severity::Pass),
            finding(Severity::Pass),
            finding(Severity::Fail),
            finding(Severity::NotSelected),
            finding(Severity::Unknown),
        ];
        let stats = ComplianceStats::from_findings(&findings);
        assert_eq!(stats.pass, 2);
        assert_eq!(stats.fail, 1);
        assert_eq!(stats.notselected, 1);
        assert_eq!(stats.unknown, 1);
        assert_eq!(stats.total, 5);
        let score = stats.score.unwrap();
        assert!((score - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_summary_record_counts() {
        let mut summary = ScanSummary::new("20260101_000000");
        let target = ScanTarget::image("alpine:3.19");
        summary.record(ScanRun::completed(
            ScannerKind::VulnImage,
            target.clone(),
            Utc::now(),
            vec![finding(Severity::High), finding(Severity::High), finding(Severity::Low)],
        ));
        let timeout = ToolError::Timeout {
            tool: "grype".to_string(),
            after: Duration::from_secs(1),
        };
        summary.record(ScanRun::failed(ScannerKind::VulnImage, target, Utc::now(), &timeout));

        assert_eq!(summary.runs_per_scanner[&ScannerKind::VulnImage], 2);
        assert_eq!(summary.severity_totals[&Severity::High], 2);
        assert_eq!(summary.total_findings(), 3);
        assert_eq!(summary.failed_runs, 1);
        assert!(!summary.all_unavailable());
    }

    #[test]
    fn test_unavailable_tool_error_marks_run_unavailable() {
        let err = ToolError::Unavailable {
            tool: "oscap".to_string(),
            reason: "not found".to_string(),
        };
        let run = ScanRun::failed(
            ScannerKind::Compliance,
            ScanTarget::file("/tmp/ds.xml"),
            Utc::now(),
            &err,
        );
        assert_eq!(run.status, RunStatus::Unavailable);
        assert_eq!(run.availability, Availability::NotInstalled);
    }

    #[test]
    fn test_malware_tally() {
        let mut summary = ScanSummary::new("s");
        let mut infected = finding(Severity::Found);
        infected.scanner = ScannerKind::Malware;
        let mut clean = finding(Severity::Clean);
        clean.scanner = ScannerKind::Malware;
        summary.record(ScanRun::completed(
            ScannerKind::Malware,
            ScanTarget::file("/a"),
            Utc::now(),
            vec![infected],
        ));
        summary.record(ScanRun::completed(
            ScannerKind::Malware,
            ScanTarget::file("/b"),
            Utc::now(),
            vec![clean],
        ));
        summary.record(ScanRun::unavailable(
            ScannerKind::Malware,
            ScanTarget::file("/c"),
            Utc::now(),
            Availability::Unreachable,
        ));
        assert_eq!(
            summary.malware_tally(),
            MalwareTally {
                total: 2,
                clean: 1,
                infected: 1
            }
        );
    }
}
