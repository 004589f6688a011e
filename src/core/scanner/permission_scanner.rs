// src/core/scanner/permission_scanner.rs

use async_trait::async_trait;
use chrono::Utc;
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use tracing::{debug, info};

use super::ScannerAdapter;
use crate::core::error::ToolError;
use crate::core::models::{ComplianceStats, ScanRun, ScanTarget, ScannerKind};
use crate::core::normalizer;

const TOOL: &str = "permission audit";

/// Audits the mode bits of a file or directory. The target itself is checked,
/// a directory is not descended into. Needs no external tool, so it is always
/// available.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissionAdapter;

impl PermissionAdapter {
    pub fn new() -> Self {
        Self
    }
}

/// The record the normalizer evaluates: `kind=<file|dir|other> mode=<octal> uid=<n> gid=<n>`.
pub fn stat_record(metadata: &Metadata) -> String {
    let kind = if metadata.is_file() {
        "file"
    } else if metadata.is_dir() {
        "dir"
    } else {
        "other"
    };
    format!(
        "kind={kind} mode={:04o} uid={} gid={}",
        metadata.mode() & 0o7777,
        metadata.uid(),
        metadata.gid()
    )
}

#[async_trait]
impl ScannerAdapter for PermissionAdapter {
    fn kind(&self) -> ScannerKind {
        ScannerKind::Permissions
    }

    async fn invoke(&self, target: &ScanTarget) -> Result<ScanRun, ToolError> {
        let started_at = Utc::now();
        info!(%target, "Starting permission audit.");

        // Follows symlinks: the audited mode is the one access checks use.
        let metadata = tokio::fs::metadata(&target.locator)
            .await
            .map_err(|e| ToolError::Io {
                tool: TOOL.to_string(),
                source: e,
            })?;
        let record = stat_record(&metadata);
        debug!(%target, %record, "Read file mode.");

        let findings = normalizer::normalize(ScannerKind::Permissions, target, &record)?;
        let stats = ComplianceStats::from_findings(&findings);
        info!(%target, pass = stats.pass, fail = stats.fail, "Permission audit finished.");

        Ok(ScanRun::completed(ScannerKind::Permissions, target.clone(), started_at, findings)
            .with_compliance(stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::models::{Availability, RunStatus, Severity};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn with_mode(path: &Path, mode: u32) -> ScanTarget {
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
        if path.is_dir() {
            ScanTarget::directory(path, false)
        } else {
            ScanTarget::file(path)
        }
    }

    fn outcome(run: &ScanRun, check: &str) -> Severity {
        run.findings
            .iter()
            .find(|f| f.identifier == check)
            .map(|f| f.severity)
            .unwrap()
    }

    #[tokio::test]
    async fn test_world_writable_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("upload.sh");
        fs::write(&path, "#!/bin/sh\n").unwrap();

        let run = PermissionAdapter::new().invoke(&with_mode(&path, 0o777)).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.availability, Availability::Available);
        assert_eq!(outcome(&run, "world-writable"), Severity::Fail);
        assert_eq!(outcome(&run, "group-other-exec"), Severity::Fail);
        assert_eq!(run.findings[0].raw.split_whitespace().nth(1), Some("mode=0777"));
        assert_eq!(run.compliance.unwrap().score, Some(0.0));
    }

    #[tokio::test]
    async fn test_private_executable_passes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tool");
        fs::write(&path, "").unwrap();

        let run = PermissionAdapter::new().invoke(&with_mode(&path, 0o700)).await.unwrap();
        assert_eq!(outcome(&run, "world-writable"), Severity::Pass);
        assert_eq!(outcome(&run, "group-other-exec"), Severity::Pass);
        let stats = run.compliance.unwrap();
        assert_eq!((stats.pass, stats.fail, stats.notapplicable), (2, 0, 1));
        assert_eq!(stats.score, Some(100.0));
    }

    #[tokio::test]
    async fn test_directory_is_checked_itself() {
        let dir = TempDir::new().unwrap();
        let shared = dir.path().join("shared");
        fs::create_dir(&shared).unwrap();
        fs::write(shared.join("inner.txt"), "").unwrap();

        let run = PermissionAdapter::new().invoke(&with_mode(&shared, 0o777)).await.unwrap();
        fs::set_permissions(&shared, fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(run.findings.len(), 3);
        assert!(run.findings.iter().all(|f| f.target.locator == shared.display().to_string()));
        assert_eq!(outcome(&run, "world-writable"), Severity::Fail);
        assert_eq!(outcome(&run, "group-other-exec"), Severity::NotApplicable);
    }

    #[tokio::test]
    async fn test_missing_path_is_execution_error() {
        let err = PermissionAdapter::new()
            .invoke(&ScanTarget::file("/definitely/not/here"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolExecutionError);
    }
}
