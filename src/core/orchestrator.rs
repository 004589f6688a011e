// src/core/orchestrator.rs

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::core::error::{ConfigError, ToolError};
use crate::core::models::{ScanRun, ScanSummary, ScanTarget, ScannerKind, TargetKind};
use crate::core::scanner::{AdapterRegistry, ScannerAdapter};
use crate::core::targets;

/// One (target, scanner) pair ready for dispatch.
#[derive(Clone)]
pub struct Job {
    pub target: ScanTarget,
    pub adapter: Arc<dyn ScannerAdapter>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("target", &self.target)
            .field("scanner", &self.adapter.kind())
            .finish()
    }
}

/// Runs every (target, scanner) pair of a session through its adapter.
///
/// Pairs run on a worker pool bounded by `parallelism`. Runs land in the summary
/// in dispatch order whatever order they finish in, and a failing pair only
/// produces a failed run.
pub struct Orchestrator {
    registry: AdapterRegistry,
    parallelism: usize,
    span: Span,
}

impl Orchestrator {
    /// `span` is the session span; every adapter call is instrumented with it.
    pub fn new(registry: AdapterRegistry, parallelism: usize, span: Span) -> Self {
        Self {
            registry,
            parallelism: parallelism.max(1),
            span,
        }
    }

    /// Validates the session input and expands it into the ordered job list.
    /// Any problem here aborts the session before a tool is started.
    pub fn plan(
        &self,
        targets: &[ScanTarget],
        scanners: &[ScannerKind],
    ) -> Result<Vec<Job>, ConfigError> {
        if scanners.is_empty() {
            return Err(ConfigError::InvalidSetting {
                name: "scanner",
                reason: "no scanner selected".to_string(),
            });
        }

        let mut selected: Vec<ScannerKind> = Vec::with_capacity(scanners.len());
        for kind in scanners {
            if !selected.contains(kind) {
                selected.push(*kind);
            }
        }
        let adapters = selected
            .iter()
            .map(|kind| {
                self.registry
                    .get(*kind)
                    .ok_or_else(|| ConfigError::ScannerNotRegistered(kind.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut jobs = Vec::new();
        for target in targets {
            targets::validate(target)?;

            let mut accepted = false;
            for adapter in &adapters {
                if !adapter.kind().accepts(target.kind) {
                    continue;
                }
                accepted = true;
                if target.kind == TargetKind::Directory && adapter.scans_per_file() {
                    let files = targets::expand_directory(target);
                    if files.is_empty() {
                        warn!(%target, scanner = %adapter.kind(), "Directory contains no files.");
                    }
                    jobs.extend(files.into_iter().map(|file| Job {
                        target: file,
                        adapter: adapter.clone(),
                    }));
                } else {
                    jobs.push(Job {
                        target: target.clone(),
                        adapter: adapter.clone(),
                    });
                }
            }
            if !accepted {
                return Err(ConfigError::UnsupportedTarget(target.to_string()));
            }
        }
        Ok(jobs)
    }

    pub async fn run(
        &self,
        session_id: &str,
        targets: &[ScanTarget],
        scanners: &[ScannerKind],
    ) -> Result<ScanSummary, ConfigError> {
        let jobs = self.plan(targets, scanners)?;
        let mut summary = ScanSummary::new(session_id);
        info!(parent: &self.span, jobs = jobs.len(), parallelism = self.parallelism, "Dispatching scan jobs.");

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let semaphore = semaphore.clone();
            let scanner = job.adapter.kind();
            let target = job.target.clone();
            let handle = tokio::spawn(
                async move {
                    // The semaphore is never closed.
                    let _permit = semaphore.acquire_owned().await.ok();
                    execute(job).await
                }
                .instrument(self.span.clone()),
            );
            handles.push((scanner, target, handle));
        }

        // Awaiting in dispatch order keeps the summary ordered and single-writer.
        for (scanner, target, handle) in handles {
            let run = match handle.await {
                Ok(run) => run,
                Err(e) => {
                    error!(parent: &self.span, %target, %scanner, panic = %e, "Scan task aborted.");
                    let err = ToolError::Execution {
                        tool: scanner.to_string(),
                        status: None,
                        stderr: format!("scan task aborted: {e}"),
                    };
                    ScanRun::failed(scanner, target, Utc::now(), &err)
                }
            };
            summary.record(run);
        }

        summary.finish();
        info!(
            parent: &self.span,
            runs = summary.runs.len(),
            findings = summary.total_findings(),
            failed = summary.failed_runs,
            unavailable = summary.unavailable_runs,
            "Scan session finished."
        );
        Ok(summary)
    }
}

async fn execute(job: Job) -> ScanRun {
    let scanner = job.adapter.kind();
    let started_at = Utc::now();
    debug!(target = %job.target, %scanner, "Invoking adapter.");
    match job.adapter.invoke(&job.target).await {
        Ok(run) => run,
        Err(e) => {
            warn!(target = %job.target, %scanner, error = %e, "Scan pair failed.");
            ScanRun::failed(scanner, job.target, started_at, &e)
        }
    }
}
