// src/report/table.rs

use crossterm::style::{Color, Stylize};
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::core::models::{RunStatus, ScanRun, ScanSummary, ScannerKind, Severity};
use crate::report::Reporter;

const TARGET_WIDTH: usize = 44;

/// Human-readable view of a session. Lossy: raw tool fragments and timestamps
/// of individual runs are left out.
pub struct TableReporter {
    color: bool,
}

impl TableReporter {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.color {
            text.with(color).to_string()
        } else {
            text.to_string()
        }
    }

    fn bold(&self, text: &str) -> String {
        if self.color {
            text.bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn severity_color(severity: Severity) -> Color {
        match severity {
            Severity::Critical | Severity::Found | Severity::Fail | Severity::Error => Color::Red,
            Severity::High => Color::Yellow,
            Severity::Medium => Color::Cyan,
            Severity::Low | Severity::Negligible => Color::White,
            Severity::Pass | Severity::Clean => Color::Green,
            Severity::Unknown | Severity::NotApplicable | Severity::NotSelected => Color::DarkGrey,
        }
    }

    fn status_cell(&self, run: &ScanRun) -> String {
        let (label, color) = match &run.status {
            RunStatus::Completed => ("completed", Color::Green),
            RunStatus::Unavailable => ("unavailable", Color::DarkYellow),
            RunStatus::Failed { .. } => ("failed", Color::Red),
        };
        self.paint(&format!("{label:<12}"), color)
    }

    fn detail(&self, run: &ScanRun) -> String {
        match &run.status {
            RunStatus::Failed { kind, message } => format!("{kind}: {message}"),
            RunStatus::Unavailable => run.availability.to_string(),
            RunStatus::Completed => {
                if let Some(stats) = &run.compliance {
                    let score = stats
                        .score
                        .map(|s| format!("{s:.1}%"))
                        .unwrap_or_else(|| "n/a".to_string());
                    format!(
                        "score {score} (pass {}, fail {}, error {}, other {})",
                        stats.pass,
                        stats.fail,
                        stats.error,
                        stats.total.saturating_sub(stats.pass + stats.fail + stats.error)
                    )
                } else {
                    self.severity_counts(run.findings.iter().map(|f| f.severity))
                }
            }
        }
    }

    fn severity_counts(&self, severities: impl Iterator<Item = Severity>) -> String {
        let mut counts: BTreeMap<Severity, usize> = BTreeMap::new();
        for severity in severities {
            *counts.entry(severity).or_default() += 1;
        }
        counts
            .iter()
            .rev()
            .map(|(severity, n)| {
                self.paint(&format!("{severity}:{n}"), Self::severity_color(*severity))
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Reporter for TableReporter {
    fn report(&self, summary: &ScanSummary) -> String {
        let mut out = String::new();

        let elapsed = summary
            .finished_at
            .map(|end| (end - summary.started_at).num_milliseconds() as f64 / 1000.0)
            .map(|secs| format!(", {secs:.1}s"))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "{} {} (started {}{elapsed})",
            self.bold("Scan session"),
            summary.session_id,
            summary.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        );
        out.push('\n');

        let _ = writeln!(
            out,
            "{}",
            self.bold(&format!(
                "{:<12} {:<TARGET_WIDTH$} {:<12} {:>8}  {}",
                "SCANNER", "TARGET", "STATUS", "FINDINGS", "DETAIL"
            ))
        );
        for run in &summary.runs {
            let _ = writeln!(
                out,
                "{:<12} {:<TARGET_WIDTH$} {} {:>8}  {}",
                run.scanner.to_string(),
                shorten(&run.target.to_string(), TARGET_WIDTH),
                self.status_cell(run),
                run.findings.len(),
                self.detail(run)
            );
        }

        let notable: Vec<_> = summary
            .runs
            .iter()
            .flat_map(|run| run.findings.iter())
            .filter(|f| !f.severity.is_clean())
            .collect();
        if !notable.is_empty() {
            out.push('\n');
            let _ = writeln!(out, "{}", self.bold("Findings"));
            for finding in notable {
                let _ = writeln!(
                    out,
                    "  {} {}  {}  {}",
                    self.paint(
                        &format!("{:<9}", finding.severity.to_string()),
                        Self::severity_color(finding.severity)
                    ),
                    finding.identifier,
                    finding.target,
                    finding.message
                );
            }
        }

        out.push('\n');
        let _ = writeln!(
            out,
            "Totals: {} runs, {} findings, {} failed, {} unavailable",
            summary.runs.len(),
            summary.total_findings(),
            summary.failed_runs,
            summary.unavailable_runs
        );
        if !summary.severity_totals.is_empty() {
            let by_severity = self.severity_counts(
                summary
                    .severity_totals
                    .iter()
                    .flat_map(|(severity, n)| std::iter::repeat_n(*severity, *n)),
            );
            let _ = writeln!(out, "Severity: {by_severity}");
        }
        if summary.runs_per_scanner.contains_key(&ScannerKind::Malware) {
            let tally = summary.malware_tally();
            let infected = tally.infected.to_string();
            let infected = if tally.infected > 0 {
                self.paint(&infected, Color::Red)
            } else {
                infected
            };
            let _ = writeln!(
                out,
                "Malware: {} files scanned, {} clean, {} infected",
                tally.total, tally.clean, infected
            );
        }
        out
    }
}

/// Keeps the tail of long locators, which is where file names live.
fn shorten(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len <= width {
        return text.to_string();
    }
    let tail: String = text.chars().skip(len - (width - 3)).collect();
    format!("...{tail}")
}
