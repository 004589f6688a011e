// src/core/normalizer.rs

//! Maps each tool's native output onto `Finding` records.
//!
//! Normalization is total over well-formed input: every element of the tool's
//! result list yields exactly one finding, including the "no issue" markers
//! (clamd `OK`, XCCDF `pass`/`notselected`, permission checks that pass). Unrecognized severities degrade to
//! `Severity::Unknown`; only output that cannot be parsed at all is an error.

use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

use crate::core::error::ToolError;
use crate::core::models::{Finding, ScanTarget, ScannerKind, Severity};

const XCCDF_NS_PREFIX: &str = "http://checklists.nist.gov/xccdf/";
/// Trees whose entries must not be writable by their group.
const SYSTEM_CONFIG_DIRS: &[&str] = &["/etc"];

pub fn normalize(
    kind: ScannerKind,
    target: &ScanTarget,
    raw: &str,
) -> Result<Vec<Finding>, ToolError> {
    let findings = match kind {
        ScannerKind::Malware => normalize_clamd(target, raw),
        ScannerKind::VulnImage | ScannerKind::VulnFs => normalize_vulnerabilities(kind, target, raw)?,
        ScannerKind::Compliance => normalize_xccdf(target, raw)?,
        ScannerKind::Permissions => normalize_permissions(target, raw)?,
    };
    debug!(scanner = %kind, %target, findings = findings.len(), "Normalized tool output.");
    Ok(findings)
}

// --- clamd ---

/// One finding per reply line: `<path>: OK`, `<path>: <signature> FOUND`.
/// An empty reply means nothing to report.
fn normalize_clamd(target: &ScanTarget, raw: &str) -> Vec<Finding> {
    reply_lines(raw)
        .map(|line| {
            let (identifier, severity, message) = if let Some(path) = line.strip_suffix(": OK") {
                ("OK".to_string(), Severity::Clean, format!("{path} is clean"))
            } else if let Some((path, signature)) = line
                .strip_suffix(" FOUND")
                .and_then(|rest| rest.rsplit_once(": "))
            {
                (
                    signature.to_string(),
                    Severity::Found,
                    format!("{signature} found in {path}"),
                )
            } else {
                warn!(%line, "Unrecognized clamd reply line.");
                ("unrecognized".to_string(), Severity::Unknown, line.to_string())
            };
            Finding {
                target: target.clone(),
                scanner: ScannerKind::Malware,
                identifier,
                severity,
                message,
                raw: line.to_string(),
            }
        })
        .collect()
}

/// clamd terminates replies with NUL in `z` mode and newline otherwise.
pub fn reply_lines(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(['\0', '\n'])
        .map(str::trim)
        .filter(|l| !l.is_empty())
}

// --- grype / trivy ---

fn normalize_vulnerabilities(
    kind: ScannerKind,
    target: &ScanTarget,
    raw: &str,
) -> Result<Vec<Finding>, ToolError> {
    let document: Value =
        serde_json::from_str(raw).map_err(|e| ToolError::malformed("JSON", e.to_string()))?;
    let Some(object) = document.as_object() else {
        return Err(ToolError::malformed("JSON", "top-level value is not an object"));
    };

    if let Some(matches) = object.get("matches") {
        let matches = matches
            .as_array()
            .ok_or_else(|| ToolError::malformed("JSON", "`matches` is not a list"))?;
        return Ok(matches
            .iter()
            .map(|m| grype_finding(kind, target, m))
            .collect());
    }

    if object.contains_key("SchemaVersion") || object.contains_key("Results") {
        let results = match object.get("Results") {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(results)) => results,
            Some(_) => return Err(ToolError::malformed("JSON", "`Results` is not a list")),
        };
        return Ok(results
            .iter()
            .filter_map(|r| r.get("Vulnerabilities").and_then(Value::as_array))
            .flatten()
            .map(|v| trivy_finding(kind, target, v))
            .collect());
    }

    Err(ToolError::malformed(
        "JSON",
        "neither a grype `matches` list nor a trivy `Results` list",
    ))
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn grype_finding(kind: ScannerKind, target: &ScanTarget, entry: &Value) -> Finding {
    let identifier = str_at(entry, "/vulnerability/id").unwrap_or("unknown");
    let severity = Severity::from_vulnerability(str_at(entry, "/vulnerability/severity").unwrap_or(""));
    let package = str_at(entry, "/artifact/name").unwrap_or("unknown package");
    let version = str_at(entry, "/artifact/version").unwrap_or("?");

    let mut message = format!("{package} {version}");
    if let Some(description) = str_at(entry, "/vulnerability/description") {
        message.push_str(": ");
        message.push_str(description);
    }
    let fixes: Vec<&str> = entry
        .pointer("/vulnerability/fix/versions")
        .and_then(Value::as_array)
        .map(|v| v.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if !fixes.is_empty() {
        message.push_str(&format!(" (fixed in {})", fixes.join(", ")));
    }

    Finding {
        target: target.clone(),
        scanner: kind,
        identifier: identifier.to_string(),
        severity,
        message,
        raw: entry.to_string(),
    }
}

fn trivy_finding(kind: ScannerKind, target: &ScanTarget, entry: &Value) -> Finding {
    let identifier = str_at(entry, "/VulnerabilityID").unwrap_or("unknown");
    let severity = Severity::from_vulnerability(str_at(entry, "/Severity").unwrap_or(""));
    let package = str_at(entry, "/PkgName").unwrap_or("unknown package");
    let version = str_at(entry, "/InstalledVersion").unwrap_or("?");

    let mut message = format!("{package} {version}");
    if let Some(title) = str_at(entry, "/Title") {
        message.push_str(": ");
        message.push_str(title);
    }
    if let Some(fixed) = str_at(entry, "/FixedVersion") {
        message.push_str(&format!(" (fixed in {fixed})"));
    }

    Finding {
        target: target.clone(),
        scanner: kind,
        identifier: identifier.to_string(),
        severity,
        message,
        raw: entry.to_string(),
    }
}

// --- XCCDF ---

fn is_xccdf_element(node: &roxmltree::Node<'_, '_>, local_name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local_name
        && node
            .tag_name()
            .namespace()
            .is_some_and(|ns| ns.starts_with(XCCDF_NS_PREFIX))
}

/// One finding per `rule-result` of the first `TestResult`.
fn normalize_xccdf(target: &ScanTarget, raw: &str) -> Result<Vec<Finding>, ToolError> {
    let document =
        roxmltree::Document::parse(raw).map_err(|e| ToolError::malformed("XCCDF", e.to_string()))?;
    let test_result = document
        .descendants()
        .find(|n| is_xccdf_element(n, "TestResult"))
        .ok_or_else(|| ToolError::malformed("XCCDF", "no TestResult element"))?;

    let findings = test_result
        .descendants()
        .filter(|n| is_xccdf_element(n, "rule-result"))
        .map(|rule| {
            let identifier = rule.attribute("idref").unwrap_or("unknown-rule");
            let outcome = rule
                .children()
                .find(|c| is_xccdf_element(c, "result"))
                .and_then(|c| c.text())
                .map(str::trim)
                .unwrap_or("");
            let rule_severity = rule.attribute("severity").unwrap_or("unknown");
            let message = if outcome.is_empty() {
                format!("no result recorded (rule severity: {rule_severity})")
            } else {
                format!("{outcome} (rule severity: {rule_severity})")
            };
            Finding {
                target: target.clone(),
                scanner: ScannerKind::Compliance,
                identifier: identifier.to_string(),
                severity: Severity::from_xccdf_result(outcome),
                message,
                raw: raw[rule.range()].to_string(),
            }
        })
        .collect();
    Ok(findings)
}

// --- file permissions ---

/// Evaluates a stat record (`kind=<file|dir|other> mode=<octal> uid=<n> gid=<n>`)
/// into one finding per check:
///
/// - `world-writable`: any user may write.
/// - `group-writable`: the owning group may write under a system config tree.
/// - `group-other-exec`: an executable file that group or other users may run.
///
/// A check that does not apply to the entry is reported as `notapplicable`.
fn normalize_permissions(target: &ScanTarget, raw: &str) -> Result<Vec<Finding>, ToolError> {
    let record = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| ToolError::malformed("stat", "empty record"))?;

    let mut kind = None;
    let mut mode = None;
    for field in record.split_whitespace() {
        match field.split_once('=') {
            Some(("kind", value)) => kind = Some(value),
            Some(("mode", value)) => {
                let bits = u32::from_str_radix(value, 8)
                    .map_err(|e| ToolError::malformed("stat", format!("mode {value:?}: {e}")))?;
                mode = Some(bits);
            }
            Some(_) => {}
            None => return Err(ToolError::malformed("stat", format!("unexpected field {field:?}"))),
        }
    }
    let kind = kind.ok_or_else(|| ToolError::malformed("stat", "missing kind"))?;
    let mode = mode.ok_or_else(|| ToolError::malformed("stat", "missing mode"))?;

    let executable_file = kind == "file" && mode & 0o100 != 0;
    let system_config = SYSTEM_CONFIG_DIRS
        .iter()
        .any(|dir| Path::new(&target.locator).starts_with(dir));
    let checks = [
        ("world-writable", Some(mode & 0o002 != 0), "writable by any user"),
        (
            "group-writable",
            system_config.then_some(mode & 0o020 != 0),
            "system configuration writable by its group",
        ),
        (
            "group-other-exec",
            executable_file.then_some(mode & 0o011 != 0),
            "executable by group or other users",
        ),
    ];

    Ok(checks
        .into_iter()
        .map(|(identifier, failed, problem)| {
            let (severity, message) = match failed {
                Some(true) => (Severity::Fail, format!("{problem} (mode {:03o})", mode & 0o777)),
                Some(false) => (Severity::Pass, format!("mode {:03o}", mode & 0o777)),
                None => (Severity::NotApplicable, format!("does not apply to this {kind}")),
            };
            Finding {
                target: target.clone(),
                scanner: ScannerKind::Permissions,
                identifier: identifier.to_string(),
                severity,
                message,
                raw: record.to_string(),
            }
        })
        .collect())
}
