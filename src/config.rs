// src/config.rs

use std::path::PathBuf;
use std::time::Duration;

use crate::cli::GlobalOptions;
use crate::core::error::ConfigError;
use crate::core::models::Severity;
use crate::core::scanner::malware_scanner::{ClamdEndpoint, ClamdMode, DEFAULT_SOCKET, DEFAULT_TCP_PORT};
use crate::core::scanner::vuln_scanner::VulnBackend;
use crate::report::ReportFormat;

pub const MAX_PARALLELISM: usize = 64;

/// Read-only settings shared by every adapter of a session.
#[derive(Debug, Clone)]
pub struct Config {
    pub results_dir: PathBuf,
    pub clamd: ClamdEndpoint,
    pub clamd_mode: ClamdMode,
    pub daemon_timeout: Duration,
    pub tool_timeout: Duration,
    pub probe_timeout: Duration,
    pub parallelism: usize,
    pub vuln_backend: VulnBackend,
    /// Passed to trivy as `--severity`; findings are never dropped afterwards.
    pub severity_filter: Vec<Severity>,
    pub compliance_profile: Option<String>,
    pub format: ReportFormat,
    pub save_table: bool,
    pub color: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("scan_results"),
            clamd: ClamdEndpoint::Unix(PathBuf::from(DEFAULT_SOCKET)),
            clamd_mode: ClamdMode::default(),
            daemon_timeout: Duration::from_secs(30),
            tool_timeout: Duration::from_secs(600),
            probe_timeout: Duration::from_secs(10),
            parallelism: 1,
            vuln_backend: VulnBackend::default(),
            severity_filter: vec![Severity::High, Severity::Critical],
            compliance_profile: None,
            format: ReportFormat::default(),
            save_table: false,
            color: true,
        }
    }
}

impl Config {
    pub fn from_options(options: &GlobalOptions) -> Result<Self, ConfigError> {
        let clamd = match &options.clamd_tcp {
            Some(addr) => ClamdEndpoint::Tcp(tcp_address(addr)?),
            None => ClamdEndpoint::Unix(options.clamd_socket.clone()),
        };
        let config = Self {
            results_dir: options.results_dir.clone(),
            clamd,
            clamd_mode: options.clamd_mode,
            daemon_timeout: Duration::from_secs(options.daemon_timeout),
            tool_timeout: Duration::from_secs(options.timeout),
            probe_timeout: Duration::from_secs(options.probe_timeout),
            parallelism: options.parallelism,
            vuln_backend: options.backend,
            severity_filter: severity_filter(&options.severity)?,
            compliance_profile: options.profile.clone().filter(|p| !p.trim().is_empty()),
            format: options.format,
            save_table: options.save_table,
            color: !options.no_color,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallelism == 0 || self.parallelism > MAX_PARALLELISM {
            return Err(ConfigError::InvalidSetting {
                name: "parallelism",
                reason: format!("must be between 1 and {MAX_PARALLELISM}, got {}", self.parallelism),
            });
        }
        for (name, value) in [
            ("timeout", self.tool_timeout),
            ("probe-timeout", self.probe_timeout),
            ("daemon-timeout", self.daemon_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidSetting {
                    name,
                    reason: "must be at least one second".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// `host` or `host:port`; the clamd default port is filled in when missing.
fn tcp_address(addr: &str) -> Result<String, ConfigError> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(ConfigError::InvalidSetting {
            name: "clamd-tcp",
            reason: "empty address".to_string(),
        });
    }
    let has_port = match addr.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty() && !port.is_empty() && port.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    };
    if has_port {
        Ok(addr.to_string())
    } else {
        Ok(format!("{addr}:{DEFAULT_TCP_PORT}"))
    }
}

fn severity_filter(labels: &[String]) -> Result<Vec<Severity>, ConfigError> {
    let mut severities = Vec::new();
    for label in labels.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        let severity = Severity::from_vulnerability(label);
        if severity == Severity::Unknown && !label.eq_ignore_ascii_case("unknown") {
            return Err(ConfigError::InvalidSetting {
                name: "severity",
                reason: format!("unknown severity {label:?}"),
            });
        }
        if !severities.contains(&severity) {
            severities.push(severity);
        }
    }
    Ok(severities)
}
