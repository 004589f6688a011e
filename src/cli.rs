// src/cli.rs

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::core::models::ScannerKind;
use crate::core::scanner::malware_scanner::{ClamdMode, DEFAULT_SOCKET};
use crate::core::scanner::vuln_scanner::VulnBackend;
use crate::report::ReportFormat;

#[derive(Parser, Debug)]
#[command(
    name = "scanward",
    version,
    about = "Runs malware, vulnerability, compliance and permission scanners and merges their findings",
    long_about = "scanward drives clamd, grype/trivy and oscap over files, directories and container images, \
                  normalizes what they report into one set of findings and stores a summary per session."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub options: GlobalOptions,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan a file, or a directory with --directory, through clamd
    Malware {
        path: PathBuf,

        /// Treat the target as a directory and scan every file in it
        #[arg(short, long)]
        directory: bool,

        /// Descend into subdirectories (implies --directory)
        #[arg(short, long)]
        recursive: bool,
    },

    /// Scan a container image for vulnerable packages
    Image { reference: String },

    /// Scan a directory tree or file for vulnerable packages
    Fs { path: PathBuf },

    /// Evaluate a SCAP datastream against this host
    Compliance { datastream: PathBuf },

    /// Audit the permission bits of a file or directory
    Permissions { path: PathBuf },

    /// List the profiles of a SCAP datastream
    Profiles { datastream: PathBuf },

    /// Check that a SCAP datastream is well formed
    Validate { datastream: PathBuf },

    /// Print a stored scan summary
    Show { summary: PathBuf },

    /// Run several scanners over several targets in one session
    Scan {
        /// Paths, or container images written as image:<ref>
        #[arg(required = true)]
        targets: Vec<String>,

        /// Scanners to run: malware, vuln-image, vuln-fs, compliance, permissions
        #[arg(short, long = "scanner", value_delimiter = ',', required = true)]
        scanners: Vec<ScannerKind>,

        /// Descend into subdirectories of directory targets
        #[arg(short, long)]
        recursive: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct GlobalOptions {
    /// Where summaries, reports and XCCDF results are written
    #[arg(long, global = true, default_value = "scan_results")]
    pub results_dir: PathBuf,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = ReportFormat::Table)]
    pub format: ReportFormat,

    /// Also write the table report next to the JSON summary
    #[arg(long, global = true)]
    pub save_table: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Log to stderr as well as to the log file
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Number of scans run at the same time
    #[arg(short = 'j', long, global = true, default_value_t = 1)]
    pub parallelism: usize,

    /// Time limit for one scanner invocation, in seconds
    #[arg(long, global = true, default_value_t = 600)]
    pub timeout: u64,

    /// Time limit for a version probe, in seconds
    #[arg(long, global = true, default_value_t = 10)]
    pub probe_timeout: u64,

    /// clamd Unix socket
    #[arg(long, global = true, default_value = DEFAULT_SOCKET)]
    pub clamd_socket: PathBuf,

    /// Reach clamd over TCP instead, as host or host:port
    #[arg(long, global = true)]
    pub clamd_tcp: Option<String>,

    /// path: clamd opens the file itself; stream: upload file contents
    #[arg(long, global = true, default_value_t = ClamdMode::Path)]
    pub clamd_mode: ClamdMode,

    /// Time limit for one clamd exchange, in seconds
    #[arg(long, global = true, default_value_t = 30)]
    pub daemon_timeout: u64,

    /// Vulnerability scanner to use: grype or trivy
    #[arg(long, global = true, default_value_t = VulnBackend::Grype)]
    pub backend: VulnBackend,

    /// Severities trivy reports, comma separated
    #[arg(long, global = true, value_delimiter = ',', default_values = ["HIGH", "CRITICAL"])]
    pub severity: Vec<String>,

    /// XCCDF profile id to evaluate
    #[arg(long, global = true)]
    pub profile: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_malware_directory() {
        let cli = Cli::try_parse_from(["scanward", "malware", "-d", "-r", "/srv/uploads"]).unwrap();
        match cli.command {
            Commands::Malware {
                path,
                directory,
                recursive,
            } => {
                assert_eq!(path, PathBuf::from("/srv/uploads"));
                assert!(directory);
                assert!(recursive);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["scanward", "image", "python:3.11"]).unwrap();
        let o = cli.options;
        assert_eq!(o.results_dir, PathBuf::from("scan_results"));
        assert_eq!(o.parallelism, 1);
        assert_eq!(o.timeout, 600);
        assert_eq!(o.daemon_timeout, 30);
        assert_eq!(o.clamd_mode, ClamdMode::Path);
        assert_eq!(o.backend, VulnBackend::Grype);
        assert_eq!(o.severity, vec!["HIGH", "CRITICAL"]);
        assert!(matches!(o.format, ReportFormat::Table));
        assert!(o.profile.is_none());
    }

    #[test]
    fn test_parse_scan_with_scanners() {
        let cli = Cli::try_parse_from([
            "scanward",
            "scan",
            "image:alpine:3.19",
            "./app",
            "--scanner",
            "vuln-image,vuln-fs",
            "-j",
            "4",
            "--format",
            "json",
        ])
        .unwrap();
        match cli.command {
            Commands::Scan { targets, scanners, .. } => {
                assert_eq!(targets, vec!["image:alpine:3.19", "./app"]);
                assert_eq!(scanners, vec![ScannerKind::VulnImage, ScannerKind::VulnFs]);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.options.parallelism, 4);
        assert!(matches!(cli.options.format, ReportFormat::Json));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "scanward",
            "fs",
            ".",
            "--backend",
            "trivy",
            "--severity",
            "critical",
            "--clamd-tcp",
            "10.0.0.5",
        ])
        .unwrap();
        assert_eq!(cli.options.backend, VulnBackend::Trivy);
        assert_eq!(cli.options.severity, vec!["critical"]);
        assert_eq!(cli.options.clamd_tcp.as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn test_rejects_unknown_scanner() {
        assert!(Cli::try_parse_from(["scanward", "scan", ".", "--scanner", "nmap"]).is_err());
        assert!(Cli::try_parse_from(["scanward", "scan", "."]).is_err());
    }

    #[test]
    fn test_parse_show() {
        let cli = Cli::try_parse_from([
            "scanward",
            "show",
            "scan_results/scan_summary_20240501_101500.json",
            "-f",
            "json",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Show { .. }));
        assert!(matches!(cli.options.format, ReportFormat::Json));
    }

    #[test]
    fn test_rejects_unknown_backend() {
        assert!(Cli::try_parse_from(["scanward", "image", "alpine", "--backend", "snyk"]).is_err());
    }
}
