// src/app.rs

use chrono::Local;
use color_eyre::eyre::{Result, WrapErr};
use crossterm::style::Stylize;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::core::error::{ConfigError, ToolError};
use crate::core::models::{ScanTarget, ScannerKind};
use crate::core::orchestrator::Orchestrator;
use crate::core::process::{CommandRunner, TokioCommandRunner};
use crate::core::scanner::compliance_scanner::ComplianceAdapter;
use crate::core::scanner::AdapterRegistry;
use crate::core::targets;
use crate::logging;
use crate::report::{self, ReportFormat};
use crate::store;

/// The pass ran; individual runs may still have failed.
pub const EXIT_OK: u8 = 0;
/// The input was rejected before any tool started.
pub const EXIT_CONFIG: u8 = 1;
/// Every run found its tool missing or unreachable.
pub const EXIT_UNAVAILABLE: u8 = 2;

type SessionInput = (Vec<ScanTarget>, Vec<ScannerKind>);

/// Executes one command line and returns the process exit code.
pub async fn run(cli: Cli) -> Result<u8> {
    let config = match Config::from_options(&cli.options) {
        Ok(config) => config,
        Err(e) => return Ok(config_failure(&e)),
    };
    let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner);

    match &cli.command {
        Commands::Profiles { datastream } => {
            return list_profiles(&config, runner, datastream).await;
        }
        Commands::Validate { datastream } => {
            return validate_datastream(&config, runner, datastream).await;
        }
        Commands::Show { summary } => return show(&config, summary),
        _ => {}
    }

    match session_input(&cli.command) {
        Some(Ok((targets, scanners))) => scan(&config, runner, &targets, &scanners).await,
        Some(Err(e)) => Ok(config_failure(&e)),
        None => Ok(EXIT_OK),
    }
}

/// Targets and scanners for the commands that open a scan session.
fn session_input(command: &Commands) -> Option<Result<SessionInput, ConfigError>> {
    let input = match command {
        Commands::Malware {
            path,
            directory,
            recursive,
        } => {
            let target = if *directory || *recursive {
                ScanTarget::directory(path, *recursive)
            } else {
                ScanTarget::file(path)
            };
            Ok((vec![target], vec![ScannerKind::Malware]))
        }
        Commands::Image { reference } => {
            targets::image(reference).map(|t| (vec![t], vec![ScannerKind::VulnImage]))
        }
        Commands::Fs { path } => {
            targets::from_path(path, true).map(|t| (vec![t], vec![ScannerKind::VulnFs]))
        }
        Commands::Compliance { datastream } => {
            Ok((vec![ScanTarget::file(datastream)], vec![ScannerKind::Compliance]))
        }
        Commands::Permissions { path } => {
            targets::from_path(path, false).map(|t| (vec![t], vec![ScannerKind::Permissions]))
        }
        Commands::Scan {
            targets: locators,
            scanners,
            recursive,
        } => locators
            .iter()
            .map(|locator| targets::parse_locator(locator, *recursive))
            .collect::<Result<Vec<_>, _>>()
            .map(|t| (t, scanners.clone())),
        Commands::Profiles { .. } | Commands::Validate { .. } | Commands::Show { .. } => return None,
    };
    Some(input)
}

async fn scan(
    config: &Config,
    runner: Arc<dyn CommandRunner>,
    targets: &[ScanTarget],
    scanners: &[ScannerKind],
) -> Result<u8> {
    let session_id = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let span = logging::session_span(&session_id);
    info!(parent: &span, targets = targets.len(), scanners = ?scanners, "Scan session started.");

    let registry = AdapterRegistry::from_config(config, runner);
    let orchestrator = Orchestrator::new(registry, config.parallelism, span.clone());
    let summary = match orchestrator.run(&session_id, targets, scanners).await {
        Ok(summary) => summary,
        Err(e) => return Ok(config_failure(&e)),
    };

    let summary_path = store::save_summary(&config.results_dir, &summary)?;
    let table_path = if config.save_table {
        Some(store::save_table(&config.results_dir, &summary)?)
    } else {
        None
    };

    println!("{}", report::render(&summary, config.format, use_color(config)));
    let mut saved = vec![summary_path];
    saved.extend(table_path);
    for path in saved {
        // Keep stdout parseable when it carries JSON.
        match config.format {
            ReportFormat::Table => println!("Saved {}", path.display()),
            ReportFormat::Json => eprintln!("Saved {}", path.display()),
        }
    }

    if summary.all_unavailable() {
        warn!(parent: &span, "No scanner could be reached.");
        return Ok(EXIT_UNAVAILABLE);
    }
    Ok(EXIT_OK)
}

async fn list_profiles(
    config: &Config,
    runner: Arc<dyn CommandRunner>,
    datastream: &Path,
) -> Result<u8> {
    if let Err(e) = targets::validate(&ScanTarget::file(datastream)) {
        return Ok(config_failure(&e));
    }
    let adapter = ComplianceAdapter::from_config(config, runner);
    let profiles = match adapter.list_profiles(datastream).await {
        Ok(profiles) => profiles,
        Err(e) => return tool_failure(e),
    };

    if profiles.is_empty() {
        println!("No profiles found in {}", datastream.display());
    }
    for profile in profiles {
        match profile.title {
            Some(title) => println!("{}\n    {title}", profile.id),
            None => println!("{}", profile.id),
        }
    }
    Ok(EXIT_OK)
}

async fn validate_datastream(
    config: &Config,
    runner: Arc<dyn CommandRunner>,
    datastream: &Path,
) -> Result<u8> {
    if let Err(e) = targets::validate(&ScanTarget::file(datastream)) {
        return Ok(config_failure(&e));
    }
    let adapter = ComplianceAdapter::from_config(config, runner);
    let validation = match adapter.validate_datastream(datastream).await {
        Ok(validation) => validation,
        Err(e) => return tool_failure(e),
    };

    if validation.valid {
        println!("{} is a valid source datastream", datastream.display());
        Ok(EXIT_OK)
    } else {
        eprintln!("{} is not a valid source datastream", datastream.display());
        if !validation.detail.is_empty() {
            eprintln!("{}", validation.detail);
        }
        Ok(EXIT_CONFIG)
    }
}

fn show(config: &Config, path: &Path) -> Result<u8> {
    let summary = store::load_summary(path)?;
    println!("{}", report::render(&summary, config.format, use_color(config)));
    Ok(EXIT_OK)
}

fn use_color(config: &Config) -> bool {
    config.color && std::io::stdout().is_terminal()
}

fn config_failure(e: &ConfigError) -> u8 {
    error!(error = %e, "Configuration rejected.");
    eprintln!("{} {e}", "error:".red().bold());
    EXIT_CONFIG
}

fn tool_failure(e: ToolError) -> Result<u8> {
    if let ToolError::Unavailable { .. } = e {
        error!(error = %e, "Required tool is unavailable.");
        eprintln!("{} {e}", "error:".red().bold());
        return Ok(EXIT_UNAVAILABLE);
    }
    Err(e).wrap_err("oscap did not complete")
}
