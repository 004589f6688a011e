// src/main.rs

use clap::Parser;
use color_eyre::eyre::Result;
use std::process::ExitCode;
use tracing::info;

mod app;
mod cli;
mod config;
mod core;
mod logging;
mod report;
mod store;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let log_path = logging::initialize_logging(cli.options.verbose)?;
    info!(log = %log_path.display(), version = env!("CARGO_PKG_VERSION"), "scanward starting.");

    let code = app::run(cli).await?;
    info!(code, "scanward finished.");
    Ok(ExitCode::from(code))
}
