// src/report/mod.rs

pub mod json;
pub mod table;

use clap::ValueEnum;
use strum::Display;

use crate::core::models::ScanSummary;

pub use self::json::JsonReporter;
pub use self::table::TableReporter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ReportFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Lossless JSON, same shape as the stored summary
    Json,
}

pub trait Reporter {
    fn report(&self, summary: &ScanSummary) -> String;
}

/// Renders `summary` in the requested format. Color only applies to tables.
pub fn render(summary: &ScanSummary, format: ReportFormat, color: bool) -> String {
    match format {
        ReportFormat::Json => JsonReporter::new().report(summary),
        ReportFormat::Table => TableReporter::new(color).report(summary),
    }
}
