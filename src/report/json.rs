// src/report/json.rs

use crate::core::models::ScanSummary;
use crate::report::Reporter;

/// Structured output. This is the same document the store persists, so it can
/// be read back into an equal `ScanSummary`.
pub struct JsonReporter;

impl JsonReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn to_json(summary: &ScanSummary) -> serde_json::Result<String> {
        serde_json::to_string_pretty(summary)
    }

    pub fn parse(json: &str) -> serde_json::Result<ScanSummary> {
        serde_json::from_str(json)
    }
}

impl Default for JsonReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for JsonReporter {
    fn report(&self, summary: &ScanSummary) -> String {
        Self::to_json(summary)
            .unwrap_or_else(|e| format!(r#"{{"error": "Failed to serialize summary: {}"}}"#, e))
    }
}
