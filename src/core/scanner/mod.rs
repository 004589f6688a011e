// src/core/scanner/mod.rs

// One adapter per external tool. Each wraps exactly one scanner, checks that it
// is reachable before use, and turns its native output into a `ScanRun`.
pub mod compliance_scanner;
pub mod malware_scanner;
pub mod permission_scanner;
pub mod vuln_scanner;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::core::error::ToolError;
use crate::core::models::{ScanRun, ScanTarget, ScannerKind};
use crate::core::process::CommandRunner;
use self::compliance_scanner::ComplianceAdapter;
use self::malware_scanner::MalwareAdapter;
use self::permission_scanner::PermissionAdapter;
use self::vuln_scanner::VulnAdapter;

/// Integration point for one external scanning tool.
///
/// `invoke` reports an unreachable tool as a `ScanRun` with the matching
/// availability and no findings; `Err` is reserved for timeouts, unexpected
/// exits and unparsable output. Calls share no mutable state.
#[async_trait]
pub trait ScannerAdapter: Send + Sync {
    fn kind(&self) -> ScannerKind;

    /// Directory targets are expanded into their files before dispatch.
    fn scans_per_file(&self) -> bool {
        false
    }

    async fn invoke(&self, target: &ScanTarget) -> Result<ScanRun, ToolError>;
}

/// Lookup table from scanner identity to its adapter.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<ScannerKind, Arc<dyn ScannerAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every built-in adapter, configured from `config`.
    pub fn from_config(config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MalwareAdapter::from_config(config)));
        registry.register(Arc::new(VulnAdapter::from_config(
            ScannerKind::VulnImage,
            config,
            runner.clone(),
        )));
        registry.register(Arc::new(VulnAdapter::from_config(
            ScannerKind::VulnFs,
            config,
            runner.clone(),
        )));
        registry.register(Arc::new(ComplianceAdapter::from_config(config, runner)));
        registry.register(Arc::new(PermissionAdapter::new()));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn ScannerAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: ScannerKind) -> Option<Arc<dyn ScannerAdapter>> {
        self.adapters.get(&kind).cloned()
    }
}
