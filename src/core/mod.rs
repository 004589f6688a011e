// src/core/mod.rs

// The scanning core: targets in, normalized findings and a session summary out.

/// Per-pair and configuration-time error types.
pub mod error;

/// Targets, findings, runs and the session summary.
pub mod models;

/// Maps each tool's native output onto the common `Finding` shape.
pub mod normalizer;

/// Dispatches (target, scanner) pairs and collects their runs.
pub mod orchestrator;

/// Out-of-process tool invocation with time bounds.
pub mod process;

/// One adapter per external tool, plus the registry that looks them up.
pub mod scanner;

pub mod targets;
