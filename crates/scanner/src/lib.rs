//! Scanner-facing core of the VulnScan engine.
//!
//! This crate owns the two stateful subsystems the worker pool depends on
//! beyond the generic control plane in `vulnscan-common`:
//!
//! - [`security`]: the append-only audit log with filters, sinks, and
//!   daily rotation
//! - [`plugins`]: the plugin lifecycle — manifest discovery, content-hash
//!   deduplication, the compile-time catalog, the sandbox import policy,
//!   and the hot-reload watcher
//!
//! The scan engine itself (the worker pool consuming jobs) lives outside
//! this crate and drives these subsystems through the re-exported surface
//! below.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod config;
pub mod plugins;
pub mod security;

// Re-export the consumer-facing surface for convenience
// -----------------------
pub use config::ScannerConfig;
pub use plugins::catalog::{HttpClient, HttpError, HttpResponse, PluginCatalog, ScanTool,
    VerifyResult, VulnCheck};
pub use plugins::loader::{PluginInfo, PluginKind, PluginLoader};
pub use plugins::sandbox::SandboxPolicy;
pub use plugins::PluginError;
pub use security::audit::{
    AuditConfig, AuditEvent, AuditEventType, AuditLogger, AuditSeverity, AuditStats,
};
