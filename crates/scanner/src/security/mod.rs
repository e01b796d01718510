//! Security-facing subsystems of the scanner core.
//!
//! Currently this is the audit log; rate limiting, circuit breaking, and
//! timeout control live in `vulnscan-common::resilience` and are re-used
//! here unchanged.

pub mod audit;

pub use audit::{AuditConfig, AuditEvent, AuditEventType, AuditLogger, AuditSeverity, AuditStats};
