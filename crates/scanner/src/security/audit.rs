//! Append-only audit log for security-relevant engine events
//!
//! Events flow through registered filter predicates (any veto drops the
//! event silently), then the statistics counters, then the registered
//! custom sinks, and finally the built-in console and file sinks. The file
//! sink writes one JSON line per event to `audit-YYYY-MM-DD.log` under the
//! configured directory, rotating by UTC date and size and pruning old
//! files past the retention limit.
//!
//! Event timestamps and file date stamps are the only wall-clock reads in
//! the core; ordering across events is established by the serialized
//! write path, not by the clock.

use std::collections::HashMap;
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

/// Types of audit events (stable string values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Authentication events
    Login,
    Logout,
    LoginFailed,

    // Task events
    TaskCreate,
    TaskStart,
    TaskStop,
    TaskDelete,
    TaskComplete,
    TaskFail,

    // Scan events
    ScanStart,
    ScanStop,
    VulnFound,

    // Plugin events
    PluginLoad,
    PluginReload,
    PluginError,

    // Configuration events
    ConfigChange,

    // System events
    SystemStart,
    SystemStop,
    Error,

    // Data access events
    DataAccess,
    DataExport,
    DataDelete,
}

impl AuditEventType {
    /// The stable string value of this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::LoginFailed => "login_failed",
            Self::TaskCreate => "task_create",
            Self::TaskStart => "task_start",
            Self::TaskStop => "task_stop",
            Self::TaskDelete => "task_delete",
            Self::TaskComplete => "task_complete",
            Self::TaskFail => "task_fail",
            Self::ScanStart => "scan_start",
            Self::ScanStop => "scan_stop",
            Self::VulnFound => "vuln_found",
            Self::PluginLoad => "plugin_load",
            Self::PluginReload => "plugin_reload",
            Self::PluginError => "plugin_error",
            Self::ConfigChange => "config_change",
            Self::SystemStart => "system_start",
            Self::SystemStop => "system_stop",
            Self::Error => "error",
            Self::DataAccess => "data_access",
            Self::DataExport => "data_export",
            Self::DataDelete => "data_delete",
        }
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity levels for audit events (stable string values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    /// Routine events.
    Info,
    /// Suspicious but non-failing events.
    Warning,
    /// Failures.
    Error,
    /// Events requiring immediate attention.
    Critical,
}

impl AuditSeverity {
    /// The stable string value of this severity.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

/// A single audit event. Immutable after construction; the timestamp is
/// the UTC wall-clock reading taken when the event was built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// What happened.
    pub event_type: AuditEventType,
    /// How serious it is.
    pub severity: AuditSeverity,
    /// Human-readable description.
    pub message: String,
    /// User associated with the event, if any.
    pub user_id: Option<String>,
    /// Source address associated with the event, if any.
    pub source_ip: Option<String>,
    /// Target of the operation, if any.
    pub target: Option<String>,
    /// Arbitrary structured context.
    #[serde(default)]
    pub details: Map<String, Value>,
    /// UTC wall-clock time at construction.
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Build an event with severity [`AuditSeverity::Info`], stamping the
    /// current UTC time.
    pub fn new(event_type: AuditEventType, message: impl Into<String>) -> Self {
        Self {
            event_type,
            severity: AuditSeverity::Info,
            message: message.into(),
            user_id: None,
            source_ip: None,
            target: None,
            details: Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Set the severity.
    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Attach the acting user.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach the source address.
    pub fn with_source_ip(mut self, source_ip: impl Into<String>) -> Self {
        self.source_ip = Some(source_ip.into());
        self
    }

    /// Attach the operation target.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Replace the details map.
    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details = details;
        self
    }

    /// Insert a single detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Serialize to the single-line JSON wire format.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse an event back from its JSON line.
    pub fn from_json(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

/// Configuration for the audit logger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Directory for log files.
    pub log_dir: PathBuf,
    /// Maximum file size in bytes before rotation.
    pub max_file_size: u64,
    /// Maximum number of log files to keep.
    pub max_files: usize,
    /// Enable the console sink.
    pub enable_console: bool,
    /// Enable the file sink.
    pub enable_file: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs/audit"),
            max_file_size: 10 * 1024 * 1024,
            max_files: 10,
            enable_console: true,
            enable_file: true,
        }
    }
}

/// Snapshot returned by [`AuditLogger::stats`].
#[derive(Debug, Clone)]
pub struct AuditStats {
    /// Events accepted past the filters since construction.
    pub total_events: u64,
    /// Accepted events grouped by event type string.
    pub events_by_type: HashMap<String, u64>,
    /// Configured log directory.
    pub log_dir: PathBuf,
    /// Path of the file currently open for appends, if any.
    pub current_file: Option<PathBuf>,
}

type AuditFilter = Arc<dyn Fn(&AuditEvent) -> bool + Send + Sync>;
type SinkError = Box<dyn std::error::Error + Send + Sync>;
type AuditSink = Arc<dyn Fn(&AuditEvent) -> Result<(), SinkError> + Send + Sync>;

/// File handle state guarded by the logger's async file lock.
struct FileSink {
    current_path: Option<PathBuf>,
    handle: Option<tokio::fs::File>,
}

/// Audit logger with filters, pluggable sinks, and rotating file output.
///
/// All file writes are serialized behind one async lock, so line order
/// within a file equals the order in which `log` calls entered the write
/// section. Filters and sinks run outside that lock and must not mutate
/// the event.
pub struct AuditLogger {
    config: AuditConfig,
    filters: RwLock<Vec<AuditFilter>>,
    sinks: RwLock<Vec<AuditSink>>,
    file: tokio::sync::Mutex<FileSink>,
    total_events: AtomicU64,
    events_by_type: Mutex<HashMap<&'static str, u64>>,
}

impl AuditLogger {
    /// Create a logger with the given configuration. No file is opened
    /// until [`initialize`](Self::initialize) or the first logged event.
    pub fn new(config: AuditConfig) -> Self {
        Self {
            config,
            filters: RwLock::new(Vec::new()),
            sinks: RwLock::new(Vec::new()),
            file: tokio::sync::Mutex::new(FileSink { current_path: None, handle: None }),
            total_events: AtomicU64::new(0),
            events_by_type: Mutex::new(HashMap::new()),
        }
    }

    /// Create the log directory (when the file sink is enabled) and
    /// perform one rotation check.
    pub async fn initialize(&self) -> io::Result<()> {
        if self.config.enable_file {
            tokio::fs::create_dir_all(&self.config.log_dir).await?;
            let mut sink = self.file.lock().await;
            self.rotate_if_needed(&mut sink).await?;
        }
        info!("audit logger initialized (dir: {})", self.config.log_dir.display());
        Ok(())
    }

    /// Register a filter predicate. Filters run in registration order; the
    /// first one returning `false` drops the event silently. There is no
    /// removal API.
    pub fn add_filter(&self, filter: impl Fn(&AuditEvent) -> bool + Send + Sync + 'static) {
        self.filters.write().push(Arc::new(filter));
    }

    /// Register a custom sink. Sink errors and panics are contained and
    /// logged, never propagated. There is no removal API.
    pub fn add_handler(
        &self,
        sink: impl Fn(&AuditEvent) -> Result<(), SinkError> + Send + Sync + 'static,
    ) {
        self.sinks.write().push(Arc::new(sink));
    }

    /// Log an audit event.
    ///
    /// Applies filters, updates counters, invokes custom sinks, then
    /// writes to the enabled outputs. Write failures are logged and
    /// swallowed; `log` itself never fails.
    pub async fn log(&self, event: AuditEvent) {
        let filters = self.filters.read().clone();
        for filter in &filters {
            if !filter(&event) {
                return;
            }
        }

        self.total_events.fetch_add(1, Ordering::Relaxed);
        *self.events_by_type.lock().entry(event.event_type.as_str()).or_insert(0) += 1;

        let sinks = self.sinks.read().clone();
        for sink in &sinks {
            match std::panic::catch_unwind(AssertUnwindSafe(|| sink(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("audit sink error: {}", e),
                Err(_) => error!("audit sink panicked"),
            }
        }

        self.write_event(&event).await;
    }

    /// Flush and release the current file handle.
    pub async fn close(&self) {
        let mut sink = self.file.lock().await;
        if let Some(mut handle) = sink.handle.take() {
            if let Err(e) = handle.flush().await {
                error!("failed to flush audit log on close: {}", e);
            }
        }
        sink.current_path = None;
    }

    /// Snapshot of the logger's counters and file state.
    pub async fn stats(&self) -> AuditStats {
        let events_by_type = self
            .events_by_type
            .lock()
            .iter()
            .map(|(k, v)| ((*k).to_string(), *v))
            .collect();
        AuditStats {
            total_events: self.total_events.load(Ordering::Relaxed),
            events_by_type,
            log_dir: self.config.log_dir.clone(),
            current_file: self.file.lock().await.current_path.clone(),
        }
    }

    async fn write_event(&self, event: &AuditEvent) {
        if self.config.enable_console {
            self.write_console(event);
        }

        if self.config.enable_file {
            match event.to_json() {
                Ok(line) => self.write_file(&line).await,
                Err(e) => error!("failed to serialize audit event: {}", e),
            }
        }
    }

    /// Console sink: one human-readable line at a level derived from the
    /// event severity. `tracing` has no critical level, so CRITICAL events
    /// are emitted as errors with an explicit marker.
    fn write_console(&self, event: &AuditEvent) {
        match event.severity {
            AuditSeverity::Info => {
                info!(target: "audit", "[AUDIT] {}: {}", event.event_type, event.message);
            }
            AuditSeverity::Warning => {
                warn!(target: "audit", "[AUDIT] {}: {}", event.event_type, event.message);
            }
            AuditSeverity::Error => {
                error!(target: "audit", "[AUDIT] {}: {}", event.event_type, event.message);
            }
            AuditSeverity::Critical => {
                error!(target: "audit", "[AUDIT][CRITICAL] {}: {}", event.event_type, event.message);
            }
        }
    }

    async fn write_file(&self, line: &str) {
        let mut sink = self.file.lock().await;

        if let Err(e) = self.rotate_if_needed(&mut sink).await {
            error!("audit log rotation failed: {}", e);
        }

        if let Some(handle) = sink.handle.as_mut() {
            let mut buf = Vec::with_capacity(line.len() + 1);
            buf.extend_from_slice(line.as_bytes());
            buf.push(b'\n');

            if let Err(e) = handle.write_all(&buf).await {
                error!("failed to write audit log: {}", e);
                return;
            }
            if let Err(e) = handle.flush().await {
                error!("failed to flush audit log: {}", e);
            }
        }
    }

    /// Rotation check run before every append: reopen when the UTC date
    /// changed or the current file reached its size limit, then prune old
    /// files. Must be called with the file lock held.
    async fn rotate_if_needed(&self, sink: &mut FileSink) -> io::Result<()> {
        let today = Utc::now().format("%Y-%m-%d");
        let log_file = self.config.log_dir.join(format!("audit-{today}.log"));

        let mut should_rotate = sink.current_path.as_deref() != Some(log_file.as_path());
        if !should_rotate {
            if let Ok(meta) = tokio::fs::metadata(&log_file).await {
                should_rotate = meta.len() >= self.config.max_file_size;
            }
        }

        if should_rotate {
            if let Some(mut handle) = sink.handle.take() {
                let _ = handle.flush().await;
            }

            let handle = OpenOptions::new().create(true).append(true).open(&log_file).await?;
            debug!("audit log rotated to {}", log_file.display());
            sink.current_path = Some(log_file);
            sink.handle = Some(handle);

            self.cleanup_old_files().await;
        }

        Ok(())
    }

    /// Remove `audit-*.log` files beyond the retention limit, newest (by
    /// mtime) first. Best-effort: failures are logged and skipped.
    async fn cleanup_old_files(&self) {
        let mut entries = match tokio::fs::read_dir(&self.config.log_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("failed to list audit log directory: {}", e);
                return;
            }
        };

        let mut log_files = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with("audit-") || !name.ends_with(".log") {
                continue;
            }
            if let Ok(meta) = entry.metadata().await {
                if let Ok(mtime) = meta.modified() {
                    log_files.push((entry.path(), mtime));
                }
            }
        }

        log_files.sort_by(|a, b| b.1.cmp(&a.1));

        for (old_file, _) in log_files.iter().skip(self.config.max_files) {
            if let Err(e) = tokio::fs::remove_file(old_file).await {
                error!("failed to delete old audit log {}: {}", old_file.display(), e);
            } else {
                debug!("pruned old audit log {}", old_file.display());
            }
        }
    }
}
