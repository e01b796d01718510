//! Compile-time plugin catalog and the traits plugins implement
//!
//! The engine replaces source-file dynamic import with a registration
//! mechanism: manifests on disk declare *which* plugin exists, and this
//! catalog maps each entry name to the factory producing its callable
//! implementation. Hot reload and content-hash deduplication operate on
//! the manifests; the implementations themselves are compiled in.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::builtin::tools::DnsResolver;
use super::builtin::vulns::{SqlInjectionBasic, XssReflected};

/// Response surface plugins consume. Deliberately minimal: the concrete
/// HTTP client lives outside the core.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body decoded as text.
    pub body: String,
}

/// Errors surfaced through the [`HttpClient`] seam.
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    /// The request could not be completed.
    #[error("request failed: {0}")]
    Request(String),
    /// The request exceeded its deadline.
    #[error("request timed out")]
    Timeout,
}

/// HTTP client seam injected into vulnerability probes.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send a GET request and return the decoded response.
    async fn get(&self, url: &str) -> Result<HttpResponse, HttpError>;
}

/// Result mapping produced by a vulnerability probe. The core treats this
/// as opaque content for audit details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResult {
    /// Whether the target is vulnerable.
    pub vulnerable: bool,
    /// Display name of the vulnerability checked.
    pub vulnerability: String,
    /// Severity classification of a finding.
    pub severity: String,
    /// Per-payload findings.
    #[serde(default)]
    pub details: Vec<Value>,
    /// Evidence excerpt backing the finding, if any.
    pub evidence: Option<String>,
    /// Probe-level error, when the check could not run to completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyResult {
    /// A clean (not vulnerable) result for the named check.
    pub fn clean(vulnerability: impl Into<String>, severity: impl Into<String>) -> Self {
        Self {
            vulnerable: false,
            vulnerability: vulnerability.into(),
            severity: severity.into(),
            details: Vec::new(),
            evidence: None,
            error: None,
        }
    }
}

/// A vulnerability check exposed by a plugin.
#[async_trait]
pub trait VulnCheck: Send + Sync {
    /// Probe `target` and report whether the vulnerability is present.
    ///
    /// `options` carries caller-supplied parameters; unknown keys must be
    /// ignored.
    async fn verify(
        &self,
        target: &str,
        client: &dyn HttpClient,
        options: &Map<String, Value>,
    ) -> VerifyResult;

    /// Undo any side effects the probe left on the target. Default: none.
    async fn cleanup(&self, _target: &str) {}
}

/// A tool plugin instance: shared utilities for vulnerability probes.
pub trait ScanTool: Send + Sync {
    /// Stable tool name.
    fn name(&self) -> &'static str;

    /// Downcast support so consumers can reach the concrete tool API.
    fn as_any(&self) -> &dyn Any;
}

type VulnFactory = fn() -> Arc<dyn VulnCheck>;
type ToolFactory = fn() -> Arc<dyn ScanTool>;

/// Registry of compiled-in plugin implementations, keyed by entry name.
pub struct PluginCatalog {
    vulns: HashMap<String, VulnFactory>,
    tools: HashMap<String, ToolFactory>,
}

impl PluginCatalog {
    /// An empty catalog.
    pub fn empty() -> Self {
        Self { vulns: HashMap::new(), tools: HashMap::new() }
    }

    /// The catalog of built-in implementations shipped with the engine.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        catalog.register_vuln("sqli_basic", || Arc::new(SqlInjectionBasic::new()));
        catalog.register_vuln("xss_reflected", || Arc::new(XssReflected::new()));
        catalog.register_tool("dns_resolver", || Arc::new(DnsResolver::new()));
        catalog
    }

    /// Register a vulnerability check factory under `entry`.
    pub fn register_vuln(&mut self, entry: impl Into<String>, factory: VulnFactory) {
        self.vulns.insert(entry.into(), factory);
    }

    /// Register a tool factory under `entry`.
    pub fn register_tool(&mut self, entry: impl Into<String>, factory: ToolFactory) {
        self.tools.insert(entry.into(), factory);
    }

    /// Instantiate the vulnerability check registered under `entry`.
    pub fn vuln(&self, entry: &str) -> Option<Arc<dyn VulnCheck>> {
        self.vulns.get(entry).map(|factory| factory())
    }

    /// Instantiate the tool registered under `entry`.
    pub fn tool(&self, entry: &str) -> Option<Arc<dyn ScanTool>> {
        self.tools.get(entry).map(|factory| factory())
    }

    /// Entry names of every registered vulnerability check.
    pub fn vuln_entries(&self) -> Vec<&str> {
        self.vulns.keys().map(String::as_str).collect()
    }

    /// Entry names of every registered tool.
    pub fn tool_entries(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }
}

impl Default for PluginCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
