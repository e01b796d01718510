//! Plugin manifest parsing
//!
//! A plugin is declared by a TOML file whose stem is the plugin id.
//! Vulnerability manifests carry a `[vuln_info]` table with the
//! recognized keys (name, vuln_id, severity, category, description,
//! author, version, references, tags, fingerprints); unknown keys are
//! preserved verbatim into the registry metadata. The optional top-level
//! `entry` names the catalog implementation (defaulting to the plugin
//! id), and the optional `imports` list is checked against the sandbox
//! policy before the plugin is registered.
//!
//! ```toml
//! entry = "sqli_basic"
//! imports = ["httpx", "re"]
//!
//! [vuln_info]
//! name = "SQL Injection Basic"
//! vuln_id = "CVE-2024-DEMO-SQLI"
//! severity = "high"
//! category = "injection"
//! ```

use serde::Deserialize;
use serde_json::{Map, Value};

/// Parsed plugin manifest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginManifest {
    /// Catalog entry implementing the plugin; defaults to the plugin id.
    pub entry: Option<String>,

    /// Modules the plugin's probe logic declares; checked against the
    /// sandbox policy at load time.
    #[serde(default)]
    pub imports: Vec<String>,

    /// Vulnerability metadata. Required for vulnerability plugins,
    /// preserved verbatim (including unrecognized keys).
    pub vuln_info: Option<toml::Table>,

    /// Optional tool metadata for tool plugins.
    pub tool_info: Option<toml::Table>,
}

impl PluginManifest {
    /// Parse a manifest from TOML text.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// The declared display name from `[vuln_info]`, when present.
    pub fn declared_name(&self) -> Option<&str> {
        self.vuln_info.as_ref().and_then(|table| table.get("name")).and_then(|v| v.as_str())
    }
}

/// Convert a TOML table into the JSON metadata map stored on registry
/// entries. Conversion is total for all values TOML can express.
pub(crate) fn table_to_metadata(table: &toml::Table) -> Map<String, Value> {
    match serde_json::to_value(table) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
