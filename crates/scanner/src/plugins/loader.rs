//! Plugin loader with content-hash deduplication and hot reload
//!
//! Walks the vulnerability and tool manifest directories, registers every
//! eligible manifest against the compile-time catalog, and keeps the
//! registries fresh as files change. Identity is the file stem; files
//! starting with `_` are ignored. Identical bytes never cause an
//! observable reload: the MD5 hash is compared before anything else
//! happens, which also absorbs editors that fire several change events
//! per save. MD5 is change detection only, never a security boundary.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use super::catalog::{PluginCatalog, ScanTool, VulnCheck};
use super::manifest::{table_to_metadata, PluginManifest};
use super::sandbox::SandboxPolicy;
use super::watcher::PluginWatcher;
use super::PluginError;

/// Kind of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    /// Vulnerability check.
    Vuln,
    /// Shared tool.
    Tool,
}

impl PluginKind {
    /// Stable string value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vuln => "vuln",
            Self::Tool => "tool",
        }
    }
}

/// Registry entry for a loaded vulnerability plugin.
#[derive(Clone)]
pub struct PluginInfo {
    /// Plugin identity (manifest file stem).
    pub plugin_id: String,
    /// Display name from the manifest, falling back to the id.
    pub name: String,
    /// Plugin kind.
    pub kind: PluginKind,
    /// Manifest path the entry was loaded from.
    pub file_path: PathBuf,
    /// MD5 of the manifest content at load time.
    pub md5: String,
    /// Whether the plugin is eligible for scheduling.
    pub enabled: bool,
    /// The `[vuln_info]` table, preserved verbatim.
    pub metadata: Map<String, Value>,
    /// The callable check resolved from the catalog.
    pub instance: Arc<dyn VulnCheck>,
}

impl fmt::Debug for PluginInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInfo")
            .field("plugin_id", &self.plugin_id)
            .field("name", &self.name)
            .field("kind", &self.kind.as_str())
            .field("file_path", &self.file_path)
            .field("md5", &self.md5)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Registered tool instance plus the manifest hash that produced it.
#[derive(Clone)]
struct ToolEntry {
    instance: Arc<dyn ScanTool>,
    md5: String,
}

type ReloadCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Plugin loader with hot reload support.
///
/// Cheap to clone; clones share the registries, so the worker pool and
/// the watcher thread see one consistent view.
#[derive(Clone)]
pub struct PluginLoader {
    inner: Arc<LoaderInner>,
}

pub(crate) struct LoaderInner {
    vuln_dir: PathBuf,
    tool_dir: PathBuf,
    plugins: DashMap<String, PluginInfo>,
    tools: DashMap<String, ToolEntry>,
    sandbox: SandboxPolicy,
    catalog: Arc<PluginCatalog>,
    reload_callback: RwLock<Option<ReloadCallback>>,
    watcher: Mutex<Option<PluginWatcher>>,
}

impl PluginLoader {
    /// Create a loader over the two manifest directories, backed by the
    /// built-in catalog.
    pub fn new(vuln_dir: impl Into<PathBuf>, tool_dir: impl Into<PathBuf>) -> Self {
        Self::with_catalog(vuln_dir, tool_dir, Arc::new(PluginCatalog::builtin()))
    }

    /// Create a loader resolving instances from a custom catalog.
    pub fn with_catalog(
        vuln_dir: impl Into<PathBuf>,
        tool_dir: impl Into<PathBuf>,
        catalog: Arc<PluginCatalog>,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                vuln_dir: vuln_dir.into(),
                tool_dir: tool_dir.into(),
                plugins: DashMap::new(),
                tools: DashMap::new(),
                sandbox: SandboxPolicy::new(),
                catalog,
                reload_callback: RwLock::new(None),
                watcher: Mutex::new(None),
            }),
        }
    }

    /// The sandbox policy the loader consults.
    pub fn sandbox(&self) -> &SandboxPolicy {
        &self.inner.sandbox
    }

    /// Register a callback invoked with the plugin id after every
    /// successful reload.
    pub fn set_reload_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.inner.reload_callback.write() = Some(Arc::new(callback));
    }

    /// Load every plugin manifest from both directories.
    ///
    /// Returns the number of files loaded or reloaded; each file
    /// contributes at most one to the count. Individual failures are
    /// logged and skipped, never aborting the walk.
    pub fn load_all(&self) -> usize {
        let mut count = 0;

        for path in collect_manifests(&self.inner.vuln_dir) {
            match self.inner.load_vuln_plugin(&path) {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(e) => error!("failed to load vuln plugin {}: {}", path.display(), e),
            }
        }

        for path in collect_manifests(&self.inner.tool_dir) {
            match self.inner.load_tool_plugin(&path) {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(e) => error!("failed to load tool plugin {}: {}", path.display(), e),
            }
        }

        info!("loaded {} plugins", count);
        count
    }

    /// Load or reload one vulnerability plugin manifest.
    pub(crate) fn load_vuln_plugin(&self, path: &Path) -> Result<bool, PluginError> {
        self.inner.load_vuln_plugin(path)
    }

    /// Load or reload one tool plugin manifest.
    pub(crate) fn load_tool_plugin(&self, path: &Path) -> Result<bool, PluginError> {
        self.inner.load_tool_plugin(path)
    }

    /// Reload a registered vulnerability plugin from its manifest file.
    ///
    /// Drops the entry when the file has disappeared. On a successful
    /// reload the registered callback is invoked with the plugin id.
    pub fn reload_plugin(&self, plugin_id: &str) -> bool {
        self.inner.reload_plugin(plugin_id)
    }

    /// Get a vulnerability plugin by id.
    pub fn get_plugin(&self, plugin_id: &str) -> Option<PluginInfo> {
        self.inner.plugins.get(plugin_id).map(|entry| entry.value().clone())
    }

    /// All registered vulnerability plugins.
    pub fn get_all_plugins(&self) -> Vec<PluginInfo> {
        self.inner.plugins.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Get a tool instance by id.
    pub fn get_tool(&self, tool_id: &str) -> Option<Arc<dyn ScanTool>> {
        self.inner.tools.get(tool_id).map(|entry| Arc::clone(&entry.value().instance))
    }

    /// All registered tool instances by id.
    pub fn get_all_tools(&self) -> HashMap<String, Arc<dyn ScanTool>> {
        self.inner
            .tools
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(&entry.value().instance)))
            .collect()
    }

    /// Start the filesystem watcher driving hot reloads. Idempotent.
    pub fn start_watcher(&self) -> Result<(), PluginError> {
        let mut guard = self.inner.watcher.lock();
        if guard.is_some() {
            return Ok(());
        }
        *guard = Some(PluginWatcher::spawn(&self.inner)?);
        info!("plugin watcher started");
        Ok(())
    }

    /// Stop the filesystem watcher and join its background thread.
    pub fn stop_watcher(&self) {
        let watcher = self.inner.watcher.lock().take();
        if let Some(watcher) = watcher {
            watcher.stop();
            info!("plugin watcher stopped");
        }
    }
}

impl LoaderInner {
    pub(crate) fn vuln_dir(&self) -> &Path {
        &self.vuln_dir
    }

    pub(crate) fn tool_dir(&self) -> &Path {
        &self.tool_dir
    }

    /// Load or reload one vulnerability plugin manifest.
    ///
    /// Returns `Ok(false)` when the content hash is unchanged or the
    /// manifest lacks `[vuln_info]`.
    pub(crate) fn load_vuln_plugin(&self, path: &Path) -> Result<bool, PluginError> {
        let bytes = std::fs::read(path)
            .map_err(|source| PluginError::Io { path: path.to_path_buf(), source })?;
        let digest = format!("{:x}", md5::compute(&bytes));
        let plugin_id = file_stem(path)?;

        let unchanged =
            self.plugins.get(&plugin_id).is_some_and(|existing| existing.md5 == digest);
        if unchanged {
            return Ok(false);
        }

        let manifest = parse_manifest(path, bytes)?;

        let Some(vuln_info) = manifest.vuln_info.as_ref() else {
            warn!("plugin {} missing [vuln_info]", path.display());
            return Ok(false);
        };

        self.check_imports(&plugin_id, &manifest)?;

        let entry = manifest.entry.clone().unwrap_or_else(|| plugin_id.clone());
        let instance = self.catalog.vuln(&entry).ok_or_else(|| PluginError::EntryNotFound {
            plugin_id: plugin_id.clone(),
            entry,
        })?;

        let info = PluginInfo {
            name: manifest.declared_name().unwrap_or(&plugin_id).to_string(),
            plugin_id: plugin_id.clone(),
            kind: PluginKind::Vuln,
            file_path: path.to_path_buf(),
            md5: digest,
            enabled: true,
            metadata: table_to_metadata(vuln_info),
            instance,
        };

        self.plugins.insert(plugin_id.clone(), info);
        debug!("loaded vuln plugin: {}", plugin_id);
        Ok(true)
    }

    /// Load or reload one tool plugin manifest.
    pub(crate) fn load_tool_plugin(&self, path: &Path) -> Result<bool, PluginError> {
        let bytes = std::fs::read(path)
            .map_err(|source| PluginError::Io { path: path.to_path_buf(), source })?;
        let digest = format!("{:x}", md5::compute(&bytes));
        let tool_id = file_stem(path)?;

        let unchanged = self.tools.get(&tool_id).is_some_and(|existing| existing.md5 == digest);
        if unchanged {
            return Ok(false);
        }

        let manifest = parse_manifest(path, bytes)?;
        self.check_imports(&tool_id, &manifest)?;

        let entry = manifest.entry.clone().unwrap_or_else(|| tool_id.clone());
        let instance = self.catalog.tool(&entry).ok_or_else(|| PluginError::EntryNotFound {
            plugin_id: tool_id.clone(),
            entry,
        })?;

        self.tools.insert(tool_id.clone(), ToolEntry { instance, md5: digest });
        debug!("loaded tool plugin: {}", tool_id);
        Ok(true)
    }

    fn check_imports(&self, plugin_id: &str, manifest: &PluginManifest) -> Result<(), PluginError> {
        for import in &manifest.imports {
            if !self.sandbox.check_import(import) {
                return Err(PluginError::ImportBlocked {
                    plugin_id: plugin_id.to_string(),
                    import: import.clone(),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn reload_plugin(&self, plugin_id: &str) -> bool {
        let Some(path) = self.plugins.get(plugin_id).map(|info| info.file_path.clone()) else {
            return false;
        };

        if !path.exists() {
            self.plugins.remove(plugin_id);
            debug!("dropped vuln plugin with missing file: {}", plugin_id);
            return false;
        }

        match self.load_vuln_plugin(&path) {
            Ok(true) => {
                let callback = self.reload_callback.read().clone();
                if let Some(callback) = callback {
                    callback(plugin_id);
                }
                true
            }
            Ok(false) => false,
            Err(e) => {
                error!("failed to reload plugin {}: {}", plugin_id, e);
                false
            }
        }
    }

    /// Drop a plugin (vuln or tool) from the registries.
    pub(crate) fn drop_plugin(&self, plugin_id: &str) {
        if self.plugins.remove(plugin_id).is_some() {
            debug!("dropped vuln plugin: {}", plugin_id);
        }
        if self.tools.remove(plugin_id).is_some() {
            debug!("dropped tool plugin: {}", plugin_id);
        }
    }
}

fn parse_manifest(path: &Path, bytes: Vec<u8>) -> Result<PluginManifest, PluginError> {
    let text = String::from_utf8(bytes).map_err(|e| PluginError::Manifest {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    PluginManifest::parse(&text).map_err(|e| PluginError::Manifest {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Whether `path` names a loadable manifest (`.toml`, not `_`-prefixed).
pub(crate) fn is_eligible_manifest(path: &Path) -> bool {
    let is_toml = path.extension().and_then(|ext| ext.to_str()) == Some("toml");
    let hidden = path
        .file_name()
        .and_then(|name| name.to_str())
        .map_or(true, |name| name.starts_with('_'));
    is_toml && !hidden
}

fn file_stem(path: &Path) -> Result<String, PluginError> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .ok_or_else(|| PluginError::InvalidName { path: path.to_path_buf() })
}

/// Recursively collect eligible manifests under `dir`, in sorted order.
fn collect_manifests(dir: &Path) -> Vec<PathBuf> {
    let mut manifests = Vec::new();
    walk(dir, &mut manifests);
    manifests.sort();
    manifests
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(&path, out);
        } else if is_eligible_manifest(&path) {
            out.push(path);
        }
    }
}
