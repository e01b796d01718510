//! Plugin lifecycle: discovery, loading, hot reload
//!
//! Plugins are declared by TOML manifests colocated with the engine's
//! plugin directories; the callable implementations live in the
//! compile-time [`catalog`]. The [`loader`] walks the manifest
//! directories, deduplicates by content hash, consults the [`sandbox`]
//! import policy, and resolves each manifest to its catalog entry. The
//! [`watcher`] feeds filesystem changes back into the loader for hot
//! reload.

use std::path::PathBuf;

use thiserror::Error;
use vulnscan_common::error::{ErrorClassification, ErrorSeverity};

pub mod builtin;
pub mod catalog;
pub mod loader;
pub mod manifest;
pub mod sandbox;
pub(crate) mod watcher;

pub use catalog::{PluginCatalog, ScanTool, VerifyResult, VulnCheck};
pub use loader::{PluginInfo, PluginKind, PluginLoader};
pub use manifest::PluginManifest;
pub use sandbox::SandboxPolicy;

/// Errors raised while loading an individual plugin.
///
/// The loader logs these and moves on; a bad plugin file never aborts a
/// directory walk.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Reading the plugin file failed.
    #[error("failed to read plugin {path}: {source}")]
    Io {
        /// The unreadable file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The manifest is not valid TOML.
    #[error("invalid manifest {path}: {message}")]
    Manifest {
        /// The malformed file.
        path: PathBuf,
        /// Parser diagnostic.
        message: String,
    },

    /// The plugin file name is not valid UTF-8.
    #[error("plugin file name is not valid UTF-8: {path}")]
    InvalidName {
        /// The offending path.
        path: PathBuf,
    },

    /// The manifest declares an import the sandbox policy blocks.
    #[error("plugin '{plugin_id}' declares blocked import '{import}'")]
    ImportBlocked {
        /// The plugin declaring the import.
        plugin_id: String,
        /// The blocked module name.
        import: String,
    },

    /// The manifest names a catalog entry that does not exist.
    #[error("no catalog entry '{entry}' for plugin '{plugin_id}'")]
    EntryNotFound {
        /// The plugin being loaded.
        plugin_id: String,
        /// The unresolvable entry name.
        entry: String,
    },

    /// The filesystem watcher could not be started.
    #[error("plugin watcher error: {0}")]
    Watcher(String),
}

impl ErrorClassification for PluginError {
    fn is_retryable(&self) -> bool {
        // A plugin file that failed to load will fail the same way until
        // its content changes; the watcher picks that up.
        matches!(self, Self::Io { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Io { .. } | Self::Watcher(_) => ErrorSeverity::Warning,
            Self::Manifest { .. }
            | Self::InvalidName { .. }
            | Self::ImportBlocked { .. }
            | Self::EntryNotFound { .. } => ErrorSeverity::Error,
        }
    }
}
