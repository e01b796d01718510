//! Filesystem watcher driving plugin hot reload
//!
//! Watches both manifest directories recursively and forwards change
//! events to a dedicated background thread, which routes them into the
//! loader: modifications reload by plugin id, creations load the file
//! into whichever registry owns its directory, deletions drop the
//! registry entry. The loader's content-hash check absorbs editors that
//! emit several modify events per save.
//!
//! The thread holds only a weak reference to the loader, so an abandoned
//! loader shuts its watcher down instead of leaking.

use std::path::Path;
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use notify::{EventKind, RecursiveMode, Watcher};
use tracing::{debug, error, warn};

use super::loader::{is_eligible_manifest, LoaderInner};
use super::PluginError;

enum WatchMessage {
    Event(notify::Event),
    Shutdown,
}

/// Handle to a running watcher: the notify backend plus the routing
/// thread consuming its events.
pub(crate) struct PluginWatcher {
    // Held only to keep the OS watches alive.
    _backend: notify::RecommendedWatcher,
    thread: Option<JoinHandle<()>>,
    tx: mpsc::Sender<WatchMessage>,
}

impl PluginWatcher {
    /// Start watching the loader's directories and spawn the routing
    /// thread.
    pub(crate) fn spawn(loader: &Arc<LoaderInner>) -> Result<Self, PluginError> {
        let (tx, rx) = mpsc::channel();

        let event_tx = tx.clone();
        let mut backend =
            notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
                match result {
                    Ok(event) => {
                        let _ = event_tx.send(WatchMessage::Event(event));
                    }
                    Err(e) => warn!("plugin watcher backend error: {}", e),
                }
            })
            .map_err(|e| PluginError::Watcher(e.to_string()))?;

        for dir in [loader.vuln_dir(), loader.tool_dir()] {
            if dir.exists() {
                backend
                    .watch(dir, RecursiveMode::Recursive)
                    .map_err(|e| PluginError::Watcher(e.to_string()))?;
            }
        }

        let weak = Arc::downgrade(loader);
        let thread = std::thread::Builder::new()
            .name("plugin-watcher".to_string())
            .spawn(move || route_events(&rx, &weak))
            .map_err(|e| PluginError::Watcher(e.to_string()))?;

        Ok(Self { _backend: backend, thread: Some(thread), tx })
    }

    /// Signal the routing thread and join it.
    pub(crate) fn stop(mut self) {
        let _ = self.tx.send(WatchMessage::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn route_events(rx: &mpsc::Receiver<WatchMessage>, loader: &Weak<LoaderInner>) {
    while let Ok(message) = rx.recv() {
        let event = match message {
            WatchMessage::Shutdown => break,
            WatchMessage::Event(event) => event,
        };

        // Loader is gone; nothing left to route to.
        let Some(loader) = loader.upgrade() else { break };
        handle_event(&loader, &event);
    }
}

fn handle_event(loader: &LoaderInner, event: &notify::Event) {
    for path in &event.paths {
        if !is_eligible_manifest(path) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };

        match event.kind {
            EventKind::Modify(_) => {
                debug!("plugin manifest modified: {}", path.display());
                loader.reload_plugin(stem);
            }
            EventKind::Create(_) => {
                debug!("plugin manifest created: {}", path.display());
                if within(path, loader.vuln_dir()) {
                    if let Err(e) = loader.load_vuln_plugin(path) {
                        error!("failed to load created vuln plugin {}: {}", path.display(), e);
                    }
                } else if within(path, loader.tool_dir()) {
                    if let Err(e) = loader.load_tool_plugin(path) {
                        error!("failed to load created tool plugin {}: {}", path.display(), e);
                    }
                }
            }
            EventKind::Remove(_) => {
                debug!("plugin manifest removed: {}", path.display());
                loader.drop_plugin(stem);
            }
            _ => {}
        }
    }
}

/// Whether `path` lives under `dir`, resolving symlinked parents where
/// possible (notify reports canonical paths on some platforms).
fn within(path: &Path, dir: &Path) -> bool {
    let canonical_dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    let canonical_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    canonical_path.starts_with(&canonical_dir) || path.starts_with(dir)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_within_resolves_prefixes() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("web");
        std::fs::create_dir_all(&nested).unwrap();
        let file = nested.join("probe.toml");
        std::fs::write(&file, "x = 1\n").unwrap();

        assert!(within(&file, dir.path()));
        assert!(!within(&file, Path::new("/nonexistent/other")));
    }
}
