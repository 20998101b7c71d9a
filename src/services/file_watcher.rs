//! File watcher service for dev mode.
//!
//! Monitors the templates directory for changes to SVG templates and
//! broadcasts debounced change events. [`FileWatcher::invalidate_on_change`]
//! wires those events to the template cache.

use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::services::TemplateCache;

/// Quiet period before a batch of changes is reported
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Event sent when template files change
#[derive(Debug, Clone)]
pub struct FileChangeEvent {
    /// Paths that changed
    pub paths: Vec<PathBuf>,
}

/// File watcher that monitors the templates directory
pub struct FileWatcher {
    /// Broadcast sender for file change events
    sender: broadcast::Sender<FileChangeEvent>,
    /// Handle to the watcher (kept alive)
    _watcher: Option<RecommendedWatcher>,
    /// Flag indicating if watcher is active
    active: bool,
}

impl FileWatcher {
    /// Create a new file watcher for the given directory.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(watch_path: Option<PathBuf>) -> Self {
        let (sender, _) = broadcast::channel(16);

        let (watcher, active) = match watch_path {
            Some(path) if path.exists() => match Self::start_watcher(&path, sender.clone()) {
                Ok(watcher) => {
                    tracing::info!(path = %path.display(), "File watcher started");
                    (Some(watcher), true)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to start file watcher");
                    (None, false)
                }
            },
            Some(path) => {
                tracing::debug!(path = %path.display(), "Watch path does not exist");
                (None, false)
            }
            None => {
                tracing::debug!("No templates directory configured, file watching disabled");
                (None, false)
            }
        };

        Self {
            sender,
            _watcher: watcher,
            active,
        }
    }

    fn start_watcher(
        path: &Path,
        sender: broadcast::Sender<FileChangeEvent>,
    ) -> Result<RecommendedWatcher, notify::Error> {
        let (tx, rx) = mpsc::channel::<PathBuf>(100);
        tokio::spawn(debounce(rx, sender));

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    for path in event.paths.into_iter().filter(|p| is_template_file(p)) {
                        let _ = tx.blocking_send(path);
                    }
                }
            },
            Config::default(),
        )?;

        watcher.watch(path, RecursiveMode::NonRecursive)?;

        Ok(watcher)
    }

    /// Subscribe to file change events
    pub fn subscribe(&self) -> broadcast::Receiver<FileChangeEvent> {
        self.sender.subscribe()
    }

    /// Check if the watcher is active
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Clear the template cache whenever a template file changes
    pub fn invalidate_on_change(&self, templates: Arc<TemplateCache>) -> JoinHandle<()> {
        let mut events = self.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let dropped = templates.clear();
                        tracing::info!(
                            changed = event.paths.len(),
                            dropped,
                            "Templates changed, cache cleared"
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "File change events lagged");
                        templates.clear();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Collect raw change paths and emit one event per quiet period
async fn debounce(mut rx: mpsc::Receiver<PathBuf>, sender: broadcast::Sender<FileChangeEvent>) {
    let mut pending: HashSet<PathBuf> = HashSet::new();
    loop {
        if pending.is_empty() {
            match rx.recv().await {
                Some(path) => {
                    pending.insert(path);
                }
                None => return,
            }
            continue;
        }

        match tokio::time::timeout(DEBOUNCE, rx.recv()).await {
            Ok(Some(path)) => {
                pending.insert(path);
            }
            Ok(None) => return,
            Err(_) => {
                let paths: Vec<PathBuf> = pending.drain().collect();
                tracing::debug!(paths = ?paths, "Template files changed (debounced)");
                let _ = sender.send(FileChangeEvent { paths });
            }
        }
    }
}

fn is_template_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "svg")
}
