//! Filesystem event source feeding the watcher.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::WatcherConfig;
use crate::error::{Result, RootsError};
use crate::event::{EventBatch, FsEvent};
use crate::guard::ExclusivePermit;
use crate::processor::RootsChangeWatcher;

/// Turns notify events into [`EventBatch`]es on a bounded channel.
pub struct FsEventSource {
    /// Internal notify watcher, created on first `watch`.
    watcher: Option<RecommendedWatcher>,

    /// Watched roots.
    watched: Vec<PathBuf>,

    /// Batch sender.
    batch_tx: mpsc::Sender<EventBatch>,
}

impl FsEventSource {
    /// Create a source and the receiving end of its batch channel.
    pub fn new(config: &WatcherConfig) -> Result<(Self, mpsc::Receiver<EventBatch>)> {
        config.validate()?;
        let (batch_tx, batch_rx) = mpsc::channel(config.channel_capacity);
        let source = Self {
            watcher: None,
            watched: Vec::new(),
            batch_tx,
        };
        Ok((source, batch_rx))
    }

    /// Start watching `path` recursively.
    pub fn watch(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(RootsError::InvalidPath(path.display().to_string()));
        }
        if self.watched.iter().any(|watched| watched == path) {
            return Ok(());
        }

        if self.watcher.is_none() {
            let batch_tx = self.batch_tx.clone();
            let watcher = notify::recommended_watcher(
                move |res: std::result::Result<notify::Event, notify::Error>| match res {
                    Ok(event) => {
                        let Some(fs_event) = FsEvent::from_notify(&event) else {
                            return;
                        };
                        let mut batch = EventBatch::new();
                        batch.push(fs_event);
                        if let Err(e) = batch_tx.blocking_send(batch) {
                            error!("Failed to send event batch: {e}");
                        }
                    }
                    Err(e) => {
                        error!("Watch error: {e}");
                    }
                },
            )?;
            self.watcher = Some(watcher);
        }

        if let Some(ref mut watcher) = self.watcher {
            watcher.watch(path, RecursiveMode::Recursive)?;
        }
        self.watched.push(path.to_path_buf());
        info!("Started watching: {}", path.display());
        Ok(())
    }

    /// Stop watching `path`.
    pub fn unwatch(&mut self, path: &Path) -> Result<()> {
        let Some(pos) = self.watched.iter().position(|watched| watched == path) else {
            return Err(RootsError::InvalidPath(path.display().to_string()));
        };
        self.watched.remove(pos);

        if let Some(ref mut watcher) = self.watcher {
            if let Err(e) = watcher.unwatch(path) {
                warn!("Failed to unwatch {}: {e}", path.display());
            }
        }
        info!("Stopped watching: {}", path.display());
        Ok(())
    }

    /// Stop watching everything.
    pub fn stop(&mut self) {
        if let Some(ref mut watcher) = self.watcher {
            for path in &self.watched {
                let _ = watcher.unwatch(path);
            }
        }
        self.watcher = None;
        self.watched.clear();
        info!("Event source stopped");
    }

    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }

    /// Queue a batch produced outside notify, such as a host-side refresh.
    pub async fn submit(&self, batch: EventBatch) -> Result<()> {
        self.batch_tx
            .send(batch)
            .await
            .map_err(|_| RootsError::ChannelClosed)
    }
}

/// Run every received batch through the watcher, in arrival order, until the
/// channel closes. Each batch runs with `permit` held when it is free.
///
/// Returns the number of batches processed.
pub async fn pump_batches(
    watcher: Arc<RootsChangeWatcher>,
    permit: Arc<ExclusivePermit>,
    mut batch_rx: mpsc::Receiver<EventBatch>,
) -> usize {
    let mut processed = 0;

    while let Some(batch) = batch_rx.recv().await {
        if batch.is_empty() {
            continue;
        }

        let held = permit.acquire();
        if held.is_none() {
            debug!("Mutation permit busy, batch will only be tracked");
        }
        watcher.before(&batch);
        watcher.after(&batch);
        drop(held);

        processed += 1;
    }

    debug!("Event channel closed after {processed} batch(es)");
    processed
}
