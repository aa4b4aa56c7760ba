//! Preset directory watching
//!
//! `notify` events for `*.wav` files are collected on a background thread
//! and released as one [`PresetDirChanged`] once the directory has been
//! quiet for the debounce window. The control thread then rescans the
//! catalog; events are a hint, the rescan is the truth.

use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::is_preset_file;

/// Preset files were created, modified or removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetDirChanged {
    /// Paths touched during the burst (deduplicated)
    pub paths: Vec<PathBuf>,
}

/// Watches a preset directory; stops when dropped
pub struct PresetWatcher {
    watcher: Option<RecommendedWatcher>,
    thread_handle: Option<JoinHandle<()>>,
}

impl PresetWatcher {
    /// Start watching `dir` (non-recursive)
    pub fn spawn(
        dir: &Path,
        debounce: Duration,
    ) -> notify::Result<(Self, Receiver<PresetDirChanged>)> {
        let (event_tx, event_rx) = unbounded::<Event>();
        let (changed_tx, changed_rx) = unbounded();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    let _ = event_tx.send(event);
                }
                Err(e) => log::warn!("Preset watch error: {}", e),
            }
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        let handle = thread::Builder::new()
            .name("preset-watcher".into())
            .spawn(move || run(event_rx, changed_tx, debounce))
            .map_err(|e| notify::Error::generic(&e.to_string()))?;

        log::info!("Watching preset directory {}", dir.display());

        Ok((
            Self {
                watcher: Some(watcher),
                thread_handle: Some(handle),
            },
            changed_rx,
        ))
    }
}

impl Drop for PresetWatcher {
    fn drop(&mut self) {
        // Dropping the watcher closes the event channel, ending the thread
        drop(self.watcher.take());
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

fn relevant_paths(event: Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => event
            .paths
            .into_iter()
            .filter(|p| is_preset_file(p))
            .collect(),
        _ => Vec::new(),
    }
}

fn run(events: Receiver<Event>, changed: Sender<PresetDirChanged>, debounce: Duration) {
    let mut pending: Vec<PathBuf> = Vec::new();

    loop {
        let event = if pending.is_empty() {
            match events.recv() {
                Ok(event) => event,
                Err(_) => break,
            }
        } else {
            match events.recv_timeout(debounce) {
                Ok(event) => event,
                Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                    let paths = std::mem::take(&mut pending);
                    log::debug!("Preset directory changed ({} file(s))", paths.len());
                    if changed.send(PresetDirChanged { paths }).is_err() {
                        break;
                    }
                    continue;
                }
                Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
            }
        };

        for path in relevant_paths(event) {
            if !pending.contains(&path) {
                pending.push(path);
            }
        }
    }
}
