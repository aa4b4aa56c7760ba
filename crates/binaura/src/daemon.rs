//! Headless control loop
//!
//! Owns the engine context on the main thread (the cpal stream is not
//! `Send`) and multiplexes topology bursts, preset directory changes and
//! engine events. The persisted selection is saved whenever it changes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam::channel::{never, select, Receiver};

use binaura_core::config::{default_config_path, load_config, save_config, EngineConfig, PersistedSelection};
use binaura_core::engine::{EngineContext, EngineEvent};
use binaura_core::hal::CpalHal;
use binaura_core::preset::PresetDirChanged;

/// How often render counters are logged at debug level
const STATS_INTERVAL: Duration = Duration::from_secs(30);

pub fn run(config: EngineConfig, force_start: bool) -> Result<()> {
    let settings_path = default_config_path("settings.yaml");
    let selection: PersistedSelection = load_config(&settings_path);

    let hal = Arc::new(CpalHal::new(config.poll_interval()));
    let mut engine = EngineContext::new(hal, config);
    log::info!("{} presets in {}", engine.catalog().len(), engine.catalog().dir().display());

    let (_topology_watcher, settled) = engine
        .watch_topology()
        .context("Failed to start the topology watcher")?;

    // A missing preset directory only disables hot reload
    let preset_watch = match engine.watch_presets() {
        Ok(watch) => Some(watch),
        Err(e) => {
            log::warn!("Preset directory not watched: {}", e);
            None
        }
    };
    let preset_changes: Receiver<PresetDirChanged> = preset_watch
        .as_ref()
        .map(|(_, rx)| rx.clone())
        .unwrap_or_else(never);

    let events = engine.events();
    if let Err(e) = engine.restore(&selection) {
        log::warn!("Could not restore the previous routing: {}", e);
    }
    if force_start && !engine.is_running() {
        if let Err(e) = engine.start() {
            log::error!("Start failed: {}", e);
        }
    }

    let mut saved = selection;
    persist(&engine, &mut saved, &settings_path);

    loop {
        select! {
            recv(settled) -> msg => match msg {
                Ok(burst) => {
                    log::debug!("Topology settled after {} notifications", burst.notifications);
                    if let Err(e) = engine.handle_topology_change() {
                        log::error!("Topology change failed: {}", e);
                    }
                }
                Err(_) => {
                    log::error!("Topology watcher stopped");
                    break;
                }
            },
            recv(preset_changes) -> msg => {
                if let Ok(change) = msg {
                    log::debug!("{} preset files changed", change.paths.len());
                    engine.rescan_presets();
                }
            },
            recv(events) -> msg => {
                if let Ok(event) = msg {
                    log_event(&event);
                }
            },
            default(STATS_INTERVAL) => {
                let stats = engine.status().stats;
                log::debug!(
                    "Rendered {} blocks ({} silent), {} renderer swaps",
                    stats.blocks,
                    stats.silent_blocks,
                    stats.renderer_swaps
                );
            },
        }
        persist(&engine, &mut saved, &settings_path);
    }

    engine.stop();
    Ok(())
}

fn persist(engine: &EngineContext, saved: &mut PersistedSelection, path: &Path) {
    let current = engine.persisted_selection();
    if current == *saved {
        return;
    }
    match save_config(&current, path) {
        Ok(()) => *saved = current,
        Err(e) => log::warn!("Failed to save {}: {}", path.display(), e),
    }
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::StateChanged(state) => log::info!("Pipeline {}", state),
        EngineEvent::RouteChanged(sel) => {
            log::info!("Route: aggregate {} in {} out {}", sel.aggregate, sel.input, sel.output)
        }
        EngineEvent::Reconnected { direction, uid, id } => {
            log::info!("{} device {} reconnected as {}", direction, uid, id)
        }
        EngineEvent::Remapped(sel) => log::info!("Remapped: in {} out {}", sel.input, sel.output),
        EngineEvent::Disconnected(e) => log::warn!("Disconnected: {}", e),
        EngineEvent::PresetActivated { name, .. } => log::info!("Preset '{}' active", name),
        EngineEvent::PresetFailed { id, error } => log::warn!("Preset {} failed: {}", id, error),
        EngineEvent::PresetsChanged(diff) => log::info!(
            "Presets changed: {} added, {} removed",
            diff.added.len(),
            diff.removed.len()
        ),
        EngineEvent::Error(e) => log::error!("{}", e),
    }
}
