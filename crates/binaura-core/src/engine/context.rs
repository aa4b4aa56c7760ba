//! Engine context: the composition root of the control layer
//!
//! Owns the HAL handle, the identity monitor, the pipeline and the preset
//! catalog. Every method runs on the control thread; nothing here is
//! reachable from the audio callback except through the pipeline's
//! command queue.
//!
//! Topology changes arrive as debounced [`TopologySettled`] ticks (see
//! [`EngineContext::watch_topology`]); the owner calls
//! [`EngineContext::handle_topology_change`] for each one.
//!
//! [`TopologySettled`]: crate::device::TopologySettled

use std::io;
use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};
use uuid::Uuid;

use super::error::{EngineError, EngineResult};
use super::event::{EngineEvent, EngineStatus};
use super::pipeline::{Pipeline, PipelineState, StreamRoute};
use crate::config::{EngineConfig, PersistedSelection};
use crate::device::{
    DeviceInspector, IdentityMonitor, Reconciliation, RouteAction, RouteDecision, Topology,
    TopologyError, TopologySettled, TopologyWatcher, DEFAULT_ROUTE_WIDTH,
};
use crate::hal::AudioHal;
use crate::preset::{
    CatalogDiff, HrirData, HrirPreset, PresetCatalog, PresetDirChanged, PresetError,
    PresetResult, PresetWatcher,
};
use crate::renderer::{build_renderer, SpatialRenderer};
use crate::types::{ChannelRange, Direction};

/// The loaded preset, kept so the renderer can be rebuilt for a new input width
struct ActivePreset {
    id: Uuid,
    hrir: HrirData,
    input_channels: usize,
}

/// Control-layer engine handle
pub struct EngineContext {
    hal: Arc<dyn AudioHal>,
    config: EngineConfig,
    topology: Topology,
    monitor: IdentityMonitor,
    pipeline: Pipeline,
    catalog: PresetCatalog,
    active: Option<ActivePreset>,
    convolution_enabled: bool,
    auto_start: bool,
    /// The user asked for audio; restarts after reconnection honour it
    wants_running: bool,
    last_error: Option<EngineError>,
    event_tx: Sender<EngineEvent>,
    event_rx: Receiver<EngineEvent>,
}

impl EngineContext {
    pub fn new(hal: Arc<dyn AudioHal>, config: EngineConfig) -> Self {
        let inspector = DeviceInspector::new(&config.loopback_patterns);
        let monitor = IdentityMonitor::new(inspector, config.max_channels);
        let pipeline = Pipeline::new(Arc::clone(&hal), &config);
        let catalog = PresetCatalog::scan(config.preset_dir());
        let topology = Topology::capture(hal.as_ref()).unwrap_or_else(|err| {
            log::warn!("Initial device enumeration failed: {}", err);
            Topology::default()
        });
        let (event_tx, event_rx) = unbounded();

        log::info!(
            "Engine context on {} ({} devices, block {} @ {} Hz)",
            hal.name(),
            topology.devices().len(),
            config.block_size,
            config.sample_rate
        );

        Self {
            hal,
            config,
            topology,
            monitor,
            pipeline,
            catalog,
            active: None,
            convolution_enabled: true,
            auto_start: false,
            wants_running: false,
            last_error: None,
            event_tx,
            event_rx,
        }
    }

    /// Receiver for engine events (clones share one queue)
    pub fn events(&self) -> Receiver<EngineEvent> {
        self.event_rx.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &PresetCatalog {
        &self.catalog
    }

    pub fn state(&self) -> PipelineState {
        self.pipeline.state()
    }

    pub fn is_running(&self) -> bool {
        self.pipeline.is_running()
    }

    fn emit(&self, event: EngineEvent) {
        // The context holds a receiver, so the channel never disconnects
        let _ = self.event_tx.send(event);
    }

    fn refresh(&mut self) -> EngineResult<()> {
        self.topology = Topology::capture(self.hal.as_ref())?;
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Resolve routing and start streaming
    pub fn start(&mut self) -> EngineResult<()> {
        self.wants_running = true;
        if self.pipeline.is_running() {
            return Ok(());
        }

        self.refresh()?;
        let reconciliation = self.monitor.reconcile(&self.topology);
        self.apply_user(&reconciliation)?;

        if !self.pipeline.is_running() {
            self.start_pipeline()?;
        }
        Ok(())
    }

    /// Stop streaming; routing and the active preset are kept
    pub fn stop(&mut self) {
        self.wants_running = false;
        if self.pipeline.is_running() {
            self.pipeline.stop();
            self.emit(EngineEvent::StateChanged(PipelineState::Stopped));
        }
    }

    fn stream_route(&self) -> EngineResult<StreamRoute> {
        let selection = self.monitor.selection().ok_or(EngineError::NoSelection)?;
        let input = self.monitor.route(Direction::Input).ok_or(EngineError::NoSelection)?;
        let output = self.monitor.route(Direction::Output).ok_or(EngineError::NoSelection)?;
        Ok(StreamRoute {
            selection,
            input_device: input.device.id,
            output_device: output.device.id,
            input_span: input.range,
            output_span: output.range,
        })
    }

    fn start_pipeline(&mut self) -> EngineResult<()> {
        let route = self.stream_route()?;
        self.sync_renderer();
        self.emit(EngineEvent::StateChanged(PipelineState::Starting));

        match self.pipeline.start(route) {
            Ok(()) => {
                self.last_error = None;
                self.emit(EngineEvent::StateChanged(PipelineState::Running));
                Ok(())
            }
            Err(err) => {
                self.last_error = Some(err.clone());
                self.emit(EngineEvent::StateChanged(PipelineState::Error));
                self.emit(EngineEvent::Error(err.clone()));
                self.emit(EngineEvent::StateChanged(PipelineState::Stopped));
                Err(err)
            }
        }
    }

    fn restart(&mut self) -> EngineResult<()> {
        self.pipeline.stop();
        self.start_pipeline()
    }

    // ========================================================================
    // Routing
    // ========================================================================

    /// Select the aggregate device by UID; both directions rebind
    pub fn select_aggregate(&mut self, uid: &str) -> EngineResult<()> {
        self.refresh()?;
        let reconciliation = self.monitor.select_aggregate(uid, &self.topology)?;
        self.apply_user(&reconciliation)
    }

    pub fn select_output(&mut self, uid: &str) -> EngineResult<()> {
        self.select(Direction::Output, uid)
    }

    pub fn select_input(&mut self, uid: &str) -> EngineResult<()> {
        self.select(Direction::Input, uid)
    }

    fn select(&mut self, direction: Direction, uid: &str) -> EngineResult<()> {
        self.refresh()?;
        let reconciliation = self.monitor.select(direction, uid, &self.topology)?;
        self.apply_user(&reconciliation)
    }

    /// Narrow the output to a channel range (aggregate space), no restart
    pub fn set_output_channels(&mut self, range: ChannelRange) -> EngineResult<()> {
        self.set_channels(Direction::Output, range)
    }

    /// Narrow the input to a channel range (aggregate space), no restart
    ///
    /// A new width changes the input layout, so the active preset's
    /// renderer is rebuilt for it.
    pub fn set_input_channels(&mut self, range: ChannelRange) -> EngineResult<()> {
        self.set_channels(Direction::Input, range)
    }

    fn set_channels(&mut self, direction: Direction, range: ChannelRange) -> EngineResult<()> {
        // Room for a rebuilt renderer and the selection, before anything moves
        self.pipeline.reserve(2)?;
        let selection = self.monitor.set_channels(direction, range)?;
        if direction == Direction::Input {
            self.sync_renderer();
        }
        let route = self.stream_route()?;
        if !self.pipeline.update_route(route)? {
            self.restart()?;
        }
        log::info!("{} channels set to {}", direction, range);
        self.emit(EngineEvent::RouteChanged(selection));
        Ok(())
    }

    /// Re-resolve routing after a (debounced) topology notification
    pub fn handle_topology_change(&mut self) -> EngineResult<RouteDecision> {
        if self.monitor.aggregate_uid().is_none() {
            return Ok(RouteDecision::Unchanged);
        }
        self.refresh()?;
        let reconciliation = self.monitor.reconcile(&self.topology);
        self.apply(&reconciliation, false)
    }

    /// Apply a user-initiated reconciliation; a disconnect is an error here
    fn apply_user(&mut self, reconciliation: &Reconciliation) -> EngineResult<()> {
        match self.apply(reconciliation, true)? {
            RouteDecision::Disconnect => Err(reconciliation
                .fault
                .clone()
                .unwrap_or(TopologyError::NoAggregate)
                .into()),
            _ => Ok(()),
        }
    }

    fn apply(
        &mut self,
        reconciliation: &Reconciliation,
        user_initiated: bool,
    ) -> EngineResult<RouteDecision> {
        let decision = reconciliation.decision();

        match decision {
            RouteDecision::Unchanged => {}
            RouteDecision::Remap => {
                if let Some(selection) = reconciliation.selection {
                    self.sync_renderer();
                    let route = self.stream_route()?;
                    match self.pipeline.update_route(route) {
                        Ok(true) => {
                            log::info!(
                                "Remapped to in {} / out {} without restart",
                                selection.input,
                                selection.output
                            );
                            self.emit(EngineEvent::Remapped(selection));
                        }
                        // Stopping drains the queue, so a reopen always gets through
                        Ok(false) | Err(EngineError::CommandQueueFull) => {
                            self.emit(EngineEvent::RouteChanged(selection));
                            self.restart()?;
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
            RouteDecision::Restart => {
                if !user_initiated {
                    self.announce_reconnections(reconciliation);
                }
                if let Some(selection) = reconciliation.selection {
                    self.emit(EngineEvent::RouteChanged(selection));
                    if self.pipeline.is_running() || self.wants_running {
                        self.restart()?;
                    } else {
                        self.sync_renderer();
                        let route = self.stream_route()?;
                        self.pipeline.update_route(route)?;
                    }
                }
            }
            RouteDecision::Disconnect => {
                let fault = reconciliation
                    .fault
                    .clone()
                    .unwrap_or(TopologyError::NoAggregate);
                if self.pipeline.is_running() {
                    self.pipeline.stop();
                    self.emit(EngineEvent::StateChanged(PipelineState::Stopped));
                }

                let err = EngineError::from(fault.clone());
                if self.last_error.as_ref() != Some(&err) {
                    log::warn!("Routing lost: {}", fault);
                    self.emit(EngineEvent::Disconnected(fault));
                }
                self.last_error = Some(err);
            }
        }

        Ok(decision)
    }

    fn announce_reconnections(&self, reconciliation: &Reconciliation) {
        for direction in [Direction::Output, Direction::Input] {
            if reconciliation.action(direction) != RouteAction::Reconnected {
                continue;
            }
            if let Some(route) = self.monitor.route(direction) {
                log::info!(
                    "{} device {} reconnected as id {}",
                    direction,
                    route.uid(),
                    route.device.id
                );
                self.emit(EngineEvent::Reconnected {
                    direction,
                    uid: route.uid().to_string(),
                    id: route.device.id,
                });
            }
        }
    }

    // ========================================================================
    // Presets
    // ========================================================================

    fn input_width(&self) -> usize {
        self.monitor
            .selection()
            .map(|s| s.input.width() as usize)
            // Renderer built before any input is bound
            .unwrap_or(DEFAULT_ROUTE_WIDTH as usize)
    }

    fn prepare(&self, hrir: &HrirData, input_channels: usize) -> PresetResult<SpatialRenderer> {
        build_renderer(
            hrir,
            input_channels,
            self.config.block_frames(),
            self.config.sample_rate,
        )
    }

    fn load_preset(&self, id: Uuid) -> PresetResult<(HrirPreset, HrirData, usize, SpatialRenderer)> {
        let preset = self.catalog.get(id).cloned().ok_or(PresetError::UnknownPreset(id))?;
        let hrir = preset.load()?;
        let width = self.input_width();
        let renderer = self.prepare(&hrir, width)?;
        Ok((preset, hrir, width, renderer))
    }

    /// Load a preset, build its renderer and publish it
    ///
    /// All or nothing: on any failure the previous renderer stays active.
    pub fn activate_preset(&mut self, id: Uuid) -> EngineResult<()> {
        let prepared = self.load_preset(id);

        match prepared {
            Ok((preset, hrir, input_channels, renderer)) => {
                if let Err(error) = self.pipeline.set_renderer(Some(renderer)) {
                    log::error!("Preset {} could not be published: {}", preset.name, error);
                    self.emit(EngineEvent::PresetFailed {
                        id,
                        error: error.clone(),
                    });
                    return Err(error);
                }
                log::info!(
                    "Activated preset {} ({} HRIR channels, {} input channels)",
                    preset.name,
                    hrir.channel_count(),
                    input_channels
                );
                self.active = Some(ActivePreset {
                    id,
                    hrir,
                    input_channels,
                });
                self.emit(EngineEvent::PresetActivated {
                    id,
                    name: preset.name,
                });
                Ok(())
            }
            Err(error) => {
                log::error!("Preset {} failed to activate: {}", id, error);
                let error = EngineError::from(error);
                self.emit(EngineEvent::PresetFailed {
                    id,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Drop the active preset (output falls back to passthrough)
    pub fn deactivate_preset(&mut self) -> EngineResult<()> {
        if self.active.is_some() {
            self.pipeline.set_renderer(None)?;
            self.active = None;
            log::info!("Preset deactivated");
        }
        Ok(())
    }

    pub fn active_preset(&self) -> Option<Uuid> {
        self.active.as_ref().map(|a| a.id)
    }

    /// Rebuild the active renderer when the input width changed
    fn sync_renderer(&mut self) {
        let width = self.input_width();
        let Some(active) = self.active.as_ref() else {
            return;
        };
        if active.input_channels == width {
            return;
        }

        let id = active.id;
        let published = self
            .prepare(&active.hrir, width)
            .map_err(EngineError::from)
            .and_then(|renderer| self.pipeline.set_renderer(Some(renderer)));
        match published {
            Ok(()) => {
                log::info!("Rebuilt renderer for {} input channels", width);
                if let Some(active) = self.active.as_mut() {
                    active.input_channels = width;
                }
            }
            // The old width stays recorded, so the next sync retries
            Err(error) => {
                log::error!("Renderer rebuild for {} channels failed: {}", width, error);
                self.emit(EngineEvent::PresetFailed { id, error });
            }
        }
    }

    /// Spatialize (true) or pass input straight through (false)
    pub fn set_convolution_enabled(&mut self, enabled: bool) -> EngineResult<()> {
        self.pipeline.set_convolution_enabled(enabled)?;
        self.convolution_enabled = enabled;
        log::info!("Convolution {}", if enabled { "enabled" } else { "bypassed" });
        Ok(())
    }

    /// Rescan the preset directory
    ///
    /// A running preset whose file disappeared keeps rendering; it just
    /// cannot be re-activated.
    pub fn rescan_presets(&mut self) -> CatalogDiff {
        let diff = self.catalog.rescan();
        if let Some(id) = self.active_preset() {
            if diff.removed.contains(&id) {
                log::warn!("Active preset {} was removed from disk", id);
            }
        }
        if !diff.is_empty() {
            self.emit(EngineEvent::PresetsChanged(diff.clone()));
        }
        diff
    }

    // ========================================================================
    // Watchers
    // ========================================================================

    /// Subscribe to HAL notifications through a debouncing watcher
    pub fn watch_topology(&self) -> io::Result<(TopologyWatcher, Receiver<TopologySettled>)> {
        TopologyWatcher::spawn(self.hal.subscribe(), self.config.debounce())
    }

    /// Watch the preset directory for added and removed files
    pub fn watch_presets(&self) -> notify::Result<(PresetWatcher, Receiver<PresetDirChanged>)> {
        PresetWatcher::spawn(self.catalog.dir(), self.config.debounce())
    }

    // ========================================================================
    // Status & persistence
    // ========================================================================

    pub fn status(&self) -> EngineStatus {
        let inspector = self.monitor.inspector();
        let subs = self
            .monitor
            .aggregate_uid()
            .and_then(|uid| self.topology.by_uid(uid))
            .map(|aggregate| inspector.list_sub_devices(&self.topology, aggregate))
            .unwrap_or_default();

        EngineStatus {
            state: self.pipeline.state(),
            is_running: self.pipeline.is_running(),
            last_error: self.last_error.clone(),
            aggregates: inspector.aggregates(&self.topology),
            outputs: subs.outputs,
            inputs: subs.inputs,
            aggregate_uid: self.monitor.aggregate_uid().map(str::to_string),
            output_uid: self.monitor.intended_uid(Direction::Output).map(str::to_string),
            input_uid: self.monitor.intended_uid(Direction::Input).map(str::to_string),
            selection: self.monitor.selection(),
            active_preset: self.active_preset(),
            convolution_enabled: self.convolution_enabled,
            stats: self.pipeline.stats().snapshot(),
        }
    }

    /// The UID-only selection to write to disk
    pub fn persisted_selection(&self) -> PersistedSelection {
        PersistedSelection {
            aggregate_uid: self.monitor.aggregate_uid().map(str::to_string),
            output_uid: self.monitor.intended_uid(Direction::Output).map(str::to_string),
            input_uid: self.monitor.intended_uid(Direction::Input).map(str::to_string),
            active_preset_id: self.active_preset(),
            convolution_enabled: self.convolution_enabled,
            auto_start: self.auto_start,
        }
    }

    /// Restore a persisted selection, then auto-start if asked to
    ///
    /// Without a stored aggregate the first aggregate is used, or else the
    /// first device with outputs. A stored preset that fails to load is
    /// reported but does not prevent routing from coming up.
    pub fn restore(&mut self, selection: &PersistedSelection) -> EngineResult<()> {
        self.refresh()?;

        let aggregate_uid = selection
            .aggregate_uid
            .clone()
            .or_else(|| self.default_aggregate_uid());
        self.monitor.restore(
            aggregate_uid,
            selection.output_uid.clone(),
            selection.input_uid.clone(),
        );
        self.auto_start = selection.auto_start;
        self.set_convolution_enabled(selection.convolution_enabled)?;

        let reconciliation = self.monitor.reconcile(&self.topology);
        match reconciliation.selection {
            Some(resolved) => {
                let route = self.stream_route()?;
                if !self.pipeline.update_route(route)? {
                    self.restart()?;
                }
                self.emit(EngineEvent::RouteChanged(resolved));
            }
            None => {
                if let Some(fault) = reconciliation.fault.clone() {
                    log::warn!("Restored selection does not resolve: {}", fault);
                    self.last_error = Some(fault.into());
                }
            }
        }

        if let Some(id) = selection.active_preset_id {
            if let Err(err) = self.activate_preset(id) {
                log::warn!("Stored preset not restored: {}", err);
            }
        }

        if selection.auto_start {
            self.start()?;
        }
        Ok(())
    }

    fn default_aggregate_uid(&self) -> Option<String> {
        let inspector = self.monitor.inspector();
        inspector
            .aggregates(&self.topology)
            .into_iter()
            .next()
            .map(|d| d.uid)
            .or_else(|| {
                self.topology
                    .devices()
                    .iter()
                    .find(|d| d.output_channels > 0)
                    .map(|d| d.uid.clone())
            })
    }

    /// Toggle auto-start for the next launch
    pub fn set_auto_start(&mut self, enabled: bool) {
        self.auto_start = enabled;
    }
}
