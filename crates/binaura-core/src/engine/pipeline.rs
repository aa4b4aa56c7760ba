//! Audio I/O pipeline
//!
//! Control-thread half of the stream: owns the HAL stream handle and the
//! command producer, and drives the state machine
//!
//! ```text
//! Stopped ─► Starting ─► Running ─► Stopped
//!               │
//!               └─► Error ─► Stopped   (setup failure)
//! ```
//!
//! The [`RenderCore`] is created once, pre-sized for the configured maximum
//! channel count and block size, and reused across every start/stop cycle.

use std::sync::{Arc, Mutex, MutexGuard};

use basedrop::Owned;
use rtrb::Producer;

use super::command::{command_channel, PipelineCommand};
use super::error::{EngineError, EngineResult};
use super::gc::gc_handle;
use super::render::{RenderCore, RenderStats};
use crate::config::EngineConfig;
use crate::device::ChannelSelection;
use crate::hal::{AudioHal, DeviceId, HalError, HalStream, StreamRequest};
use crate::renderer::SpatialRenderer;
use crate::types::{ChannelRange, PlanarBuffer};

/// Pipeline lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Starting,
    Running,
    Error,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Stopped => write!(f, "stopped"),
            PipelineState::Starting => write!(f, "starting"),
            PipelineState::Running => write!(f, "running"),
            PipelineState::Error => write!(f, "in error"),
        }
    }
}

/// Sub-devices a stream is opened against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRoute {
    pub selection: ChannelSelection,
    pub input_device: DeviceId,
    pub output_device: DeviceId,
    /// Input sub-device's whole range in aggregate space
    pub input_span: ChannelRange,
    /// Output sub-device's whole range in aggregate space
    pub output_span: ChannelRange,
}

/// Stream owner and state machine
pub struct Pipeline {
    hal: Arc<dyn AudioHal>,
    sample_rate: u32,
    block_size: u32,
    max_channels: usize,
    core: Arc<Mutex<RenderCore>>,
    commands: Producer<PipelineCommand>,
    stream: Option<Box<dyn HalStream>>,
    /// Geometry the running stream currently follows
    request: Option<StreamRequest>,
    state: PipelineState,
    route: Option<StreamRoute>,
    last_error: Option<EngineError>,
    stats: Arc<RenderStats>,
}

impl Pipeline {
    pub fn new(hal: Arc<dyn AudioHal>, config: &EngineConfig) -> Self {
        let (commands, consumer) = command_channel();
        let stats = Arc::new(RenderStats::new());
        let max_channels = config.max_channels as usize;
        let core = RenderCore::new(
            consumer,
            max_channels,
            config.max_block_frames(),
            Arc::clone(&stats),
        );

        Self {
            hal,
            sample_rate: config.sample_rate,
            block_size: config.block_size,
            max_channels,
            core: Arc::new(Mutex::new(core)),
            commands,
            stream: None,
            request: None,
            state: PipelineState::Stopped,
            route: None,
            last_error: None,
            stats,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == PipelineState::Running
    }

    /// Route of the current (or last) stream
    pub fn route(&self) -> Option<StreamRoute> {
        self.route
    }

    /// Most recent setup failure
    pub fn last_error(&self) -> Option<&EngineError> {
        self.last_error.as_ref()
    }

    pub fn stats(&self) -> Arc<RenderStats> {
        Arc::clone(&self.stats)
    }

    /// Open and start a stream for `route`
    ///
    /// Transitions to Running only once the HAL reports activation. On a
    /// setup failure the pipeline passes through Error back to Stopped and
    /// the HAL error (operation and status) is returned.
    pub fn start(&mut self, route: StreamRoute) -> EngineResult<()> {
        if !matches!(self.state, PipelineState::Stopped | PipelineState::Error) {
            return Err(EngineError::InvalidState {
                state: self.state,
                operation: "start",
            });
        }

        self.state = PipelineState::Starting;
        match self.open(route) {
            Ok((stream, request)) => {
                self.stream = Some(stream);
                self.request = Some(request);
                self.route = Some(route);
                self.last_error = None;
                self.state = PipelineState::Running;
                log::info!(
                    "Pipeline running on aggregate {} (in {}, out {})",
                    route.selection.aggregate,
                    route.selection.input,
                    route.selection.output
                );
                Ok(())
            }
            Err(err) => {
                self.state = PipelineState::Error;
                log::error!("Pipeline start failed: {}", err);
                self.last_error = Some(err.clone());
                self.state = PipelineState::Stopped;
                Err(err)
            }
        }
    }

    /// Validate `route` against the live aggregate and describe its stream
    fn request_for(&self, route: &StreamRoute) -> EngineResult<StreamRequest> {
        let selection = route.selection;
        let aggregate = self
            .hal
            .device(selection.aggregate)
            .ok_or(HalError::DeviceNotFound(selection.aggregate))?;

        if selection.input.end() > aggregate.input_channels
            || selection.output.end() > aggregate.output_channels
        {
            return Err(EngineError::InvalidSelection(format!(
                "in {} / out {} exceed {} ({} in, {} out)",
                selection.input,
                selection.output,
                aggregate.uid,
                aggregate.input_channels,
                aggregate.output_channels
            )));
        }
        if selection.input.width() as usize > self.max_channels {
            return Err(EngineError::InvalidSelection(format!(
                "{} input channels exceed the maximum of {}",
                selection.input.width(),
                self.max_channels
            )));
        }

        Ok(StreamRequest {
            aggregate: aggregate.id,
            input_device: route.input_device,
            output_device: route.output_device,
            input_span: route.input_span,
            output_span: route.output_span,
            sample_rate: self.sample_rate,
            block_size: self.block_size,
            input_channels: aggregate.input_channels,
            output_channels: aggregate.output_channels,
            channel_capacity: self.max_channels as u16,
        })
    }

    fn open(&mut self, route: StreamRoute) -> EngineResult<(Box<dyn HalStream>, StreamRequest)> {
        let request = self.request_for(&route)?;
        self.publish(PipelineCommand::SetSelection(route.selection))?;

        let core = Arc::clone(&self.core);
        let mut stream = self.hal.open_stream(
            &request,
            Box::new(move |input: &PlanarBuffer, output: &mut PlanarBuffer| {
                match core.try_lock() {
                    Ok(mut core) => core.process(input, output),
                    // Control thread holds the core (stop in progress)
                    Err(_) => output.clear(),
                }
            }),
        )?;
        stream.start()?;
        Ok((stream, request))
    }

    /// Stop the stream; a no-op when already stopped
    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.stop() {
                log::warn!("Stream stop reported: {}", err);
            }
            log::info!("Pipeline stopped");
        }
        self.request = None;
        self.state = PipelineState::Stopped;

        // Whatever the stopped stream left queued is applied now, so the
        // reset below always has room
        self.lock_core().apply_commands();
        // Restart from silence, not from the previous stream's tail
        if let Err(err) = self.publish(PipelineCommand::Reset) {
            log::warn!("Render reset not queued: {}", err);
        }
    }

    /// Follow a new route without restarting
    ///
    /// When the aggregate's channel placement moved, the HAL stream is asked
    /// to remap in place. Returns `Ok(false)` when the running stream cannot
    /// follow (other devices, or the HAL declined the remap); the caller
    /// restarts then. Fails with [`EngineError::CommandQueueFull`] without
    /// touching the route.
    pub fn update_route(&mut self, route: StreamRoute) -> EngineResult<bool> {
        let Some(current) = self.request else {
            self.publish(PipelineCommand::SetSelection(route.selection))?;
            self.route = Some(route);
            return Ok(true);
        };

        let request = self.request_for(&route)?;
        if !request.same_devices(&current) {
            return Ok(false);
        }

        // The HAL and the render core must switch together
        self.reserve(1)?;
        if request != current {
            let remapped = self.stream.as_mut().is_some_and(|s| s.remap(&request));
            if !remapped {
                log::info!(
                    "Stream cannot follow {} in / {} out channels in place",
                    request.input_channels,
                    request.output_channels
                );
                return Ok(false);
            }
            self.request = Some(request);
        }
        self.publish(PipelineCommand::SetSelection(route.selection))?;
        self.route = Some(route);
        Ok(true)
    }

    /// Geometry of the running stream
    pub fn request(&self) -> Option<StreamRequest> {
        self.request
    }

    /// Swap the active renderer (or remove it with `None`)
    pub fn set_renderer(&mut self, renderer: Option<SpatialRenderer>) -> EngineResult<()> {
        let owned = renderer.map(|r| Owned::new(&gc_handle(), r));
        self.publish(PipelineCommand::SetRenderer(owned))
    }

    pub fn set_convolution_enabled(&mut self, enabled: bool) -> EngineResult<()> {
        self.publish(PipelineCommand::SetConvolutionEnabled(enabled))
    }

    /// Fail early unless `count` commands can be queued right now
    ///
    /// The control thread is the only producer, so the room can only grow
    /// until those commands are pushed.
    pub fn reserve(&self, count: usize) -> EngineResult<()> {
        if self.commands.slots() < count {
            return Err(EngineError::CommandQueueFull);
        }
        Ok(())
    }

    /// Queue a command; drained immediately when no stream is running
    fn publish(&mut self, command: PipelineCommand) -> EngineResult<()> {
        if let Err(err) = self.commands.push(command) {
            log::warn!("Pipeline command queue full, dropped {:?}", err);
            return Err(EngineError::CommandQueueFull);
        }
        if self.stream.is_none() {
            self.lock_core().apply_commands();
        }
        Ok(())
    }

    fn lock_core(&self) -> MutexGuard<'_, RenderCore> {
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Selection the render core currently applies
    pub fn active_selection(&self) -> Option<ChannelSelection> {
        if self.stream.is_some() {
            return self.route.map(|r| r.selection);
        }
        self.lock_core().selection()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{HalDevice, VirtualHal};
    use crate::types::ChannelRange;

    fn hal() -> Arc<VirtualHal> {
        let hal = Arc::new(VirtualHal::new());
        hal.add_device(HalDevice::new(1, "mic", "Mic").with_inputs(2));
        hal.add_device(HalDevice::new(2, "phones", "Phones").with_outputs(2));
        hal.add_device(HalDevice::new(10, "agg", "Aggregate").with_members(["mic", "phones"]));
        hal
    }

    fn route() -> StreamRoute {
        let span = ChannelRange::new(0, 2).unwrap();
        StreamRoute {
            selection: ChannelSelection {
                aggregate: 10,
                input: span,
                output: span,
            },
            input_device: 1,
            output_device: 2,
            input_span: span,
            output_span: span,
        }
    }

    fn config() -> EngineConfig {
        EngineConfig::default().with_block_size(4)
    }

    #[test]
    fn test_start_stop_cycle() {
        let hal = hal();
        let mut pipeline = Pipeline::new(hal.clone(), &config());
        assert_eq!(pipeline.state(), PipelineState::Stopped);

        pipeline.start(route()).unwrap();
        assert!(pipeline.is_running());
        assert_eq!(hal.active_request().unwrap().block_size, 4);

        let input = PlanarBuffer::from_channels(&[&[0.25; 4], &[0.75; 4]]);
        let mut output = PlanarBuffer::new(2, 4);
        assert!(hal.render(&input, &mut output));
        assert!(output.channel(1).iter().all(|&s| s == 0.75));

        pipeline.stop();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(!hal.render(&input, &mut output));

        // Buffers are reused for the next cycle
        pipeline.start(route()).unwrap();
        assert_eq!(hal.open_count(), 2);
    }

    #[test]
    fn test_double_start_rejected() {
        let mut pipeline = Pipeline::new(hal(), &config());
        pipeline.start(route()).unwrap();
        let err = pipeline.start(route()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { state: PipelineState::Running, .. }));
    }

    #[test]
    fn test_setup_failure_returns_to_stopped() {
        let hal = hal();
        hal.fail_next_start("start output unit", -10851);
        let mut pipeline = Pipeline::new(hal.clone(), &config());

        let err = pipeline.start(route()).unwrap_err();
        assert_eq!(err.status(), Some(-10851));
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(pipeline.last_error(), Some(&err));
    }

    #[test]
    fn test_missing_aggregate() {
        let hal = hal();
        hal.remove_device("agg");
        let mut pipeline = Pipeline::new(hal, &config());
        let err = pipeline.start(route()).unwrap_err();
        assert_eq!(err, EngineError::Hal(HalError::DeviceNotFound(10)));
    }

    #[test]
    fn test_selection_outside_aggregate() {
        let mut pipeline = Pipeline::new(hal(), &config());
        let mut route = route();
        route.selection.output = ChannelRange::new(2, 4).unwrap();
        assert!(matches!(
            pipeline.start(route),
            Err(EngineError::InvalidSelection(_))
        ));
    }

    #[test]
    fn test_update_route_while_stopped() {
        let mut pipeline = Pipeline::new(hal(), &config());
        let selection = route().selection;
        assert_eq!(pipeline.update_route(route()), Ok(true));
        assert_eq!(pipeline.active_selection(), Some(selection));
    }

    #[test]
    fn test_update_route_rejects_other_device() {
        let hal = hal();
        hal.add_device(HalDevice::new(3, "phones2", "Phones 2").with_outputs(2));
        hal.add_device(
            HalDevice::new(10, "agg", "Aggregate").with_members(["mic", "phones", "phones2"]),
        );
        let mut pipeline = Pipeline::new(hal, &config());
        pipeline.start(route()).unwrap();

        let mut other = route();
        other.output_device = 3;
        other.output_span = ChannelRange::new(2, 4).unwrap();
        other.selection.output = other.output_span;
        assert_eq!(pipeline.update_route(other), Ok(false));
        assert_eq!(pipeline.route(), Some(route()));
    }

    #[test]
    fn test_update_route_remaps_running_stream() {
        let hal = hal();
        let mut pipeline = Pipeline::new(hal.clone(), &config());
        pipeline.start(route()).unwrap();

        // A two-channel device joins ahead of phones, which moves to 2..4
        hal.add_device(HalDevice::new(3, "speakers", "Speakers").with_outputs(2));
        hal.add_device(
            HalDevice::new(10, "agg", "Aggregate").with_members(["mic", "speakers", "phones"]),
        );
        let mut moved = route();
        moved.output_span = ChannelRange::new(2, 4).unwrap();
        moved.selection.output = moved.output_span;

        assert_eq!(pipeline.update_route(moved), Ok(true));
        assert_eq!(hal.open_count(), 1);
        let request = hal.active_request().unwrap();
        assert_eq!(request.output_channels, 4);
        assert_eq!(request.output_span, moved.output_span);
        assert_eq!(pipeline.request(), Some(request));

        let input = PlanarBuffer::from_channels(&[&[0.25; 4], &[0.75; 4]]);
        let mut output = PlanarBuffer::new(4, 4);
        assert!(hal.render(&input, &mut output));
        assert!(output.channel(3).iter().all(|&s| s == 0.75));
        assert!(output.channel(1).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_update_route_declined_beyond_capacity() {
        let hal = hal();
        let mut config = config();
        config.max_channels = 2;
        let mut pipeline = Pipeline::new(hal.clone(), &config);
        pipeline.start(route()).unwrap();

        hal.add_device(HalDevice::new(3, "speakers", "Speakers").with_outputs(2));
        hal.add_device(
            HalDevice::new(10, "agg", "Aggregate").with_members(["mic", "speakers", "phones"]),
        );
        let mut moved = route();
        moved.output_span = ChannelRange::new(2, 4).unwrap();
        moved.selection.output = moved.output_span;

        // Four output channels no longer fit the two the stream reserved
        assert_eq!(pipeline.update_route(moved), Ok(false));
        assert_eq!(hal.active_request().unwrap().output_channels, 2);
        assert_eq!(pipeline.route(), Some(route()));
    }

    #[test]
    fn test_full_queue_is_reported() {
        let mut pipeline = Pipeline::new(hal(), &config());
        pipeline.start(route()).unwrap();

        // Nothing renders, so nothing drains
        for _ in 0..crate::engine::command::COMMAND_QUEUE_CAPACITY {
            pipeline.set_convolution_enabled(true).unwrap();
        }
        assert_eq!(pipeline.reserve(1), Err(EngineError::CommandQueueFull));
        assert_eq!(
            pipeline.set_convolution_enabled(false),
            Err(EngineError::CommandQueueFull)
        );

        // Stopping drains the backlog; the next start has room again
        pipeline.stop();
        assert_eq!(pipeline.reserve(1), Ok(()));
        pipeline.start(route()).unwrap();
    }
}
