//! In-memory HAL with a scriptable topology
//!
//! Devices can be added, removed and renumbered at will, notifications are
//! fired explicitly, and render blocks are driven synchronously through
//! [`VirtualHal::render`]. The stream lock held during `render` mirrors a
//! real HAL: `stop()` waits for an in-flight callback to finish.
//!
//! Like a real backend, a stream's buffer widths are fixed when it opens:
//! `render` only accepts buffers shaped like [`VirtualHal::active_request`],
//! and a remap may widen them only up to the channel capacity reserved then.

use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam::channel::{unbounded, Receiver, Sender};

use super::{
    member_layout, AudioHal, DeviceId, HalDevice, HalError, HalNotification, HalResult,
    HalStream, RenderCallback, StreamRequest,
};
use crate::types::PlanarBuffer;

struct StreamCore {
    request: StreamRequest,
    callback: RenderCallback,
    running: bool,
    /// Widest (input, output) buffers allocated at open
    capacity: (u16, u16),
}

#[derive(Default)]
struct VirtualState {
    devices: Vec<HalDevice>,
    stream: Option<Arc<Mutex<StreamCore>>>,
    opened: usize,
    fail_next_start: Option<(String, i32)>,
}

/// Scriptable HAL for tests and offline tooling
#[derive(Default)]
pub struct VirtualHal {
    state: Mutex<VirtualState>,
    subscribers: Mutex<Vec<Sender<HalNotification>>>,
}

impl VirtualHal {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, VirtualState> {
        // A panic while holding the lock only happens in a failing test
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a device, replacing any existing device with the same UID
    pub fn add_device(&self, device: HalDevice) {
        let mut state = self.state();
        state.devices.retain(|d| d.uid != device.uid);
        state.devices.push(device);
    }

    /// Remove a device by UID (aggregates keep listing it as a member)
    pub fn remove_device(&self, uid: &str) -> Option<HalDevice> {
        let mut state = self.state();
        let index = state.devices.iter().position(|d| d.uid == uid)?;
        Some(state.devices.remove(index))
    }

    /// Simulate unplug/replug: the device comes back under a new numeric id
    pub fn reconnect(&self, uid: &str, new_id: DeviceId) -> bool {
        match self.remove_device(uid) {
            Some(mut device) => {
                device.id = new_id;
                self.add_device(device);
                true
            }
            None => false,
        }
    }

    /// Change a device's channel counts in place (same numeric id)
    pub fn set_channels(&self, uid: &str, inputs: u16, outputs: u16) {
        let mut state = self.state();
        if let Some(device) = state.devices.iter_mut().find(|d| d.uid == uid) {
            device.input_channels = inputs;
            device.output_channels = outputs;
        }
    }

    /// Deliver a notification to every subscriber
    pub fn notify(&self, notification: HalNotification) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(notification.clone()).is_ok());
    }

    /// Make the next `HalStream::start` fail with the given status
    pub fn fail_next_start(&self, operation: impl Into<String>, status: i32) {
        self.state().fail_next_start = Some((operation.into(), status));
    }

    /// Number of streams opened so far (restarts open a new one)
    pub fn open_count(&self) -> usize {
        self.state().opened
    }

    /// Geometry of the most recently opened stream, including remaps
    pub fn active_request(&self) -> Option<StreamRequest> {
        let stream = self.state().stream.clone()?;
        let core = stream.lock().unwrap_or_else(|e| e.into_inner());
        Some(core.request)
    }

    /// Drive one render block through the running stream
    ///
    /// Returns `false` when no stream is running, its aggregate has
    /// disappeared, or the buffers are not shaped like the stream's request.
    /// `output` is left untouched then.
    pub fn render(&self, input: &PlanarBuffer, output: &mut PlanarBuffer) -> bool {
        let (stream, aggregate_present) = {
            let state = self.state();
            let Some(stream) = state.stream.clone() else {
                return false;
            };
            let aggregate = stream
                .lock()
                .map(|core| core.request.aggregate)
                .unwrap_or_else(|e| e.into_inner().request.aggregate);
            let present = state.devices.iter().any(|d| d.id == aggregate);
            (stream, present)
        };

        if !aggregate_present {
            return false;
        }

        let mut core = stream.lock().unwrap_or_else(|e| e.into_inner());
        if !core.running {
            return false;
        }
        let request = core.request;
        if input.channel_count() != request.input_channels as usize
            || output.channel_count() != request.output_channels as usize
        {
            log::debug!(
                "VirtualHal: {}x{} buffers do not match the stream's {}x{}",
                input.channel_count(),
                output.channel_count(),
                request.input_channels,
                request.output_channels
            );
            return false;
        }
        output.clear();
        (core.callback)(input, output);
        true
    }
}

impl AudioHal for VirtualHal {
    fn name(&self) -> &str {
        "Virtual"
    }

    fn devices(&self) -> HalResult<Vec<HalDevice>> {
        let snapshot = self.state().devices.clone();

        // Aggregate channel counts follow whichever members are present
        let devices = snapshot
            .iter()
            .map(|device| {
                if !device.is_aggregate() {
                    return device.clone();
                }
                let layout = member_layout(device, &snapshot);
                let mut aggregate = device.clone();
                aggregate.input_channels = layout
                    .iter()
                    .filter_map(|m| m.input.as_ref())
                    .map(|r| r.end - r.start)
                    .sum();
                aggregate.output_channels = layout
                    .iter()
                    .filter_map(|m| m.output.as_ref())
                    .map(|r| r.end - r.start)
                    .sum();
                aggregate
            })
            .collect();
        Ok(devices)
    }

    fn open_stream(
        &self,
        request: &StreamRequest,
        callback: RenderCallback,
    ) -> HalResult<Box<dyn HalStream>> {
        let mut state = self.state();
        if !state.devices.iter().any(|d| d.id == request.aggregate) {
            return Err(HalError::DeviceNotFound(request.aggregate));
        }

        let core = Arc::new(Mutex::new(StreamCore {
            request: *request,
            callback,
            running: false,
            capacity: (
                request.input_channels.max(request.channel_capacity),
                request.output_channels.max(request.channel_capacity),
            ),
        }));
        state.stream = Some(Arc::clone(&core));
        state.opened += 1;
        let fail_start = state.fail_next_start.take();

        log::debug!(
            "VirtualHal: opened stream #{} on aggregate {}",
            state.opened,
            request.aggregate
        );

        Ok(Box::new(VirtualStream { core, fail_start }))
    }

    fn subscribe(&self) -> Receiver<HalNotification> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }
}

struct VirtualStream {
    core: Arc<Mutex<StreamCore>>,
    fail_start: Option<(String, i32)>,
}

impl HalStream for VirtualStream {
    fn start(&mut self) -> HalResult<()> {
        if let Some((operation, status)) = self.fail_start.take() {
            return Err(HalError::setup(operation, status));
        }
        self.core.lock().unwrap_or_else(|e| e.into_inner()).running = true;
        Ok(())
    }

    fn stop(&mut self) -> HalResult<()> {
        // Taking the lock waits out any render in flight
        self.core.lock().unwrap_or_else(|e| e.into_inner()).running = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.core.lock().map(|c| c.running).unwrap_or(false)
    }

    fn remap(&mut self, request: &StreamRequest) -> bool {
        let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
        let (input_capacity, output_capacity) = core.capacity;
        let current = core.request;

        if !request.same_devices(&current)
            || request.input_span.width() != current.input_span.width()
            || request.output_span.width() != current.output_span.width()
            || request.input_channels > input_capacity
            || request.output_channels > output_capacity
        {
            return false;
        }

        log::debug!(
            "VirtualHal: remapped to {} in / {} out (output at {})",
            request.input_channels,
            request.output_channels,
            request.output_span
        );
        core.request = *request;
        true
    }
}

impl Drop for VirtualStream {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
