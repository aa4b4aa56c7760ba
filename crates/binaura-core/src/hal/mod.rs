//! Audio HAL abstraction
//!
//! The engine never talks to a platform audio API directly. Everything it
//! needs from the OS (device/topology enumeration, change notifications and
//! the render callback contract) goes through [`AudioHal`]:
//!
//! - **CpalHal**: cpal hosts exposed as aggregate devices (production)
//! - **VirtualHal**: scriptable in-memory topology (tests, offline tooling)
//!
//! # Render contract
//!
//! The HAL owns the stream buffers and hands them to the [`RenderCallback`]
//! once per block: a planar input buffer spanning the aggregate's whole
//! input channel space and a planar output buffer spanning its output
//! channel space. Output buffers arrive zeroed. The callback runs on the
//! HAL's real-time thread and must not allocate, block or panic.

mod cpal_hal;
mod error;
mod virtual_hal;

use std::ops::Range;

use crossbeam::channel::Receiver;

use crate::types::{ChannelRange, PlanarBuffer};

pub use cpal_hal::CpalHal;
pub use error::{HalError, HalResult};
pub use virtual_hal::VirtualHal;

/// Transient numeric device id
///
/// Reassigned by the HAL whenever a device reconnects. Never persist it.
pub type DeviceId = u32;

/// A device as reported by the HAL at one moment in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HalDevice {
    /// Transient numeric id
    pub id: DeviceId,
    /// Persistent, reconnection-invariant identifier
    pub uid: String,
    /// Human-readable name
    pub name: String,
    /// Nominal sample rate
    pub sample_rate: u32,
    /// Total input channels
    pub input_channels: u16,
    /// Total output channels
    pub output_channels: u16,
    /// Member UIDs in channel order (aggregates only)
    pub members: Vec<String>,
}

impl HalDevice {
    pub fn new(id: DeviceId, uid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            uid: uid.into(),
            name: name.into(),
            sample_rate: crate::config::DEFAULT_SAMPLE_RATE,
            input_channels: 0,
            output_channels: 0,
            members: Vec::new(),
        }
    }

    pub fn with_inputs(mut self, channels: u16) -> Self {
        self.input_channels = channels;
        self
    }

    pub fn with_outputs(mut self, channels: u16) -> Self {
        self.output_channels = channels;
        self
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn with_members<S: Into<String>>(mut self, members: impl IntoIterator<Item = S>) -> Self {
        self.members = members.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this device composes other devices
    pub fn is_aggregate(&self) -> bool {
        !self.members.is_empty()
    }
}

/// Topology/configuration change notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalNotification {
    /// Devices appeared, disappeared or were renumbered
    DevicesChanged,
    /// A device's stream configuration changed
    ConfigurationChanged { uid: String },
}

/// Stream setup parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    /// Aggregate whose channel space the buffers span
    pub aggregate: DeviceId,
    /// Sub-device providing input
    pub input_device: DeviceId,
    /// Sub-device receiving output
    pub output_device: DeviceId,
    /// Input sub-device's channels in aggregate space
    pub input_span: ChannelRange,
    /// Output sub-device's channels in aggregate space
    pub output_span: ChannelRange,
    pub sample_rate: u32,
    /// Frames per callback
    pub block_size: u32,
    /// Aggregate input channel count
    pub input_channels: u16,
    /// Aggregate output channel count
    pub output_channels: u16,
    /// Channels reserved per direction so the aggregate can grow in place
    pub channel_capacity: u16,
}

impl StreamRequest {
    /// Same aggregate and sub-devices, whatever the channel placement
    pub fn same_devices(&self, other: &StreamRequest) -> bool {
        self.aggregate == other.aggregate
            && self.input_device == other.input_device
            && self.output_device == other.output_device
    }
}

/// Real-time render callback: `(input, output)` per block
///
/// Every call carries exactly `block_size` frames. Backends with variable
/// device buffers re-block before calling; a shorter block is rendered as
/// dry passthrough because the convolver only runs whole partitions.
pub type RenderCallback = Box<dyn FnMut(&PlanarBuffer, &mut PlanarBuffer) + Send + 'static>;

/// An opened, bidirectional stream
///
/// `start` returns only after the backend reports activation; `stop` blocks
/// until the backend confirms no further callbacks will run. Dropping a
/// stream stops it.
pub trait HalStream {
    fn start(&mut self) -> HalResult<()>;
    fn stop(&mut self) -> HalResult<()>;
    fn is_running(&self) -> bool;

    /// Follow a channel layout change without reopening
    ///
    /// `request` names the same devices the stream was opened for, with new
    /// spans and aggregate widths. Returns `false` when the backend cannot
    /// apply it in place (sub-device widths changed, or the aggregate
    /// outgrew the buffers); the stream is then untouched and must be
    /// reopened.
    fn remap(&mut self, request: &StreamRequest) -> bool;
}

/// The OS audio HAL as seen by the engine
pub trait AudioHal: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Snapshot of the current device topology
    fn devices(&self) -> HalResult<Vec<HalDevice>>;

    /// Open (but do not start) a stream
    fn open_stream(
        &self,
        request: &StreamRequest,
        callback: RenderCallback,
    ) -> HalResult<Box<dyn HalStream>>;

    /// Register for topology/configuration notifications
    fn subscribe(&self) -> Receiver<HalNotification>;

    /// Resolve a numeric id against the current topology
    fn device(&self, id: DeviceId) -> Option<HalDevice> {
        self.devices().ok()?.into_iter().find(|d| d.id == id)
    }
}

/// Where one member of an aggregate sits in the aggregate's channel spaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSpan {
    /// Member UID as listed by the aggregate
    pub uid: String,
    /// Resolved device, `None` when the member is currently missing
    pub device: Option<HalDevice>,
    /// Input channels in aggregate space (`None` if it has no inputs)
    pub input: Option<Range<u16>>,
    /// Output channels in aggregate space (`None` if it has no outputs)
    pub output: Option<Range<u16>>,
}

/// Lay out an aggregate's members across its input and output channel spaces
///
/// Members are packed in listed order; missing members contribute no
/// channels. A plain device is treated as an aggregate of itself.
pub fn member_layout(aggregate: &HalDevice, devices: &[HalDevice]) -> Vec<MemberSpan> {
    if !aggregate.is_aggregate() {
        return vec![span_for(aggregate.uid.clone(), Some(aggregate.clone()), &mut 0, &mut 0)];
    }

    let mut input_offset = 0u16;
    let mut output_offset = 0u16;
    aggregate
        .members
        .iter()
        .map(|uid| {
            let device = devices.iter().find(|d| &d.uid == uid).cloned();
            span_for(uid.clone(), device, &mut input_offset, &mut output_offset)
        })
        .collect()
}

fn span_for(
    uid: String,
    device: Option<HalDevice>,
    input_offset: &mut u16,
    output_offset: &mut u16,
) -> MemberSpan {
    let (inputs, outputs) = device
        .as_ref()
        .map(|d| (d.input_channels, d.output_channels))
        .unwrap_or((0, 0));

    let input = (inputs > 0).then(|| *input_offset..*input_offset + inputs);
    let output = (outputs > 0).then(|| *output_offset..*output_offset + outputs);
    *input_offset += inputs;
    *output_offset += outputs;

    MemberSpan {
        uid,
        device,
        input,
        output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_layout_packs_in_order() {
        let mic = HalDevice::new(1, "mic", "Mic").with_inputs(2);
        let iface = HalDevice::new(2, "iface", "Interface").with_inputs(4).with_outputs(8);
        let agg = HalDevice::new(3, "agg", "Aggregate").with_members(["mic", "iface"]);

        let layout = member_layout(&agg, &[mic, iface]);
        assert_eq!(layout.len(), 2);
        assert_eq!(layout[0].input, Some(0..2));
        assert_eq!(layout[0].output, None);
        assert_eq!(layout[1].input, Some(2..6));
        assert_eq!(layout[1].output, Some(0..8));
    }

    #[test]
    fn test_missing_member_contributes_no_channels() {
        let iface = HalDevice::new(2, "iface", "Interface").with_outputs(2);
        let agg = HalDevice::new(3, "agg", "Aggregate").with_members(["gone", "iface"]);

        let layout = member_layout(&agg, &[iface]);
        assert!(layout[0].device.is_none());
        assert_eq!(layout[1].output, Some(0..2));
    }

    #[test]
    fn test_plain_device_is_its_own_member() {
        let dev = HalDevice::new(9, "usb", "USB Audio").with_inputs(1).with_outputs(2);
        let layout = member_layout(&dev, &[]);
        assert_eq!(layout.len(), 1);
        assert_eq!(layout[0].uid, "usb");
        assert_eq!(layout[0].output, Some(0..2));
    }
}
