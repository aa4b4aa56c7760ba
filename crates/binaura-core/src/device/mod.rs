//! Device identity and routing
//!
//! - [`DeviceInspector`]: pure queries over a topology snapshot (sub-devices,
//!   channel ranges, aggregate health)
//! - [`IdentityMonitor`]: keeps the intended selection by UID and reconciles
//!   it against each new snapshot
//! - [`TopologyWatcher`]: debounces HAL notifications into settle ticks
//!
//! Numeric device ids are transient; only UIDs survive reconnection and are
//! the only identifiers that get persisted.

mod error;
mod inspector;
mod monitor;
mod watcher;

pub use error::{TopologyError, TopologyResult};
pub use inspector::{AggregateHealth, DeviceInspector, SubDevices};
pub use monitor::{
    IdentityMonitor, Reconciliation, RouteAction, RouteDecision, DEFAULT_ROUTE_WIDTH,
};
pub use watcher::{TopologySettled, TopologyWatcher};

use crate::hal::{AudioHal, DeviceId, HalDevice, HalResult};
use crate::types::{ChannelRange, Direction};

/// A device as seen by one topology query
///
/// Recreated on every query. Persist `uid`, never `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub uid: String,
    pub name: String,
    pub sample_rate: u32,
    pub input_channels: u16,
    pub output_channels: u16,
}

impl DeviceDescriptor {
    /// Channel count in one direction
    pub fn channels(&self, direction: Direction) -> u16 {
        match direction {
            Direction::Input => self.input_channels,
            Direction::Output => self.output_channels,
        }
    }

    /// Total channel count across both directions
    pub fn channel_count(&self) -> u16 {
        self.input_channels.saturating_add(self.output_channels)
    }
}

impl From<&HalDevice> for DeviceDescriptor {
    fn from(device: &HalDevice) -> Self {
        Self {
            id: device.id,
            uid: device.uid.clone(),
            name: device.name.clone(),
            sample_rate: device.sample_rate,
            input_channels: device.input_channels,
            output_channels: device.output_channels,
        }
    }
}

/// A sub-device's contiguous channel span inside an aggregate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubDeviceRoute {
    /// Channels in the aggregate's space for `direction`
    pub range: ChannelRange,
    pub direction: Direction,
    pub device: DeviceDescriptor,
}

impl SubDeviceRoute {
    pub fn uid(&self) -> &str {
        &self.device.uid
    }
}

/// The channels the pipeline reads and writes, in aggregate space
///
/// Published to the audio thread as one value; never mutated in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSelection {
    /// Aggregate whose channel space the ranges index
    pub aggregate: DeviceId,
    pub input: ChannelRange,
    pub output: ChannelRange,
}

/// A topology snapshot
#[derive(Debug, Clone, Default)]
pub struct Topology {
    devices: Vec<HalDevice>,
}

impl Topology {
    pub fn new(devices: Vec<HalDevice>) -> Self {
        Self { devices }
    }

    /// Query the HAL for the current topology
    pub fn capture(hal: &dyn AudioHal) -> HalResult<Self> {
        hal.devices().map(Self::new)
    }

    pub fn devices(&self) -> &[HalDevice] {
        &self.devices
    }

    pub fn by_uid(&self, uid: &str) -> Option<&HalDevice> {
        self.devices.iter().find(|d| d.uid == uid)
    }

    pub fn by_id(&self, id: DeviceId) -> Option<&HalDevice> {
        self.devices.iter().find(|d| d.id == id)
    }
}
