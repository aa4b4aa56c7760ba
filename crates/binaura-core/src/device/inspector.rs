//! Aggregate topology queries
//!
//! Stateless: every answer is derived from the [`Topology`] snapshot passed
//! in. Partial topology (aggregate members that no longer resolve) is
//! normal and reported through `missing`, not as an error.

use super::{DeviceDescriptor, SubDeviceRoute, Topology};
use crate::hal::{member_layout, HalDevice};
use crate::types::{ChannelRange, Direction};

/// Input- and output-capable sub-devices of one aggregate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubDevices {
    pub inputs: Vec<SubDeviceRoute>,
    /// Output candidates (virtual loopback devices excluded)
    pub outputs: Vec<SubDeviceRoute>,
    /// Member UIDs listed by the aggregate that did not resolve
    pub missing: Vec<String>,
}

impl SubDevices {
    /// Candidates for one direction
    pub fn candidates(&self, direction: Direction) -> &[SubDeviceRoute] {
        match direction {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        }
    }

    /// Candidate with the given UID
    pub fn find_uid(&self, direction: Direction, uid: &str) -> Option<&SubDeviceRoute> {
        self.candidates(direction).iter().find(|r| r.device.uid == uid)
    }
}

/// Member connectivity of an aggregate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateHealth {
    pub connected_count: usize,
    pub missing_uids: Vec<String>,
}

impl AggregateHealth {
    pub fn is_complete(&self) -> bool {
        self.missing_uids.is_empty()
    }
}

/// Query layer over topology snapshots
#[derive(Debug, Clone, Default)]
pub struct DeviceInspector {
    /// Lowercase name fragments identifying virtual loopback devices
    loopback_patterns: Vec<String>,
}

impl DeviceInspector {
    pub fn new<S: AsRef<str>>(loopback_patterns: &[S]) -> Self {
        Self {
            loopback_patterns: loopback_patterns
                .iter()
                .map(|p| p.as_ref().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Whether a device composes other devices
    pub fn is_aggregate(device: &HalDevice) -> bool {
        device.is_aggregate()
    }

    /// Whether a device is a virtual loopback (by name pattern)
    pub fn is_loopback(&self, device: &HalDevice) -> bool {
        let name = device.name.to_lowercase();
        self.loopback_patterns.iter().any(|p| name.contains(p.as_str()))
    }

    /// Aggregate devices present in the snapshot
    pub fn aggregates(&self, topology: &Topology) -> Vec<DeviceDescriptor> {
        topology
            .devices()
            .iter()
            .filter(|d| Self::is_aggregate(d))
            .map(DeviceDescriptor::from)
            .collect()
    }

    /// Resolve the input and output sub-devices of an aggregate
    ///
    /// Members contributing zero channels in a direction are omitted from
    /// that direction. Loopback devices are dropped from the outputs only;
    /// they remain valid input feeds.
    pub fn list_sub_devices(&self, topology: &Topology, aggregate: &HalDevice) -> SubDevices {
        let mut result = SubDevices::default();

        for span in member_layout(aggregate, topology.devices()) {
            let Some(device) = span.device else {
                result.missing.push(span.uid);
                continue;
            };
            let descriptor = DeviceDescriptor::from(&device);

            if let Some(range) = span.input.and_then(|r| ChannelRange::new(r.start, r.end)) {
                result.inputs.push(SubDeviceRoute {
                    range,
                    direction: Direction::Input,
                    device: descriptor.clone(),
                });
            }

            if self.is_loopback(&device) {
                log::debug!("Excluding loopback device {} from outputs", device.uid);
                continue;
            }
            if let Some(range) = span.output.and_then(|r| ChannelRange::new(r.start, r.end)) {
                result.outputs.push(SubDeviceRoute {
                    range,
                    direction: Direction::Output,
                    device: descriptor,
                });
            }
        }

        result
    }

    /// How many members resolve, and which don't
    pub fn health(&self, topology: &Topology, aggregate: &HalDevice) -> AggregateHealth {
        let layout = member_layout(aggregate, topology.devices());
        let connected_count = layout.iter().filter(|m| m.device.is_some()).count();
        let missing_uids = layout
            .into_iter()
            .filter(|m| m.device.is_none())
            .map(|m| m.uid)
            .collect();

        AggregateHealth {
            connected_count,
            missing_uids,
        }
    }
}
