//! Topology error types

use thiserror::Error;

use crate::types::{ChannelRange, Direction};

/// Recoverable device-topology failures
///
/// These are handled by the identity monitor's fallback and UID rematch
/// logic; they only reach the user when no fallback exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// No device with this UID is present
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// The intended device vanished and nothing could replace it
    #[error("{direction} device disconnected: {uid}")]
    Disconnected { direction: Direction, uid: String },

    /// The aggregate exposes no channels in this direction
    #[error("No usable {0} channels")]
    NoUsableChannels(Direction),

    /// A requested channel range falls outside the bound sub-device
    #[error("Channels {range} are outside the {direction} device's channels {route}")]
    RangeOutOfBounds {
        direction: Direction,
        range: ChannelRange,
        route: ChannelRange,
    },

    /// Nothing to route until an aggregate is selected
    #[error("No aggregate device selected")]
    NoAggregate,
}

/// Result type for topology operations
pub type TopologyResult<T> = Result<T, TopologyError>;
