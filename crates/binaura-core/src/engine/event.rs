//! Engine events and status

use uuid::Uuid;

use super::error::EngineError;
use super::pipeline::PipelineState;
use super::render::RenderStatsSnapshot;
use crate::device::{ChannelSelection, DeviceDescriptor, SubDeviceRoute, TopologyError};
use crate::hal::DeviceId;
use crate::preset::CatalogDiff;
use crate::types::Direction;

/// Notifications for the control layer, in the order they happened
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Pipeline lifecycle transition
    StateChanged(PipelineState),
    /// Routing changed (new binding, fallback, user selection)
    RouteChanged(ChannelSelection),
    /// An intended device came back under a new numeric id
    Reconnected {
        direction: Direction,
        uid: String,
        id: DeviceId,
    },
    /// Channel ranges moved inside the same aggregate, stream untouched
    Remapped(ChannelSelection),
    /// Routing lost with no fallback; the pipeline was stopped
    Disconnected(TopologyError),
    PresetActivated { id: Uuid, name: String },
    /// Activation or rebuild failed (bad file, or the render thread had no
    /// room for it); the previous renderer is still active
    PresetFailed { id: Uuid, error: EngineError },
    PresetsChanged(CatalogDiff),
    Error(EngineError),
}

/// Snapshot of everything the control layer shows
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub state: PipelineState,
    pub is_running: bool,
    pub last_error: Option<EngineError>,
    /// Aggregates present right now
    pub aggregates: Vec<DeviceDescriptor>,
    /// Output candidates of the selected aggregate
    pub outputs: Vec<SubDeviceRoute>,
    /// Input candidates of the selected aggregate
    pub inputs: Vec<SubDeviceRoute>,
    pub aggregate_uid: Option<String>,
    pub output_uid: Option<String>,
    pub input_uid: Option<String>,
    pub selection: Option<ChannelSelection>,
    pub active_preset: Option<Uuid>,
    pub convolution_enabled: bool,
    pub stats: RenderStatsSnapshot,
}
