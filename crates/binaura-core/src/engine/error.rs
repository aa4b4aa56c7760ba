//! Engine error types

use thiserror::Error;

use super::pipeline::PipelineState;
use crate::device::TopologyError;
use crate::hal::HalError;
use crate::preset::PresetError;

/// Errors surfaced to the control layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Stream setup failed; carries the operation and native status
    #[error(transparent)]
    Hal(#[from] HalError),

    /// Routing could not be resolved
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// Preset activation failed; the previous renderer stays active
    #[error(transparent)]
    Preset(#[from] PresetError),

    /// `start` without a fully resolved channel selection
    #[error("No resolved channel selection")]
    NoSelection,

    /// Selection does not fit the aggregate or the pre-sized buffers
    #[error("Invalid channel selection: {0}")]
    InvalidSelection(String),

    /// The render thread has not drained earlier commands; nothing changed
    #[error("Pipeline command queue full")]
    CommandQueueFull,

    /// Operation not allowed in the current pipeline state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        state: PipelineState,
        operation: &'static str,
    },
}

impl EngineError {
    /// Native HAL status code, when the failure carries one
    pub fn status(&self) -> Option<i32> {
        match self {
            EngineError::Hal(err) => err.status(),
            _ => None,
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
