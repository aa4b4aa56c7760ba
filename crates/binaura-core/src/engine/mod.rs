//! Real-time engine and its control layer
//!
//! - [`EngineContext`]: control-thread composition root (routing, presets,
//!   lifecycle, events)
//! - [`Pipeline`]: stream owner and Stopped/Starting/Running/Error state
//!   machine
//! - [`RenderCore`]: what runs inside the HAL callback
//!
//! Control and audio threads share nothing mutable. Selections, renderers
//! and flags cross over as whole values through a lock-free command queue
//! (`rtrb`); retired renderers are freed on a `basedrop` collector thread.

mod command;
mod context;
mod error;
mod event;
mod gc;
mod pipeline;
mod render;

pub use command::{command_channel, PipelineCommand, COMMAND_QUEUE_CAPACITY};
pub use context::EngineContext;
pub use error::{EngineError, EngineResult};
pub use event::{EngineEvent, EngineStatus};
pub use gc::gc_handle;
pub use pipeline::{Pipeline, PipelineState, StreamRoute};
pub use render::{RenderCore, RenderStats, RenderStatsSnapshot};
