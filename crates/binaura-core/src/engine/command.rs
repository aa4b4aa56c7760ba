//! Lock-free control-to-audio command queue
//!
//! Everything the audio thread reads that the control thread may change
//! (channel selection, active renderer, convolution flag) arrives here as
//! a whole value. The callback drains the queue at the start of every
//! block, so it never observes a half-updated selection or renderer.
//!
//! ```ignore
//! let (mut tx, rx) = command_channel();
//! tx.push(PipelineCommand::SetConvolutionEnabled(false));
//! // audio thread: core.apply_commands() pops it before rendering
//! ```

use basedrop::Owned;

use crate::device::ChannelSelection;
use crate::renderer::SpatialRenderer;

/// Commands sent from the control thread to the render core
pub enum PipelineCommand {
    /// Replace the channel selection
    SetSelection(ChannelSelection),
    /// Swap the renderer; the retired one is freed on the GC thread
    SetRenderer(Option<Owned<SpatialRenderer>>),
    /// Toggle spatialization (off = passthrough)
    SetConvolutionEnabled(bool),
    /// Clear convolution history
    Reset,
}

impl std::fmt::Debug for PipelineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineCommand::SetSelection(s) => f.debug_tuple("SetSelection").field(s).finish(),
            PipelineCommand::SetRenderer(r) => f
                .debug_tuple("SetRenderer")
                .field(&r.as_ref().map(|r| r.channel_count()))
                .finish(),
            PipelineCommand::SetConvolutionEnabled(on) => {
                f.debug_tuple("SetConvolutionEnabled").field(on).finish()
            }
            PipelineCommand::Reset => write!(f, "Reset"),
        }
    }
}

/// Queue capacity; the control thread only sends a handful per user action
pub const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Create the command queue
pub fn command_channel() -> (rtrb::Producer<PipelineCommand>, rtrb::Consumer<PipelineCommand>) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}
