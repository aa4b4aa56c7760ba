//! Real-time render core
//!
//! The part of the pipeline that runs inside the HAL callback. It owns the
//! active selection and renderer outright (they only change through the
//! command queue) and a gather buffer pre-sized for the maximum channel
//! count and block size, so a callback never allocates.
//!
//! Per block:
//!
//! 1. Drain pending commands
//! 2. Validate shapes; any mismatch renders silence for the whole block
//! 3. Gather the selected input channels
//! 4. Spatialize, or pass the first two channels through (mono duplicated)
//! 5. Zero the selected output range and write the stereo result

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use basedrop::Owned;
use rtrb::Consumer;

use super::command::PipelineCommand;
use crate::device::ChannelSelection;
use crate::renderer::SpatialRenderer;
use crate::types::{PlanarBuffer, Sample};

/// Counters written by the audio thread
///
/// All stores are `Relaxed`: readers only need eventual visibility.
#[derive(Debug, Default)]
pub struct RenderStats {
    /// Blocks rendered with audio
    pub blocks: AtomicU64,
    /// Blocks that degraded to silence (shape mismatch, no selection)
    pub silent_blocks: AtomicU64,
    /// Renderers swapped in
    pub renderer_swaps: AtomicU64,
    /// Channel selections swapped in
    pub selection_swaps: AtomicU64,
}

impl RenderStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current counters (lock-free)
    pub fn snapshot(&self) -> RenderStatsSnapshot {
        RenderStatsSnapshot {
            blocks: self.blocks.load(Ordering::Relaxed),
            silent_blocks: self.silent_blocks.load(Ordering::Relaxed),
            renderer_swaps: self.renderer_swaps.load(Ordering::Relaxed),
            selection_swaps: self.selection_swaps.load(Ordering::Relaxed),
        }
    }

    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Plain copy of [`RenderStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStatsSnapshot {
    pub blocks: u64,
    pub silent_blocks: u64,
    pub renderer_swaps: u64,
    pub selection_swaps: u64,
}

/// Callback-side state of the pipeline
pub struct RenderCore {
    commands: Consumer<PipelineCommand>,
    selection: Option<ChannelSelection>,
    renderer: Option<Owned<SpatialRenderer>>,
    convolution_enabled: bool,
    /// Selected input channels, re-based to channel 0
    gathered: PlanarBuffer,
    left: Vec<Sample>,
    right: Vec<Sample>,
    stats: Arc<RenderStats>,
}

impl RenderCore {
    /// Pre-size every working buffer for `max_channels` x `max_frames`
    pub fn new(
        commands: Consumer<PipelineCommand>,
        max_channels: usize,
        max_frames: usize,
        stats: Arc<RenderStats>,
    ) -> Self {
        Self {
            commands,
            selection: None,
            renderer: None,
            convolution_enabled: true,
            gathered: PlanarBuffer::new(max_channels.max(1), max_frames),
            left: vec![0.0; max_frames],
            right: vec![0.0; max_frames],
            stats,
        }
    }

    /// Largest block this core renders
    pub fn max_frames(&self) -> usize {
        self.left.len()
    }

    pub fn selection(&self) -> Option<ChannelSelection> {
        self.selection
    }

    pub fn has_renderer(&self) -> bool {
        self.renderer.is_some()
    }

    pub fn convolution_enabled(&self) -> bool {
        self.convolution_enabled
    }

    /// Apply every pending command
    pub fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                PipelineCommand::SetSelection(selection) => {
                    self.selection = Some(selection);
                    RenderStats::bump(&self.stats.selection_swaps);
                }
                PipelineCommand::SetRenderer(renderer) => {
                    // The retired renderer is only enqueued for the GC thread here
                    self.renderer = renderer;
                    RenderStats::bump(&self.stats.renderer_swaps);
                }
                PipelineCommand::SetConvolutionEnabled(enabled) => {
                    self.convolution_enabled = enabled;
                }
                PipelineCommand::Reset => {
                    if let Some(renderer) = self.renderer.as_deref_mut() {
                        renderer.reset();
                    }
                }
            }
        }
    }

    /// Render one callback block
    pub fn process(&mut self, input: &PlanarBuffer, output: &mut PlanarBuffer) {
        self.apply_commands();

        let frames = output.frames();
        let selection = match self.selection {
            Some(selection) if self.fits(&selection, input, output, frames) => selection,
            _ => {
                output.clear();
                RenderStats::bump(&self.stats.silent_blocks);
                return;
            }
        };

        let width = (selection.input.width() as usize).min(self.gathered.channel_count());
        self.gathered.set_frames(frames);
        for (index, channel) in selection.input.channels().take(width).enumerate() {
            self.gathered.channel_mut(index).copy_from_slice(input.channel(channel));
        }
        // A renderer built for a wider layout must not read stale channels
        let consumed = self.renderer.as_ref().map_or(0, |r| r.channel_count());
        for index in width..consumed.min(self.gathered.channel_count()) {
            self.gathered.channel_mut(index).fill(0.0);
        }

        let left = &mut self.left[..frames];
        let right = &mut self.right[..frames];

        // Only whole renderer blocks convolve; anything else passes through dry
        let rendered = match self.renderer.as_deref_mut() {
            Some(renderer) if self.convolution_enabled && renderer.accepts(frames) => {
                renderer.process_audio(&self.gathered, left, right, frames)
            }
            _ => false,
        };

        if !rendered {
            left.copy_from_slice(self.gathered.channel(0));
            let second = if width > 1 { 1 } else { 0 };
            right.copy_from_slice(self.gathered.channel(second));
        }

        output.clear_range(selection.output);
        let start = selection.output.start() as usize;
        if selection.output.width() == 1 {
            let mono = output.channel_mut(start);
            for ((out, l), r) in mono.iter_mut().zip(left.iter()).zip(right.iter()) {
                *out = (l + r) * 0.5;
            }
        } else {
            output.channel_mut(start).copy_from_slice(left);
            output.channel_mut(start + 1).copy_from_slice(right);
        }

        RenderStats::bump(&self.stats.blocks);
    }

    /// Whether the block can be rendered without indexing out of bounds
    fn fits(
        &self,
        selection: &ChannelSelection,
        input: &PlanarBuffer,
        output: &PlanarBuffer,
        frames: usize,
    ) -> bool {
        frames > 0
            && frames <= self.max_frames()
            && input.frames() == frames
            && input.channel_count() > 0
            && selection.input.end() as usize <= input.channel_count()
            && selection.output.end() as usize <= output.channel_count()
    }
}
