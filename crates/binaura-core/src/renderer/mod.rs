//! Spatial renderer
//!
//! Preset activation (control thread):
//!
//! ```text
//! HrirData ─► ChannelMap::build(layout) ─► resample ─► PartitionSet per ear
//!          ─► RendererState (immutable) ─► SpatialRenderer (convolvers)
//!          ─► published to the pipeline as one unit
//! ```
//!
//! Rendering (audio thread): every input channel is convolved with its
//! left- and right-ear filters and summed into one stereo block.

mod channel_map;
mod offline;
mod spatial;
mod state;

pub use channel_map::{ChannelMap, EarPair, HrirConvention, InputLayout, Speaker};
pub use offline::{render_offline, StereoSignal};
pub use spatial::SpatialRenderer;
pub use state::{ChannelFilters, RendererState};

use std::sync::Arc;

use crate::preset::{HrirData, PresetError, PresetResult};

/// Build a ready-to-publish renderer for an input width
pub fn build_renderer(
    hrir: &HrirData,
    input_channels: usize,
    block_size: usize,
    sample_rate: u32,
) -> PresetResult<SpatialRenderer> {
    let layout = InputLayout::detect(input_channels).ok_or(PresetError::NoInputChannels)?;
    let state = RendererState::build(hrir, layout, block_size, sample_rate)?;
    SpatialRenderer::new(Arc::new(state))
}
