//! Immutable per-preset filter state

use std::sync::Arc;

use super::channel_map::{ChannelMap, InputLayout, Speaker};
use crate::dsp::{resample, FftPlan, PartitionSet};
use crate::preset::{HrirData, PresetError, PresetResult};

/// Left/right-ear partitions for one input channel
#[derive(Debug, Clone)]
pub struct ChannelFilters {
    pub speaker: Speaker,
    pub left: Arc<PartitionSet>,
    pub right: Arc<PartitionSet>,
}

/// Everything a preset activation computes off the real-time path
///
/// One filter pair per input channel plus the map that produced them. Never
/// mutated: a preset change builds a new state.
#[derive(Debug)]
pub struct RendererState {
    map: ChannelMap,
    plan: FftPlan,
    sample_rate: u32,
    channels: Vec<ChannelFilters>,
}

impl RendererState {
    /// Map, resample and partition an HRIR for an input layout
    ///
    /// All-or-nothing: any failure leaves no partial state behind.
    pub fn build(
        hrir: &HrirData,
        layout: InputLayout,
        block_size: usize,
        sample_rate: u32,
    ) -> PresetResult<Self> {
        if hrir.channel_count() == 0 || hrir.frames() == 0 {
            return Err(PresetError::NoInputChannels);
        }

        let map = ChannelMap::build(layout, hrir.channel_count())?;
        let plan = FftPlan::new(block_size)?;

        let resampled;
        let responses = if hrir.sample_rate != sample_rate {
            log::info!(
                "Resampling HRIR {}Hz -> {}Hz",
                hrir.sample_rate,
                sample_rate
            );
            resampled = resample(&hrir.channels, hrir.sample_rate, sample_rate)?;
            &resampled
        } else {
            &hrir.channels
        };

        // Ears shared between speakers share one partition set
        let mut partitions: Vec<Option<Arc<PartitionSet>>> = vec![None; responses.len()];
        let mut partition = |index: usize| -> PresetResult<Arc<PartitionSet>> {
            if let Some(existing) = &partitions[index] {
                return Ok(Arc::clone(existing));
            }
            let built = Arc::new(PartitionSet::build(&responses[index], &plan)?);
            partitions[index] = Some(Arc::clone(&built));
            Ok(built)
        };

        let mut channels = Vec::with_capacity(map.len());
        for &(speaker, ears) in map.entries() {
            channels.push(ChannelFilters {
                speaker,
                left: partition(ears.left)?,
                right: partition(ears.right)?,
            });
        }

        log::debug!(
            "Renderer state: {} layout, {:?}, {} partitions per ear",
            layout,
            map.convention(),
            channels.first().map(|c| c.left.partition_count()).unwrap_or(0)
        );

        Ok(Self {
            map,
            plan,
            sample_rate,
            channels,
        })
    }

    pub fn map(&self) -> &ChannelMap {
        &self.map
    }

    pub fn plan(&self) -> &FftPlan {
        &self.plan
    }

    pub fn block_size(&self) -> usize {
        self.plan.block_size()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> &[ChannelFilters] {
        &self.channels
    }

    /// Longest ear response after resampling, in samples
    pub fn impulse_len(&self) -> usize {
        self.channels
            .iter()
            .flat_map(|c| [c.left.impulse_len(), c.right.impulse_len()])
            .max()
            .unwrap_or(0)
    }
}
