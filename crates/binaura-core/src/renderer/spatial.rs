//! Per-channel convolution and stereo mixdown

use std::sync::Arc;

use super::state::RendererState;
use crate::dsp::Convolver;
use crate::preset::PresetResult;
use crate::types::{PlanarBuffer, Sample};

struct EarEngines {
    left: Convolver,
    right: Convolver,
}

/// The unit the audio thread runs: one convolver pair per input channel
///
/// Built on the control thread from a [`RendererState`] and handed to the
/// pipeline whole. The pipeline owns it exclusively while it is active;
/// a preset change replaces it rather than modifying it.
pub struct SpatialRenderer {
    state: Arc<RendererState>,
    engines: Vec<EarEngines>,
}

impl SpatialRenderer {
    pub fn new(state: Arc<RendererState>) -> PresetResult<Self> {
        let plan = state.plan();
        let engines = state
            .channels()
            .iter()
            .map(|filters| -> PresetResult<EarEngines> {
                Ok(EarEngines {
                    left: Convolver::with_filter(plan, Arc::clone(&filters.left))?,
                    right: Convolver::with_filter(plan, Arc::clone(&filters.right))?,
                })
            })
            .collect::<PresetResult<Vec<_>>>()?;

        Ok(Self { state, engines })
    }

    pub fn state(&self) -> &Arc<RendererState> {
        &self.state
    }

    pub fn block_size(&self) -> usize {
        self.state.block_size()
    }

    /// Input channels this renderer consumes
    pub fn channel_count(&self) -> usize {
        self.engines.len()
    }

    /// Whether a callback of `frames` can be rendered (whole blocks only)
    #[inline]
    pub fn accepts(&self, frames: usize) -> bool {
        frames > 0 && frames % self.block_size() == 0
    }

    /// Render `frames` of `inputs` into the stereo pair
    ///
    /// Channel `c` of `inputs` feeds the engines for input channel `c`;
    /// channels beyond the renderer's map are skipped. `frames` must be a
    /// whole number of blocks, otherwise the outputs are silenced and
    /// `false` is returned.
    pub fn process_audio(
        &mut self,
        inputs: &PlanarBuffer,
        left: &mut [Sample],
        right: &mut [Sample],
        frames: usize,
    ) -> bool {
        let block = self.block_size();
        if !self.accepts(frames)
            || frames > left.len()
            || frames > right.len()
            || frames > inputs.frames()
        {
            left.fill(0.0);
            right.fill(0.0);
            return false;
        }

        let (left, right) = (&mut left[..frames], &mut right[..frames]);
        left.fill(0.0);
        right.fill(0.0);

        for start in (0..frames).step_by(block) {
            let span = start..start + block;
            for (channel, engines) in self.engines.iter_mut().enumerate() {
                let input = inputs.channel(channel);
                if input.len() < span.end {
                    continue;
                }
                let input = &input[span.clone()];
                engines.left.process_and_accumulate(input, &mut left[span.clone()]);
                engines.right.process_and_accumulate(input, &mut right[span.clone()]);
            }
        }
        true
    }

    /// Clear every delay line (filters are kept)
    pub fn reset(&mut self) {
        for engines in &mut self.engines {
            engines.left.reset();
            engines.right.reset();
        }
    }
}
