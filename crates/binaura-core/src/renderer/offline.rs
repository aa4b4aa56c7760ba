//! Whole-signal rendering outside the audio thread
//!
//! Drives a [`SpatialRenderer`] block by block over a finite signal, exactly
//! as the pipeline would, and keeps the convolution tail.

use super::spatial::SpatialRenderer;
use crate::types::{PlanarBuffer, Sample};

/// Binaural output of an offline render
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StereoSignal {
    pub left: Vec<Sample>,
    pub right: Vec<Sample>,
}

/// Render planar `input` channels to stereo, including the filter tail
///
/// The output is `input length + impulse length - 1` frames long. The
/// renderer is reset first so results do not depend on earlier use.
pub fn render_offline(renderer: &mut SpatialRenderer, input: &[Vec<Sample>]) -> StereoSignal {
    let frames = input.iter().map(Vec::len).max().unwrap_or(0);
    if frames == 0 {
        return StereoSignal::default();
    }

    let block = renderer.block_size();
    let total = frames + renderer.state().impulse_len().saturating_sub(1);
    let blocks = total.div_ceil(block);

    renderer.reset();

    let mut buffer = PlanarBuffer::new(input.len(), block);
    let mut left = vec![0.0; blocks * block];
    let mut right = vec![0.0; blocks * block];

    for b in 0..blocks {
        let start = b * block;
        for (c, source) in input.iter().enumerate() {
            let target = buffer.channel_mut(c);
            target.fill(0.0);
            if start < source.len() {
                let end = (start + block).min(source.len());
                target[..end - start].copy_from_slice(&source[start..end]);
            }
        }

        let span = start..start + block;
        renderer.process_audio(&buffer, &mut left[span.clone()], &mut right[span], block);
    }

    left.truncate(total);
    right.truncate(total);
    StereoSignal { left, right }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::HrirData;
    use crate::renderer::{InputLayout, RendererState};
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    #[test]
    fn test_offline_keeps_tail() {
        // Symmetric pair, 3-tap responses
        let hrir = HrirData {
            channels: vec![vec![1.0, 0.5, 0.25], vec![0.0, 0.0, 1.0]],
            sample_rate: 48000,
        };
        let state = RendererState::build(&hrir, InputLayout::Mono, 4, 48000).unwrap();
        let mut renderer = SpatialRenderer::new(Arc::new(state)).unwrap();

        // Mono centre uses channel 0 for both ears
        let out = render_offline(&mut renderer, &[vec![1.0, 0.0, 0.0, 0.0, 0.0, 2.0]]);
        assert_eq!(out.left.len(), 8);
        let expected = [1.0, 0.5, 0.25, 0.0, 0.0, 2.0, 1.0, 0.5];
        for (a, b) in out.left.iter().zip(&expected) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
        }
        assert_eq!(out.left, out.right);
    }

    #[test]
    fn test_empty_input() {
        let hrir = HrirData {
            channels: vec![vec![1.0], vec![1.0]],
            sample_rate: 48000,
        };
        let state = RendererState::build(&hrir, InputLayout::Stereo, 4, 48000).unwrap();
        let mut renderer = SpatialRenderer::new(Arc::new(state)).unwrap();
        assert_eq!(render_offline(&mut renderer, &[]), StereoSignal::default());
    }
}
