//! Impulse response sample rate conversion
//!
//! Runs once per preset activation on the control thread, over the whole
//! response in a single chunk. Sinc interpolation keeps the response's
//! high-frequency detail.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::error::{DspError, DspResult};
use crate::types::Sample;

/// Resample every channel from `from` Hz to `to` Hz
///
/// The resampler's group delay is removed so the response onset stays put.
/// Output length is `ceil(len * to / from)`.
pub fn resample(channels: &[Vec<Sample>], from: u32, to: u32) -> DspResult<Vec<Vec<Sample>>> {
    if from == 0 || to == 0 {
        return Err(DspError::InvalidSampleRate { from, to });
    }
    if from == to || channels.is_empty() {
        return Ok(channels.to_vec());
    }

    let frames = channels.iter().map(Vec::len).max().unwrap_or(0);
    if frames == 0 {
        return Err(DspError::EmptyImpulseResponse);
    }

    // Equal-length channels
    let input: Vec<Vec<Sample>> = channels
        .iter()
        .map(|c| {
            let mut c = c.clone();
            c.resize(frames, 0.0);
            c
        })
        .collect();

    let ratio = to as f64 / from as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<Sample>::new(ratio, 1.0, params, frames, input.len())
        .map_err(|e| DspError::Resample(e.to_string()))?;

    let mut output = resampler
        .process(&input, None)
        .map_err(|e| DspError::Resample(e.to_string()))?;

    let delay = resampler.output_delay();
    let target = (frames as f64 * ratio).ceil() as usize;

    // Flush what is still inside the filter
    while output.first().map_or(0, Vec::len) < delay + target {
        let tail = resampler
            .process_partial::<Vec<Sample>>(None, None)
            .map_err(|e| DspError::Resample(e.to_string()))?;
        if tail.first().map_or(true, Vec::is_empty) {
            break;
        }
        for (channel, rest) in output.iter_mut().zip(tail) {
            channel.extend_from_slice(&rest);
        }
    }

    Ok(output
        .into_iter()
        .map(|channel| {
            let mut aligned: Vec<Sample> = channel.into_iter().skip(delay).take(target).collect();
            aligned.resize(target, 0.0);
            aligned
        })
        .collect())
}
