//! WAV impulse response loading

use std::path::Path;

use hound::{SampleFormat, WavReader};

use super::error::{PresetError, PresetResult};
use crate::types::Sample;

/// Decoded multi-channel impulse response
#[derive(Debug, Clone, PartialEq)]
pub struct HrirData {
    /// One vector per HRIR channel, all the same length
    pub channels: Vec<Vec<Sample>>,
    /// Native sample rate
    pub sample_rate: u32,
}

impl HrirData {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }
}

fn unreadable(path: &Path, err: impl std::fmt::Display) -> PresetError {
    PresetError::Unreadable {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// Load and deinterleave an impulse response file
///
/// Accepts 32-bit float and 8/16/24/32-bit integer PCM. Integer samples
/// are scaled to [-1, 1).
pub fn load_impulse_response(path: &Path) -> PresetResult<HrirData> {
    let mut reader = WavReader::open(path).map_err(|e| unreadable(path, e))?;
    let spec = reader.spec();
    let channel_count = spec.channels as usize;
    if channel_count == 0 {
        return Err(PresetError::Empty(path.to_path_buf()));
    }

    let interleaved: Vec<Sample> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| unreadable(path, e))?,
        (SampleFormat::Int, bits @ 1..=32) => {
            let scale = 1.0 / (1u64 << (bits - 1)) as Sample;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as Sample * scale))
                .collect::<Result<_, _>>()
                .map_err(|e| unreadable(path, e))?
        }
        (format, bits) => {
            return Err(PresetError::UnsupportedFormat {
                path: path.to_path_buf(),
                format: format!("{:?} {}-bit", format, bits),
            })
        }
    };

    let frames = interleaved.len() / channel_count;
    if frames == 0 {
        return Err(PresetError::Empty(path.to_path_buf()));
    }

    let mut channels = vec![Vec::with_capacity(frames); channel_count];
    for frame in interleaved.chunks_exact(channel_count) {
        for (channel, &sample) in channels.iter_mut().zip(frame) {
            channel.push(sample);
        }
    }

    log::debug!(
        "Loaded {}: {} channels, {} frames @ {}Hz",
        path.display(),
        channel_count,
        frames,
        spec.sample_rate
    );

    Ok(HrirData {
        channels,
        sample_rate: spec.sample_rate,
    })
}
