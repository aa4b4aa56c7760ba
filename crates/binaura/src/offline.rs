//! Offline file rendering (`--render`)

use std::path::Path;

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use binaura_core::config::EngineConfig;
use binaura_core::preset::load_impulse_response;
use binaura_core::renderer::{build_renderer, render_offline};

/// Spatialize `input` with the HRIR in `preset`, writing a stereo float WAV
///
/// Rendering runs at the input's sample rate; the HRIR is resampled to it.
pub fn render_file(config: &EngineConfig, preset: &Path, input: &Path, output: &Path) -> Result<()> {
    let hrir = load_impulse_response(preset)?;
    let (channels, sample_rate) = read_wav(input)?;
    let frames = channels.first().map(Vec::len).unwrap_or(0);

    log::info!(
        "Rendering {} ({} channels, {} frames @ {} Hz) with {} ({} HRIR channels)",
        input.display(),
        channels.len(),
        frames,
        sample_rate,
        preset.display(),
        hrir.channel_count()
    );

    let mut renderer = build_renderer(&hrir, channels.len(), config.block_frames(), sample_rate)?;
    let stereo = render_offline(&mut renderer, &channels);

    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(output, spec)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    for (left, right) in stereo.left.iter().zip(&stereo.right) {
        writer.write_sample(*left)?;
        writer.write_sample(*right)?;
    }
    writer.finalize()?;

    log::info!("Wrote {} frames to {}", stereo.left.len(), output.display());
    Ok(())
}

/// Decode a WAV into planar f32 channels
fn read_wav(path: &Path) -> Result<(Vec<Vec<f32>>, u32)> {
    let mut reader =
        WavReader::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let spec = reader.spec();
    let channel_count = spec.channels as usize;
    if channel_count == 0 {
        bail!("{} has no channels", path.display());
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };

    let mut channels = vec![Vec::with_capacity(interleaved.len() / channel_count); channel_count];
    for frame in interleaved.chunks_exact(channel_count) {
        for (channel, sample) in channels.iter_mut().zip(frame) {
            channel.push(*sample);
        }
    }
    Ok((channels, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, channels: u16, rate: u32, samples: &[f32]) {
        let spec = WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for s in samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_render_file_writes_stereo_with_tail() {
        let dir = tempfile::TempDir::new().unwrap();
        let dir = dir.path();
        let preset = dir.join("pair.wav");
        let input = dir.join("in.wav");
        let output = dir.join("out.wav");

        // Two-channel preset, 3 taps; mono input of 10 frames
        write(&preset, 2, 48000, &[1.0, 0.0, 0.5, 0.0, 0.25, 0.0]);
        write(&input, 1, 48000, &[1.0; 10]);

        let config = EngineConfig::default().with_block_size(4);
        render_file(&config, &preset, &input, &output).unwrap();

        let (channels, rate) = read_wav(&output).unwrap();
        assert_eq!(rate, 48000);
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].len(), 12);
        assert!((channels[0][2] - 1.75).abs() < 1e-5);
        assert_eq!(channels[0], channels[1]);
    }
}
