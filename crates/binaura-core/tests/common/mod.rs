//! Shared fixtures for the engine integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use binaura_core::config::{EngineConfig, PersistedSelection};
use binaura_core::engine::{EngineContext, EngineEvent};
use binaura_core::hal::{HalDevice, VirtualHal};
use binaura_core::PlanarBuffer;
use crossbeam::channel::Receiver;
use hound::{SampleFormat, WavSpec, WavWriter};
use tempfile::TempDir;

pub const BLOCK: usize = 64;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Mic (in 0..2), speakers (out 0..2), phones (out 2..4) under one aggregate
///
/// Without speakers, phones is the only output and sits at 0..2.
pub fn virtual_hal(with_speakers: bool) -> Arc<VirtualHal> {
    let hal = Arc::new(VirtualHal::new());
    hal.add_device(HalDevice::new(1, "mic", "Desk Mic").with_inputs(2));
    let mut members = vec!["mic"];
    if with_speakers {
        hal.add_device(HalDevice::new(2, "speakers", "Monitors").with_outputs(2));
        members.push("speakers");
    }
    hal.add_device(HalDevice::new(5, "phones", "Headphones").with_outputs(2));
    members.push("phones");
    hal.add_device(HalDevice::new(100, "agg", "Studio Aggregate").with_members(members));
    hal
}

pub fn config(preset_dir: &Path) -> EngineConfig {
    EngineConfig::default()
        .with_block_size(BLOCK as u32)
        .with_preset_dir(preset_dir)
}

pub fn selection() -> PersistedSelection {
    PersistedSelection {
        aggregate_uid: Some("agg".to_string()),
        output_uid: Some("phones".to_string()),
        input_uid: Some("mic".to_string()),
        active_preset_id: None,
        convolution_enabled: true,
        auto_start: false,
    }
}

/// Context restored onto agg/phones/mic, not yet started
pub fn context(hal: &Arc<VirtualHal>, presets: &TempDir) -> EngineContext {
    init_logging();
    let mut context = EngineContext::new(hal.clone(), config(presets.path()));
    context.restore(&selection()).unwrap();
    context
}

pub fn drain(events: &Receiver<EngineEvent>) -> Vec<EngineEvent> {
    events.try_iter().collect()
}

/// Push one block through the running stream
///
/// `left` and `right` land on the first two input channels. Buffers take the
/// stream's own widths, which only change when the pipeline remaps it.
pub fn render(hal: &VirtualHal, left: &[f32], right: &[f32]) -> PlanarBuffer {
    let request = hal.active_request().expect("no stream opened");
    let mut input = PlanarBuffer::new(request.input_channels as usize, left.len());
    input.channel_mut(0).copy_from_slice(left);
    input.channel_mut(1).copy_from_slice(right);
    let mut output = PlanarBuffer::new(request.output_channels as usize, left.len());
    assert!(hal.render(&input, &mut output), "no running stream");
    output
}

pub fn write_wav(dir: &Path, name: &str, channels: &[Vec<f32>], sample_rate: u32) -> PathBuf {
    let path = dir.join(name);
    let spec = WavSpec {
        channels: channels.len() as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(&path, spec).unwrap();
    for i in 0..channels[0].len() {
        for channel in channels {
            writer.write_sample(channel[i]).unwrap();
        }
    }
    writer.finalize().unwrap();
    path
}
