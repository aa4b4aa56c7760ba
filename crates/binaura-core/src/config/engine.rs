//! Engine configuration
//!
//! Fixes the convolution block size and stream format, and the maximum
//! shapes every real-time buffer is pre-sized for.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default processing block size (frames per callback and per partition)
///
/// 512 frames @ 48kHz = ~10.7ms deadline per callback
pub const DEFAULT_BLOCK_SIZE: u32 = 512;

/// Default stream sample rate
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Channels pre-allocated per direction for pipeline working buffers
pub const DEFAULT_MAX_CHANNELS: u16 = 16;

/// Largest frame count the pipeline accepts in one callback
pub const DEFAULT_MAX_BLOCK_SIZE: u32 = 4096;

/// Default trailing-edge debounce for topology notifications
pub const DEFAULT_DEBOUNCE_MS: u64 = 250;

const MIN_DEBOUNCE_MS: u64 = 100;
const MAX_DEBOUNCE_MS: u64 = 500;

/// Configuration for the audio engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Convolution block size B (FFT size is 2B)
    pub block_size: u32,

    /// Stream sample rate requested from the HAL
    pub sample_rate: u32,

    /// Maximum channels per direction the pipeline can address
    pub max_channels: u16,

    /// Maximum frames per callback; larger blocks render silence
    pub max_block_size: u32,

    /// Debounce window for topology notifications (clamped to 100..=500ms)
    pub debounce_ms: u64,

    /// Polling interval for HALs without native change notifications
    pub poll_interval_ms: u64,

    /// Case-insensitive name fragments identifying virtual loopback devices
    pub loopback_patterns: Vec<String>,

    /// HRIR preset directory (None = default location)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            max_channels: DEFAULT_MAX_CHANNELS,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            poll_interval_ms: 1000,
            loopback_patterns: vec![
                "blackhole".to_string(),
                "loopback".to_string(),
                "soundflower".to_string(),
                "monitor of".to_string(),
            ],
            preset_dir: None,
        }
    }
}

impl EngineConfig {
    /// Set the convolution block size
    pub fn with_block_size(mut self, frames: u32) -> Self {
        self.block_size = frames;
        self
    }

    /// Set the stream sample rate
    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Set the preset directory
    pub fn with_preset_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.preset_dir = Some(dir.into());
        self
    }

    /// Block size as `usize`, never zero
    pub fn block_frames(&self) -> usize {
        self.block_size.max(1) as usize
    }

    /// Maximum frames per callback, never smaller than one block
    pub fn max_block_frames(&self) -> usize {
        (self.max_block_size as usize).max(self.block_frames())
    }

    /// Debounce window, clamped to the supported range
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS))
    }

    /// Poll interval for notification-less HALs
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(50))
    }

    /// Callback deadline in milliseconds (block duration)
    pub fn deadline_ms(&self) -> f32 {
        (self.block_size as f32 / self.sample_rate.max(1) as f32) * 1000.0
    }

    /// Preset directory, falling back to the standard location
    pub fn preset_dir(&self) -> PathBuf {
        self.preset_dir
            .clone()
            .unwrap_or_else(super::paths::default_preset_dir)
    }
}
