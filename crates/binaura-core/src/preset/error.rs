//! Preset error types

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::dsp::DspError;

/// Preset loading and activation failures
///
/// Any of these aborts an activation as a whole; the renderer that was
/// active before keeps running.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PresetError {
    /// The file could not be opened or decoded
    #[error("Failed to read impulse response {path}: {message}")]
    Unreadable { path: PathBuf, message: String },

    /// The file decoded to zero channels or zero frames
    #[error("Impulse response {0} is empty")]
    Empty(PathBuf),

    /// Sample encoding hound can read but we don't convert
    #[error("Unsupported WAV encoding in {path}: {format}")]
    UnsupportedFormat { path: PathBuf, format: String },

    /// No channel-map convention for this many HRIR channels
    #[error("Unsupported HRIR layout: {0} channels (expected 2, 4, 7 or 14)")]
    UnsupportedLayout(usize),

    /// A mapped HRIR index does not exist in the file
    #[error("Channel map references HRIR channel {index}, preset has {channels}")]
    InvalidChannelMap { index: usize, channels: usize },

    /// The input layout has no channels to render
    #[error("Input layout has no channels")]
    NoInputChannels,

    /// No preset with this id in the catalog
    #[error("Unknown preset {0}")]
    UnknownPreset(Uuid),

    /// Filter preparation failed (FFT setup, resampling)
    #[error(transparent)]
    Dsp(#[from] DspError),
}

/// Result type for preset operations
pub type PresetResult<T> = Result<T, PresetError>;
