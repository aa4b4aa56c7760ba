//! DSP error types

use thiserror::Error;

/// Failures while preparing filters (never raised on the real-time path)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DspError {
    /// Block size must be non-zero
    #[error("Invalid block size: {0}")]
    InvalidBlockSize(usize),

    /// Impulse response has no samples
    #[error("Impulse response is empty")]
    EmptyImpulseResponse,

    /// FFT planning or execution failed
    #[error("FFT failed: {0}")]
    Fft(String),

    /// Filter was partitioned for another block size
    #[error("Filter partitioned for {filter} frames, engine runs {engine}")]
    BlockSizeMismatch { filter: usize, engine: usize },

    /// Sample rates must be non-zero
    #[error("Cannot resample {from}Hz -> {to}Hz")]
    InvalidSampleRate { from: u32, to: u32 },

    /// Resampler construction or processing failed
    #[error("Resampling failed: {0}")]
    Resample(String),
}

/// Result type for DSP setup
pub type DspResult<T> = Result<T, DspError>;
