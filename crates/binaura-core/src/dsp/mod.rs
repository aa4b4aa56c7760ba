//! Signal processing: partitioned convolution and resampling
//!
//! - [`Convolver`]: uniform-partitioned overlap-save (UPOLS) FFT convolution
//!   of one impulse response, block by block, allocation-free once built
//! - [`resample`]: one-shot sinc resampling of impulse responses

mod convolver;
mod error;
mod resample;

pub use convolver::{Convolver, FftPlan, FrequencyDelayLine, PartitionSet};
pub use error::{DspError, DspResult};
pub use resample::resample;
