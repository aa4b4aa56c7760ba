//! Uniform-partitioned overlap-save convolution
//!
//! For block size B the FFT size is N = 2B. The impulse response is cut into
//! P = ceil(L / B) partitions, each zero-padded to N and transformed once.
//! Every block:
//!
//! ```text
//! window = [previous block | current block]      (N samples)
//! FDL[head] = FFT(window)                          (head moves back one slot)
//! Y = Σ_p FDL[(head + p) mod P] · H[p]             (complex MAC)
//! out = IFFT(Y)[B..N] / N                          (alias-free half)
//! ```
//!
//! # Spectrum layout
//!
//! Spectra are stored packed, structure-of-arrays, B floats per slot:
//!
//! | index | `re[k]`          | `im[k]`            |
//! |-------|------------------|--------------------|
//! | 0     | DC (real)        | Nyquist (real)     |
//! | 1..B  | bin k real part  | bin k imag part    |
//!
//! Partitions and delay-line slots each live in one contiguous arena,
//! addressed as `slot * B`.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use super::error::{DspError, DspResult};
use crate::types::Sample;

/// Forward/inverse real FFT plans for one block size
///
/// Cheap to clone; every convolver of a renderer shares one plan.
#[derive(Clone)]
pub struct FftPlan {
    block: usize,
    forward: Arc<dyn RealToComplex<Sample>>,
    inverse: Arc<dyn ComplexToReal<Sample>>,
}

impl FftPlan {
    pub fn new(block: usize) -> DspResult<Self> {
        if block == 0 {
            return Err(DspError::InvalidBlockSize(block));
        }
        let mut planner = RealFftPlanner::<Sample>::new();
        Ok(Self {
            block,
            forward: planner.plan_fft_forward(block * 2),
            inverse: planner.plan_fft_inverse(block * 2),
        })
    }

    /// Block size B
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block
    }

    /// FFT size N = 2B
    #[inline]
    pub fn fft_size(&self) -> usize {
        self.block * 2
    }
}

impl std::fmt::Debug for FftPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftPlan").field("block", &self.block).finish()
    }
}

/// Pack a realfft half-spectrum (B + 1 bins) into `re`/`im` (B each)
fn pack(spectrum: &[Complex<Sample>], re: &mut [Sample], im: &mut [Sample]) {
    let block = re.len();
    re[0] = spectrum[0].re;
    im[0] = spectrum[block].re;
    for k in 1..block {
        re[k] = spectrum[k].re;
        im[k] = spectrum[k].im;
    }
}

/// Inverse of [`pack`]
fn unpack(re: &[Sample], im: &[Sample], spectrum: &mut [Complex<Sample>]) {
    let block = re.len();
    spectrum[0] = Complex::new(re[0], 0.0);
    spectrum[block] = Complex::new(im[0], 0.0);
    for k in 1..block {
        spectrum[k] = Complex::new(re[k], im[k]);
    }
}

/// Frequency-domain partitions of one impulse response
///
/// Built once when a preset is activated, read-only afterwards.
#[derive(Debug, Clone)]
pub struct PartitionSet {
    block: usize,
    partitions: usize,
    /// Impulse response length before partitioning
    length: usize,
    re: Vec<Sample>,
    im: Vec<Sample>,
}

impl PartitionSet {
    /// Partition and transform an impulse response
    pub fn build(impulse: &[Sample], plan: &FftPlan) -> DspResult<Self> {
        if impulse.is_empty() {
            return Err(DspError::EmptyImpulseResponse);
        }

        let block = plan.block_size();
        let partitions = impulse.len().div_ceil(block);
        let mut re = vec![0.0; partitions * block];
        let mut im = vec![0.0; partitions * block];

        let mut time = vec![0.0; plan.fft_size()];
        let mut spectrum = plan.forward.make_output_vec();
        let mut scratch = plan.forward.make_scratch_vec();

        for (p, chunk) in impulse.chunks(block).enumerate() {
            // [h_p | zeros]: zero-padded to the FFT size
            time.fill(0.0);
            time[..chunk.len()].copy_from_slice(chunk);

            plan.forward
                .process_with_scratch(&mut time, &mut spectrum, &mut scratch)
                .map_err(|e| DspError::Fft(format!("{:?}", e)))?;

            let slot = p * block..(p + 1) * block;
            pack(&spectrum, &mut re[slot.clone()], &mut im[slot]);
        }

        Ok(Self {
            block,
            partitions,
            length: impulse.len(),
            re,
            im,
        })
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block
    }

    /// Number of partitions P
    #[inline]
    pub fn partition_count(&self) -> usize {
        self.partitions
    }

    /// Original impulse response length in samples
    #[inline]
    pub fn impulse_len(&self) -> usize {
        self.length
    }

    #[inline]
    fn partition(&self, p: usize) -> (&[Sample], &[Sample]) {
        let slot = p * self.block..(p + 1) * self.block;
        (&self.re[slot.clone()], &self.im[slot])
    }
}

/// Ring of the last P input spectra
#[derive(Debug, Clone)]
pub struct FrequencyDelayLine {
    stride: usize,
    slots: usize,
    head: usize,
    re: Vec<Sample>,
    im: Vec<Sample>,
}

impl FrequencyDelayLine {
    pub fn new(slots: usize, stride: usize) -> Self {
        let slots = slots.max(1);
        Self {
            stride,
            slots,
            head: 0,
            re: vec![0.0; slots * stride],
            im: vec![0.0; slots * stride],
        }
    }

    /// Number of slots P
    #[inline]
    pub fn len(&self) -> usize {
        self.slots
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots == 0
    }

    /// Advance the head one slot (overwriting the oldest) and store a spectrum
    pub fn push(&mut self, spectrum: &[Complex<Sample>]) {
        self.head = (self.head + self.slots - 1) % self.slots;
        let slot = self.head * self.stride..(self.head + 1) * self.stride;
        pack(spectrum, &mut self.re[slot.clone()], &mut self.im[slot]);
    }

    /// Spectrum `age` blocks old (0 = newest)
    #[inline]
    pub fn slot(&self, age: usize) -> (&[Sample], &[Sample]) {
        let index = (self.head + age) % self.slots;
        let slot = index * self.stride..(index + 1) * self.stride;
        (&self.re[slot.clone()], &self.im[slot])
    }

    pub fn clear(&mut self) {
        self.re.fill(0.0);
        self.im.fill(0.0);
        self.head = 0;
    }
}

/// `acc += x · h` over packed spectra
#[inline]
fn multiply_accumulate(
    acc_re: &mut [Sample],
    acc_im: &mut [Sample],
    x_re: &[Sample],
    x_im: &[Sample],
    h_re: &[Sample],
    h_im: &[Sample],
) {
    let n = acc_re.len();
    let acc_im = &mut acc_im[..n];
    let (x_re, x_im) = (&x_re[..n], &x_im[..n]);
    let (h_re, h_im) = (&h_re[..n], &h_im[..n]);

    // DC and Nyquist are purely real
    acc_re[0] += x_re[0] * h_re[0];
    acc_im[0] += x_im[0] * h_im[0];

    for k in 1..n {
        acc_re[k] += x_re[k] * h_re[k] - x_im[k] * h_im[k];
        acc_im[k] += x_re[k] * h_im[k] + x_im[k] * h_re[k];
    }
}

/// Block convolver for one impulse response
///
/// All working memory is allocated in the constructor; [`process`] and
/// [`process_and_accumulate`] never allocate.
///
/// [`process`]: Convolver::process
/// [`process_and_accumulate`]: Convolver::process_and_accumulate
pub struct Convolver {
    plan: FftPlan,
    filter: Arc<PartitionSet>,
    fdl: FrequencyDelayLine,
    /// Previous input block (first half of the next window)
    overlap: Vec<Sample>,
    time: Vec<Sample>,
    spectrum: Vec<Complex<Sample>>,
    acc_re: Vec<Sample>,
    acc_im: Vec<Sample>,
    forward_scratch: Vec<Complex<Sample>>,
    inverse_scratch: Vec<Complex<Sample>>,
    /// Result of the last block
    output: Vec<Sample>,
}

impl Convolver {
    /// Build a convolver with its own plan
    pub fn new(impulse: &[Sample], block: usize) -> DspResult<Self> {
        let plan = FftPlan::new(block)?;
        let filter = Arc::new(PartitionSet::build(impulse, &plan)?);
        Self::with_filter(&plan, filter)
    }

    /// Build a convolver over an already-partitioned filter
    pub fn with_filter(plan: &FftPlan, filter: Arc<PartitionSet>) -> DspResult<Self> {
        let block = plan.block_size();
        if filter.block_size() != block {
            return Err(DspError::BlockSizeMismatch {
                filter: filter.block_size(),
                engine: block,
            });
        }

        Ok(Self {
            fdl: FrequencyDelayLine::new(filter.partition_count(), block),
            overlap: vec![0.0; block],
            time: vec![0.0; plan.fft_size()],
            spectrum: plan.forward.make_output_vec(),
            acc_re: vec![0.0; block],
            acc_im: vec![0.0; block],
            forward_scratch: plan.forward.make_scratch_vec(),
            inverse_scratch: plan.inverse.make_scratch_vec(),
            output: vec![0.0; block],
            plan: plan.clone(),
            filter,
        })
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.plan.block_size()
    }

    pub fn filter(&self) -> &Arc<PartitionSet> {
        &self.filter
    }

    /// Convolve one block of exactly B samples into `output`
    ///
    /// Wrong-sized buffers produce silence.
    pub fn process(&mut self, input: &[Sample], output: &mut [Sample]) {
        let block = self.block_size();
        if output.len() != block {
            output.fill(0.0);
            return;
        }
        self.render(input);
        output.copy_from_slice(&self.output);
    }

    /// Convolve one block and add the result into `accumulator`
    pub fn process_and_accumulate(&mut self, input: &[Sample], accumulator: &mut [Sample]) {
        if accumulator.len() != self.block_size() {
            return;
        }
        self.render(input);
        for (acc, y) in accumulator.iter_mut().zip(&self.output) {
            *acc += y;
        }
    }

    /// Clear the delay line and overlap; partitions are kept
    pub fn reset(&mut self) {
        self.fdl.clear();
        self.overlap.fill(0.0);
        self.output.fill(0.0);
    }

    fn render(&mut self, input: &[Sample]) {
        let block = self.block_size();
        if input.len() != block {
            self.output.fill(0.0);
            return;
        }

        self.time[..block].copy_from_slice(&self.overlap);
        self.time[block..].copy_from_slice(input);
        self.overlap.copy_from_slice(input);

        if self
            .plan
            .forward
            .process_with_scratch(&mut self.time, &mut self.spectrum, &mut self.forward_scratch)
            .is_err()
        {
            self.output.fill(0.0);
            return;
        }
        self.fdl.push(&self.spectrum);

        self.acc_re.fill(0.0);
        self.acc_im.fill(0.0);
        for p in 0..self.filter.partition_count() {
            let (x_re, x_im) = self.fdl.slot(p);
            let (h_re, h_im) = self.filter.partition(p);
            multiply_accumulate(&mut self.acc_re, &mut self.acc_im, x_re, x_im, h_re, h_im);
        }

        unpack(&self.acc_re, &self.acc_im, &mut self.spectrum);
        if self
            .plan
            .inverse
            .process_with_scratch(&mut self.spectrum, &mut self.time, &mut self.inverse_scratch)
            .is_err()
        {
            self.output.fill(0.0);
            return;
        }

        let scale = 1.0 / self.plan.fft_size() as Sample;
        for (out, t) in self.output.iter_mut().zip(&self.time[block..]) {
            *out = t * scale;
        }
    }
}
