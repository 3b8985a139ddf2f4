//! Real-input transforms using the packed half-complex layout.
//!
//! A spectrum of a length-`N` real block is stored in `N` reals:
//!
//! ```text
//! [0]      = Re(X[0])       DC
//! [1]      = Re(X[N/2])     Nyquist
//! [2k]     = Re(X[k])       0 < k < N/2
//! [2k + 1] = Im(X[k])       0 < k < N/2
//! ```

use std::fmt;
use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::error::AecResult;

pub struct SpectralTransform {
    len: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    time: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    packed_bins: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl fmt::Debug for SpectralTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralTransform")
            .field("len", &self.len)
            .finish()
    }
}

impl SpectralTransform {
    /// Plans forward and inverse transforms of length `len`, a power of two.
    pub fn new(len: usize) -> Self {
        assert!(
            len >= 4 && len.is_power_of_two(),
            "transform length must be a power of two"
        );
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(len);
        let inverse = planner.plan_fft_inverse(len);
        let scratch_len = forward.get_scratch_len().max(inverse.get_scratch_len());

        Self {
            len,
            time: forward.make_input_vec(),
            spectrum: forward.make_output_vec(),
            packed_bins: vec![0.0; len],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            forward,
            inverse,
        }
    }

    pub fn size(&self) -> usize {
        self.len
    }

    /// Number of non-negative frequency bins, `len / 2 + 1`.
    pub fn bin_count(&self) -> usize {
        self.len / 2 + 1
    }

    /// Forward transform of `block` into the packed half-complex `packed`.
    pub fn forward(&mut self, block: &[f32], packed: &mut [f32]) -> AecResult<()> {
        assert_eq!(block.len(), self.len, "time block length must match transform");
        assert_eq!(packed.len(), self.len, "packed spectrum length must match transform");

        self.time.copy_from_slice(block);
        self.forward
            .process_with_scratch(&mut self.time, &mut self.spectrum, &mut self.scratch)?;

        let half = self.len / 2;
        packed[0] = self.spectrum[0].re;
        packed[1] = self.spectrum[half].re;
        for k in 1..half {
            packed[2 * k] = self.spectrum[k].re;
            packed[2 * k + 1] = self.spectrum[k].im;
        }
        Ok(())
    }

    /// Inverse transform of a packed half-complex spectrum, scaled by `1 / len`
    /// so that it undoes [`forward`](Self::forward).
    pub fn inverse(&mut self, packed: &[f32], block: &mut [f32]) -> AecResult<()> {
        assert_eq!(packed.len(), self.len, "packed spectrum length must match transform");
        assert_eq!(block.len(), self.len, "time block length must match transform");

        let half = self.len / 2;
        self.spectrum[0] = Complex::new(packed[0], 0.0);
        self.spectrum[half] = Complex::new(packed[1], 0.0);
        for k in 1..half {
            self.spectrum[k] = Complex::new(packed[2 * k], packed[2 * k + 1]);
        }
        self.inverse
            .process_with_scratch(&mut self.spectrum, block, &mut self.scratch)?;

        let scale = 1.0 / self.len as f32;
        for sample in block.iter_mut() {
            *sample *= scale;
        }
        Ok(())
    }

    /// Treats `bins` (one real value per non-negative bin, DC first, Nyquist
    /// last) as a zero-phase spectrum and inverse transforms it.
    ///
    /// The block is written oldest-first, the ordering the far-end history
    /// uses, which puts the zero-lag coefficient at index `len - 1`.
    pub fn inverse_scalar_projection(&mut self, bins: &[f32], block: &mut [f32]) -> AecResult<()> {
        assert_eq!(bins.len(), self.bin_count(), "one value per non-negative bin");

        let half = self.len / 2;
        let mut packed = std::mem::take(&mut self.packed_bins);
        packed[0] = bins[0];
        packed[1] = bins[half];
        for k in 1..half {
            packed[2 * k] = bins[k];
            packed[2 * k + 1] = 0.0;
        }
        let result = self.inverse(&packed, block);
        self.packed_bins = packed;
        result?;

        block.reverse();
        Ok(())
    }

    /// Collapses `bins` into the single scalar at index `len - 1` of
    /// [`inverse_scalar_projection`](Self::inverse_scalar_projection).
    pub fn project_scalar(&mut self, bins: &[f32]) -> AecResult<f32> {
        let mut block = std::mem::take(&mut self.time);
        let result = self.inverse_scalar_projection(bins, &mut block);
        let scalar = block[self.len - 1];
        self.time = block;
        result.map(|()| scalar)
    }
}
