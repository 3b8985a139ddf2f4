//! Hamming window and FFT band-pass applied before the control loop.

use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

pub struct SignalConditioner {
    frame_size: usize,
    hamming: Vec<f32>,
    lower_index: usize,
    higher_index: usize,
    fft_forward: Arc<dyn Fft<f32>>,
    fft_inverse: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl fmt::Debug for SignalConditioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalConditioner")
            .field("frame_size", &self.frame_size)
            .field("lower_index", &self.lower_index)
            .field("higher_index", &self.higher_index)
            .finish()
    }
}

impl SignalConditioner {
    /// Builds the window and the pass band for frames of `frame_size` samples.
    ///
    /// Band edges are converted to bin indices by truncation; the upper index
    /// is clamped to the frame.
    pub fn new(frame_size: usize, sample_rate: f32, low_hz: f32, high_hz: f32) -> Self {
        assert!(frame_size >= 2, "frame_size must hold at least two samples");

        let denom = (frame_size - 1) as f64;
        let hamming = (0..frame_size)
            .map(|i| (0.54 - 0.46 * (2.0 * PI * i as f64 / denom).cos()) as f32)
            .collect();

        let lower_index = (frame_size as f32 * low_hz / sample_rate) as usize;
        let higher_index = ((frame_size as f32 * high_hz / sample_rate) as usize).min(frame_size);

        let mut planner = FftPlanner::<f32>::new();
        let fft_forward = planner.plan_fft_forward(frame_size);
        let fft_inverse = planner.plan_fft_inverse(frame_size);
        let scratch_len = fft_forward
            .get_inplace_scratch_len()
            .max(fft_inverse.get_inplace_scratch_len());

        Self {
            frame_size,
            hamming,
            lower_index,
            higher_index,
            fft_forward,
            fft_inverse,
            buffer: vec![Complex32::new(0.0, 0.0); frame_size],
            scratch: vec![Complex32::new(0.0, 0.0); scratch_len],
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Indices of the last rejected low bin and the first rejected high bin.
    pub fn band_indices(&self) -> (usize, usize) {
        (self.lower_index, self.higher_index)
    }

    pub fn hamming_window(&self, block: &[f32], windowed: &mut [f32]) {
        assert_eq!(block.len(), self.frame_size, "block must span one frame");
        assert_eq!(windowed.len(), self.frame_size, "output must span one frame");

        for ((out, &sample), &weight) in windowed.iter_mut().zip(block).zip(&self.hamming) {
            *out = sample * weight;
        }
    }

    /// Zero-pads `block` to a frame, removes every bin at or below the lower
    /// index and at or above the higher index of the full complex spectrum, and
    /// writes the real part of the inverse into `filtered`.
    ///
    /// Bins are cleared over the whole `0..frame_size` range, so the mirrored
    /// negative frequencies go as well and in-band content comes back at half
    /// amplitude.
    pub fn band_pass(&mut self, block: &[f32], filtered: &mut [f32]) {
        assert!(block.len() <= self.frame_size, "block longer than a frame");
        assert_eq!(filtered.len(), self.frame_size, "output must span one frame");

        for (slot, &sample) in self.buffer.iter_mut().zip(block) {
            *slot = Complex32::new(sample, 0.0);
        }
        for slot in self.buffer.iter_mut().skip(block.len()) {
            *slot = Complex32::new(0.0, 0.0);
        }

        self.fft_forward
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let low_end = (self.lower_index + 1).min(self.frame_size);
        self.buffer[..low_end].fill(Complex32::new(0.0, 0.0));
        self.buffer[self.higher_index..].fill(Complex32::new(0.0, 0.0));

        self.fft_inverse
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let scale = 1.0 / self.frame_size as f32;
        for (out, bin) in filtered.iter_mut().zip(&self.buffer) {
            *out = bin.re * scale;
        }
    }
}
