//! Frequency-domain controlled NLMS acoustic echo canceller.
//!
//! The canceller runs a time-domain NLMS filter sample by sample and, once per
//! half frame, re-estimates its step size from the spectra of the latest echo
//! estimate and residual (Valin's adaptive learning rate with double-talk aware
//! leakage estimation).

mod conditioner;
mod config;
mod engine;
mod error;
mod history;
mod spectrum;
mod step_size;

pub use conditioner::SignalConditioner;
pub use config::EngineConfig;
pub use engine::EchoCanceller;
pub use error::{AecError, AecResult};
pub use history::HistoryBuffer;
pub use spectrum::SpectralTransform;

/// Analysis block length used by the spectral control loop.
pub const FRAME_SIZE: usize = 512;

/// Samples per half frame, the cadence of the spectral control loop.
pub const HALF_FRAME: usize = FRAME_SIZE / 2;

/// Number of non-negative frequency bins, DC and Nyquist included.
pub const BIN_COUNT: usize = FRAME_SIZE / 2 + 1;

/// Scale between 16-bit samples and the normalized `[-1, 1]` range.
pub const SAMPLE_SCALE: f32 = 32768.0;

/// Maps a 16-bit sample into the normalized range.
#[inline]
pub fn normalize(sample: i16) -> f32 {
    sample as f32 / SAMPLE_SCALE
}

/// Maps a normalized value back to a 16-bit sample, truncating toward zero and
/// saturating at the `i16` limits.
#[inline]
pub fn denormalize(value: f32) -> i16 {
    let limit_min = i16::MIN as f32;
    let limit_max = i16::MAX as f32;
    (value * SAMPLE_SCALE).clamp(limit_min, limit_max) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_covers_full_range() {
        assert_eq!(normalize(i16::MIN), -1.0);
        assert_eq!(normalize(0), 0.0);
        assert!(normalize(i16::MAX) < 1.0);
    }

    #[test]
    fn denormalize_saturates() {
        assert_eq!(denormalize(2.0), i16::MAX);
        assert_eq!(denormalize(-2.0), i16::MIN);
        assert_eq!(denormalize(f32::NAN), 0);
    }

    #[test]
    fn denormalize_truncates_toward_zero() {
        assert_eq!(denormalize(100.7 / SAMPLE_SCALE), 100);
        assert_eq!(denormalize(-100.7 / SAMPLE_SCALE), -100);
        for sample in [-32768i16, -1234, -1, 0, 1, 4321, 32767] {
            assert_eq!(denormalize(normalize(sample)), sample);
        }
    }
}
