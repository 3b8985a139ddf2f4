use crate::error::{AecError, AecResult};

const DEFAULT_BAND_LOW_HZ: f32 = 50.0;
const DEFAULT_BAND_HIGH_HZ: f32 = 5000.0;
const DEFAULT_MJU_MAX: f32 = 0.5;
const DEFAULT_RESTART_THRESHOLD: u32 = 2;

/// Construction parameters of an [`EchoCanceller`](crate::EchoCanceller).
///
/// The analysis frame length is fixed at [`FRAME_SIZE`](crate::FRAME_SIZE) and is
/// not part of the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Number of adaptive taps. Must exceed the longest echo delay, in samples.
    pub tail_length: usize,
    /// Sampling rate of both signals, in Hz.
    pub sample_rate: f32,
    /// Lower edge of the near-end band-pass, in Hz.
    pub band_low_hz: f32,
    /// Upper edge of the near-end band-pass, in Hz.
    pub band_high_hz: f32,
    /// Upper bound of every per-bin step size.
    pub mju_max: f32,
    /// Number of estimation overflows that forces a full reset.
    pub restart_threshold: u32,
}

impl EngineConfig {
    pub fn new(tail_length: usize, sample_rate: f32) -> Self {
        Self {
            tail_length,
            sample_rate,
            band_low_hz: DEFAULT_BAND_LOW_HZ,
            band_high_hz: DEFAULT_BAND_HIGH_HZ,
            mju_max: DEFAULT_MJU_MAX,
            restart_threshold: DEFAULT_RESTART_THRESHOLD,
        }
    }

    pub fn with_band(mut self, low_hz: f32, high_hz: f32) -> Self {
        self.band_low_hz = low_hz;
        self.band_high_hz = high_hz;
        self
    }

    pub fn with_mju_max(mut self, mju_max: f32) -> Self {
        self.mju_max = mju_max;
        self
    }

    pub fn with_restart_threshold(mut self, restart_threshold: u32) -> Self {
        self.restart_threshold = restart_threshold;
        self
    }

    pub fn validate(&self) -> AecResult<()> {
        if self.tail_length == 0 {
            return Err(AecError::EmptyTail);
        }
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(AecError::InvalidSampleRate(self.sample_rate));
        }
        let (low, high) = (self.band_low_hz, self.band_high_hz);
        if !low.is_finite() || !high.is_finite() || low < 0.0 || low >= high {
            return Err(AecError::InvalidBand { low, high });
        }
        if !self.mju_max.is_finite() || self.mju_max <= 0.0 {
            return Err(AecError::InvalidStepCap(self.mju_max));
        }
        if self.restart_threshold == 0 {
            return Err(AecError::ZeroRestartThreshold);
        }
        Ok(())
    }
}
