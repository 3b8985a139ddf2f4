use log::{debug, info, trace, warn};

use crate::conditioner::SignalConditioner;
use crate::config::EngineConfig;
use crate::error::AecResult;
use crate::history::HistoryBuffer;
use crate::spectrum::SpectralTransform;
use crate::step_size::{INITIAL_BIN_RATE, SpectralState};
use crate::{BIN_COUNT, FRAME_SIZE, HALF_FRAME, denormalize, normalize};

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    total_samples: u64,
    /// Non-silent far-end samples seen, saturating one past the warm-up threshold.
    warmup: usize,
    /// Position inside the current half frame.
    position: usize,
    errors: u32,
}

/// Echo canceller with a time-domain NLMS filter whose step size is
/// re-estimated in the frequency domain every half frame.
///
/// Output lags the input by half a frame: the echo estimate produced for a
/// call is aligned with the band-limited near-end of the previous half frame.
pub struct EchoCanceller {
    config: EngineConfig,
    weights: Vec<f32>,
    history: HistoryBuffer,
    far_frame: Vec<f32>,
    near_frame: Vec<f32>,
    near_reference: Vec<f32>,
    filtered: Vec<f32>,
    echo_overlap: Vec<f32>,
    error_overlap: Vec<f32>,
    conditioner: SignalConditioner,
    fft: SpectralTransform,
    spectral: SpectralState,
    mju: f32,
    counters: Counters,
    warmup_threshold: usize,
    adapting: bool,
    just_restarted: bool,
}

impl EchoCanceller {
    /// Creates a canceller with `tail_length` taps for signals sampled at
    /// `sample_rate` Hz, using the default band and step-size settings.
    pub fn new(tail_length: usize, sample_rate: f32) -> AecResult<Self> {
        Self::with_config(EngineConfig::new(tail_length, sample_rate))
    }

    pub fn with_config(config: EngineConfig) -> AecResult<Self> {
        config.validate()?;

        let tail_length = config.tail_length;
        let conditioner = SignalConditioner::new(
            FRAME_SIZE,
            config.sample_rate,
            config.band_low_hz,
            config.band_high_hz,
        );
        let mut fft = SpectralTransform::new(FRAME_SIZE);
        let spectral = SpectralState::new(config.sample_rate, config.mju_max);
        let mju = fft.project_scalar(spectral.mju_bins())?;

        info!(
            "echo canceller initialised: frame {FRAME_SIZE}, tail {tail_length}, sample rate {} Hz",
            config.sample_rate
        );

        Ok(Self {
            weights: vec![0.0; tail_length],
            history: HistoryBuffer::new(tail_length),
            far_frame: vec![0.0; HALF_FRAME],
            near_frame: vec![0.0; HALF_FRAME],
            near_reference: vec![0.0; HALF_FRAME],
            filtered: vec![0.0; FRAME_SIZE],
            echo_overlap: vec![0.0; FRAME_SIZE],
            error_overlap: vec![0.0; FRAME_SIZE],
            conditioner,
            fft,
            spectral,
            mju,
            counters: Counters::default(),
            warmup_threshold: 2 * (FRAME_SIZE + tail_length),
            adapting: false,
            just_restarted: false,
            config,
        })
    }

    /// Cancels the echo of `far_end` from `near_end` for one sample period.
    ///
    /// Samples must arrive one pair at a time in chronological order. The call
    /// never fails: an estimate outside the normalized range is replaced by
    /// the raw near-end sample, and once the overflow count reaches the
    /// restart threshold the canceller resets and returns `far_end` unchanged.
    pub fn process(&mut self, far_end: i16, near_end: i16) -> i16 {
        self.just_restarted = false;
        let pos = self.counters.position;

        let echo = self.estimate_echo(pos);
        self.echo_overlap[pos] = echo;
        let mut error = self.near_reference[pos] - echo;
        self.error_overlap[pos] = error;
        self.update_weights(error, pos);

        self.far_frame[pos] = normalize(far_end);
        self.near_frame[pos] = normalize(near_end);
        self.counters.position += 1;
        if self.counters.position == HALF_FRAME {
            self.finish_half_frame();
            self.counters.position = 0;
        }

        self.counters.total_samples += 1;
        if far_end != 0 && self.counters.warmup <= self.warmup_threshold {
            self.counters.warmup += 1;
        }

        if !(-1.0..=1.0).contains(&error) {
            self.counters.errors += 1;
            warn!(
                "estimation overflow [{}/{} errors, {} samples, value {error}]",
                self.counters.errors, self.config.restart_threshold, self.counters.total_samples
            );
            error = normalize(near_end);
        }
        let mut output = denormalize(error);

        if self.counters.errors >= self.config.restart_threshold {
            self.reset();
            output = far_end;
        }
        output
    }

    /// Runs [`process`](Self::process) over whole buffers.
    ///
    /// Each slice must share the same length.
    pub fn process_block(&mut self, far_end: &[i16], near_end: &[i16], output: &mut [i16]) {
        assert_eq!(
            far_end.len(),
            near_end.len(),
            "far-end and near-end chunks must match"
        );
        assert_eq!(
            near_end.len(),
            output.len(),
            "output buffer length must match near-end chunk"
        );

        for ((out, &far), &near) in output.iter_mut().zip(far_end).zip(near_end) {
            *out = self.process(far, near);
        }
    }

    /// Returns the canceller to its initial state and raises the
    /// [`just_restarted`](Self::just_restarted) flag.
    pub fn reset(&mut self) {
        self.weights.fill(0.0);
        self.history.reset();
        for buffer in [
            &mut self.far_frame,
            &mut self.near_frame,
            &mut self.near_reference,
            &mut self.filtered,
            &mut self.echo_overlap,
            &mut self.error_overlap,
        ] {
            buffer.fill(0.0);
        }
        self.spectral.reset();
        self.mju = match self.fft.project_scalar(self.spectral.mju_bins()) {
            Ok(mju) => mju,
            Err(err) => {
                warn!("initial step size unavailable ({err}), using {INITIAL_BIN_RATE}");
                INITIAL_BIN_RATE
            }
        };
        self.counters = Counters::default();
        self.adapting = false;
        self.just_restarted = true;
        info!("echo canceller has been reset");
    }

    /// Scalar step size applied by the per-sample update.
    pub fn mju(&self) -> f32 {
        self.mju
    }

    /// Current leakage (double-talk) estimate.
    pub fn eit(&self) -> f32 {
        self.spectral.eit()
    }

    /// Per-bin step sizes, DC first and Nyquist last.
    pub fn mju_bins(&self) -> &[f32] {
        debug_assert_eq!(self.spectral.mju_bins().len(), BIN_COUNT);
        self.spectral.mju_bins()
    }

    /// Estimation overflows since the last reset.
    pub fn error_count(&self) -> u32 {
        self.counters.errors
    }

    /// Whether the previous call to [`process`](Self::process) reset the
    /// canceller.
    pub fn just_restarted(&self) -> bool {
        self.just_restarted
    }

    /// Samples processed since the last reset.
    pub fn total_samples(&self) -> u64 {
        self.counters.total_samples
    }

    /// Whether enough far-end signal has passed for the spectral step-size
    /// adaptation to run.
    pub fn is_warmed_up(&self) -> bool {
        self.counters.warmup > self.warmup_threshold
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn tail_length(&self) -> usize {
        self.config.tail_length
    }

    pub fn sample_rate(&self) -> f32 {
        self.config.sample_rate
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn estimate_echo(&self, pos: usize) -> f32 {
        let newest = self.config.tail_length + pos;
        let mut acc = 0.0;
        for (k, weight) in self.weights.iter().enumerate() {
            acc += weight * self.history.get(newest - k);
        }
        acc
    }

    fn update_weights(&mut self, error: f32, pos: usize) {
        let energy = self.history.sliding_tail_sum_square(pos);
        // A silent far-end window leaves nothing to normalize by.
        if energy == 0.0 {
            return;
        }

        // Half step toward the target, as in Speex's soft-constraint update.
        let scale = 0.5 * self.mju * error / energy;
        let newest = self.config.tail_length + pos;
        for (k, weight) in self.weights.iter_mut().enumerate() {
            *weight += scale * self.history.get(newest - k);
        }
    }

    fn finish_half_frame(&mut self) {
        if self.counters.warmup > self.warmup_threshold {
            if !self.adapting {
                self.adapting = true;
                debug!(
                    "spectral step-size adaptation engaged after {} samples",
                    self.counters.total_samples
                );
            }
            match self.recompute_mju() {
                Ok(mju) => {
                    self.mju = mju;
                    trace!("mju {mju}, eit {}", self.spectral.eit());
                }
                Err(err) => warn!("step size kept at {}: {err}", self.mju),
            }
        }

        self.conditioner.band_pass(&self.near_frame, &mut self.filtered);
        for &sample in &self.far_frame {
            self.history.add(sample);
        }
        self.near_reference
            .copy_from_slice(&self.filtered[..HALF_FRAME]);

        // Overlap-save: the half frame just finished moves to the upper half.
        self.echo_overlap.copy_within(..HALF_FRAME, HALF_FRAME);
        self.error_overlap.copy_within(..HALF_FRAME, HALF_FRAME);
    }

    fn recompute_mju(&mut self) -> AecResult<f32> {
        self.spectral.update(
            &self.echo_overlap,
            &self.error_overlap,
            &self.conditioner,
            &mut self.fft,
        )?;
        self.fft.project_scalar(self.spectral.mju_bins())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AecError;

    #[test]
    fn starts_with_flat_step_size() {
        let aec = EchoCanceller::new(128, 16000.0).unwrap();
        assert!((aec.mju() - INITIAL_BIN_RATE).abs() < 1e-5);
        assert_eq!(aec.eit(), 0.0);
        assert_eq!(aec.error_count(), 0);
        assert!(!aec.just_restarted());
        assert!(!aec.is_warmed_up());
        assert!(aec.weights().iter().all(|&w| w == 0.0));
        assert_eq!(aec.config(), &EngineConfig::new(128, 16000.0));
    }

    #[test]
    fn rejects_invalid_configuration() {
        assert!(matches!(
            EchoCanceller::new(0, 16000.0),
            Err(AecError::EmptyTail)
        ));
        assert!(matches!(
            EchoCanceller::new(64, -1.0),
            Err(AecError::InvalidSampleRate(_))
        ));
    }

    #[test]
    fn output_lags_by_half_a_frame() {
        let mut aec = EchoCanceller::new(64, 16000.0).unwrap();
        // Nothing reaches the output before the first half frame completes.
        for n in 0..HALF_FRAME {
            let out = aec.process(0, ((n % 7) as i16 - 3) * 1000);
            assert_eq!(out, 0);
        }
        assert_eq!(aec.total_samples(), HALF_FRAME as u64);
        assert!(aec.near_reference.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn warmup_ignores_silent_far_end() {
        let mut aec = EchoCanceller::new(16, 16000.0).unwrap();
        for _ in 0..4 * FRAME_SIZE {
            aec.process(0, 500);
        }
        assert_eq!(aec.counters.warmup, 0);

        let threshold = aec.warmup_threshold;
        for _ in 0..threshold {
            aec.process(100, 0);
        }
        assert!(!aec.is_warmed_up());
        aec.process(100, 0);
        assert!(aec.is_warmed_up());
        assert_eq!(aec.counters.warmup, threshold + 1);
    }

    #[test]
    fn overflow_substitutes_raw_near_end() {
        let mut aec = EchoCanceller::new(32, 16000.0).unwrap();
        aec.near_reference[0] = 1.5;

        let out = aec.process(0, 1234);
        assert_eq!(out, 1234);
        assert_eq!(aec.error_count(), 1);
        assert!(!aec.just_restarted());
    }

    #[test]
    fn nan_error_counts_as_overflow() {
        let mut aec = EchoCanceller::new(32, 16000.0).unwrap();
        aec.near_reference[0] = f32::NAN;

        let out = aec.process(0, -2048);
        assert_eq!(out, -2048);
        assert_eq!(aec.error_count(), 1);
    }

    #[test]
    fn half_frame_boundary_shifts_overlap_histories() {
        let mut aec = EchoCanceller::new(32, 16000.0).unwrap();
        for n in 0..3 * HALF_FRAME + HALF_FRAME - 1 {
            aec.process(((n % 17) as i16 - 8) * 700, ((n % 9) as i16 - 4) * 900);
        }
        assert_eq!(aec.counters.position, HALF_FRAME - 1);
        let echo_before = aec.echo_overlap[..HALF_FRAME].to_vec();
        let error_before = aec.error_overlap[..HALF_FRAME].to_vec();
        assert!(echo_before.iter().any(|&v| v != 0.0));

        aec.process(1000, -1000);
        assert_eq!(aec.counters.position, 0);

        // The sample written on the boundary call lands at HALF_FRAME - 1
        // before the shift; everything earlier is the pre-boundary lower half.
        let last = HALF_FRAME - 1;
        assert_eq!(aec.echo_overlap[HALF_FRAME..FRAME_SIZE - 1], echo_before[..last]);
        assert_eq!(aec.error_overlap[HALF_FRAME..FRAME_SIZE - 1], error_before[..last]);
        assert_eq!(aec.echo_overlap[HALF_FRAME..], aec.echo_overlap[..HALF_FRAME]);
        assert_eq!(aec.error_overlap[HALF_FRAME..], aec.error_overlap[..HALF_FRAME]);
    }

    #[test]
    fn restart_returns_raw_far_end_and_clears_state() {
        let mut aec = EchoCanceller::new(32, 16000.0).unwrap();
        for n in 0..3 * HALF_FRAME {
            aec.process(((n % 13) as i16 - 6) * 800, ((n % 11) as i16 - 5) * 600);
        }
        assert!(aec.weights().iter().any(|&w| w != 0.0));

        let pos = aec.counters.position;
        aec.counters.errors = aec.config.restart_threshold - 1;
        aec.near_reference[pos] = -3.0;

        let out = aec.process(-4321, 99);
        assert_eq!(out, -4321, "restart passes the far-end sample through");
        assert!(aec.just_restarted());
        assert_eq!(aec.error_count(), 0);
        assert_eq!(aec.total_samples(), 0);
        assert!(aec.weights().iter().all(|&w| w == 0.0));
        assert!((aec.mju() - INITIAL_BIN_RATE).abs() < 1e-5);

        // The flag is one-shot.
        aec.process(0, 0);
        assert!(!aec.just_restarted());
    }

    #[test]
    fn manual_reset_raises_the_flag() {
        let mut aec = EchoCanceller::new(32, 16000.0).unwrap();
        aec.process(10, 10);
        aec.reset();
        assert!(aec.just_restarted());
        assert_eq!(aec.counters.position, 0);
    }

    #[test]
    fn process_block_matches_per_sample_calls() {
        let far: Vec<i16> = (0..2000).map(|n| ((n * 7919) % 4001 - 2000) as i16).collect();
        let near: Vec<i16> = far.iter().map(|&x| x / 2).collect();

        let mut by_block = EchoCanceller::new(64, 16000.0).unwrap();
        let mut blocked = vec![0i16; far.len()];
        by_block.process_block(&far, &near, &mut blocked);

        let mut by_sample = EchoCanceller::new(64, 16000.0).unwrap();
        let single: Vec<i16> = far
            .iter()
            .zip(&near)
            .map(|(&x, &d)| by_sample.process(x, d))
            .collect();

        assert_eq!(blocked, single);
    }

    #[test]
    #[should_panic(expected = "must match")]
    fn process_block_rejects_mismatched_lengths() {
        let mut aec = EchoCanceller::new(64, 16000.0).unwrap();
        let mut out = [0i16; 4];
        aec.process_block(&[0; 4], &[0; 3], &mut out);
    }
}
