//! Per-bin step size and leakage estimation.
//!
//! Follows Valin, "On Adjusting the Learning Rate in Frequency Domain Echo
//! Cancellation With Double-Talk" (IEEE TASLP 15(3), 2007): the optimal
//! per-bin rate is the leakage estimate times the ratio of echo-estimate power
//! to residual power, capped at `mju_max`.

use log::trace;

use crate::conditioner::SignalConditioner;
use crate::error::AecResult;
use crate::spectrum::SpectralTransform;
use crate::{BIN_COUNT, FRAME_SIZE};

/// Per-bin rate every bin starts from.
pub(crate) const INITIAL_BIN_RATE: f32 = 0.25;

pub(crate) struct SpectralState {
    gamma: f32,
    beta0: f32,
    beta_max: f32,
    mju_max: f32,
    echo_spectrum: Vec<f32>,
    echo_spectrum_prev: Vec<f32>,
    error_spectrum: Vec<f32>,
    error_spectrum_prev: Vec<f32>,
    py: Vec<f32>,
    pe: Vec<f32>,
    rey: Vec<f32>,
    ryy: Vec<f32>,
    eit: f32,
    mju_bins: Vec<f32>,
    windowed: Vec<f32>,
}

impl SpectralState {
    pub(crate) fn new(sample_rate: f32, mju_max: f32) -> Self {
        let frame = FRAME_SIZE as f32;
        Self {
            gamma: frame / sample_rate,
            beta0: 2.0 * frame / sample_rate,
            beta_max: 0.5 * frame / sample_rate,
            mju_max,
            echo_spectrum: vec![0.0; FRAME_SIZE],
            echo_spectrum_prev: vec![0.0; FRAME_SIZE],
            error_spectrum: vec![0.0; FRAME_SIZE],
            error_spectrum_prev: vec![0.0; FRAME_SIZE],
            py: vec![0.0; BIN_COUNT],
            pe: vec![0.0; BIN_COUNT],
            rey: vec![0.0; BIN_COUNT],
            ryy: vec![0.0; BIN_COUNT],
            eit: 0.0,
            mju_bins: vec![INITIAL_BIN_RATE; BIN_COUNT],
            windowed: vec![0.0; FRAME_SIZE],
        }
    }

    pub(crate) fn reset(&mut self) {
        for spectrum in [
            &mut self.echo_spectrum,
            &mut self.echo_spectrum_prev,
            &mut self.error_spectrum,
            &mut self.error_spectrum_prev,
            &mut self.py,
            &mut self.pe,
            &mut self.rey,
            &mut self.ryy,
        ] {
            spectrum.fill(0.0);
        }
        self.eit = 0.0;
        self.mju_bins.fill(INITIAL_BIN_RATE);
    }

    pub(crate) fn eit(&self) -> f32 {
        self.eit
    }

    pub(crate) fn mju_bins(&self) -> &[f32] {
        &self.mju_bins
    }

    /// Transforms the windowed overlap histories, then refreshes the leakage
    /// estimate and every per-bin rate.
    pub(crate) fn update(
        &mut self,
        echo: &[f32],
        error: &[f32],
        conditioner: &SignalConditioner,
        fft: &mut SpectralTransform,
    ) -> AecResult<()> {
        std::mem::swap(&mut self.echo_spectrum, &mut self.echo_spectrum_prev);
        conditioner.hamming_window(echo, &mut self.windowed);
        fft.forward(&self.windowed, &mut self.echo_spectrum)?;

        std::mem::swap(&mut self.error_spectrum, &mut self.error_spectrum_prev);
        conditioner.hamming_window(error, &mut self.windowed);
        fft.forward(&self.windowed, &mut self.error_spectrum)?;

        self.update_leakage();
        self.update_bin_rates();
        Ok(())
    }

    fn update_leakage(&mut self) {
        let ratio = total_power(&self.echo_spectrum) / total_power(&self.error_spectrum);
        let mut beta = self.beta0;
        if ratio < 1.0 {
            beta *= ratio;
        }
        if beta > self.beta_max {
            beta = self.beta_max;
        }
        let keep = 1.0 - beta;
        let decay = 1.0 - self.gamma;

        let mut sum_rey = 0.0;
        let mut sum_ryy = 0.0;
        for k in 0..BIN_COUNT {
            let echo_delta =
                bin_power(&self.echo_spectrum, k) - bin_power(&self.echo_spectrum_prev, k);
            let error_delta =
                bin_power(&self.error_spectrum, k) - bin_power(&self.error_spectrum_prev, k);
            self.py[k] = decay * self.py[k] + self.gamma * echo_delta;
            self.pe[k] = decay * self.pe[k] + self.gamma * error_delta;
            self.rey[k] = keep * self.rey[k] + beta * self.py[k] * self.pe[k];
            self.ryy[k] = keep * self.ryy[k] + beta * self.py[k] * self.py[k];

            let weight = bin_weight(k);
            sum_rey += weight * self.rey[k];
            sum_ryy += weight * self.ryy[k];
        }
        self.eit = sum_rey / sum_ryy;
        trace!("leakage {} (beta {beta})", self.eit);
    }

    fn update_bin_rates(&mut self) {
        for (k, rate) in self.mju_bins.iter_mut().enumerate() {
            let option =
                self.eit * bin_power(&self.echo_spectrum, k) / bin_power(&self.error_spectrum, k);
            // `min` yields the cap for NaN options as well.
            *rate = option.min(self.mju_max);
        }
    }
}

/// Squared magnitude of bin `k` of a packed half-complex spectrum.
#[inline]
fn bin_power(packed: &[f32], k: usize) -> f32 {
    let half = packed.len() / 2;
    match k {
        0 => packed[0] * packed[0],
        k if k == half => packed[1] * packed[1],
        k => packed[2 * k] * packed[2 * k] + packed[2 * k + 1] * packed[2 * k + 1],
    }
}

/// DC and Nyquist appear once in a real spectrum, every other bin twice.
#[inline]
fn bin_weight(k: usize) -> f32 {
    if k == 0 || k == BIN_COUNT - 1 { 1.0 } else { 2.0 }
}

fn total_power(packed: &[f32]) -> f32 {
    let edges = packed[0] * packed[0] + packed[1] * packed[1];
    let symmetric: f32 = (1..packed.len() / 2).map(|k| bin_power(packed, k)).sum();
    (edges + 2.0 * symmetric) / packed.len() as f32
}
