//! Far-end history with a sliding tail energy.

use log::debug;

use crate::HALF_FRAME;

/// Circular buffer holding the most recent `HALF_FRAME + tail_length` far-end
/// samples, addressable by age.
///
/// Offset 0 is the oldest sample still held; offset `capacity() - 1` is the
/// newest one.
pub struct HistoryBuffer {
    samples: Vec<f32>,
    next_pos: usize,
    tail_length: usize,
    tail_energy: f32,
    energy_primed: bool,
}

impl HistoryBuffer {
    pub fn new(tail_length: usize) -> Self {
        assert!(tail_length > 0, "tail_length must be positive");
        Self {
            samples: vec![0.0; HALF_FRAME + tail_length],
            next_pos: 0,
            tail_length,
            tail_energy: 0.0,
            energy_primed: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn tail_length(&self) -> usize {
        self.tail_length
    }

    /// Overwrites the oldest sample with `sample`.
    pub fn add(&mut self, sample: f32) {
        self.samples[self.next_pos] = sample;
        self.next_pos += 1;
        if self.next_pos == self.samples.len() {
            self.next_pos = 0;
        }
    }

    /// Returns the sample `offset` positions newer than the oldest one held.
    #[inline]
    pub fn get(&self, offset: usize) -> f32 {
        let len = self.samples.len();
        debug_assert!(offset < len, "offset {offset} outside history of {len}");
        let mut idx = self.next_pos + offset;
        if idx >= len {
            idx -= len;
        }
        self.samples[idx]
    }

    /// Sum of squares of the `tail_length` samples at offsets
    /// `index + 1 ..= index + tail_length`.
    ///
    /// The first call after construction or [`reset`](Self::reset) sums the
    /// window directly. Later calls slide the previous window by one sample, so
    /// each call must pass the index following the previous one. A window that
    /// ends on the newest sample is followed by `index = 0` once `HALF_FRAME`
    /// new samples have been added, since the contents shift by exactly that
    /// amount. Any other sequence yields a self-consistent but wrong sum.
    pub fn sliding_tail_sum_square(&mut self, index: usize) -> f32 {
        if !self.energy_primed {
            self.tail_energy = (0..self.tail_length)
                .map(|k| {
                    let sample = self.get(self.tail_length + index - k);
                    sample * sample
                })
                .sum();
            self.energy_primed = true;
            debug!("far-end tail energy initialised at index {index}");
        } else {
            let leaving = self.get(index);
            let entering = self.get(self.tail_length + index);
            self.tail_energy += entering * entering - leaving * leaving;
        }
        self.tail_energy
    }

    /// Zeroes every sample, rewinds the cursor and forces the next tail energy
    /// to be summed from scratch.
    pub fn reset(&mut self) {
        self.samples.fill(0.0);
        self.next_pos = 0;
        self.tail_energy = 0.0;
        self.energy_primed = false;
    }
}
