//! Moving-average smoothing of consecutive spectra

use std::collections::VecDeque;

/// Default number of spectra averaged together.
pub const DEFAULT_WINDOW: usize = 3;

/// Fixed-capacity history of spectra, averaged element-wise.
///
/// This is a plain moving average: every buffered frame has equal weight,
/// and until the buffer fills only the frames present are averaged.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    capacity: usize,
    history: VecDeque<Vec<f32>>,
}

impl MovingAverage {
    /// A capacity of 0 is treated as 1 (no smoothing).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            history: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Pushes a spectrum and returns the average over the buffer.
    ///
    /// Spectra of a different length than the buffered ones (block size
    /// changed) flush the history first.
    pub fn push(&mut self, spectrum: Vec<f32>) -> Vec<f32> {
        if self
            .history
            .front()
            .is_some_and(|first| first.len() != spectrum.len())
        {
            self.history.clear();
        }
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(spectrum);

        let n = self.history.len() as f32;
        let mut average = vec![0.0; self.history[0].len()];
        for frame in &self.history {
            for (acc, &v) in average.iter_mut().zip(frame) {
                *acc += v;
            }
        }
        for acc in &mut average {
            *acc /= n;
        }
        average
    }
}

impl Default for MovingAverage {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
