//! # Noise Baseline Module
//!
//! Learns the resting spectrum of the microphone as a running mean, so it
//! can be subtracted from every live frame. Only the mean and a count are
//! kept, so memory does not grow with calibration time.

use std::sync::Arc;

use crate::{AnalysisError, Frame, Result};

/// Running-mean estimate of the silent-room spectrum.
#[derive(Debug, Clone, Default)]
pub struct NoiseBaseline {
    mean: Vec<f32>,
    axis: Option<Arc<[f32]>>,
    count: usize,
}

impl NoiseBaseline {
    /// An empty baseline; subtracting it is a no-op.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames folded into the mean so far.
    pub fn sample_count(&self) -> usize {
        self.count
    }

    pub fn is_calibrated(&self) -> bool {
        self.count > 0
    }

    /// The current mean spectrum (empty before calibration).
    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    /// Folds one frame into the running mean.
    ///
    /// The first frame becomes the baseline as-is; each later frame moves it
    /// by `(frame - mean) / count`.
    ///
    /// # Errors
    /// * `AxisMismatch` if the frame's frequency axis differs from the one
    ///   the baseline was started with
    pub fn accumulate(&mut self, frame: &Frame) -> Result<()> {
        match &self.axis {
            None => {
                self.mean = frame.amplitudes().to_vec();
                self.axis = Some(Arc::clone(frame.frequencies()));
                self.count = 1;
            }
            Some(axis) => {
                check_axis(axis, frame)?;
                self.count += 1;
                let n = self.count as f32;
                for (m, &x) in self.mean.iter_mut().zip(frame.amplitudes()) {
                    *m += (x - *m) / n;
                }
            }
        }
        Ok(())
    }

    /// Returns `frame - mean` element-wise, or the frame unchanged when no
    /// calibration has been done.
    ///
    /// # Errors
    /// * `AxisMismatch` if the frame was captured with a different axis
    ///   than the baseline
    pub fn subtract(&self, frame: &Frame) -> Result<Frame> {
        let Some(axis) = &self.axis else {
            return Ok(frame.clone());
        };
        check_axis(axis, frame)?;
        let amplitudes = frame
            .amplitudes()
            .iter()
            .zip(&self.mean)
            .map(|(&x, &m)| x - m)
            .collect();
        Ok(frame.with_amplitudes(amplitudes))
    }
}

fn check_axis(axis: &Arc<[f32]>, frame: &Frame) -> Result<()> {
    let found = frame.frequencies();
    if Arc::ptr_eq(axis, found) || axis[..] == found[..] {
        Ok(())
    } else {
        Err(AnalysisError::AxisMismatch {
            expected: axis.len(),
            found: found.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(amplitudes: &[f32]) -> Frame {
        let axis: Vec<f32> = (0..amplitudes.len()).map(|i| i as f32 * 10.0).collect();
        Frame::new(amplitudes.to_vec(), Arc::from(axis)).unwrap()
    }

    #[test]
    fn running_mean_matches_arithmetic_mean() {
        let mut baseline = NoiseBaseline::new();
        baseline.accumulate(&frame(&[3.0, 3.0, 3.0])).unwrap();
        baseline.accumulate(&frame(&[5.0, 5.0, 5.0])).unwrap();
        baseline.accumulate(&frame(&[7.0, 7.0, 7.0])).unwrap();
        assert_eq!(baseline.mean(), &[5.0, 5.0, 5.0]);
        assert_eq!(baseline.sample_count(), 3);
    }

    #[test]
    fn first_frame_becomes_baseline() {
        let mut baseline = NoiseBaseline::new();
        baseline.accumulate(&frame(&[-60.0, -40.0])).unwrap();
        assert_eq!(baseline.mean(), &[-60.0, -40.0]);
        assert_eq!(baseline.sample_count(), 1);
    }

    #[test]
    fn subtract_without_calibration_is_noop() {
        let baseline = NoiseBaseline::new();
        let live = frame(&[1.0, 2.0, 3.0]);
        assert_eq!(baseline.subtract(&live).unwrap(), live);
        assert!(!baseline.is_calibrated());
    }

    #[test]
    fn subtract_removes_mean() {
        let mut baseline = NoiseBaseline::new();
        baseline.accumulate(&frame(&[-50.0, -30.0])).unwrap();
        let cleaned = baseline.subtract(&frame(&[-20.0, -30.0])).unwrap();
        assert_eq!(cleaned.amplitudes(), &[30.0, 0.0]);
    }

    #[test]
    fn axis_mismatch_is_an_error() {
        let mut baseline = NoiseBaseline::new();
        baseline.accumulate(&frame(&[1.0, 1.0, 1.0])).unwrap();

        let longer = frame(&[1.0, 1.0, 1.0, 1.0]);
        assert!(matches!(
            baseline.subtract(&longer),
            Err(AnalysisError::AxisMismatch { expected: 3, found: 4 })
        ));
        assert!(baseline.accumulate(&longer).is_err());
        assert_eq!(baseline.sample_count(), 1);

        let moved = Frame::new(vec![1.0; 3], Arc::from(vec![0.0, 11.0, 22.0])).unwrap();
        assert!(baseline.subtract(&moved).is_err());
    }
}
