//! # Fast Fourier Transform (FFT) Module
//!
//! Turns a block of time-domain samples into a level spectrum in decibels
//! relative to full scale, paired with the frequency of every bin.
//!
//! ## Features
//! - High-performance FFT using RustFFT, planned once per block length
//! - Hann windowing for reduced spectral leakage
//! - Window-compensated one-sided magnitudes
//! - dB conversion with a finite floor for silent bins

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use crate::{AnalysisError, Frame, Result};

/// Level reported for bins whose magnitude is zero (or too small to
/// represent), instead of negative infinity.
pub const SILENCE_DB: f32 = -200.0;

/// Computes a symmetric Hann window of length `n`.
///
/// The window tapers both ends of the block to zero so the block edges do
/// not show up as broadband energy.
pub fn hann_window(n: usize) -> Vec<f32> {
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let n_minus_1 = (n - 1) as f32;
            (0..n)
                .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos()))
                .collect()
        }
    }
}

/// Frequencies of the one-sided spectrum bins `0..=n/2`.
pub fn rfft_frequencies(n: usize, sample_rate: u32) -> Vec<f32> {
    let bin_width = sample_rate as f32 / n as f32;
    (0..=n / 2).map(|k| k as f32 * bin_width).collect()
}

/// Converts a linear magnitude to dB relative to `reference`.
///
/// Zero, negative and non-finite results are clamped to [`SILENCE_DB`].
pub fn magnitude_to_db(magnitude: f32, reference: f32) -> f32 {
    let level = 20.0 * (magnitude / reference).log10();
    if level.is_finite() {
        level.max(SILENCE_DB)
    } else {
        SILENCE_DB
    }
}

/// Reusable windowed-FFT state for one audio stream.
///
/// Window, FFT plan and frequency axis depend only on the block length and
/// are rebuilt when that length changes.
pub struct SpectrumAnalyzer {
    sample_rate: u32,
    reference: f32,
    planner: FftPlanner<f32>,
    fft: Option<Arc<dyn Fft<f32>>>,
    window: Vec<f32>,
    window_sum: f32,
    frequencies: Arc<[f32]>,
    buffer: Vec<Complex<f32>>,
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("sample_rate", &self.sample_rate)
            .field("reference", &self.reference)
            .field("block_len", &self.window.len())
            .finish()
    }
}

impl SpectrumAnalyzer {
    /// # Errors
    /// * `InvalidParameter` if the sample rate is 0 or the reference level
    ///   is not a positive finite number
    pub fn new(sample_rate: u32, reference: f32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(AnalysisError::InvalidParameter(
                "sample rate must be > 0".into(),
            ));
        }
        if !(reference.is_finite() && reference > 0.0) {
            return Err(AnalysisError::InvalidParameter(format!(
                "reference level must be > 0, got {reference}"
            )));
        }
        Ok(Self {
            sample_rate,
            reference,
            planner: FftPlanner::new(),
            fft: None,
            window: Vec::new(),
            window_sum: 0.0,
            frequencies: Arc::from(Vec::new()),
            buffer: Vec::new(),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frequency axis of the last analysed block length.
    pub fn frequencies(&self) -> &Arc<[f32]> {
        &self.frequencies
    }

    fn prepare(&mut self, n: usize) {
        if self.window.len() == n && self.fft.is_some() {
            return;
        }
        self.window = hann_window(n);
        self.window_sum = self.window.iter().sum();
        self.fft = Some(self.planner.plan_fft_forward(n));
        self.frequencies = Arc::from(rfft_frequencies(n, self.sample_rate));
        self.buffer = vec![Complex::new(0.0, 0.0); n];
        tracing::debug!(block_len = n, "Prepared FFT window and plan");
    }

    /// Windows `samples`, transforms them and returns the dB spectrum.
    ///
    /// # Errors
    /// * `InvalidParameter` for blocks shorter than two samples
    pub fn analyze(&mut self, samples: &[f32]) -> Result<Frame> {
        let n = samples.len();
        if n < 2 {
            return Err(AnalysisError::InvalidParameter(format!(
                "block must hold at least 2 samples, got {n}"
            )));
        }
        self.prepare(n);

        for ((slot, &sample), &w) in self.buffer.iter_mut().zip(samples).zip(&self.window) {
            *slot = Complex::new(sample * w, 0.0);
        }
        if let Some(fft) = &self.fft {
            fft.process(&mut self.buffer);
        }

        // Factor 2 because only the positive half of the spectrum is kept.
        let scale = 2.0 / self.window_sum;
        let levels = self
            .buffer
            .iter()
            .take(n / 2 + 1)
            .map(|c| magnitude_to_db(c.norm() * scale, self.reference))
            .collect();

        Frame::new(levels, Arc::clone(&self.frequencies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hann_window_is_symmetric_and_tapered() {
        let w = hann_window(8);
        assert_eq!(w.len(), 8);
        assert_eq!(w[0], 0.0);
        assert!(w[7].abs() < 1e-6);
        for i in 0..4 {
            assert!((w[i] - w[7 - i]).abs() < 1e-6);
        }
    }

    #[test]
    fn bin_frequencies() {
        let f = rfft_frequencies(8, 800);
        assert_eq!(f, vec![0.0, 100.0, 200.0, 300.0, 400.0]);
    }

    #[test]
    fn zero_magnitude_is_clamped() {
        assert_eq!(magnitude_to_db(0.0, 1.0), SILENCE_DB);
        assert_eq!(magnitude_to_db(1.0, 1.0), 0.0);
        assert!((magnitude_to_db(0.1, 1.0) + 20.0).abs() < 1e-4);
    }

    #[test]
    fn silence_gives_finite_floor() {
        let mut analyzer = SpectrumAnalyzer::new(48_000, 1.0).unwrap();
        let frame = analyzer.analyze(&[0.0; 256]).unwrap();
        assert_eq!(frame.len(), 129);
        assert!(frame.amplitudes().iter().all(|&l| l == SILENCE_DB));
    }

    #[test]
    fn full_scale_sine_peaks_near_zero_db() {
        let rate = 8_000;
        let n = 1024;
        // Exactly on bin 64 -> 500 Hz
        let samples: Vec<f32> = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * 500.0 * i as f32 / rate as f32).sin())
            .collect();
        let mut analyzer = SpectrumAnalyzer::new(rate, 1.0).unwrap();
        let frame = analyzer.analyze(&samples).unwrap();

        let (peak_bin, peak_db) = frame
            .amplitudes()
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap();
        assert_eq!(frame.frequencies()[peak_bin], 500.0);
        assert!(peak_db.abs() < 0.5, "peak at {peak_db} dB");
    }

    #[test]
    fn axis_is_reused_for_same_block_length() {
        let mut analyzer = SpectrumAnalyzer::new(44_100, 1.0).unwrap();
        let a = analyzer.analyze(&[0.1; 64]).unwrap();
        let b = analyzer.analyze(&[0.2; 64]).unwrap();
        assert!(Arc::ptr_eq(a.frequencies(), b.frequencies()));
        let c = analyzer.analyze(&[0.2; 128]).unwrap();
        assert_eq!(c.len(), 65);
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(SpectrumAnalyzer::new(0, 1.0).is_err());
        assert!(SpectrumAnalyzer::new(44_100, 0.0).is_err());
        let mut analyzer = SpectrumAnalyzer::new(44_100, 1.0).unwrap();
        assert!(analyzer.analyze(&[0.5]).is_err());
    }
}
