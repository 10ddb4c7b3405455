//! # Frequency Filter Module
//!
//! Maps a magnitude spectrum onto a handful of colour bands. Each band is a
//! [`FilterMask`]: a weighting function over frequency with a colour tag.
//! A [`FilterBank`] owns the masks together with a cached weight vector per
//! mask, so the weights are only recomputed when the frequency axis of the
//! incoming frames changes.
//!
//! ## Filter shapes
//! - **Gaussian**: normal density with mean `center` and std-dev `width`
//! - **Uniform**: top-hat of height `1 / (2 * width)` on the open interval
//!   `(center - width, center + width)`

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::{AnalysisError, Frame, Result, Rgb};

/// Weights below this value count as "outside the filter" for early exit.
pub const NEGLIGIBLE_WEIGHT: f32 = 1e-7;

/// Shape of a filter's weighting function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterShape {
    Gaussian,
    Uniform,
}

impl FilterShape {
    /// Whether the non-negligible support of this shape is one contiguous
    /// region. Band evaluation may only stop early for single-lobe shapes.
    pub fn is_single_lobe(self) -> bool {
        match self {
            FilterShape::Gaussian | FilterShape::Uniform => true,
        }
    }
}

/// Construction parameters of one filter, as found in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub shape: FilterShape,
    /// Center frequency in Hz
    pub center: f32,
    /// Gaussian std-dev or uniform half-width, in Hz
    pub width: f32,
    pub colour: Rgb,
}

impl FilterSpec {
    pub fn gaussian(center: f32, width: f32, colour: Rgb) -> Self {
        Self {
            shape: FilterShape::Gaussian,
            center,
            width,
            colour,
        }
    }

    pub fn uniform(center: f32, width: f32, colour: Rgb) -> Self {
        Self {
            shape: FilterShape::Uniform,
            center,
            width,
            colour,
        }
    }
}

/// A validated filter with its precomputed normalisation constant.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterMask {
    spec: FilterSpec,
    constant: f32,
}

impl FilterMask {
    /// Validates the spec and precomputes the shape constant.
    ///
    /// # Errors
    /// * `InvalidParameter` if `width <= 0`, `center <= 0`, either is not
    ///   finite, or the colour lies outside `[0, 1]`
    pub fn new(spec: FilterSpec) -> Result<Self> {
        if !(spec.width.is_finite() && spec.width > 0.0) {
            return Err(AnalysisError::InvalidParameter(format!(
                "filter width must be > 0, got {} (center {})",
                spec.width, spec.center
            )));
        }
        if !(spec.center.is_finite() && spec.center > 0.0) {
            return Err(AnalysisError::InvalidParameter(format!(
                "filter center must be > 0, got {}",
                spec.center
            )));
        }
        if !spec.colour.is_valid() {
            return Err(AnalysisError::InvalidParameter(format!(
                "filter colour must lie in [0, 1], got {:?}",
                spec.colour
            )));
        }

        let constant = match spec.shape {
            FilterShape::Gaussian => 1.0 / ((2.0 * std::f32::consts::PI).sqrt() * spec.width),
            FilterShape::Uniform => 1.0 / (2.0 * spec.width),
        };

        Ok(Self { spec, constant })
    }

    /// Weight of this filter at `x` Hz.
    pub fn weight(&self, x: f32) -> f32 {
        let FilterSpec { center, width, .. } = self.spec;
        match self.spec.shape {
            FilterShape::Gaussian => {
                let z = (x - center) / width;
                self.constant * (-z * z / 2.0).exp()
            }
            // Open interval: the edges themselves weigh nothing.
            FilterShape::Uniform => {
                if x > center - width && x < center + width {
                    self.constant
                } else {
                    0.0
                }
            }
        }
    }

    pub fn spec(&self) -> &FilterSpec {
        &self.spec
    }

    pub fn colour(&self) -> Rgb {
        self.spec.colour
    }
}

/// Weight vector computed for one frequency axis.
#[derive(Debug, Clone)]
struct CachedMask {
    axis: Arc<[f32]>,
    weights: Vec<f32>,
    /// First bin at or above the filter center. Early exit is only sound
    /// past it, and only on a non-decreasing axis.
    peak: usize,
    early_exit: bool,
}

impl CachedMask {
    fn matches(&self, axis: &Arc<[f32]>) -> bool {
        Arc::ptr_eq(&self.axis, axis) || self.axis[..] == axis[..]
    }
}

#[derive(Debug, Clone)]
struct BankEntry {
    mask: FilterMask,
    cache: Option<CachedMask>,
    recomputations: usize,
}

impl BankEntry {
    fn weights_for(&mut self, axis: &Arc<[f32]>) -> &CachedMask {
        let cache = match self.cache.take() {
            Some(cache) if cache.matches(axis) => cache,
            _ => self.recompute(axis),
        };
        self.cache.insert(cache)
    }

    fn recompute(&mut self, axis: &Arc<[f32]>) -> CachedMask {
        let weights = axis.iter().map(|&f| self.mask.weight(f)).collect();
        let early_exit = self.mask.spec.shape.is_single_lobe()
            && self.mask.constant >= NEGLIGIBLE_WEIGHT
            && is_non_decreasing(axis);
        let peak = axis.partition_point(|&f| f < self.mask.spec.center);
        self.recomputations += 1;
        debug!(
            center = self.mask.spec.center,
            bins = axis.len(),
            early_exit,
            "Recomputed filter weights"
        );
        CachedMask {
            axis: Arc::clone(axis),
            weights,
            peak,
            early_exit,
        }
    }
}

fn is_non_decreasing(axis: &[f32]) -> bool {
    axis.windows(2).all(|w| w[0] <= w[1])
}

/// An ordered, per-instance collection of filters.
#[derive(Debug, Clone)]
pub struct FilterBank {
    entries: Vec<BankEntry>,
}

impl FilterBank {
    /// Builds a bank from specs, in order.
    ///
    /// # Errors
    /// * `InvalidParameter` if the list is empty or any spec is invalid
    pub fn new(specs: impl IntoIterator<Item = FilterSpec>) -> Result<Self> {
        let entries = specs
            .into_iter()
            .map(|spec| {
                FilterMask::new(spec).map(|mask| BankEntry {
                    mask,
                    cache: None,
                    recomputations: 0,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        if entries.is_empty() {
            return Err(AnalysisError::InvalidParameter(
                "filter bank needs at least one filter".into(),
            ));
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Colour tags in registration order.
    pub fn colours(&self) -> Vec<Rgb> {
        self.entries.iter().map(|e| e.mask.colour()).collect()
    }

    /// How many times the weight vector of filter `index` has been computed.
    pub fn recompute_count(&self, index: usize) -> Option<usize> {
        self.entries.get(index).map(|e| e.recomputations)
    }

    /// Computes one band energy per filter, in registration order.
    ///
    /// The frame is checked for negative amplitudes before any cache is
    /// touched, so a rejected frame leaves the bank unchanged.
    ///
    /// # Errors
    /// * `InvalidAmplitude` if any amplitude is negative
    pub fn evaluate(&mut self, frame: &Frame) -> Result<Vec<f32>> {
        let amplitudes = frame.amplitudes();
        let axis = frame.frequencies();

        if let Some(i) = amplitudes.iter().position(|&a| a < 0.0) {
            return Err(AnalysisError::InvalidAmplitude {
                value: amplitudes[i],
                frequency: axis[i],
            });
        }

        Ok(self
            .entries
            .iter_mut()
            .map(|entry| band_energy(entry.weights_for(axis), amplitudes))
            .collect())
    }
}

/// Sums weight * amplitude, stopping once past a single-lobe filter.
fn band_energy(cache: &CachedMask, amplitudes: &[f32]) -> f32 {
    let mut result = 0.0;
    for (i, (&w, &a)) in cache.weights.iter().zip(amplitudes).enumerate() {
        if cache.early_exit && i > cache.peak && result > 0.0 && w < NEGLIGIBLE_WEIGHT {
            break;
        }
        result += w * a;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BLUE: Rgb = Rgb(0.0, 0.0, 1.0);
    const RED: Rgb = Rgb(1.0, 0.0, 0.0);

    fn frame(amplitudes: Vec<f32>, axis: &[f32]) -> Frame {
        Frame::new(amplitudes, Arc::from(axis)).unwrap()
    }

    #[test]
    fn rejects_non_positive_width() {
        for width in [0.0, -5.0, f32::NAN] {
            let err = FilterMask::new(FilterSpec::gaussian(100.0, width, BLUE)).unwrap_err();
            assert!(matches!(err, AnalysisError::InvalidParameter(_)), "{width}");
        }
    }

    #[test]
    fn gaussian_peak_matches_normalisation_constant() {
        let mask = FilterMask::new(FilterSpec::gaussian(440.0, 20.0, RED)).unwrap();
        let expected = 1.0 / ((2.0 * std::f32::consts::PI).sqrt() * 20.0);
        assert!((mask.weight(440.0) - expected).abs() < 1e-9);
        // One sigma away: e^-0.5 of the peak
        assert!((mask.weight(460.0) - expected * (-0.5f32).exp()).abs() < 1e-9);
    }

    #[test]
    fn uniform_boundary_is_open() {
        let mask = FilterMask::new(FilterSpec::uniform(100.0, 50.0, BLUE)).unwrap();
        assert_eq!(mask.weight(50.0), 0.0);
        assert_eq!(mask.weight(150.0), 0.0);
        assert_eq!(mask.weight(50.001), 0.01);
        assert_eq!(mask.weight(100.0), 0.01);
        assert_eq!(mask.weight(149.9), 0.01);
    }

    #[test]
    fn empty_bank_is_rejected() {
        assert!(matches!(
            FilterBank::new(Vec::new()),
            Err(AnalysisError::InvalidParameter(_))
        ));
    }

    #[test]
    fn flat_spectrum_over_two_disjoint_bands() {
        let axis: Vec<f32> = (0..20).map(|i| i as f32 * 10.0 + 5.0).collect();
        let mut bank = FilterBank::new([
            FilterSpec::uniform(50.0, 50.0, BLUE),
            FilterSpec::uniform(150.0, 50.0, RED),
        ])
        .unwrap();
        let energies = bank.evaluate(&frame(vec![10.0; 20], &axis)).unwrap();
        assert_eq!(energies.len(), 2);
        assert!((energies[0] - energies[1]).abs() < 1e-5);
        assert!((energies[0] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn identical_axis_reuses_weights() {
        let axis: Vec<f32> = (0..64).map(|i| i as f32 * 20.0).collect();
        let mut bank = FilterBank::new([FilterSpec::gaussian(300.0, 40.0, RED)]).unwrap();

        bank.evaluate(&frame(vec![1.0; 64], &axis)).unwrap();
        // Different allocation, same values
        bank.evaluate(&frame(vec![2.0; 64], &axis)).unwrap();
        assert_eq!(bank.recompute_count(0), Some(1));

        let shifted: Vec<f32> = axis.iter().map(|f| f + 1.0).collect();
        bank.evaluate(&frame(vec![1.0; 64], &shifted)).unwrap();
        assert_eq!(bank.recompute_count(0), Some(2));

        bank.evaluate(&frame(vec![1.0; 32], &axis[..32])).unwrap();
        assert_eq!(bank.recompute_count(0), Some(3));
    }

    #[test]
    fn changed_axis_changes_result() {
        let mut bank = FilterBank::new([FilterSpec::uniform(100.0, 10.0, RED)]).unwrap();
        let inside = bank.evaluate(&frame(vec![1.0; 3], &[95.0, 100.0, 105.0])).unwrap();
        let outside = bank.evaluate(&frame(vec![1.0; 3], &[195.0, 200.0, 205.0])).unwrap();
        assert!(inside[0] > 0.0);
        assert_eq!(outside[0], 0.0);
    }

    #[test]
    fn negative_amplitude_is_rejected_without_touching_cache() {
        let mut bank = FilterBank::new([FilterSpec::uniform(100.0, 50.0, RED)]).unwrap();
        let err = bank
            .evaluate(&frame(vec![1.0, -1.0, 1.0], &[80.0, 100.0, 120.0]))
            .unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::InvalidAmplitude { value, frequency } if value == -1.0 && frequency == 100.0
        ));
        assert_eq!(bank.recompute_count(0), Some(0));
    }

    #[test]
    fn early_exit_skips_energy_beyond_the_lobe() {
        let spec = FilterSpec::gaussian(20.0, 5.0, RED);
        let mask = FilterMask::new(spec.clone()).unwrap();
        let mut bank = FilterBank::new([spec]).unwrap();
        // At 50 Hz the weight is ~1e-9: past the lobe, so the huge amplitude
        // there must not be counted.
        let energies = bank
            .evaluate(&frame(vec![1.0, 1.0, 1.0, 1e9], &[10.0, 20.0, 40.0, 50.0]))
            .unwrap();
        let expected = mask.weight(10.0) + mask.weight(20.0) + mask.weight(40.0);
        assert!((energies[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn negligible_leading_tail_does_not_stop_the_sum() {
        let spec = FilterSpec::gaussian(440.0, 20.0, RED);
        let mask = FilterMask::new(spec.clone()).unwrap();
        let mut bank = FilterBank::new([spec]).unwrap();
        let axis = [300.0, 340.0, 420.0, 440.0, 460.0];
        let energies = bank.evaluate(&frame(vec![1.0; 5], &axis)).unwrap();
        let expected: f32 = axis.iter().map(|&f| mask.weight(f)).sum();
        assert!(energies[0] > 0.0);
        assert!((energies[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn very_wide_mask_is_summed_in_full() {
        // Peak weight 5e-8 is itself below the negligible threshold.
        let mut bank = FilterBank::new([FilterSpec::uniform(25.0, 1e7, RED)]).unwrap();
        let energies = bank
            .evaluate(&frame(vec![1.0; 4], &[10.0, 20.0, 30.0, 40.0]))
            .unwrap();
        let expected = 4.0 / 2e7;
        assert!((energies[0] - expected).abs() < 1e-3 * expected);
    }

    #[test]
    fn non_monotonic_axis_disables_early_exit() {
        let mut bank = FilterBank::new([FilterSpec::uniform(20.0, 15.0, RED)]).unwrap();
        // Second in-band bin comes after an out-of-band one.
        let energies = bank
            .evaluate(&frame(vec![1.0, 1.0, 1.0], &[10.0, 50.0, 20.0]))
            .unwrap();
        assert!((energies[0] - 2.0 / 30.0).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn gaussian_is_symmetric_and_decreasing(
            center in 1.0f32..1_000.0,
            width in 10.0f32..500.0,
            d1 in 0.0f32..3.0,
            d2 in 0.0f32..3.0,
        ) {
            let mask = FilterMask::new(FilterSpec::gaussian(center, width, BLUE)).unwrap();
            let (near, far) = if d1 < d2 { (d1, d2) } else { (d2, d1) };
            let left = mask.weight(center - near * width);
            let right = mask.weight(center + near * width);
            prop_assert!((left - right).abs() <= 1e-3 * left);
            if far - near > 0.05 {
                prop_assert!(mask.weight(center + far * width) < right);
                prop_assert!(mask.weight(center - far * width) < left);
            }
        }
    }
}
