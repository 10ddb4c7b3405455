// soundlight-core/src/lib.rs

//! The core logic for the sound-reactive LED strip.
//! This crate is responsible for audio capture, spectrum analysis,
//! the frequency filter bank and the mapping of spectral energy to
//! per-LED colours. It is completely headless and contains no
//! command-line code.

pub mod capture;
pub mod colour;
pub mod config;
pub mod control;
pub mod emit;
pub mod error;
pub mod fft;
pub mod filter;
pub mod noise;
pub mod pipeline;
pub mod smoothing;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use error::{AnalysisError, CaptureError, ConfigError, ControlError, EmitError, Result};

/// An RGB triple with components in `[0, 1]`.
///
/// Serialises as a plain `[r, g, b]` array.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rgb(pub f32, pub f32, pub f32);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0.0, 0.0, 0.0);

    /// Whether every component lies in `[0, 1]`.
    pub fn is_valid(&self) -> bool {
        [self.0, self.1, self.2]
            .iter()
            .all(|c| (0.0..=1.0).contains(c))
    }
}

/// One analysis window: amplitudes paired 1:1 with a frequency axis.
///
/// The axis is shared behind an `Arc` so consecutive frames from the same
/// analyzer hand the filter bank the very same allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    amplitudes: Vec<f32>,
    frequencies: Arc<[f32]>,
}

impl Frame {
    /// Pairs amplitudes with a frequency axis, rejecting length mismatches.
    pub fn new(amplitudes: Vec<f32>, frequencies: Arc<[f32]>) -> Result<Self> {
        if amplitudes.len() != frequencies.len() {
            return Err(AnalysisError::FrameShapeMismatch {
                amplitudes: amplitudes.len(),
                frequencies: frequencies.len(),
            });
        }
        Ok(Self {
            amplitudes,
            frequencies,
        })
    }

    pub fn amplitudes(&self) -> &[f32] {
        &self.amplitudes
    }

    pub fn frequencies(&self) -> &Arc<[f32]> {
        &self.frequencies
    }

    pub fn len(&self) -> usize {
        self.amplitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amplitudes.is_empty()
    }

    /// Replaces the amplitudes, keeping the axis.
    pub(crate) fn with_amplitudes(&self, amplitudes: Vec<f32>) -> Self {
        debug_assert_eq!(amplitudes.len(), self.frequencies.len());
        Self {
            amplitudes,
            frequencies: Arc::clone(&self.frequencies),
        }
    }

    /// Translates the frame so that its smallest amplitude becomes exactly 0.
    ///
    /// A flat frame becomes all zeros.
    pub fn shift_to_floor(&self) -> Self {
        let min = self
            .amplitudes
            .iter()
            .copied()
            .fold(f32::INFINITY, f32::min);
        if !min.is_finite() {
            return self.clone();
        }
        let shifted = self
            .amplitudes
            .iter()
            .map(|&a| (a - min).max(0.0))
            .collect();
        self.with_amplitudes(shifted)
    }
}

/// Output of one successful running cycle.
#[derive(Debug, Clone)]
pub struct CycleOutput {
    /// Normalised per-filter mix weights (sum is 1)
    pub colour_vector: Vec<f32>,
    /// One colour per LED position
    pub colours: Vec<Rgb>,
}
