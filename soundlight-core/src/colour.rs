//! # Colour Mapping Module
//!
//! Turns band energies into the colour mix of the LED strip:
//! 1. [`normalize`] scales the energies to a unit-sum colour vector
//! 2. [`expand`] hands every filter a contiguous run of LEDs whose length
//!    is proportional to its share of the mix
//!
//! The expansion is a piecewise-constant quantile map, so neighbouring
//! filters meet at hard colour boundaries rather than blending.

use crate::{AnalysisError, Result, Rgb};

/// Tolerance on `sum(colour_vector) == 1`.
pub const UNIT_SUM_EPSILON: f32 = 1e-5;

/// Band-energy sums at or below this cannot be normalised.
const DEGENERATE_SUM: f32 = 1e-12;

/// Divides every energy by the total so the result sums to one.
///
/// # Errors
/// * `DegenerateSpectrum` if the energies sum to (nearly) zero or to a
///   non-finite value
pub fn normalize(energies: &[f32]) -> Result<Vec<f32>> {
    let sum: f32 = energies.iter().sum();
    if !sum.is_finite() || sum <= DEGENERATE_SUM {
        return Err(AnalysisError::DegenerateSpectrum { sum });
    }
    Ok(energies.iter().map(|e| e / sum).collect())
}

/// Assigns one filter colour to each of `led_count` positions.
///
/// LED `i` gets the colour of the first filter whose cumulative weight
/// exceeds `i / led_count`. If rounding keeps the cumulative sum from ever
/// exceeding it, the last filter's colour is used.
///
/// # Errors
/// * `NotNormalized` if the vector does not sum to one within
///   [`UNIT_SUM_EPSILON`]
/// * `InvalidParameter` if `colours` and `colour_vector` differ in length
///   or are empty
pub fn expand(colour_vector: &[f32], colours: &[Rgb], led_count: usize) -> Result<Vec<Rgb>> {
    if colour_vector.len() != colours.len() || colours.is_empty() {
        return Err(AnalysisError::InvalidParameter(format!(
            "{} colour weights for {} filter colours",
            colour_vector.len(),
            colours.len()
        )));
    }
    let sum: f32 = colour_vector.iter().sum();
    if !sum.is_finite() || (sum - 1.0).abs() > UNIT_SUM_EPSILON {
        return Err(AnalysisError::NotNormalized { sum });
    }

    let last = colours.len() - 1;
    let mut result = Vec::with_capacity(led_count);
    let mut filter = 0;
    let mut cumulative = colour_vector[0];
    for i in 0..led_count {
        let position = i as f32 / led_count as f32;
        // Positions only grow, so the search resumes where it left off.
        while cumulative <= position && filter < last {
            filter += 1;
            cumulative += colour_vector[filter];
        }
        result.push(colours[filter]);
    }
    Ok(result)
}
