//! Peak detection — locate the tick impulse inside a window of samples.
//!
//! Both strategies are stateless. Max-magnitude picks the loudest sample
//! and is the default; threshold-crossing triggers on the first sample
//! that rises a fixed number of decibels above a reference level, which
//! lands earlier on the tick's leading edge.

use serde::{Deserialize, Serialize};

/// Strategy used to locate a tick inside one frame of samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeakDetectionMethod {
    /// Sample with the greatest absolute value.
    #[default]
    MaxMagnitude,
    /// First sample exceeding `db_cutoff` above the reference level.
    ThresholdCrossing,
}

impl PeakDetectionMethod {
    /// Run this strategy over `samples`.
    ///
    /// `reference` and `db_cutoff` are only consulted by
    /// [`PeakDetectionMethod::ThresholdCrossing`].
    pub fn locate(self, samples: &[f32], reference: f64, db_cutoff: f64) -> Option<usize> {
        match self {
            PeakDetectionMethod::MaxMagnitude => max_magnitude_index(samples),
            PeakDetectionMethod::ThresholdCrossing => {
                threshold_crossing_index(samples, reference, db_cutoff)
            }
        }
    }
}

/// Index of the sample with the greatest magnitude.
///
/// Returns `None` for a flat signal (every magnitude equal, including an
/// all-zero or empty slice). Ties resolve to the earliest index.
pub fn max_magnitude_index(samples: &[f32]) -> Option<usize> {
    let mut max_index = 0usize;
    let mut max_value = f32::NEG_INFINITY;
    let mut min_value = f32::INFINITY;

    for (i, &sample) in samples.iter().enumerate() {
        let magnitude = sample.abs();
        if magnitude > max_value {
            max_value = magnitude;
            max_index = i;
        }
        min_value = min_value.min(magnitude);
    }

    if samples.is_empty() || max_value == min_value {
        None
    } else {
        Some(max_index)
    }
}

/// Index of the first sample whose deviation from `reference` exceeds
/// `db_cutoff` decibels, i.e. `10·log10(|s − ref| / ref) > db_cutoff`.
///
/// A non-positive or non-finite reference cannot express a ratio and yields
/// `None`, so a silent stream never produces a tick.
pub fn threshold_crossing_index(samples: &[f32], reference: f64, db_cutoff: f64) -> Option<usize> {
    if !(reference.is_finite() && reference > 0.0) {
        return None;
    }

    samples.iter().position(|&sample| {
        let deviation = (sample as f64 - reference).abs();
        10.0 * (deviation / reference).log10() > db_cutoff
    })
}
