//! Threshold classification of timing samples.
//!
//! Sits downstream of the oracle: the probe only measures, this decides. A classifier is
//! calibrated from two reference sample sets (a line known to be cached and one known to
//! be cold) and then labels new samples against the midpoint of their medians.

use crate::stats::LatencyStats;
use serde::Serialize;

/// Label assigned to one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AccessClass {
    /// Latency at or below the threshold
    Cached,
    /// Latency above the threshold
    Uncached,
}

/// Midpoint classifier between a fast and a slow reference distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThresholdClassifier {
    threshold: u64,
}

impl ThresholdClassifier {
    /// Uses a fixed threshold in cycles.
    pub const fn with_threshold(threshold: u64) -> Self {
        ThresholdClassifier { threshold }
    }

    /// Calibrates from reference samples. Returns `None` if either set is empty or the
    /// fast set is not faster than the slow one.
    pub fn calibrate(fast: &[u64], slow: &[u64]) -> Option<Self> {
        let fast = LatencyStats::from_samples(fast)?;
        let slow = LatencyStats::from_samples(slow)?;
        if fast.median >= slow.median {
            return None;
        }
        Some(Self::with_threshold(
            fast.median + (slow.median - fast.median) / 2,
        ))
    }

    /// The threshold in cycles.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Labels one sample.
    pub fn classify(&self, cycles: u64) -> AccessClass {
        if cycles <= self.threshold {
            AccessClass::Cached
        } else {
            AccessClass::Uncached
        }
    }

    /// Fraction of `samples` labelled [`AccessClass::Cached`]; `0.0` for no samples.
    pub fn cached_fraction(&self, samples: &[u64]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let cached = samples
            .iter()
            .filter(|&&s| self.classify(s) == AccessClass::Cached)
            .count();
        cached as f64 / samples.len() as f64
    }
}
