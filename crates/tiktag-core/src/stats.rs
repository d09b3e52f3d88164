//! Summary statistics over timing samples.

use itertools::Itertools;
use serde::Serialize;

/// Summary of a set of latency samples (cycles).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyStats {
    /// Number of samples
    pub count: usize,
    /// Smallest sample
    pub min: u64,
    /// Largest sample
    pub max: u64,
    /// Arithmetic mean
    pub mean: f64,
    /// Median
    pub median: u64,
    /// 90th percentile
    pub p90: u64,
    /// Median absolute deviation from the median
    pub mad: u64,
}

impl LatencyStats {
    /// Summarizes `samples`. Returns `None` for an empty slice.
    pub fn from_samples(samples: &[u64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let sorted = samples.iter().copied().sorted_unstable().collect_vec();
        let median = percentile(&sorted, 50.0);
        let deviations = sorted
            .iter()
            .map(|&s| s.abs_diff(median))
            .sorted_unstable()
            .collect_vec();
        let sum: u128 = sorted.iter().map(|&s| s as u128).sum();
        Some(LatencyStats {
            count: sorted.len(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            mean: sum as f64 / sorted.len() as f64,
            median,
            p90: percentile(&sorted, 90.0),
            mad: percentile(&deviations, 50.0),
        })
    }
}

/// Nearest-rank percentile of an ascending, non-empty slice.
pub fn percentile(sorted: &[u64], p: f64) -> u64 {
    assert!(!sorted.is_empty(), "percentile of empty sample set");
    let p = p.clamp(0.0, 100.0);
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

/// How far apart two sample distributions are.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Separation {
    /// Absolute difference of the medians
    pub median_gap: u64,
    /// Sum of both median absolute deviations
    pub noise: u64,
}

impl Separation {
    /// Compares two sample sets. Returns `None` if either is empty.
    pub fn between(a: &[u64], b: &[u64]) -> Option<Self> {
        let a = LatencyStats::from_samples(a)?;
        let b = LatencyStats::from_samples(b)?;
        Some(Self::from_stats(&a, &b))
    }

    /// Compares two summaries.
    pub fn from_stats(a: &LatencyStats, b: &LatencyStats) -> Self {
        Separation {
            median_gap: a.median.abs_diff(b.median),
            noise: a.mad + b.mad,
        }
    }

    /// `true` if the medians differ by more than twice the combined noise.
    pub fn is_detectable(&self) -> bool {
        self.median_gap > 0 && self.median_gap > 2 * self.noise
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_of_small_set() {
        let stats = LatencyStats::from_samples(&[5, 1, 3, 2, 4]).unwrap();
        assert_eq!(stats.count, 5);
        assert_eq!(stats.min, 1);
        assert_eq!(stats.max, 5);
        assert_eq!(stats.median, 3);
        assert_eq!(stats.p90, 5);
        assert_eq!(stats.mad, 1);
        assert!((stats.mean - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_samples_have_no_stats() {
        assert!(LatencyStats::from_samples(&[]).is_none());
        assert!(Separation::between(&[], &[1]).is_none());
    }

    #[test]
    fn percentile_nearest_rank() {
        let sorted: Vec<u64> = (1..=10).collect();
        assert_eq!(percentile(&sorted, 0.0), 1);
        assert_eq!(percentile(&sorted, 50.0), 5);
        assert_eq!(percentile(&sorted, 90.0), 9);
        assert_eq!(percentile(&sorted, 100.0), 10);
    }

    #[test]
    fn identical_distributions_are_not_separated() {
        let a = [100, 101, 99, 100, 102];
        let sep = Separation::between(&a, &a).unwrap();
        assert_eq!(sep.median_gap, 0);
        assert!(!sep.is_detectable());
    }

    #[test]
    fn overlapping_noise_hides_small_gap() {
        let a = [100, 120, 80, 110, 90];
        let b = [105, 125, 85, 115, 95];
        assert!(!Separation::between(&a, &b).unwrap().is_detectable());
    }

    #[test]
    fn distant_distributions_are_separated() {
        let fast = [40, 42, 38, 41, 39];
        let slow = [210, 190, 205, 200, 195];
        assert!(Separation::between(&fast, &slow).unwrap().is_detectable());
    }
}
