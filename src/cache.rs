//! # Stage: Aggregation Cache
//!
//! ## Responsibility
//! Accumulates running total, sample count, min and max for one series
//! between flush ticks.
//!
//! ## Guarantees
//! - `ingest` is O(1) and allocation-free
//! - `min`/`max` are `None` exactly when no sample has been ingested
//! - Reset happens exactly once per flush via [`AggregationCache::take_bucket`]

use crate::window::Bucket;

/// Mutable state accumulated between flushes for one series.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AggregationCache {
    running_total: f64,
    sample_count: u64,
    min: Option<f64>,
    max: Option<f64>,
}

impl AggregationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one sample into the running statistics.
    pub fn ingest(&mut self, value: f64) {
        self.running_total += value;
        self.sample_count += 1;
        if self.min.map_or(true, |m| value < m) {
            self.min = Some(value);
        }
        if self.max.map_or(true, |m| value > m) {
            self.max = Some(value);
        }
    }

    /// Zero the total and count and clear min/max.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Mean of the samples so far, or `None` if there were none.
    pub fn average(&self) -> Option<f64> {
        if self.sample_count == 0 {
            None
        } else {
            Some(self.running_total / self.sample_count as f64)
        }
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn running_total(&self) -> f64 {
        self.running_total
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    /// Build the bucket for the interval ending at `timestamp`, then reset.
    pub fn take_bucket(&mut self, timestamp: u64) -> Bucket {
        let bucket = Bucket {
            timestamp,
            average: self.average(),
            min: self.min,
            max: self.max,
        };
        self.reset();
        bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn test_new_cache_is_empty() {
        let c = AggregationCache::new();
        assert!(c.is_empty());
        assert_eq!(c.average(), None);
        assert_eq!(c.min(), None);
        assert_eq!(c.max(), None);
    }

    #[rstest]
    #[case(&[2.0, 4.0, 6.0], 4.0, 2.0, 6.0)]
    #[case(&[5.0], 5.0, 5.0, 5.0)]
    #[case(&[-1.0, 1.0], 0.0, -1.0, 1.0)]
    #[case(&[3.0, 3.0, 3.0, 3.0], 3.0, 3.0, 3.0)]
    fn test_ingest_statistics(
        #[case] samples: &[f64],
        #[case] avg: f64,
        #[case] min: f64,
        #[case] max: f64,
    ) {
        let mut c = AggregationCache::new();
        for &s in samples {
            c.ingest(s);
        }
        assert!((c.average().unwrap() - avg).abs() < 1e-9);
        assert_eq!(c.min(), Some(min));
        assert_eq!(c.max(), Some(max));
        assert_eq!(c.sample_count(), samples.len() as u64);
    }

    #[test]
    fn test_zero_sample_is_a_real_minimum() {
        let mut c = AggregationCache::new();
        c.ingest(3.0);
        c.ingest(0.0);
        assert_eq!(c.min(), Some(0.0));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut c = AggregationCache::new();
        c.ingest(10.0);
        c.reset();
        assert_eq!(c, AggregationCache::default());
        assert_eq!(c.running_total(), 0.0);
    }

    #[test]
    fn test_take_bucket_resets_cache() {
        let mut c = AggregationCache::new();
        c.ingest(2.0);
        c.ingest(4.0);
        c.ingest(6.0);
        let b = c.take_bucket(99);
        assert_eq!(b, Bucket { timestamp: 99, average: Some(4.0), min: Some(2.0), max: Some(6.0) });
        assert!(c.is_empty());
    }

    #[test]
    fn test_take_bucket_without_samples_is_all_none() {
        let mut c = AggregationCache::new();
        assert_eq!(c.take_bucket(1), Bucket::empty(1));
    }

    proptest! {
        #[test]
        fn bucket_min_le_avg_le_max(samples in prop::collection::vec(-1.0e6f64..1.0e6, 1..100)) {
            let mut c = AggregationCache::new();
            for &s in &samples {
                c.ingest(s);
            }
            let b = c.take_bucket(0);
            let (min, avg, max) = (b.min.unwrap(), b.average.unwrap(), b.max.unwrap());
            prop_assert!(min <= max);
            prop_assert!(min - 1e-6 <= avg && avg <= max + 1e-6);
        }
    }
}
