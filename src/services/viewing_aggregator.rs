//! Hourly exhibit viewing percentages
//!
//! Detection counts are folded into 24 hour-of-day slots per exhibit,
//! summing across every observed day, then expressed as a percentage of a
//! fixed number of samples that make up a fully observed slot.

use crate::domain::{
    HourlyViewingPercentage, StoreError, ViewingBucket, ViewingRecord, HOURS_PER_DAY,
};
use crate::io::store::EventStore;
use chrono::{Datelike, Timelike};
use rustc_hash::FxHashMap;
use tracing::warn;

/// Samples in a fully observed hour slot
pub const DEFAULT_NORMALIZATION: f64 = 7200.0;

/// Turns viewing buckets into per-exhibit hourly percentages
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewingAggregator {
    normalization: f64,
}

impl Default for ViewingAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_NORMALIZATION)
    }
}

impl ViewingAggregator {
    pub fn new(normalization: f64) -> Self {
        Self { normalization }
    }

    pub fn normalization(&self) -> f64 {
        self.normalization
    }

    /// Fold bucketed counts into hour-of-day percentages
    ///
    /// Values are not capped: counts above the normalization constant give
    /// percentages above 100.
    pub fn hourly_percentages(&self, buckets: &[ViewingBucket]) -> HourlyViewingPercentage {
        let mut per_hour: FxHashMap<&str, [u64; HOURS_PER_DAY]> = FxHashMap::default();

        for bucket in buckets {
            let slots = per_hour.entry(bucket.exhibit_id.as_str()).or_insert([0; HOURS_PER_DAY]);
            match slots.get_mut(bucket.hour as usize) {
                Some(slot) => *slot += bucket.count,
                None => {
                    warn!(exhibit_id = %bucket.exhibit_id, hour = %bucket.hour, "viewing_bucket_bad_hour");
                }
            }
        }

        per_hour
            .into_iter()
            .map(|(exhibit_id, counts)| {
                let percentages = counts.map(|count| count as f64 / self.normalization * 100.0);
                (exhibit_id.to_string(), percentages)
            })
            .collect()
    }

    /// Percentages straight from raw records
    pub fn from_records(&self, records: &[ViewingRecord]) -> HourlyViewingPercentage {
        self.hourly_percentages(&bucket_viewing_records(records))
    }

    /// Percentages from the store's bucketed aggregation
    pub fn query(&self, store: &dyn EventStore) -> Result<HourlyViewingPercentage, StoreError> {
        let buckets = store.aggregate_viewing_by_exhibit_hour()?;
        Ok(self.hourly_percentages(&buckets))
    }
}

/// Group raw records by (exhibit, year, month, day, hour)
///
/// Output is sorted by exhibit then chronologically, matching what a store
/// with native bucketed aggregation returns.
pub fn bucket_viewing_records(records: &[ViewingRecord]) -> Vec<ViewingBucket> {
    let mut counts: FxHashMap<(&str, i32, u32, u32, u32), u64> = FxHashMap::default();
    for record in records {
        let ts = record.timestamp;
        *counts
            .entry((record.exhibit_id.as_str(), ts.year(), ts.month(), ts.day(), ts.hour()))
            .or_insert(0) += 1;
    }

    let mut buckets: Vec<ViewingBucket> = counts
        .into_iter()
        .map(|((exhibit_id, year, month, day, hour), count)| ViewingBucket {
            exhibit_id: exhibit_id.to_string(),
            year,
            month,
            day,
            hour,
            count,
        })
        .collect();
    buckets.sort_by(|a, b| {
        (a.exhibit_id.as_str(), a.year, a.month, a.day, a.hour)
            .cmp(&(b.exhibit_id.as_str(), b.year, b.month, b.day, b.hour))
    });
    buckets
}
