//! Hourly visitor totals per room
//!
//! Sums every visitor-count snapshot that falls in the same calendar hour.
//! The result is a cumulative total of snapshots, not an occupancy reading.

use crate::domain::{HourlyVisitorAggregate, StoreError, VisitorBucketKey, VisitorCountRecord};
use crate::io::store::EventStore;
use chrono::{Datelike, Timelike};
use rustc_hash::FxHashMap;

/// Group records by (year, month, day, hour, room) and sum their counts
pub fn aggregate_visitor_records(records: &[VisitorCountRecord]) -> Vec<HourlyVisitorAggregate> {
    let mut totals: FxHashMap<VisitorBucketKey, u64> = FxHashMap::default();
    for record in records {
        let ts = record.timestamp;
        let key = VisitorBucketKey {
            year: ts.year(),
            month: ts.month(),
            day: ts.day(),
            hour: ts.hour(),
            room_id: record.room_id,
        };
        *totals.entry(key).or_insert(0) += u64::from(record.visitor_count);
    }

    let mut aggregates: Vec<HourlyVisitorAggregate> = totals
        .into_iter()
        .map(|(key, total_visitor_count)| HourlyVisitorAggregate { key, total_visitor_count })
        .collect();
    aggregates.sort_by_key(|agg| agg.key);
    aggregates
}

/// Hourly totals from the store's bucketed aggregation
pub fn hourly_visitor_totals(
    store: &dyn EventStore,
) -> Result<Vec<HourlyVisitorAggregate>, StoreError> {
    store.aggregate_visitor_by_time_room()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RoomId;
    use chrono::{TimeZone, Utc};

    fn record(room: i64, count: u32, day: u32, hour: u32, minute: u32) -> VisitorCountRecord {
        VisitorCountRecord {
            room_id: RoomId(room),
            visitor_count: count,
            timestamp: Utc.with_ymd_and_hms(2026, 6, day, hour, minute, 0).unwrap(),
        }
    }

    #[test]
    fn test_same_hour_counts_are_summed() {
        let records = vec![record(1, 3, 1, 10, 5), record(1, 5, 1, 10, 40)];
        let aggregates = aggregate_visitor_records(&records);
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].total_visitor_count, 8);
        assert_eq!(
            aggregates[0].key,
            VisitorBucketKey { year: 2026, month: 6, day: 1, hour: 10, room_id: RoomId(1) }
        );
    }

    #[test]
    fn test_sorted_chronologically_then_by_room() {
        let records = vec![
            record(1, 1, 2, 9, 0),
            record(0, 2, 1, 23, 0),
            record(0, 1, 2, 9, 30),
            record(1, 4, 1, 23, 10),
        ];
        let keys: Vec<(u32, u32, i64)> = aggregate_visitor_records(&records)
            .iter()
            .map(|a| (a.key.day, a.key.hour, a.key.room_id.0))
            .collect();
        assert_eq!(keys, vec![(1, 23, 0), (1, 23, 1), (2, 9, 0), (2, 9, 1)]);
    }

    #[test]
    fn test_different_hours_stay_separate() {
        let records = vec![record(0, 2, 1, 10, 59), record(0, 3, 1, 11, 0)];
        let totals: Vec<u64> =
            aggregate_visitor_records(&records).iter().map(|a| a.total_visitor_count).collect();
        assert_eq!(totals, vec![2, 3]);
    }
}
