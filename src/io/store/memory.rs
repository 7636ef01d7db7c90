//! In-memory event store

use super::EventStore;
use crate::domain::{
    HourlyVisitorAggregate, StoreError, ViewingBucket, ViewingRecord, VisitorCountRecord,
};
use crate::services::{viewing_aggregator, visitor_aggregator};
use parking_lot::RwLock;

/// Vectors behind read-write locks; aggregation is a full scan
#[derive(Debug, Default)]
pub struct MemoryStore {
    visitor_counts: RwLock<Vec<VisitorCountRecord>>,
    departures: RwLock<Vec<VisitorCountRecord>>,
    viewings: RwLock<Vec<ViewingRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every visitor-count record in append order
    pub fn visitor_counts(&self) -> Vec<VisitorCountRecord> {
        self.visitor_counts.read().clone()
    }

    /// Copy of every departure snapshot in append order
    pub fn departures(&self) -> Vec<VisitorCountRecord> {
        self.departures.read().clone()
    }

    /// Copy of every viewing record in append order
    pub fn viewings(&self) -> Vec<ViewingRecord> {
        self.viewings.read().clone()
    }
}

impl EventStore for MemoryStore {
    fn append_visitor_count(&self, record: &VisitorCountRecord) -> Result<(), StoreError> {
        self.visitor_counts.write().push(record.clone());
        Ok(())
    }

    fn append_departure_count(&self, record: &VisitorCountRecord) -> Result<(), StoreError> {
        self.departures.write().push(record.clone());
        Ok(())
    }

    fn append_viewing(&self, record: &ViewingRecord) -> Result<(), StoreError> {
        self.viewings.write().push(record.clone());
        Ok(())
    }

    fn aggregate_viewing_by_exhibit_hour(&self) -> Result<Vec<ViewingBucket>, StoreError> {
        Ok(viewing_aggregator::bucket_viewing_records(&self.viewings.read()))
    }

    fn aggregate_visitor_by_time_room(&self) -> Result<Vec<HourlyVisitorAggregate>, StoreError> {
        Ok(visitor_aggregator::aggregate_visitor_records(&self.visitor_counts.read()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RoomId;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_appends_are_kept_in_order() {
        let store = MemoryStore::new();
        let ts = Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap();
        for count in [1, 2, 1] {
            store
                .append_visitor_count(&VisitorCountRecord {
                    room_id: RoomId(1),
                    visitor_count: count,
                    timestamp: ts,
                })
                .unwrap();
        }
        let counts: Vec<u32> = store.visitor_counts().iter().map(|r| r.visitor_count).collect();
        assert_eq!(counts, vec![1, 2, 1]);
    }

    #[test]
    fn test_aggregates_over_scan() {
        let store = MemoryStore::new();
        let ts = Utc.with_ymd_and_hms(2026, 5, 1, 14, 30, 0).unwrap();
        store.append_viewing(&ViewingRecord { exhibit_id: "3".to_string(), timestamp: ts }).unwrap();
        store.append_viewing(&ViewingRecord { exhibit_id: "3".to_string(), timestamp: ts }).unwrap();

        let buckets = store.aggregate_viewing_by_exhibit_hour().unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].hour, 14);
        assert_eq!(buckets[0].count, 2);

        assert!(store.aggregate_visitor_by_time_room().unwrap().is_empty());
    }

    #[test]
    fn test_departures_are_kept_but_not_totalled() {
        let store = MemoryStore::new();
        let ts = Utc.with_ymd_and_hms(2026, 5, 1, 11, 0, 0).unwrap();
        let snapshot = |room: i64, count: u32| VisitorCountRecord {
            room_id: RoomId(room),
            visitor_count: count,
            timestamp: ts,
        };
        store.append_visitor_count(&snapshot(0, 1)).unwrap();
        store.append_visitor_count(&snapshot(0, 2)).unwrap();
        store.append_visitor_count(&snapshot(1, 1)).unwrap();
        store.append_departure_count(&snapshot(0, 1)).unwrap();

        assert_eq!(store.departures(), vec![snapshot(0, 1)]);
        let totals: Vec<(i64, u64)> = store
            .aggregate_visitor_by_time_room()
            .unwrap()
            .iter()
            .map(|agg| (agg.key.room_id.0, agg.total_visitor_count))
            .collect();
        assert_eq!(totals, vec![(0, 3), (1, 1)]);
    }
}
