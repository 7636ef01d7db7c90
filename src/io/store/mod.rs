//! Event store - append-only persistence for visitor counts and viewings
//!
//! The store is a collaborator: ingestion only appends, the HTTP layer only
//! runs the two bucketed aggregation queries. Visitor counts are kept as two
//! streams: arrival snapshots of the room that was entered, which feed the
//! hourly totals, and departure snapshots of the room that was left, which
//! are kept for audit only. Backends:
//! - `memory` - in-process vectors, grouping done by the aggregators
//! - `sqlite` - rusqlite database, grouping done in SQL

pub mod memory;
pub mod sqlite;

use crate::domain::{
    HourlyVisitorAggregate, StoreError, ViewingBucket, ViewingRecord, VisitorCountRecord,
};
use crate::infra::config::{Config, StoreBackend};
use std::sync::Arc;
use tracing::info;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Persistence interface used by ingestion and aggregation
///
/// Implementations must tolerate concurrent appends and reads; appended
/// records are immutable.
pub trait EventStore: Send + Sync {
    /// Arrival snapshot: count of the room that was just entered
    fn append_visitor_count(&self, record: &VisitorCountRecord) -> Result<(), StoreError>;

    /// Departure snapshot: count left behind in the previous room
    fn append_departure_count(&self, record: &VisitorCountRecord) -> Result<(), StoreError>;

    fn append_viewing(&self, record: &ViewingRecord) -> Result<(), StoreError>;

    /// Detection counts per (exhibit, year, month, day, hour), sorted by
    /// exhibit then chronologically
    fn aggregate_viewing_by_exhibit_hour(&self) -> Result<Vec<ViewingBucket>, StoreError>;

    /// Summed arrival snapshots per (year, month, day, hour, room), sorted
    /// chronologically then by room
    fn aggregate_visitor_by_time_room(&self) -> Result<Vec<HourlyVisitorAggregate>, StoreError>;
}

/// Open the backend selected in config
pub fn open_store(config: &Config) -> anyhow::Result<Arc<dyn EventStore>> {
    let store: Arc<dyn EventStore> = match config.store_backend() {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(config.store_path())?),
    };
    info!(backend = %config.store_backend().as_str(), path = %config.store_path(), "store_opened");
    Ok(store)
}
