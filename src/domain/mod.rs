//! Domain models - presence events, persisted records and aggregates
//!
//! This module contains the canonical data types used throughout the system:
//! - `PresenceEvent` - decoded sensor events (room transitions, exhibit detections)
//! - `VisitorCountRecord` / `ViewingRecord` - immutable persisted records
//! - `HourlyVisitorAggregate` / `HourlyViewingPercentage` - derived statistics
//! - `IngestError` / `StoreError` - error taxonomy

pub mod aggregates;
pub mod error;
pub mod types;

// Re-export commonly used types at module level
pub use aggregates::{
    HourlyViewingPercentage, HourlyVisitorAggregate, ViewingBucket, VisitorBucketKey,
    HOURS_PER_DAY,
};
pub use error::{IngestError, StoreError};
pub use types::{
    ExhibitDetection, PresenceEvent, RoomId, RoomTransition, ViewingRecord, VisitorCountRecord,
};
