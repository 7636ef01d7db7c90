//! Time-bucketed aggregate shapes returned by the event store and served over HTTP

use crate::domain::types::RoomId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hours in a day; one viewing slot per hour
pub const HOURS_PER_DAY: usize = 24;

/// Exhibit id -> viewing percentage per hour of day (index 0-23)
pub type HourlyViewingPercentage = BTreeMap<String, [f64; HOURS_PER_DAY]>;

/// Detection count for one exhibit within one calendar hour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewingBucket {
    pub exhibit_id: String,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub count: u64,
}

/// Grouping key of a visitor aggregate, serialized as `_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VisitorBucketKey {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub room_id: RoomId,
}

/// Sum of visitor-count snapshots for one room within one calendar hour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlyVisitorAggregate {
    #[serde(rename = "_id")]
    pub key: VisitorBucketKey,
    pub total_visitor_count: u64,
}
