//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `ingest` - Consumes decoded events, single writer of occupancy
//! - `occupancy` - Per-room visitor counts and transition rules
//! - `viewing_recorder` - Persists exhibit detections
//! - `viewing_aggregator` - Hour-of-day viewing percentages per exhibit
//! - `visitor_aggregator` - Hourly visitor totals per room

pub mod ingest;
pub mod occupancy;
pub mod viewing_aggregator;
pub mod viewing_recorder;
pub mod visitor_aggregator;

// Re-export commonly used types
pub use ingest::IngestService;
pub use occupancy::{OccupancyState, OccupancyTracker, SharedOccupancy};
pub use viewing_aggregator::ViewingAggregator;
pub use viewing_recorder::ViewingRecorder;
