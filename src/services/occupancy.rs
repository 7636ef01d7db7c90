//! Room occupancy tracking
//!
//! Rooms are visited in order. A detection at the entrance of room R means a
//! visitor arrived in R, and unless R is the entry room, that the visitor left
//! room R-1. Counts are clamped at zero, so lost events can undercount but
//! never produce a negative occupancy.

use crate::domain::{IngestError, RoomId, RoomTransition, VisitorCountRecord};
use crate::io::store::EventStore;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Snapshots produced by one transition
///
/// `arrival` is the count of the room that was entered and feeds the hourly
/// visitor totals. `departure` is the count left behind in the previous room;
/// it is persisted on its own stream and never aggregated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionSnapshots {
    pub arrival: VisitorCountRecord,
    pub departure: Option<VisitorCountRecord>,
}

/// Occupancy state shared between the tracker and read-only observers
pub type SharedOccupancy = Arc<Mutex<OccupancyState>>;

/// Current visitor count per known room
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct OccupancyState {
    counts: BTreeMap<RoomId, u32>,
}

impl OccupancyState {
    /// All rooms `0..room_count` start empty
    pub fn new(room_count: u32) -> Self {
        let counts = (0..i64::from(room_count)).map(|id| (RoomId(id), 0)).collect();
        Self { counts }
    }

    pub fn shared(room_count: u32) -> SharedOccupancy {
        Arc::new(Mutex::new(Self::new(room_count)))
    }

    pub fn count(&self, room_id: RoomId) -> Option<u32> {
        self.counts.get(&room_id).copied()
    }

    pub fn contains(&self, room_id: RoomId) -> bool {
        self.counts.contains_key(&room_id)
    }

    pub fn rooms(&self) -> impl Iterator<Item = (RoomId, u32)> + '_ {
        self.counts.iter().map(|(room, count)| (*room, *count))
    }

    pub fn total(&self) -> u64 {
        self.counts.values().map(|c| u64::from(*c)).sum()
    }

    /// Apply a transition and return the post-transition snapshots
    ///
    /// Both rooms are validated before anything is mutated.
    pub fn apply(
        &mut self,
        transition: &RoomTransition,
    ) -> Result<TransitionSnapshots, IngestError> {
        let room_id = transition.room_id;
        if !self.contains(room_id) {
            return Err(IngestError::UnknownRoom(room_id));
        }
        let previous = room_id.previous();
        if let Some(prev) = previous {
            if !self.contains(prev) {
                return Err(IngestError::UnknownRoom(prev));
            }
        }

        let current = if transition.detected { self.enter(room_id) } else { self.get(room_id) };
        let arrival = VisitorCountRecord {
            room_id,
            visitor_count: current,
            timestamp: transition.timestamp,
        };

        let departure = previous.map(|prev| VisitorCountRecord {
            room_id: prev,
            visitor_count: self.leave(prev),
            timestamp: transition.timestamp,
        });

        Ok(TransitionSnapshots { arrival, departure })
    }

    fn get(&self, room_id: RoomId) -> u32 {
        self.counts.get(&room_id).copied().unwrap_or(0)
    }

    fn enter(&mut self, room_id: RoomId) -> u32 {
        let count = self.counts.entry(room_id).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    fn leave(&mut self, room_id: RoomId) -> u32 {
        let count = self.counts.entry(room_id).or_insert(0);
        *count = count.saturating_sub(1);
        *count
    }
}

/// Applies room transitions and persists the resulting snapshots
///
/// Counts are updated under the occupancy lock; the lock is released before
/// the store appends so readers are never blocked on disk I/O. There is a
/// single tracker per state, so snapshots reach the store in apply order.
pub struct OccupancyTracker {
    state: SharedOccupancy,
    store: Arc<dyn EventStore>,
}

impl OccupancyTracker {
    pub fn new(state: SharedOccupancy, store: Arc<dyn EventStore>) -> Self {
        Self { state, store }
    }

    pub fn apply(&self, transition: &RoomTransition) -> Result<TransitionSnapshots, IngestError> {
        let snapshots = self.state.lock().apply(transition)?;

        let arrival = &snapshots.arrival;
        self.store.append_visitor_count(arrival)?;
        debug!(room_id = %arrival.room_id, visitor_count = %arrival.visitor_count, "visitor_count_appended");

        if let Some(departure) = &snapshots.departure {
            self.store.append_departure_count(departure)?;
            debug!(room_id = %departure.room_id, visitor_count = %departure.visitor_count, "departure_count_appended");
        }
        Ok(snapshots)
    }

    /// Copy of the current counts
    pub fn snapshot(&self) -> OccupancyState {
        self.state.lock().clone()
    }
}
