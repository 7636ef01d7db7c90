//! Ingestion - consumes decoded presence events and persists them
//!
//! The ingestion task is the single writer of room occupancy. It dispatches
//! each event to the occupancy tracker or the viewing recorder and logs
//! anything that could not be stored.


use crate::domain::{IngestError, PresenceEvent};
use crate::infra::metrics::Metrics;
use crate::io::store::EventStore;
use crate::services::occupancy::{OccupancyTracker, SharedOccupancy};
use crate::services::viewing_recorder::ViewingRecorder;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Routes presence events to the tracker and recorder
pub struct IngestService {
    tracker: OccupancyTracker,
    recorder: ViewingRecorder,
    metrics: Arc<Metrics>,
}

impl IngestService {
    pub fn new(occupancy: SharedOccupancy, store: Arc<dyn EventStore>, metrics: Arc<Metrics>) -> Self {
        Self {
            tracker: OccupancyTracker::new(occupancy, store.clone()),
            recorder: ViewingRecorder::new(store),
            metrics,
        }
    }

    /// Consume events on the blocking pool until the channel closes
    ///
    /// Store appends are synchronous, so they never run on a runtime worker.
    pub async fn run(self, event_rx: mpsc::Receiver<PresenceEvent>) {
        if let Err(e) = tokio::task::spawn_blocking(move || self.run_blocking(event_rx)).await {
            error!(error = %e, "ingest_task_failed");
        }
    }

    /// Consume events on the current thread until the channel closes
    ///
    /// Must not be called from within an async context.
    pub fn run_blocking(&self, mut event_rx: mpsc::Receiver<PresenceEvent>) {
        while let Some(event) = event_rx.blocking_recv() {
            if let Err(e) = self.handle(&event) {
                self.report(&event, &e);
            }
        }
        info!("ingest_stopped");
    }

    /// Apply a single event
    pub fn handle(&self, event: &PresenceEvent) -> Result<(), IngestError> {
        match event {
            PresenceEvent::RoomTransition(transition) => {
                let snapshots = self.tracker.apply(transition)?;
                self.metrics.record_room_transition();
                info!(
                    room_id = %transition.room_id,
                    detected = %transition.detected,
                    visitor_count = %snapshots.arrival.visitor_count,
                    previous_count = ?snapshots.departure.map(|r| r.visitor_count),
                    "room_transition"
                );
            }
            PresenceEvent::ExhibitDetection(detection) => {
                if let Some(record) = self.recorder.record(detection)? {
                    self.metrics.record_viewing();
                    info!(
                        exhibit_id = %record.exhibit_id,
                        room_id = %detection.room_id,
                        "exhibit_viewed"
                    );
                }
            }
        }
        Ok(())
    }

    fn report(&self, event: &PresenceEvent, err: &IngestError) {
        match err {
            IngestError::UnknownRoom(room_id) => {
                self.metrics.record_unknown_room_dropped();
                warn!(room_id = %room_id, event = %event.as_str(), "unknown_room_dropped");
            }
            IngestError::StoreWriteFailure(e) => {
                self.metrics.record_store_write_failure();
                error!(error = %e, event = %event.as_str(), room_id = %event.room_id(), "store_write_failed");
            }
            other => {
                warn!(error = %other, event = %event.as_str(), "ingest_failed");
            }
        }
    }
}
