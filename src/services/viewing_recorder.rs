//! Exhibit viewing recorder

use crate::domain::{ExhibitDetection, IngestError, ViewingRecord};
use crate::io::store::EventStore;
use std::sync::Arc;
use tracing::debug;

/// Persists one viewing record per positive exhibit detection
pub struct ViewingRecorder {
    store: Arc<dyn EventStore>,
}

impl ViewingRecorder {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Returns the appended record, or `None` when there was nothing to record
    pub fn record(&self, detection: &ExhibitDetection) -> Result<Option<ViewingRecord>, IngestError> {
        let Some(exhibit_id) = detection.exhibit_id.as_ref().filter(|_| detection.detected) else {
            debug!(room_id = %detection.room_id, detected = %detection.detected, "viewing_skipped");
            return Ok(None);
        };

        let record = ViewingRecord { exhibit_id: exhibit_id.clone(), timestamp: detection.timestamp };
        self.store.append_viewing(&record)?;
        Ok(Some(record))
    }
}
