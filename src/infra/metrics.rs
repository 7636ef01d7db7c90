//! Lock-free pipeline counters and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//!
//! NOTE: All atomics use Relaxed ordering: these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Pipeline counters shared between the link, ingestion and HTTP tasks
#[derive(Debug)]
pub struct Metrics {
    started_at: Instant,
    messages_received: AtomicU64,
    malformed_dropped: AtomicU64,
    unknown_room_dropped: AtomicU64,
    room_transitions: AtomicU64,
    viewing_records: AtomicU64,
    store_write_failures: AtomicU64,
    reconnect_attempts: AtomicU64,
    events_dropped: AtomicU64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSummary {
    pub uptime_secs: u64,
    pub messages_received: u64,
    pub malformed_dropped: u64,
    pub unknown_room_dropped: u64,
    pub room_transitions: u64,
    pub viewing_records: u64,
    pub store_write_failures: u64,
    pub reconnect_attempts: u64,
    pub events_dropped: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            uptime_secs = %self.uptime_secs,
            messages = %self.messages_received,
            malformed = %self.malformed_dropped,
            unknown_room = %self.unknown_room_dropped,
            transitions = %self.room_transitions,
            viewings = %self.viewing_records,
            store_failures = %self.store_write_failures,
            reconnects = %self.reconnect_attempts,
            dropped = %self.events_dropped,
            "metrics"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            messages_received: AtomicU64::new(0),
            malformed_dropped: AtomicU64::new(0),
            unknown_room_dropped: AtomicU64::new(0),
            room_transitions: AtomicU64::new(0),
            viewing_records: AtomicU64::new(0),
            store_write_failures: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_malformed_dropped(&self) {
        self.malformed_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unknown_room_dropped(&self) {
        self.unknown_room_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_room_transition(&self) {
        self.room_transitions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_viewing(&self) {
        self.viewing_records.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_store_write_failure(&self) {
        self.store_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Load all counters without resetting them
    pub fn report(&self) -> MetricsSummary {
        MetricsSummary {
            uptime_secs: self.started_at.elapsed().as_secs(),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
            unknown_room_dropped: self.unknown_room_dropped.load(Ordering::Relaxed),
            room_transitions: self.room_transitions.load(Ordering::Relaxed),
            viewing_records: self.viewing_records.load(Ordering::Relaxed),
            store_write_failures: self.store_write_failures.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_message_received();
        metrics.record_message_received();
        metrics.record_malformed_dropped();
        metrics.record_room_transition();
        metrics.record_reconnect_attempt();

        let summary = metrics.report();
        assert_eq!(summary.messages_received, 2);
        assert_eq!(summary.malformed_dropped, 1);
        assert_eq!(summary.room_transitions, 1);
        assert_eq!(summary.reconnect_attempts, 1);
        assert_eq!(summary.viewing_records, 0);
    }

    #[test]
    fn test_report_does_not_reset() {
        let metrics = Metrics::new();
        metrics.record_viewing();
        assert_eq!(metrics.report().viewing_records, 1);
        assert_eq!(metrics.report().viewing_records, 1);
    }
}
