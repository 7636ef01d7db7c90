//! End-to-end pipeline tests: bus messages through decoding, ingestion and
//! aggregation, against both store backends

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use presence_stats::domain::{IngestError, RoomId};
use presence_stats::infra::Metrics;
use presence_stats::io::decoder::{self, Channel};
use presence_stats::io::{
    BusMessage, BusTransport, EventStore, LinkManager, MemoryStore, ReconnectPolicy, SqliteStore,
    TopicRouter,
};
use presence_stats::services::visitor_aggregator::hourly_visitor_totals;
use presence_stats::services::{IngestService, OccupancyState, ViewingAggregator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const ROOM: &str = "museum/presence/current";
const EXHIBIT: &str = "museum/room";
const LEGACY: &str = "museum/presence/previous";

/// Transport fed from a channel; stays connected once the feed is drained
struct ChannelTransport {
    rx: mpsc::Receiver<BusMessage>,
}

#[async_trait]
impl BusTransport for ChannelTransport {
    async fn connect(&mut self) -> Result<(), IngestError> {
        Ok(())
    }

    async fn subscribe(&mut self, _topics: &[String]) -> Result<(), IngestError> {
        Ok(())
    }

    async fn next_message(&mut self) -> Result<BusMessage, IngestError> {
        match self.rx.recv().await {
            Some(message) => Ok(message),
            None => std::future::pending().await,
        }
    }
}

fn message(topic: &str, payload: &str) -> BusMessage {
    BusMessage { topic: topic.to_string(), payload: Bytes::from(payload.to_string()) }
}

fn script() -> Vec<BusMessage> {
    vec![
        message(ROOM, r#"{"id": 0, "detected": true}"#),
        message(ROOM, r#"{"id": 0, "detected": true}"#),
        message(ROOM, r#"{"id": 1, "detected": true}"#),
        message(ROOM, "[]"),
        message(LEGACY, r#"{"id": 1}"#),
        message(ROOM, r#"{"id": 9, "detected": true}"#),
        message(ROOM, r#"{"id": 2, "detected": true}"#),
        message(EXHIBIT, r#"{"r_id": 1, "id": "A", "detected": true}"#),
        message(EXHIBIT, r#"{"r_id": 1, "id": "A", "detected": false}"#),
        message(EXHIBIT, r#"{"r_id": 1, "detected": true}"#),
        message(EXHIBIT, r#"{"r_id": 1, "id": "A", "detected": true}"#),
        message(EXHIBIT, r#"{"r_id": 1, "id": "A", "detected": true}"#),
    ]
}

async fn run_pipeline(store: Arc<dyn EventStore>) -> (Arc<Metrics>, OccupancyState) {
    let metrics = Arc::new(Metrics::new());
    let occupancy = OccupancyState::shared(3);
    let (bus_tx, bus_rx) = mpsc::channel(32);
    let (event_tx, event_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let link = LinkManager::new(
        ChannelTransport { rx: bus_rx },
        TopicRouter::new(ROOM, EXHIBIT, LEGACY),
        ReconnectPolicy::default(),
        event_tx,
        metrics.clone(),
    );
    let link_handle = tokio::spawn(link.run(shutdown_rx));

    let ingest = IngestService::new(occupancy.clone(), store, metrics.clone());
    let ingest_handle = tokio::spawn(ingest.run(event_rx));

    for m in script() {
        bus_tx.send(m).await.unwrap();
    }

    // the last message is a viewing, so three viewings means everything was handled
    tokio::time::timeout(Duration::from_secs(5), async {
        while metrics.report().viewing_records < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pipeline did not drain in time");

    shutdown_tx.send(true).unwrap();
    link_handle.await.unwrap().unwrap();
    ingest_handle.await.unwrap();

    let snapshot = occupancy.lock().clone();
    (metrics, snapshot)
}

fn assert_pipeline_results(store: &dyn EventStore, metrics: &Metrics, occupancy: &OccupancyState) {
    let summary = metrics.report();
    assert_eq!(summary.messages_received, 12);
    assert_eq!(summary.malformed_dropped, 1);
    assert_eq!(summary.unknown_room_dropped, 1);
    assert_eq!(summary.room_transitions, 4);
    assert_eq!(summary.viewing_records, 3);
    assert_eq!(summary.store_write_failures, 0);

    assert_eq!(occupancy.count(RoomId(0)), Some(1));
    assert_eq!(occupancy.count(RoomId(1)), Some(0));
    assert_eq!(occupancy.count(RoomId(2)), Some(1));

    // arrival snapshots: room 0 -> 1, 2; room 1 -> 1; room 2 -> 1
    // departures (room 0 -> 1, room 1 -> 0) are persisted but not totalled
    let totals = hourly_visitor_totals(store).unwrap();
    let room_total = |room: i64| -> u64 {
        totals
            .iter()
            .filter(|agg| agg.key.room_id == RoomId(room))
            .map(|agg| agg.total_visitor_count)
            .sum()
    };
    assert_eq!(room_total(0), 3);
    assert_eq!(room_total(1), 1);
    assert_eq!(room_total(2), 1);

    let percentages = ViewingAggregator::default().query(store).unwrap();
    assert_eq!(percentages.len(), 1);
    let total: f64 = percentages["A"].iter().sum();
    assert!((total - 3.0 / 7200.0 * 100.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_pipeline_with_memory_store() {
    let store = Arc::new(MemoryStore::new());
    let (metrics, occupancy) = run_pipeline(store.clone()).await;
    assert_pipeline_results(store.as_ref(), &metrics, &occupancy);
    assert_eq!(store.visitor_counts().len(), 3);
    assert_eq!(store.departures().len(), 2);
    assert_eq!(store.viewings().len(), 3);
}

#[tokio::test]
async fn test_pipeline_with_sqlite_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("presence.db")).unwrap());
    let (metrics, occupancy) = run_pipeline(store.clone()).await;
    assert_pipeline_results(store.as_ref(), &metrics, &occupancy);
}

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, day, hour, minute, 0).unwrap()
}

/// Feed the same timestamped payloads into a store through the service
fn ingest_fixed(store: Arc<dyn EventStore>) {
    let service = IngestService::new(OccupancyState::shared(2), store, Arc::new(Metrics::new()));
    let feed = [
        (Channel::Room, ROOM, r#"{"id": 0, "detected": true}"#, at(1, 9, 5)),
        (Channel::Room, ROOM, r#"{"id": 0, "detected": true}"#, at(1, 9, 40)),
        (Channel::Room, ROOM, r#"{"id": 1, "detected": true}"#, at(1, 10, 1)),
        (Channel::Exhibit, EXHIBIT, r#"{"r_id": 0, "id": 7, "detected": true}"#, at(1, 9, 10)),
        (Channel::Exhibit, EXHIBIT, r#"{"r_id": 0, "id": 7, "detected": true}"#, at(2, 9, 50)),
        (Channel::Exhibit, EXHIBIT, r#"{"r_id": 1, "id": "B", "detected": true}"#, at(2, 23, 59)),
    ];
    for (channel, topic, payload, received_at) in feed {
        let event = decoder::decode(channel, topic, payload.as_bytes(), received_at)
            .unwrap()
            .unwrap();
        service.handle(&event).unwrap();
    }
}

#[test]
fn test_memory_and_sqlite_aggregate_identically() {
    let memory = Arc::new(MemoryStore::new());
    ingest_fixed(memory.clone());

    let dir = tempfile::tempdir().unwrap();
    let sqlite = Arc::new(SqliteStore::open(dir.path().join("presence.db")).unwrap());
    ingest_fixed(sqlite.clone());

    let memory_totals = hourly_visitor_totals(memory.as_ref()).unwrap();
    let sqlite_totals = hourly_visitor_totals(sqlite.as_ref()).unwrap();
    assert_eq!(memory_totals, sqlite_totals);

    // hour 9: room 0 arrivals 1 + 2; hour 10: room 1 arrival 1
    let summary: Vec<(u32, i64, u64)> = memory_totals
        .iter()
        .map(|agg| (agg.key.hour, agg.key.room_id.0, agg.total_visitor_count))
        .collect();
    assert_eq!(summary, vec![(9, 0, 3), (10, 1, 1)]);

    let aggregator = ViewingAggregator::default();
    let memory_viewing = aggregator.query(memory.as_ref()).unwrap();
    let sqlite_viewing = aggregator.query(sqlite.as_ref()).unwrap();
    assert_eq!(memory_viewing, sqlite_viewing);

    // exhibit 7 seen at 09:xx on two different days folds into one slot
    let slot = 2.0 / 7200.0 * 100.0;
    assert!((memory_viewing["7"][9] - slot).abs() < 1e-12);
    assert!((memory_viewing["B"][23] - 1.0 / 7200.0 * 100.0).abs() < 1e-12);
}
