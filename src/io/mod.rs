//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `decoder` - Topic routing and typed payload decoding
//! - `link` - Bus subscription with bounded reconnection
//! - `mqtt` - rumqttc transport behind the link
//! - `http` - Aggregate statistics, health and Prometheus endpoints
//! - `store` - Append-only event persistence

pub mod decoder;
pub mod http;
pub mod link;
pub mod mqtt;
pub mod store;

// Re-export commonly used types
pub use decoder::{Channel, TopicRouter};
pub use http::{start_api_server, ApiState};
pub use link::{BusMessage, BusTransport, LinkManager, LinkState, ReconnectPolicy};
pub use mqtt::MqttTransport;
pub use store::{open_store, EventStore, MemoryStore, SqliteStore};
