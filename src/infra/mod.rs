//! Infrastructure - configuration and metrics
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free pipeline counters

pub mod config;
pub mod metrics;

// Re-export commonly used types
pub use config::{Config, StoreBackend};
pub use metrics::{Metrics, MetricsSummary};
