//! Infrastructure - configuration, metrics, and broker
//!
//! - `config` - TOML configuration with explicit validation
//! - `metrics` - Lock-free counters and latency histogram
//! - `broker` - Optional embedded MQTT broker (rumqttd) for single-box lanes

pub mod broker;
pub mod config;
pub mod metrics;

pub use config::{Config, ConfigError};
pub use metrics::{Metrics, MetricsSummary};
