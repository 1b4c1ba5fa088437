//! RustRow - Rowing Monitor Companion
//!
//! An open-source desktop companion for BLE/ANT+ rowing ergometer
//! monitors. Decodes the monitor's binary telemetry protocol, derives
//! rowing performance metrics (pace, power, stroke rate, distance), and
//! streams them live to a consumer.

pub mod monitor;
pub mod storage;

// Re-export commonly used types
pub use monitor::manager::MonitorManager;
pub use monitor::metrics::MetricsEngine;
pub use monitor::types::{MonitorEvent, RowingMetrics};
pub use storage::config::MonitorSettings;
