//! Rowing monitor telemetry: transport, decoding and derived metrics.

pub mod ant;
pub mod commands;
pub mod counters;
pub mod forces;
pub mod frames;
pub mod manager;
pub mod metrics;
pub mod types;

pub use ant::{AntDriver, AntError, AntEvent, HeartRateReceiver};
pub use commands::{encode_command, parse_command_response, CommandOpcode, CommandStatus};
pub use counters::{accumulate, CounterAccumulator};
pub use forces::ForceCurveAssembler;
pub use frames::{decode_battery_level, decode_extended_metrics, FrameDecoder};
pub use manager::{MonitorManager, RetryBudget};
pub use metrics::MetricsEngine;
pub use types::{
    ConnectionStatus, DecodeError, ExtendedMetricsSample, HandleForceCurve, MonitorConfig,
    MonitorError, MonitorEvent, RawCounterSample, RowingMetrics, SessionBaseline, TriState,
    WireFormat,
};
