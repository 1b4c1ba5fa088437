//! Core types for the rowing monitor telemetry pipeline.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Which standard BLE profile the firmware uses to carry rowing telemetry.
///
/// The embedded firmware reuses either the Cycling Power Service or the
/// Cycling Speed and Cadence Service; the wire layout of the measurement
/// characteristic differs between the two. The active format is learned
/// once during service discovery and stays fixed for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// Cycling Power Service (0x1818) framing
    CyclingPower,
    /// Cycling Speed and Cadence Service (0x1816) framing
    SpeedCadence,
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireFormat::CyclingPower => write!(f, "Cycling Power"),
            WireFormat::SpeedCadence => write!(f, "Speed/Cadence"),
        }
    }
}

/// Connection state of the monitor link.
///
/// Owned exclusively by the connection manager; everything else observes it
/// read-only through events.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// Not connected
    #[default]
    Disconnected,
    /// Scanning for a monitor advertisement
    Searching,
    /// Connection in progress
    Connecting,
    /// Active connection
    Connected {
        /// Advertised device name
        device_name: String,
    },
    /// Lost the link unexpectedly, passively watching for the same device
    /// to advertise again
    ReconnectWatching,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Searching => write!(f, "Searching..."),
            ConnectionStatus::Connecting => write!(f, "Connecting..."),
            ConnectionStatus::Connected { device_name } => write!(f, "Connected to {device_name}"),
            ConnectionStatus::ReconnectWatching => write!(f, "Waiting for monitor..."),
        }
    }
}

/// One decoded hardware measurement frame.
///
/// The time fields are accumulated from wrapping 16-bit deltas and are
/// monotonically non-decreasing for the lifetime of one connection. A
/// session reset re-baselines the derived output but never rolls these
/// back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawCounterSample {
    /// Accumulated flywheel revolution event time in microseconds
    pub rev_time_us: u64,
    /// Raw cumulative revolution count, device-scaled (centimeters)
    pub distance_ticks: u32,
    /// Accumulated stroke event time in microseconds
    pub stroke_time_us: u64,
    /// Cumulative stroke count
    pub stroke_count: u16,
}

/// A 2-bit device setting echo.
///
/// `Undefined` means the firmware build does not support the setting at
/// all; it is a meaningful third state and must not be collapsed to a
/// boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriState {
    /// Setting not supported by this firmware (bit pattern 00)
    #[default]
    Undefined,
    /// Setting supported and disabled (bit pattern 01)
    Off,
    /// Setting supported and enabled (any other pattern)
    On,
}

impl TriState {
    /// Decode from the low two bits of a packed settings byte.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0b00 => TriState::Undefined,
            0b01 => TriState::Off,
            _ => TriState::On,
        }
    }
}

/// Decoded extended-metrics frame: device configuration echo plus the
/// power/drag counters the firmware computes itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtendedMetricsSample {
    /// Websocket delta-time logging setting echo
    pub log_to_websocket: TriState,
    /// SD-card logging setting echo
    pub log_to_sd_card: TriState,
    /// Firmware log level (0-6)
    pub log_level: u8,
    /// Average stroke power in watts
    pub avg_stroke_power: u16,
    /// Flywheel drag factor, reported as-is
    pub drag_factor: u32,
    /// Which BLE profile the firmware is currently broadcasting on
    pub ble_service_flag: u8,
}

/// Ordered force samples forming one stroke's force-over-time curve.
///
/// An empty curve is valid: a very light stroke can produce a terminator
/// frame with no samples.
pub type HandleForceCurve = Vec<f32>;

/// The derived metrics broadcast to consumers.
///
/// Every rate/speed field is computed strictly from the delta between the
/// current and the immediately previous counter sample. No field is ever
/// NaN or infinite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowingMetrics {
    /// Drive phase duration in seconds
    pub drive_duration_s: f64,
    /// Recovery phase duration in seconds
    pub recovery_duration_s: f64,
    /// Baseline-adjusted distance in meters
    pub distance_m: f64,
    /// Baseline-adjusted stroke count
    pub stroke_count: u16,
    /// Stroke rate in strokes per minute
    pub stroke_rate_spm: f64,
    /// Speed in meters per second
    pub speed_mps: f64,
    /// Distance covered per stroke in meters
    pub dist_per_stroke_m: f64,
    /// Peak handle force of the most recent stroke
    pub peak_force: f32,
    /// Average stroke power in watts, from the extended frame
    pub avg_stroke_power: u16,
    /// Drag factor, from the extended frame
    pub drag_factor: u32,
    /// Battery percentage, from the battery characteristic
    pub battery_percent: Option<u8>,
    /// Heart rate in BPM, from the ANT+ path
    pub heart_rate_bpm: Option<u8>,
    /// Active BLE service flag echoed by the firmware
    pub ble_service_flag: u8,
    /// Firmware log level echo (0-6)
    pub log_level: u8,
}

impl Default for RowingMetrics {
    fn default() -> Self {
        Self {
            drive_duration_s: 0.0,
            recovery_duration_s: 0.0,
            distance_m: 0.0,
            stroke_count: 0,
            stroke_rate_spm: 0.0,
            speed_mps: 0.0,
            dist_per_stroke_m: 0.0,
            peak_force: 0.0,
            avg_stroke_power: 0,
            drag_factor: 0,
            battery_percent: None,
            heart_rate_bpm: None,
            ble_service_flag: 0,
            log_level: 0,
        }
    }
}

/// Distance/stroke baseline captured by a session reset.
///
/// The underlying device counters keep accumulating across a reset so that
/// delta-based rate calculations stay correct; only the baseline moves.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionBaseline {
    /// Raw distance counter at reset time
    pub start_distance_ticks: u32,
    /// Raw stroke count at reset time
    pub start_stroke_count: u16,
}

/// Events pushed from the monitor pipeline to the consumer.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A rowing monitor was discovered during scanning
    Discovered {
        device_id: String,
        name: String,
        format: WireFormat,
        signal_strength: Option<i16>,
    },
    /// Connection status changed
    StatusChanged(ConnectionStatus),
    /// A derived metrics update passed the suppression filter
    Metrics(RowingMetrics),
    /// A settings command was acknowledged by the device
    CommandAck {
        opcode: u8,
        success: bool,
    },
    /// A characteristic stream exhausted its retry budget and was dropped;
    /// other streams stay alive
    StreamFailed {
        characteristic: &'static str,
    },
    /// Error surfaced to the user
    Error(String),
}

/// Configuration for the monitor pipeline.
///
/// The heartbeat window and retry constants mirror one firmware's
/// broadcast cadence; they are deliberately configurable rather than
/// hard-coded.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Timeout for discovery scan
    pub discovery_timeout: Duration,
    /// Delay between consecutive characteristic subscriptions after
    /// connect; the firmware cannot service them back-to-back
    pub subscribe_spacing: Duration,
    /// Retry attempts per characteristic on transient errors
    pub retry_attempts: u32,
    /// Fixed backoff between retries
    pub retry_delay: Duration,
    /// Metrics forwarded at least this often even when nothing changes
    pub heartbeat_window: Duration,
    /// Whether to silently reconnect to the last known device
    pub auto_reconnect: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(30),
            subscribe_spacing: Duration::from_millis(300),
            retry_attempts: 4,
            retry_delay: Duration::from_secs(2),
            heartbeat_window: Duration::from_millis(4000),
            auto_reconnect: true,
        }
    }
}

/// A frame that could not be decoded.
///
/// Decode failures are expected noise on a wireless link; callers keep the
/// last-known-good value instead of tearing anything down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame too short: got {got} bytes, need {need}")]
    TooShort { got: usize, need: usize },

    #[error("force frame payload not a multiple of 4: {0} bytes")]
    MisalignedForceFrame(usize),
}

/// Errors that can occur in the monitor system.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// BLE adapter not found or unavailable
    #[error("Bluetooth adapter not found")]
    AdapterNotFound,

    /// Failed to start BLE scanning
    #[error("Failed to start scanning: {0}")]
    ScanFailed(String),

    /// Monitor not found with given device ID
    #[error("Monitor not found: {0}")]
    DeviceNotFound(String),

    /// No rowing service advertised by the device
    #[error("Device advertises no supported rowing service")]
    ServiceMissing,

    /// Connection to monitor failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection attempt was cancelled
    #[error("Connection cancelled")]
    Cancelled,

    /// Failed to subscribe to monitor notifications
    #[error("Failed to subscribe to {characteristic}: {reason}")]
    SubscriptionFailed {
        characteristic: &'static str,
        reason: String,
    },

    /// Failed to write to monitor characteristic
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Command acknowledgment never arrived
    #[error("Command timed out waiting for acknowledgment")]
    CommandTimeout,

    /// Generic BLE error
    #[error("BLE error: {0}")]
    BleError(String),
}
