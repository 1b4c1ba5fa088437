//! Characteristic frame decoding for the rowing monitor.
//!
//! The firmware reuses the standard Cycling Power or Cycling Speed and
//! Cadence profiles to carry rowing telemetry, with vendor characteristics
//! for extended metrics and handle forces on the same primary service. The
//! two profiles lay the same counters out at different byte offsets and
//! timer resolutions, so decoding branches on the active service.

use crate::monitor::counters::CounterAccumulator;
use crate::monitor::types::{DecodeError, ExtendedMetricsSample, RawCounterSample, TriState, WireFormat};
use uuid::Uuid;

/// Cycling Power Service UUID (0x1818)
pub const CYCLING_POWER_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1818_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Measurement UUID (0x2A63)
pub const CYCLING_POWER_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a63_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Control Point UUID (0x2A66)
pub const CYCLING_POWER_CONTROL_POINT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a66_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Speed and Cadence Service UUID (0x1816)
pub const CSC_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1816_0000_1000_8000_0080_5f9b_34fb);

/// CSC Measurement UUID (0x2A5B)
pub const CSC_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x0000_2a5b_0000_1000_8000_0080_5f9b_34fb);

/// Speed and Cadence Control Point UUID (0x2A55)
pub const SC_CONTROL_POINT_UUID: Uuid = Uuid::from_u128(0x0000_2a55_0000_1000_8000_0080_5f9b_34fb);

/// Battery Service UUID (0x180F)
pub const BATTERY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180f_0000_1000_8000_0080_5f9b_34fb);

/// Battery Level UUID (0x2A19)
pub const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x0000_2a19_0000_1000_8000_0080_5f9b_34fb);

/// Vendor extended-metrics characteristic, on the primary rowing service
pub const EXTENDED_METRICS_UUID: Uuid =
    Uuid::from_u128(0x2c5c_4f1a_8a6e_44d5_a2f7_3b10_9d4e_7c01);

/// Vendor handle-force characteristic, on the primary rowing service
pub const HANDLE_FORCE_UUID: Uuid = Uuid::from_u128(0x2c5c_4f1a_8a6e_44d5_a2f7_3b10_9d4e_7c02);

/// Revolution timer tick rate on the Cycling Power profile
const CPS_REV_TIME_HZ: u32 = 2048;
/// Stroke timer tick rate on the Cycling Power profile
const CPS_STROKE_TIME_HZ: u32 = 1024;
/// Both timers tick at 1024 Hz on the Speed/Cadence profile
const CSC_TIME_HZ: u32 = 1024;

fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Decodes measurement frames for one connection.
///
/// Owns the per-connection timer accumulators and the last successfully
/// decoded sample. The decoder is created when the wire format is learned
/// during service discovery and dropped with the connection, which is what
/// keeps stale low-order timer values from one device out of the delta
/// computation for the next.
#[derive(Debug)]
pub struct FrameDecoder {
    format: WireFormat,
    rev_time: CounterAccumulator,
    stroke_time: CounterAccumulator,
    last_good: RawCounterSample,
}

impl FrameDecoder {
    /// Create a decoder for the profile learned during discovery.
    pub fn new(format: WireFormat) -> Self {
        let (rev_hz, stroke_hz) = match format {
            WireFormat::CyclingPower => (CPS_REV_TIME_HZ, CPS_STROKE_TIME_HZ),
            WireFormat::SpeedCadence => (CSC_TIME_HZ, CSC_TIME_HZ),
        };
        Self {
            format,
            rev_time: CounterAccumulator::new(rev_hz),
            stroke_time: CounterAccumulator::new(stroke_hz),
            last_good: RawCounterSample::default(),
        }
    }

    /// The wire format this decoder was created for.
    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Last successfully decoded sample, for stale-data tolerance when a
    /// frame fails to decode.
    pub fn last_good(&self) -> RawCounterSample {
        self.last_good
    }

    /// Decode one measurement notification into a counter sample.
    pub fn decode_measurement(&mut self, data: &[u8]) -> Result<RawCounterSample, DecodeError> {
        let (rev_low, distance_ticks, stroke_low, stroke_count) = match self.format {
            WireFormat::CyclingPower => {
                if data.len() < 16 {
                    return Err(DecodeError::TooShort {
                        got: data.len(),
                        need: 16,
                    });
                }
                (
                    read_u16_le(data, 8),
                    read_u32_le(data, 4),
                    read_u16_le(data, 12),
                    read_u16_le(data, 14),
                )
            }
            WireFormat::SpeedCadence => {
                if data.len() < 13 {
                    return Err(DecodeError::TooShort {
                        got: data.len(),
                        need: 13,
                    });
                }
                (
                    read_u16_le(data, 5),
                    read_u32_le(data, 1),
                    read_u16_le(data, 9),
                    read_u16_le(data, 11),
                )
            }
        };

        let sample = RawCounterSample {
            rev_time_us: self.rev_time.update(rev_low),
            distance_ticks,
            stroke_time_us: self.stroke_time.update(stroke_low),
            stroke_count,
        };
        self.last_good = sample;
        Ok(sample)
    }
}

/// Decode an extended-metrics notification.
///
/// Byte 0 packs three settings echoes: websocket logging in bits 0-1,
/// SD-card logging in bits 2-3, log level in bits 4-6. Each 2-bit setting
/// uses 00 for "not supported by this firmware build".
pub fn decode_extended_metrics(data: &[u8]) -> Result<ExtendedMetricsSample, DecodeError> {
    if data.len() < 8 {
        return Err(DecodeError::TooShort {
            got: data.len(),
            need: 8,
        });
    }

    let packed = data[0];

    Ok(ExtendedMetricsSample {
        log_to_websocket: TriState::from_bits(packed),
        log_to_sd_card: TriState::from_bits(packed >> 2),
        log_level: (packed >> 4) & 0x07,
        avg_stroke_power: read_u16_le(data, 1),
        drag_factor: read_u32_le(data, 3),
        ble_service_flag: data[7],
    })
}

/// Decode a battery-level notification: one signed byte, percent.
pub fn decode_battery_level(data: &[u8]) -> Result<u8, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::TooShort { got: 0, need: 1 });
    }
    Ok((data[0] as i8).clamp(0, 100) as u8)
}
