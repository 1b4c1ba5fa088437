//! Integration tests for measurement frame decoding.
//!
//! The known-frame cases pin the wire-format offsets of both profiles;
//! any change to the byte layout breaks these first.

use rustrow::monitor::frames::{decode_battery_level, decode_extended_metrics, FrameDecoder};
use rustrow::monitor::types::{TriState, WireFormat};

fn cps_frame(revs: u32, rev_time: u16, stroke_time: u16, stroke_count: u16) -> Vec<u8> {
    let mut data = vec![0u8; 16];
    data[4..8].copy_from_slice(&revs.to_le_bytes());
    data[8..10].copy_from_slice(&rev_time.to_le_bytes());
    data[12..14].copy_from_slice(&stroke_time.to_le_bytes());
    data[14..16].copy_from_slice(&stroke_count.to_le_bytes());
    data
}

fn csc_frame(revs: u32, rev_time: u16, stroke_time: u16, stroke_count: u16) -> Vec<u8> {
    let mut data = vec![0u8; 13];
    data[1..5].copy_from_slice(&revs.to_le_bytes());
    data[5..7].copy_from_slice(&rev_time.to_le_bytes());
    data[9..11].copy_from_slice(&stroke_time.to_le_bytes());
    data[11..13].copy_from_slice(&stroke_count.to_le_bytes());
    data
}

#[test]
fn test_cycling_power_known_frame_regression() {
    let mut decoder = FrameDecoder::new(WireFormat::CyclingPower);

    decoder
        .decode_measurement(&cps_frame(480, 1000, 2000, 10))
        .unwrap();

    // distance 500; 2 rev ticks at 2048 Hz contribute +977 us; 1024
    // stroke ticks at 1024 Hz contribute +1 s; stroke count 11
    let sample = decoder
        .decode_measurement(&cps_frame(500, 1002, 3024, 11))
        .unwrap();

    assert_eq!(sample.distance_ticks, 500);
    assert_eq!(sample.rev_time_us, 977);
    assert_eq!(sample.stroke_time_us, 1_000_000);
    assert_eq!(sample.stroke_count, 11);
}

#[test]
fn test_speed_cadence_known_frame_regression() {
    let mut decoder = FrameDecoder::new(WireFormat::SpeedCadence);

    decoder.decode_measurement(&csc_frame(0, 0, 0, 0)).unwrap();
    let sample = decoder
        .decode_measurement(&csc_frame(250, 512, 1024, 3))
        .unwrap();

    assert_eq!(sample.distance_ticks, 250);
    // Both CSC timers run at 1024 Hz
    assert_eq!(sample.rev_time_us, 500_000);
    assert_eq!(sample.stroke_time_us, 1_000_000);
    assert_eq!(sample.stroke_count, 3);
}

#[test]
fn test_malformed_frame_does_not_poison_decoder() {
    let mut decoder = FrameDecoder::new(WireFormat::CyclingPower);

    decoder
        .decode_measurement(&cps_frame(100, 10, 20, 1))
        .unwrap();
    let good = decoder.last_good();

    // Truncated frame: error, last good sample unchanged
    assert!(decoder.decode_measurement(&[1, 2, 3]).is_err());
    assert_eq!(decoder.last_good(), good);

    // Next valid frame decodes against the same timer references
    let sample = decoder
        .decode_measurement(&cps_frame(120, 12, 24, 2))
        .unwrap();
    assert_eq!(sample.distance_ticks, 120);
    assert_eq!(sample.stroke_count, 2);
}

#[test]
fn test_extended_metrics_tri_state_bits() {
    // byte 0 = 0b011_10_01x: level 3, sd=10 (on), ws=01 (off) -> 0x39
    let mut data = vec![0x39u8];
    data.extend_from_slice(&210u16.to_le_bytes());
    data.extend_from_slice(&135u32.to_le_bytes());
    data.push(0);

    let ext = decode_extended_metrics(&data).unwrap();
    assert_eq!(ext.log_to_websocket, TriState::Off);
    assert_eq!(ext.log_to_sd_card, TriState::On);
    assert_eq!(ext.log_level, 3);
    assert_eq!(ext.avg_stroke_power, 210);
    assert_eq!(ext.drag_factor, 135);
}

#[test]
fn test_extended_metrics_undefined_means_unsupported() {
    let ext = decode_extended_metrics(&[0u8; 8]).unwrap();
    assert_eq!(ext.log_to_websocket, TriState::Undefined);
    assert_eq!(ext.log_to_sd_card, TriState::Undefined);
    assert_eq!(ext.log_level, 0);
}

#[test]
fn test_battery_level_decoding() {
    assert_eq!(decode_battery_level(&[100]).unwrap(), 100);
    assert_eq!(decode_battery_level(&[0]).unwrap(), 0);
    assert!(decode_battery_level(&[]).is_err());
}
