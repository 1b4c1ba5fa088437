//! Integration tests for wrap-around counter accumulation.

use rustrow::monitor::counters::{accumulate, CounterAccumulator};

#[test]
fn test_delta_without_wrap() {
    // 1024 ticks at 1024 Hz is one second
    assert_eq!(accumulate(0, 1024, 1024, 0), 1_000_000);
}

#[test]
fn test_delta_with_single_wrap() {
    // current < previous: delta is (65535 - previous) + current
    let total = accumulate(65000, 100, 1024, 0);
    let expected_ticks = (65535 - 65000) + 100;
    let expected_us = (expected_ticks as f64 / 1024.0 * 1_000_000.0).round() as u64;
    assert_eq!(total, expected_us);
}

#[test]
fn test_wrap_boundary_extremes() {
    // previous at max, current at zero: the wrap contributes zero ticks
    assert_eq!(accumulate(65535, 0, 1024, 0), 0);
    // previous at zero, current at max: full-range forward delta
    let total = accumulate(0, 65535, 1024, 0);
    assert_eq!(total, (65535.0_f64 / 1024.0 * 1_000_000.0).round() as u64);
}

#[test]
fn test_delta_never_negative_over_grid() {
    // Sweep a grid of previous/current pairs across the 16-bit range; the
    // accumulated total must never regress below its starting value.
    let base = 5_000_000u64;
    for prev in (0u32..=65535).step_by(1021) {
        for cur in (0u32..=65535).step_by(1021) {
            let total = accumulate(prev as u16, cur as u16, 2048, base);
            assert!(total >= base, "regressed for prev={prev} cur={cur}");
        }
    }
}

#[test]
fn test_resolution_conversion_rounds() {
    // 2 ticks at 2048 Hz is 976.5625 us, which rounds up to 977
    assert_eq!(accumulate(0, 2, 2048, 0), 977);
    // 1 tick at 2048 Hz is 488.28125 us, which rounds down to 488
    assert_eq!(accumulate(0, 1, 2048, 0), 488);
}

#[test]
fn test_accumulator_is_monotonic_across_updates() {
    let mut acc = CounterAccumulator::new(1024);
    let readings = [100u16, 30000, 60000, 5000, 40000, 2000];

    let mut last_total = acc.update(readings[0]);
    for &reading in &readings[1..] {
        let total = acc.update(reading);
        assert!(total >= last_total);
        last_total = total;
    }
}
