//! Derived-metrics pipeline.
//!
//! Combines the latest decoded counter sample with the previous one to
//! produce stroke rate, speed and distance-per-stroke, merges in the most
//! recent value from each of the other notification streams (extended
//! metrics, battery, handle forces, heart rate), applies the session
//! baseline, and decides which updates are worth forwarding downstream.
//!
//! Streams are combined last-value-wins: there is no cross-characteristic
//! ordering guarantee on the transport, so the engine never waits for a
//! matched set of notifications.

use crate::monitor::types::{
    ExtendedMetricsSample, RawCounterSample, RowingMetrics, SessionBaseline,
};
use std::time::{Duration, Instant};

/// Distance ticks are centimeters.
const TICKS_PER_METER: f64 = 100.0;

/// Derives and filters the metrics broadcast.
///
/// One engine instance belongs to one connection session. Dropping it (and
/// creating a fresh one on reconnect) is what guarantees a new session
/// never computes deltas against counters from a previous device.
#[derive(Debug)]
pub struct MetricsEngine {
    heartbeat_window: Duration,
    baseline: SessionBaseline,
    prev: Option<RawCounterSample>,
    /// Sample captured at the most recent stroke-count change, for
    /// per-stroke quantities.
    last_stroke_sample: Option<RawCounterSample>,
    current: RowingMetrics,
    last_forwarded_at: Option<Instant>,
    last_forwarded_distance: Option<u32>,
}

impl MetricsEngine {
    /// Create an engine forwarding at least every `heartbeat_window`.
    pub fn new(heartbeat_window: Duration) -> Self {
        Self {
            heartbeat_window,
            baseline: SessionBaseline::default(),
            prev: None,
            last_stroke_sample: None,
            current: RowingMetrics::default(),
            last_forwarded_at: None,
            last_forwarded_distance: None,
        }
    }

    /// Feed one decoded counter sample.
    ///
    /// Returns the metrics to forward, or `None` when the update is
    /// suppressed: nothing is forwarded unless the distance counter moved
    /// or the heartbeat window has elapsed since the last forward.
    pub fn on_counter_sample(
        &mut self,
        sample: RawCounterSample,
        now: Instant,
    ) -> Option<RowingMetrics> {
        self.derive(sample);
        self.prev = Some(sample);

        let distance_changed = self
            .last_forwarded_distance
            .map(|d| d != sample.distance_ticks)
            .unwrap_or(true);
        let heartbeat_due = self
            .last_forwarded_at
            .map(|t| now.duration_since(t) >= self.heartbeat_window)
            .unwrap_or(true);

        if distance_changed || heartbeat_due {
            self.mark_forwarded(now, sample.distance_ticks);
            Some(self.current.clone())
        } else {
            None
        }
    }

    /// Feed an extended-metrics sample. Settings-only updates are always
    /// forwarded so the settings view never goes stale.
    pub fn on_extended(&mut self, ext: ExtendedMetricsSample, now: Instant) -> RowingMetrics {
        self.current.avg_stroke_power = ext.avg_stroke_power;
        self.current.drag_factor = ext.drag_factor;
        self.current.ble_service_flag = ext.ble_service_flag;
        self.current.log_level = ext.log_level;

        let distance = self.prev.map(|s| s.distance_ticks).unwrap_or(0);
        self.mark_forwarded(now, distance);
        self.current.clone()
    }

    /// Feed a completed handle-force curve. The peak feeds the next
    /// forwarded update; an empty curve reports zero force.
    pub fn on_force_curve(&mut self, curve: &[f32]) {
        self.current.peak_force = curve.iter().copied().fold(0.0_f32, f32::max);
    }

    /// Latest battery level, last-value-wins.
    pub fn on_battery(&mut self, percent: u8) {
        self.current.battery_percent = Some(percent);
    }

    /// Latest heart rate from the ANT+ path, last-value-wins.
    pub fn on_heart_rate(&mut self, bpm: u8) {
        self.current.heart_rate_bpm = Some(bpm);
    }

    /// Re-baseline distance and stroke count at the current raw counters
    /// and synthesize one zeroed broadcast so the consumer resets
    /// immediately instead of waiting for the next notification.
    ///
    /// The underlying accumulators are untouched; rate calculations keep
    /// their deltas across the reset.
    pub fn reset(&mut self, now: Instant) -> RowingMetrics {
        let raw = self.prev.unwrap_or_default();
        self.baseline = SessionBaseline {
            start_distance_ticks: raw.distance_ticks,
            start_stroke_count: raw.stroke_count,
        };

        self.current.distance_m = 0.0;
        self.current.stroke_count = 0;
        self.current.stroke_rate_spm = 0.0;
        self.current.speed_mps = 0.0;
        self.current.dist_per_stroke_m = 0.0;
        self.current.drive_duration_s = 0.0;
        self.current.recovery_duration_s = 0.0;
        self.current.peak_force = 0.0;
        self.last_stroke_sample = self.prev;

        self.mark_forwarded(now, raw.distance_ticks);
        self.current.clone()
    }

    /// Current session baseline.
    pub fn baseline(&self) -> SessionBaseline {
        self.baseline
    }

    fn mark_forwarded(&mut self, now: Instant, distance_ticks: u32) {
        self.last_forwarded_at = Some(now);
        self.last_forwarded_distance = Some(distance_ticks);
    }

    fn derive(&mut self, sample: RawCounterSample) {
        self.current.distance_m = sample
            .distance_ticks
            .saturating_sub(self.baseline.start_distance_ticks) as f64
            / TICKS_PER_METER;
        self.current.stroke_count = sample
            .stroke_count
            .saturating_sub(self.baseline.start_stroke_count);

        let Some(prev) = self.prev else {
            self.last_stroke_sample = Some(sample);
            return;
        };

        // Speed from consecutive distance/rev-time deltas. A zero time
        // delta keeps the previous value rather than emitting Inf/NaN.
        let rev_delta_us = sample.rev_time_us.saturating_sub(prev.rev_time_us);
        if rev_delta_us > 0 {
            let dist_delta_m =
                sample.distance_ticks.saturating_sub(prev.distance_ticks) as f64 / TICKS_PER_METER;
            self.current.speed_mps = dist_delta_m / (rev_delta_us as f64 / 1e6);
        }

        // Stroke rate from consecutive stroke-time/stroke-count deltas.
        let stroke_delta = sample.stroke_count.saturating_sub(prev.stroke_count);
        let stroke_time_delta_us = sample.stroke_time_us.saturating_sub(prev.stroke_time_us);
        if stroke_delta > 0 && stroke_time_delta_us > 0 {
            self.current.stroke_rate_spm =
                stroke_delta as f64 / (stroke_time_delta_us as f64 / 1e6) * 60.0;
        }

        // Per-stroke quantities use the sample captured at the previous
        // stroke-count change, not the immediately previous notification.
        if stroke_delta > 0 {
            if let Some(at_stroke) = self.last_stroke_sample {
                let strokes = sample.stroke_count.saturating_sub(at_stroke.stroke_count) as f64;
                let dist_ticks =
                    sample.distance_ticks.saturating_sub(at_stroke.distance_ticks);

                self.current.dist_per_stroke_m = if dist_ticks == 0 {
                    0.0
                } else {
                    dist_ticks as f64 / TICKS_PER_METER / strokes
                };

                // The flywheel timer only advances while the wheel turns,
                // which is the drive; the remainder of the stroke-to-stroke
                // interval is recovery.
                let drive_us = sample.rev_time_us.saturating_sub(at_stroke.rev_time_us);
                let cycle_us = sample.stroke_time_us.saturating_sub(at_stroke.stroke_time_us);
                self.current.drive_duration_s = drive_us as f64 / 1e6 / strokes;
                self.current.recovery_duration_s =
                    cycle_us.saturating_sub(drive_us) as f64 / 1e6 / strokes;
            }
            self.last_stroke_sample = Some(sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> MetricsEngine {
        MetricsEngine::new(Duration::from_millis(4000))
    }

    fn sample(rev_us: u64, dist: u32, stroke_us: u64, strokes: u16) -> RawCounterSample {
        RawCounterSample {
            rev_time_us: rev_us,
            distance_ticks: dist,
            stroke_time_us: stroke_us,
            stroke_count: strokes,
        }
    }

    #[test]
    fn speed_from_consecutive_deltas() {
        let mut e = engine();
        let t = Instant::now();
        e.on_counter_sample(sample(0, 0, 0, 0), t);
        // 500 cm in 1 s -> 5 m/s
        let m = e
            .on_counter_sample(sample(1_000_000, 500, 800_000, 1), t)
            .unwrap();
        assert!((m.speed_mps - 5.0).abs() < 1e-9);
    }

    #[test]
    fn zero_rev_delta_keeps_previous_speed() {
        let mut e = engine();
        let t = Instant::now();
        e.on_counter_sample(sample(0, 0, 0, 0), t);
        e.on_counter_sample(sample(1_000_000, 500, 0, 0), t);

        // Same rev time, distance bumped: no division happens
        let m = e
            .on_counter_sample(sample(1_000_000, 600, 0, 0), t)
            .unwrap();
        assert!(m.speed_mps.is_finite());
        assert!((m.speed_mps - 5.0).abs() < 1e-9);
    }

    #[test]
    fn stroke_rate_in_spm() {
        let mut e = engine();
        let t = Instant::now();
        e.on_counter_sample(sample(0, 0, 0, 10), t);
        // 2 strokes in 4 s -> 30 spm
        let m = e
            .on_counter_sample(sample(1, 100, 4_000_000, 12), t)
            .unwrap();
        assert!((m.stroke_rate_spm - 30.0).abs() < 1e-9);
    }

    #[test]
    fn dist_per_stroke_zero_when_distance_unchanged() {
        let mut e = engine();
        let t = Instant::now();
        e.on_counter_sample(sample(0, 1000, 0, 1), t);
        // Past the heartbeat window so the unchanged-distance update is
        // still forwarded
        let m = e
            .on_counter_sample(sample(1, 1000, 2_000_000, 2), t + Duration::from_millis(4100))
            .unwrap();
        assert_eq!(m.dist_per_stroke_m, 0.0);
    }

    #[test]
    fn dist_per_stroke_tracks_stroke_events() {
        let mut e = engine();
        let t = Instant::now();
        e.on_counter_sample(sample(0, 0, 0, 0), t);
        // 10 m over 1 stroke
        let m = e
            .on_counter_sample(sample(1, 1000, 1_000_000, 1), t)
            .unwrap();
        assert!((m.dist_per_stroke_m - 10.0).abs() < 1e-9);
    }

    #[test]
    fn reset_zeroes_output_regardless_of_raw_counters() {
        let mut e = engine();
        let t = Instant::now();
        e.on_counter_sample(sample(0, 0, 0, 0), t);
        e.on_counter_sample(sample(1, 123_400, 1, 57), t);

        let m = e.reset(t);
        assert_eq!(m.distance_m, 0.0);
        assert_eq!(m.stroke_count, 0);
        assert_eq!(m.speed_mps, 0.0);

        // Subsequent samples are baseline-adjusted
        let m = e
            .on_counter_sample(sample(2, 123_600, 2, 58), t + Duration::from_secs(5))
            .unwrap();
        assert!((m.distance_m - 2.0).abs() < 1e-9);
        assert_eq!(m.stroke_count, 1);
    }

    #[test]
    fn suppression_holds_unchanged_distance_inside_window() {
        let mut e = engine();
        let t = Instant::now();

        assert!(e.on_counter_sample(sample(0, 500, 0, 1), t).is_some());
        // Unchanged distance, 1 s later: suppressed
        assert!(e
            .on_counter_sample(sample(1, 500, 1, 1), t + Duration::from_secs(1))
            .is_none());
        // Still unchanged but past the heartbeat window: forwarded
        assert!(e
            .on_counter_sample(sample(2, 500, 2, 1), t + Duration::from_millis(4100))
            .is_some());
    }

    #[test]
    fn distance_change_always_forwards() {
        let mut e = engine();
        let t = Instant::now();
        e.on_counter_sample(sample(0, 500, 0, 1), t);
        assert!(e
            .on_counter_sample(sample(1, 501, 1, 1), t + Duration::from_millis(10))
            .is_some());
    }

    #[test]
    fn settings_update_always_forwarded() {
        let mut e = engine();
        let t = Instant::now();
        e.on_counter_sample(sample(0, 500, 0, 1), t);

        let ext = ExtendedMetricsSample {
            avg_stroke_power: 180,
            drag_factor: 120,
            log_level: 4,
            ..Default::default()
        };
        let m = e.on_extended(ext, t + Duration::from_millis(50));
        assert_eq!(m.avg_stroke_power, 180);
        assert_eq!(m.drag_factor, 120);
        assert_eq!(m.log_level, 4);
    }

    #[test]
    fn peak_force_of_empty_curve_is_zero() {
        let mut e = engine();
        e.on_force_curve(&[]);
        assert_eq!(e.current.peak_force, 0.0);

        e.on_force_curve(&[12.5, 80.25, 44.0]);
        assert_eq!(e.current.peak_force, 80.25);
    }

    #[test]
    fn last_value_wins_across_streams() {
        let mut e = engine();
        let t = Instant::now();
        e.on_battery(90);
        e.on_heart_rate(142);
        e.on_counter_sample(sample(0, 0, 0, 0), t);
        let m = e.on_counter_sample(sample(1, 100, 1, 1), t).unwrap();
        assert_eq!(m.battery_percent, Some(90));
        assert_eq!(m.heart_rate_bpm, Some(142));
    }

    #[test]
    fn drive_and_recovery_split_cycle_time() {
        let mut e = engine();
        let t = Instant::now();
        e.on_counter_sample(sample(0, 0, 0, 0), t);
        // One stroke: flywheel turned for 0.8 s of a 2.4 s cycle
        let m = e
            .on_counter_sample(sample(800_000, 900, 2_400_000, 1), t)
            .unwrap();
        assert!((m.drive_duration_s - 0.8).abs() < 1e-9);
        assert!((m.recovery_duration_s - 1.6).abs() < 1e-9);
    }
}
