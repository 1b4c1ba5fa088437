//! ANT+ Heart Rate profile parsing.
//!
//! Device Type 120. Every broadcast page carries the same trailing four
//! bytes: beat event time (1/1024 s, wraps at 2^16), beat count (wraps at
//! 255) and the computed heart rate. The leading bytes vary by page number
//! and are not needed here.

/// One decoded heart-rate broadcast page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartRatePage {
    /// Page number (0-7), low 7 bits of byte 0
    pub page_number: u8,
    /// Heart beat event time (1/1024 second resolution)
    pub beat_time: u16,
    /// Heart beat count (wraps at 255)
    pub beat_count: u8,
    /// Computed heart rate in BPM
    pub heart_rate: u8,
}

impl HeartRatePage {
    /// Parse any heart-rate page from an 8-byte broadcast payload.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }

        Some(Self {
            page_number: data[0] & 0x7F,
            beat_time: u16::from_le_bytes([data[4], data[5]]),
            beat_count: data[6],
            heart_rate: data[7],
        })
    }
}

/// Result of folding one page into the receiver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartRateUpdate {
    /// Current heart rate in BPM
    pub heart_rate: u8,
    /// RR interval in milliseconds, when a new beat was detected
    pub rr_interval_ms: Option<u16>,
}

/// Tracks beat counters across pages to derive RR intervals.
#[derive(Debug, Default)]
pub struct HeartRateState {
    last_beat_time: u16,
    last_beat_count: u8,
}

impl HeartRateState {
    /// Fold in a new page. Counter deltas use wrapping arithmetic; both
    /// fields are free-running hardware counters.
    pub fn update(&mut self, page: &HeartRatePage) -> HeartRateUpdate {
        let beat_delta = page.beat_count.wrapping_sub(self.last_beat_count);

        if beat_delta == 0 {
            return HeartRateUpdate {
                heart_rate: page.heart_rate,
                rr_interval_ms: None,
            };
        }

        let time_delta = page.beat_time.wrapping_sub(self.last_beat_time);
        let rr_ms = (time_delta as u32 * 1000 / 1024) as u16;

        self.last_beat_time = page.beat_time;
        self.last_beat_count = page.beat_count;

        HeartRateUpdate {
            heart_rate: page.heart_rate,
            rr_interval_ms: Some(rr_ms),
        }
    }
}
