//! ANT+ USB dongle management.
//!
//! USB access sits behind the [`AntDriver`] trait so the receiver logic
//! can be exercised without hardware. A driver implementation owns the
//! bulk-transfer plumbing and hands back raw 8-byte broadcast payloads.

use super::hr::{HeartRatePage, HeartRateState};
use super::{AntError, AntEvent};
use crossbeam::channel::Sender;

/// Known ANT+ dongle vendor/product IDs.
pub const KNOWN_DONGLES: &[(u16, u16, &str)] = &[
    (0x0FCF, 0x1008, "Garmin USB ANT Stick"),
    (0x0FCF, 0x1009, "Garmin USB2 ANT Stick"),
    (0x0FCF, 0x1004, "Dynastream USB ANT Stick"),
    (0x0FCF, 0x1006, "Dynastream USB ANT Stick 2"),
];

/// Status of an ANT+ dongle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DongleStatus {
    /// Dongle detected but not opened
    Detected,
    /// Dongle open and the ANT chip reset
    Ready,
    /// Dongle was unplugged or errored
    Disconnected,
}

/// A detected ANT+ USB dongle.
#[derive(Debug, Clone)]
pub struct AntDongle {
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
    /// Product name
    pub name: String,
    /// Current status
    pub status: DongleStatus,
}

impl AntDongle {
    /// Create a dongle record from USB enumeration data.
    pub fn new(vendor_id: u16, product_id: u16, name: String) -> Self {
        Self {
            vendor_id,
            product_id,
            name,
            status: DongleStatus::Detected,
        }
    }

    /// Whether the VID/PID pair is a known ANT+ stick.
    pub fn is_known(vendor_id: u16, product_id: u16) -> bool {
        KNOWN_DONGLES
            .iter()
            .any(|(vid, pid, _)| *vid == vendor_id && *pid == product_id)
    }
}

/// USB driver seam for the ANT+ dongle.
///
/// `next_broadcast` resolves with the 8-byte payload of the next broadcast
/// data message on channel 0, or `None` when the dongle detaches.
pub trait AntDriver: Send {
    /// Open the dongle, reset the ANT chip and set the network key.
    fn open(&mut self) -> Result<(), AntError>;

    /// Attach the heart-rate sensor slot on channel 0, device index 0.
    fn attach_heart_rate(&mut self) -> Result<u16, AntError>;

    /// Block on the next broadcast payload. `None` means detached.
    fn next_broadcast(&mut self) -> Option<[u8; 8]>;

    /// Close the channel and release the USB device.
    fn close(&mut self);
}

/// Drives one heart-rate sensor through an [`AntDriver`], surfacing
/// `Startup`/`Attached`/`Detached`/`HeartRate` events.
pub struct HeartRateReceiver<D: AntDriver> {
    driver: D,
    state: HeartRateState,
}

impl<D: AntDriver> HeartRateReceiver<D> {
    /// Create a receiver over a driver.
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            state: HeartRateState::default(),
        }
    }

    /// Open the dongle, attach the sensor and pump broadcasts until the
    /// driver detaches. Events go out on `events`.
    pub fn run(mut self, events: Sender<AntEvent>) -> Result<(), AntError> {
        self.driver.open()?;
        let _ = events.send(AntEvent::Startup);
        tracing::info!("ANT+ dongle ready");

        let device_id = self.driver.attach_heart_rate()?;
        let _ = events.send(AntEvent::Attached { device_id });
        tracing::info!("ANT+ heart-rate sensor attached: {}", device_id);

        while let Some(payload) = self.driver.next_broadcast() {
            let Some(page) = HeartRatePage::parse(&payload) else {
                tracing::debug!("ANT+ broadcast dropped: unparseable page");
                continue;
            };
            let update = self.state.update(&page);
            let _ = events.send(AntEvent::HeartRate(update));
        }

        tracing::info!("ANT+ sensor detached");
        let _ = events.send(AntEvent::Detached);
        self.driver.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct FakeDriver {
        broadcasts: VecDeque<[u8; 8]>,
        closed: bool,
    }

    impl AntDriver for FakeDriver {
        fn open(&mut self) -> Result<(), AntError> {
            Ok(())
        }

        fn attach_heart_rate(&mut self) -> Result<u16, AntError> {
            Ok(0x1234)
        }

        fn next_broadcast(&mut self) -> Option<[u8; 8]> {
            self.broadcasts.pop_front()
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    #[test]
    fn known_dongle_lookup() {
        assert!(AntDongle::is_known(0x0FCF, 0x1008));
        assert!(!AntDongle::is_known(0x0FCF, 0xFFFF));
    }

    #[test]
    fn receiver_lifecycle_events() {
        let driver = FakeDriver {
            broadcasts: VecDeque::from(vec![
                [0x00, 0, 0, 0, 0x00, 0x04, 0x01, 0x48],
                [0x00, 0, 0, 0, 0x00, 0x08, 0x02, 0x49],
            ]),
            closed: false,
        };

        let (tx, rx) = crossbeam::channel::unbounded();
        HeartRateReceiver::new(driver).run(tx).unwrap();

        assert_eq!(rx.recv().unwrap(), AntEvent::Startup);
        assert_eq!(rx.recv().unwrap(), AntEvent::Attached { device_id: 0x1234 });

        let AntEvent::HeartRate(first) = rx.recv().unwrap() else {
            panic!("expected heart rate event");
        };
        assert_eq!(first.heart_rate, 0x48);

        let AntEvent::HeartRate(second) = rx.recv().unwrap() else {
            panic!("expected heart rate event");
        };
        assert_eq!(second.heart_rate, 0x49);
        // One beat, 1024 ticks apart: one second
        assert_eq!(second.rr_interval_ms, Some(1000));

        assert_eq!(rx.recv().unwrap(), AntEvent::Detached);
    }
}
