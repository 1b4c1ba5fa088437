//! ANT+ USB support.
//!
//! The ergometer itself talks BLE; the ANT+ path exists only for heart
//! rate straps paired through a USB dongle. The dongle is opened through a
//! driver abstraction and a single heart-rate sensor is attached on
//! channel 0, device index 0.

pub mod dongle;
pub mod hr;

use thiserror::Error;

pub use dongle::{AntDongle, AntDriver, DongleStatus, HeartRateReceiver, KNOWN_DONGLES};
pub use hr::{HeartRatePage, HeartRateState, HeartRateUpdate};

/// Errors that can occur during ANT+ operations.
#[derive(Debug, Error)]
pub enum AntError {
    #[error("No ANT+ dongle found")]
    NoDongleFound,

    #[error("Dongle initialization failed: {0}")]
    DongleInitFailed(String),

    #[error("USB error: {0}")]
    UsbError(String),

    #[error("Sensor attach failed: {0}")]
    AttachFailed(String),
}

/// Events from the ANT+ subsystem.
#[derive(Debug, Clone, PartialEq)]
pub enum AntEvent {
    /// Dongle opened and the ANT chip reset
    Startup,
    /// Heart-rate sensor attached on channel 0
    Attached { device_id: u16 },
    /// Sensor or dongle dropped off
    Detached,
    /// Heart-rate broadcast data received
    HeartRate(HeartRateUpdate),
}
