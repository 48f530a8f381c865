//! Receiver hardware access.
//!
//! Everything the registry and the calibrator need from a receiver goes
//! through [`SdrHardware`]. Two backends ship with the crate:
//!
//! - [`rtl_tools::RtlToolsBackend`] drives the `rtl_test`, `rtl_eeprom` and
//!   `rtl_power` utilities with short fixed timeouts.
//! - [`simulated::SimulatedHardware`] is an in-memory stand-in for local
//!   development and tests.
//!
//! Device indices are exclusive: callers take a [`lease::DeviceLease`] before
//! touching a device.

pub mod lease;
pub mod rtl_tools;
pub mod simulated;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum HardwareError {
    /// Another process holds the device open (e.g. the recorder service).
    #[error("device {index} is busy (claimed by another process)")]
    Busy { index: u32 },
    /// Another component in this process holds the device lease.
    #[error("device {index} is leased to {holder}")]
    InUse { index: u32, holder: &'static str },
    #[error("device {index} did not answer within {after:?}")]
    Timeout { index: u32, after: Duration },
    #[error("device {index} not found")]
    NotFound { index: u32 },
    #[error("device {index} returned no samples")]
    NoSamples { index: u32 },
    #[error("`{command}` failed: {detail}")]
    CommandFailed { command: String, detail: String },
    #[error("unexpected tool output: {0}")]
    Parse(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Types ───────────────────────────────────────────────────────────

/// One receiver as reported by bus enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// USB enumeration index; changes with plug order.
    pub index: u32,
    pub vendor: String,
    pub product: String,
}

/// Parameters of a single power measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerRequest {
    pub frequency_hz: u64,
    pub gain_db: f64,
    pub timeout: Duration,
}

/// Blocking access to attached receivers.
///
/// Implementations must fail fast: every call is bounded by a timeout, and a
/// failure on one index never affects calls on another.
pub trait SdrHardware: Send + Sync {
    /// List attached receivers.
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, HardwareError>;

    /// Read the serial stored in the device EEPROM.
    fn read_serial(&self, index: u32) -> Result<String, HardwareError>;

    /// Write a new EEPROM serial. Only visible after the device is replugged.
    fn write_serial(&self, index: u32, serial: &str) -> Result<(), HardwareError>;

    /// Measure received power (dBm) around `request.frequency_hz`.
    fn measure_power(&self, index: u32, request: &PowerRequest) -> Result<f64, HardwareError>;
}
