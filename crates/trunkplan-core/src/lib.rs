//! Receiver planning and device management for multi-RTL-SDR trunk recorders.
//!
//! - [`plan`]: channels → bands → recorder counts → recorder sources.
//! - [`registry`]: unique, stable receiver identities.
//! - [`calibrate`]: per-receiver gain selection.
//! - [`hardware`]: receiver access (rtl-sdr tools or simulated).

pub mod calibrate;
pub mod channels;
pub mod config;
pub mod hardware;
pub mod plan;
pub mod registry;
