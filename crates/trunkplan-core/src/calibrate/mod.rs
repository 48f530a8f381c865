//! # Gain Calibration
//!
//! Picks a gain per receiver by measuring power at its band's reference
//! frequency (the control channel) across a fixed ladder of gain steps.
//!
//! ## Strategy
//!
//! - Only devices the registry validated can be targeted; a target is built
//!   from a [`ValidatedDevice`] and the band mapped to its serial.
//! - Each device is leased for its whole sweep. The ladder is swept in
//!   ascending order, one short measurement per step. A failed measurement
//!   becomes an invalid sample and the sweep continues.
//! - Devices are independent, so sweeps run on scoped threads when
//!   `concurrent` is set.
//! - Selection is a fold over the samples (see [`selection`]).
//! - Results go to a CSV log (see [`artifact`]) and are never applied to the
//!   recorder configuration.

pub mod artifact;
pub mod selection;

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use trunkplan_common::models::{Band, CalibrationResult, CalibrationSample};

use crate::hardware::lease::DeviceLeases;
use crate::hardware::{PowerRequest, SdrHardware};
use crate::plan::device_map::DeviceMap;
use crate::registry::{RegistryReport, ValidatedDevice};
use selection::Verdict;

const LEASE_HOLDER: &str = "calibrator";

/// R820T gain steps (dB) commonly used for a coarse sweep.
pub const DEFAULT_GAIN_LADDER_DB: [f64; 7] = [0.0, 9.7, 19.7, 29.7, 38.6, 44.5, 49.6];
pub const DEFAULT_SATURATION_THRESHOLD_DB: f64 = 15.0;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("device {serial} has not been validated by the registry")]
    DeviceNotValidated { serial: String },
    #[error("band {band_id} has no reference frequency")]
    NoReferenceFrequency { band_id: usize },
    #[error("gain ladder is empty")]
    EmptyLadder,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Config ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationConfig {
    pub gain_ladder_db: Vec<f64>,
    /// Power rises at or above this are treated as saturation.
    pub saturation_threshold_db: f64,
    pub measure_timeout: Duration,
    /// Sweep devices in parallel.
    pub concurrent: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        CalibrationConfig {
            gain_ladder_db: DEFAULT_GAIN_LADDER_DB.to_vec(),
            saturation_threshold_db: DEFAULT_SATURATION_THRESHOLD_DB,
            measure_timeout: Duration::from_secs(5),
            concurrent: true,
        }
    }
}

// ── Targets ─────────────────────────────────────────────────────────

/// A validated device paired with the frequency to calibrate against.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTarget {
    pub device: ValidatedDevice,
    pub band_id: usize,
    pub reference_hz: u64,
}

impl CalibrationTarget {
    /// Target the device with `serial` against `band`.
    pub fn for_band(
        report: &RegistryReport,
        serial: &str,
        band: &Band,
    ) -> Result<Self, CalibrationError> {
        let device = report
            .find(serial)
            .ok_or_else(|| CalibrationError::DeviceNotValidated {
                serial: serial.to_string(),
            })?;
        let reference_hz = band
            .reference_frequency()
            .ok_or(CalibrationError::NoReferenceFrequency { band_id: band.id })?;
        Ok(CalibrationTarget {
            device: device.clone(),
            band_id: band.id,
            reference_hz,
        })
    }
}

/// One target per validated device that has a band in `map`.
pub fn targets(
    report: &RegistryReport,
    bands: &[Band],
    map: &DeviceMap,
) -> Result<Vec<CalibrationTarget>, CalibrationError> {
    let mut out = Vec::new();
    for device in &report.devices {
        let Some(band_id) = map.band_for(device.serial()) else {
            tracing::info!(serial = device.serial(), "no band assigned; not calibrating");
            continue;
        };
        let band = bands
            .iter()
            .find(|b| b.id == band_id)
            .ok_or(CalibrationError::NoReferenceFrequency { band_id })?;
        out.push(CalibrationTarget::for_band(report, device.serial(), band)?);
    }
    Ok(out)
}

// ── Sweeps ──────────────────────────────────────────────────────────

/// Everything measured for one device.
#[derive(Debug, Clone)]
pub struct DeviceSweep {
    pub target: CalibrationTarget,
    /// In ladder order.
    pub samples: Vec<CalibrationSample>,
    pub verdicts: Vec<Verdict>,
    /// `None` when no sample was valid.
    pub result: Option<CalibrationResult>,
    pub finished_at: DateTime<Utc>,
}

impl DeviceSweep {
    pub fn valid_count(&self) -> usize {
        self.samples.iter().filter(|s| s.is_valid()).count()
    }
}

pub struct GainCalibrator<'a> {
    hardware: &'a dyn SdrHardware,
    leases: DeviceLeases,
    config: CalibrationConfig,
}

impl<'a> GainCalibrator<'a> {
    /// The ladder is sorted ascending and deduplicated.
    pub fn new(
        hardware: &'a dyn SdrHardware,
        leases: DeviceLeases,
        mut config: CalibrationConfig,
    ) -> Result<Self, CalibrationError> {
        config.gain_ladder_db.retain(|g| g.is_finite());
        config.gain_ladder_db.sort_by(f64::total_cmp);
        config.gain_ladder_db.dedup();
        if config.gain_ladder_db.is_empty() {
            return Err(CalibrationError::EmptyLadder);
        }
        Ok(GainCalibrator {
            hardware,
            leases,
            config,
        })
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Sweep every target. Output order matches `targets`.
    pub fn run(&self, targets: &[CalibrationTarget]) -> Vec<DeviceSweep> {
        tracing::info!(
            devices = targets.len(),
            steps = self.config.gain_ladder_db.len(),
            concurrent = self.config.concurrent,
            "starting gain calibration"
        );
        if !self.config.concurrent || targets.len() < 2 {
            return targets.iter().map(|t| self.sweep(t)).collect();
        }
        std::thread::scope(|scope| {
            let handles: Vec<_> = targets
                .iter()
                .map(|t| (t, scope.spawn(move || self.sweep(t))))
                .collect();
            handles
                .into_iter()
                .map(|(target, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        tracing::error!(serial = target.device.serial(), "sweep thread panicked");
                        self.finish(target, Vec::new())
                    })
                })
                .collect()
        })
    }

    /// Sweep one device through the whole ladder.
    pub fn sweep(&self, target: &CalibrationTarget) -> DeviceSweep {
        let index = target.device.bus_index();
        let logical = target.device.logical_index();
        let _lease = match self.leases.acquire(index, LEASE_HOLDER) {
            Ok(lease) => lease,
            Err(e) => {
                tracing::warn!(device = index, error = %e, "cannot lease device; skipping sweep");
                let samples = self
                    .config
                    .gain_ladder_db
                    .iter()
                    .map(|&g| CalibrationSample::invalid(logical, g))
                    .collect();
                return self.finish(target, samples);
            }
        };

        let samples = self
            .config
            .gain_ladder_db
            .iter()
            .map(|&gain_db| {
                let request = PowerRequest {
                    frequency_hz: target.reference_hz,
                    gain_db,
                    timeout: self.config.measure_timeout,
                };
                match self.hardware.measure_power(index, &request) {
                    Ok(power) => {
                        tracing::debug!(device = index, gain_db, power_dbm = power, "measured");
                        CalibrationSample::valid(logical, gain_db, power)
                    }
                    Err(e) => {
                        tracing::debug!(device = index, gain_db, error = %e, "measurement failed");
                        CalibrationSample::invalid(logical, gain_db)
                    }
                }
            })
            .collect();
        self.finish(target, samples)
    }

    fn finish(&self, target: &CalibrationTarget, samples: Vec<CalibrationSample>) -> DeviceSweep {
        let selection = selection::select(&samples, self.config.saturation_threshold_db);
        let finished_at = Utc::now();
        let result = selection.best().map(|best| CalibrationResult {
            device_index: target.device.logical_index(),
            hardware_serial: target.device.serial().to_string(),
            reference_hz: target.reference_hz,
            chosen_gain_db: best.gain_db,
            best_power_dbm: best.power_dbm,
            measured_at: finished_at,
        });
        match &result {
            Some(r) => tracing::info!(
                serial = %r.hardware_serial,
                gain_db = r.chosen_gain_db,
                power_dbm = r.best_power_dbm,
                "calibration complete"
            ),
            None => tracing::warn!(
                serial = target.device.serial(),
                "no valid measurements; no gain chosen"
            ),
        }
        DeviceSweep {
            target: target.clone(),
            samples,
            verdicts: selection.verdicts().to_vec(),
            result,
            finished_at,
        }
    }
}
