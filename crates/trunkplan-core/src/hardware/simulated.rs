//! Simulated receivers: deterministic in-memory hardware.
//!
//! Models the parts of an RTL-SDR the registry and calibrator care about:
//! a factory EEPROM serial (often shared by every dongle of a batch),
//! serial writes that only show up after a replug, devices held open by
//! another process, and a gain → power curve with a saturation knee.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{DeviceDescriptor, HardwareError, PowerRequest, SdrHardware};

/// Serial most RTL-SDR dongles ship with.
pub const FACTORY_SERIAL: &str = "00000001";

/// How a simulated device answers power measurements.
#[derive(Debug, Clone, PartialEq)]
pub enum PowerModel {
    /// `base + slope * gain`, plus a jump of `jump_db` at or above `knee_gain_db`.
    Linear {
        base_dbm: f64,
        slope: f64,
        knee_gain_db: f64,
        jump_db: f64,
        noise_db: f64,
    },
    /// Fixed answers per gain step; `None` fails the measurement.
    Scripted(Vec<(f64, Option<f64>)>),
}

impl Default for PowerModel {
    fn default() -> Self {
        PowerModel::Linear {
            base_dbm: -62.0,
            slope: 0.6,
            knee_gain_db: 44.0,
            jump_db: 25.0,
            noise_db: 0.3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimDevice {
    pub vendor: String,
    pub product: String,
    pub serial: String,
    /// Written but not yet visible (needs [`SimulatedHardware::replug`]).
    pub pending_serial: Option<String>,
    /// Claimed by another process.
    pub busy: bool,
    /// EEPROM writes are accepted but never take effect.
    pub write_protected: bool,
    pub power: PowerModel,
}

impl SimDevice {
    pub fn new(serial: &str) -> Self {
        SimDevice {
            vendor: "Realtek".into(),
            product: "RTL2838UHIDIR".into(),
            serial: serial.into(),
            pending_serial: None,
            busy: false,
            write_protected: false,
            power: PowerModel::default(),
        }
    }
}

/// In-memory receivers.
pub struct SimulatedHardware {
    devices: Mutex<Vec<SimDevice>>,
    writes: Mutex<Vec<(u32, String)>>,
    seed: u64,
}

impl SimulatedHardware {
    pub fn new(devices: Vec<SimDevice>) -> Self {
        SimulatedHardware {
            devices: Mutex::new(devices),
            writes: Mutex::new(Vec::new()),
            seed: 0x5eed,
        }
    }

    /// One device per serial, default power model.
    pub fn with_serials(serials: &[&str]) -> Self {
        Self::new(serials.iter().map(|s| SimDevice::new(s)).collect())
    }

    /// `count` factory-fresh dongles sharing one serial.
    pub fn factory_batch(count: usize) -> Self {
        Self::new((0..count).map(|_| SimDevice::new(FACTORY_SERIAL)).collect())
    }

    /// Apply pending serial writes, as a physical unplug/replug would.
    pub fn replug(&self) {
        let mut devices = self.lock_devices();
        for dev in devices.iter_mut() {
            if let Some(serial) = dev.pending_serial.take() {
                if !dev.write_protected {
                    dev.serial = serial;
                }
            }
        }
        tracing::debug!(devices = devices.len(), "simulated replug");
    }

    /// Mutate one device (busy flag, power model, ...).
    pub fn configure(&self, index: u32, f: impl FnOnce(&mut SimDevice)) {
        if let Some(dev) = self.lock_devices().get_mut(index as usize) {
            f(dev);
        }
    }

    /// Every `(index, serial)` write accepted so far.
    pub fn writes(&self) -> Vec<(u32, String)> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn serials(&self) -> Vec<String> {
        self.lock_devices().iter().map(|d| d.serial.clone()).collect()
    }

    fn lock_devices(&self) -> std::sync::MutexGuard<'_, Vec<SimDevice>> {
        self.devices.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_device<T>(
        &self,
        index: u32,
        f: impl FnOnce(&mut SimDevice) -> Result<T, HardwareError>,
    ) -> Result<T, HardwareError> {
        let mut devices = self.lock_devices();
        let dev = devices
            .get_mut(index as usize)
            .ok_or(HardwareError::NotFound { index })?;
        if dev.busy {
            return Err(HardwareError::Busy { index });
        }
        f(dev)
    }
}

impl SdrHardware for SimulatedHardware {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, HardwareError> {
        Ok(self
            .lock_devices()
            .iter()
            .enumerate()
            .map(|(i, d)| DeviceDescriptor {
                index: i as u32,
                vendor: d.vendor.clone(),
                product: d.product.clone(),
            })
            .collect())
    }

    fn read_serial(&self, index: u32) -> Result<String, HardwareError> {
        self.with_device(index, |dev| Ok(dev.serial.clone()))
    }

    fn write_serial(&self, index: u32, serial: &str) -> Result<(), HardwareError> {
        self.with_device(index, |dev| {
            dev.pending_serial = Some(serial.to_string());
            Ok(())
        })?;
        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((index, serial.to_string()));
        Ok(())
    }

    fn measure_power(&self, index: u32, request: &PowerRequest) -> Result<f64, HardwareError> {
        let seed = self.seed ^ ((index as u64) << 32) ^ request.gain_db.to_bits();
        self.with_device(index, |dev| match &dev.power {
            PowerModel::Linear {
                base_dbm,
                slope,
                knee_gain_db,
                jump_db,
                noise_db,
            } => {
                let mut rng = StdRng::seed_from_u64(seed);
                let noise = if *noise_db > 0.0 {
                    rng.random_range(-noise_db..*noise_db)
                } else {
                    0.0
                };
                let mut power = base_dbm + slope * request.gain_db + noise;
                if request.gain_db >= *knee_gain_db {
                    power += jump_db;
                }
                Ok(power)
            }
            PowerModel::Scripted(steps) => steps
                .iter()
                .find(|(gain, _)| (gain - request.gain_db).abs() < 1e-6)
                .and_then(|(_, power)| *power)
                .ok_or(HardwareError::NoSamples { index }),
        })
    }
}
