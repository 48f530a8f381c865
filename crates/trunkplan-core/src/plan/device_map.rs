//! Persistent serial → band assignment.
//!
//! The map is keyed by hardware serial, not USB index, so a receiver keeps
//! its band when the bus enumerates devices in a different order. A rerun
//! keeps existing assignments unless the caller asks to regenerate.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use trunkplan_common::models::ReceiverDevice;

pub const DEVICE_MAP_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAssignment {
    pub serial: String,
    pub band_id: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMap {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub assignments: Vec<DeviceAssignment>,
}

impl Default for DeviceMap {
    fn default() -> Self {
        DeviceMap {
            version: DEVICE_MAP_VERSION,
            assignments: Vec::new(),
        }
    }
}

impl DeviceMap {
    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        if input.trim().is_empty() {
            return Ok(DeviceMap::default());
        }
        let map: DeviceMap =
            toml::from_str(input).map_err(|e| format!("Invalid device map TOML: {}", e))?;
        if map.version != 0 && map.version != DEVICE_MAP_VERSION {
            return Err(format!("Unsupported device map version {}", map.version));
        }
        Ok(map)
    }

    pub fn to_toml_string(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("Failed to encode device map: {}", e))
    }

    pub fn band_for(&self, serial: &str) -> Option<usize> {
        self.assignments
            .iter()
            .find(|a| a.serial == serial)
            .map(|a| a.band_id)
    }

    pub fn serial_for(&self, band_id: usize) -> Option<&str> {
        self.assignments
            .iter()
            .find(|a| a.band_id == band_id)
            .map(|a| a.serial.as_str())
    }

    /// Build the map for this run.
    ///
    /// `serials` must be in logical order. With `regenerate` (or no previous
    /// map) logical index `i` gets band `i`. Otherwise previous assignments
    /// whose serial is still present and whose band still exists are kept,
    /// and the remaining serials fill the free bands in ascending order.
    pub fn reconcile(
        previous: Option<&DeviceMap>,
        serials: &[String],
        band_count: usize,
        regenerate: bool,
    ) -> DeviceMap {
        let mut assignments = Vec::new();
        let mut used_bands = BTreeSet::new();
        let mut placed = BTreeSet::new();

        if let (Some(prev), false) = (previous, regenerate) {
            for a in &prev.assignments {
                let present = serials.iter().any(|s| *s == a.serial);
                if !present || a.band_id >= band_count || used_bands.contains(&a.band_id) {
                    tracing::debug!(serial = %a.serial, band_id = a.band_id, "dropping stale assignment");
                    continue;
                }
                if !placed.insert(a.serial.clone()) {
                    continue;
                }
                used_bands.insert(a.band_id);
                assignments.push(a.clone());
            }
        }

        let mut free_bands = (0..band_count).filter(|b| !used_bands.contains(b));
        for serial in serials {
            if placed.contains(serial) {
                continue;
            }
            let Some(band_id) = free_bands.next() else {
                break;
            };
            placed.insert(serial.clone());
            assignments.push(DeviceAssignment {
                serial: serial.clone(),
                band_id,
            });
        }
        assignments.sort_by_key(|a| a.band_id);

        DeviceMap {
            version: DEVICE_MAP_VERSION,
            assignments,
        }
    }

    /// Fill `assigned_band_id` on each device from this map.
    pub fn apply(&self, devices: &mut [ReceiverDevice]) {
        for dev in devices {
            dev.assigned_band_id = self.band_for(&dev.hardware_serial);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serials(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fresh_map_follows_logical_order() {
        let map = DeviceMap::reconcile(None, &serials(&["A", "B", "C"]), 3, false);
        assert_eq!(map.band_for("A"), Some(0));
        assert_eq!(map.band_for("B"), Some(1));
        assert_eq!(map.band_for("C"), Some(2));
    }

    #[test]
    fn existing_assignments_survive_rerun() {
        let prev = DeviceMap {
            version: DEVICE_MAP_VERSION,
            assignments: vec![
                DeviceAssignment {
                    serial: "C".into(),
                    band_id: 0,
                },
                DeviceAssignment {
                    serial: "A".into(),
                    band_id: 2,
                },
            ],
        };
        let map = DeviceMap::reconcile(Some(&prev), &serials(&["A", "B", "C"]), 3, false);
        assert_eq!(map.band_for("C"), Some(0));
        assert_eq!(map.band_for("A"), Some(2));
        assert_eq!(map.band_for("B"), Some(1));
        assert_eq!(map.serial_for(1), Some("B"));
    }

    #[test]
    fn regenerate_discards_previous() {
        let prev = DeviceMap::reconcile(None, &serials(&["B", "A"]), 2, false);
        let map = DeviceMap::reconcile(Some(&prev), &serials(&["A", "B"]), 2, true);
        assert_eq!(map.band_for("A"), Some(0));
        assert_eq!(map.band_for("B"), Some(1));
    }

    #[test]
    fn stale_serials_and_bands_dropped() {
        let prev = DeviceMap {
            version: DEVICE_MAP_VERSION,
            assignments: vec![
                DeviceAssignment {
                    serial: "GONE".into(),
                    band_id: 0,
                },
                DeviceAssignment {
                    serial: "A".into(),
                    band_id: 5,
                },
            ],
        };
        let map = DeviceMap::reconcile(Some(&prev), &serials(&["A"]), 2, false);
        assert_eq!(map.assignments.len(), 1);
        assert_eq!(map.band_for("A"), Some(0));
        assert_eq!(map.band_for("GONE"), None);
    }

    #[test]
    fn extra_devices_stay_unassigned() {
        let map = DeviceMap::reconcile(None, &serials(&["A", "B", "C"]), 2, false);
        assert_eq!(map.band_for("C"), None);
    }

    #[test]
    fn toml_round_trip() {
        let map = DeviceMap::reconcile(None, &serials(&["TRS00000", "TRS00001"]), 2, false);
        let text = map.to_toml_string().unwrap();
        assert!(text.contains("TRS00001"));
        assert_eq!(DeviceMap::from_toml_str(&text).unwrap(), map);
        assert_eq!(DeviceMap::from_toml_str("").unwrap(), DeviceMap::default());
        assert!(DeviceMap::from_toml_str("version = 9").is_err());
    }
}
