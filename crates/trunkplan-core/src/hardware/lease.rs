//! In-process exclusive ownership of device indices.
//!
//! A [`DeviceLease`] marks an index as held until it is dropped. The registry
//! and the calibrator both lease before opening a device, so no two
//! components ever hold the same receiver.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::HardwareError;

/// Shared lease table. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct DeviceLeases {
    held: Arc<Mutex<HashMap<u32, &'static str>>>,
}

impl DeviceLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease on `index` for `holder`.
    pub fn acquire(&self, index: u32, holder: &'static str) -> Result<DeviceLease, HardwareError> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = held.get(&index) {
            return Err(HardwareError::InUse {
                index,
                holder: current,
            });
        }
        held.insert(index, holder);
        tracing::trace!(device = index, holder, "lease acquired");
        Ok(DeviceLease {
            index,
            table: self.held.clone(),
        })
    }

    pub fn is_held(&self, index: u32) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&index)
    }
}

/// Held lease on one device index; released on drop.
#[derive(Debug)]
pub struct DeviceLease {
    index: u32,
    table: Arc<Mutex<HashMap<u32, &'static str>>>,
}

impl DeviceLease {
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.index);
        tracing::trace!(device = self.index, "lease released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_holder_is_refused() {
        let leases = DeviceLeases::new();
        let lease = leases.acquire(0, "registry").unwrap();
        assert_eq!(lease.index(), 0);

        let err = leases.acquire(0, "calibrator").unwrap_err();
        assert!(matches!(
            err,
            HardwareError::InUse {
                index: 0,
                holder: "registry"
            }
        ));
        // Other indices are independent.
        assert!(leases.acquire(1, "calibrator").is_ok());
    }

    #[test]
    fn drop_releases() {
        let leases = DeviceLeases::new();
        {
            let _lease = leases.acquire(2, "registry").unwrap();
            assert!(leases.is_held(2));
        }
        assert!(!leases.is_held(2));
        assert!(leases.acquire(2, "calibrator").is_ok());
    }
}
