//! Registry runs against simulated receivers.

use trunkplan_core::hardware::lease::DeviceLeases;
use trunkplan_core::hardware::simulated::{SimulatedHardware, FACTORY_SERIAL};
use trunkplan_core::hardware::SdrHardware;
use trunkplan_core::plan::device_map::DeviceMap;
use trunkplan_core::registry::{DeviceRegistry, RegistryConfig, RegistryError, RegistryState};

fn run_to_done(hw: &SimulatedHardware) -> trunkplan_core::registry::RegistryReport {
    let mut registry = DeviceRegistry::new(hw, DeviceLeases::new(), RegistryConfig::default());
    loop {
        match registry.run_until_blocked().unwrap() {
            RegistryState::AwaitingReconnect => {
                hw.replug();
                registry.confirm_reconnect().unwrap();
            }
            RegistryState::Done => break,
            other => panic!("unexpected state {other}"),
        }
    }
    registry.finish().unwrap()
}

#[test]
fn factory_batch_gets_unique_serials() {
    let hw = SimulatedHardware::factory_batch(3);
    let report = run_to_done(&hw);

    assert_eq!(report.devices.len(), 3);
    let serials = hw.serials();
    assert_eq!(serials, vec!["TRS00000", "TRS00001", "TRS00002"]);
    assert!(!serials.iter().any(|s| s == FACTORY_SERIAL));
}

#[test]
fn second_run_is_a_no_op() {
    let hw = SimulatedHardware::factory_batch(3);
    run_to_done(&hw);
    let writes = hw.writes().len();

    let mut registry = DeviceRegistry::new(&hw, DeviceLeases::new(), RegistryConfig::default());
    assert_eq!(registry.run_until_blocked().unwrap(), RegistryState::Done);
    assert_eq!(hw.writes().len(), writes);
    assert!(registry.finish().unwrap().reassigned.is_empty());
}

#[test]
fn band_mapping_survives_reordered_enumeration() {
    let hw = SimulatedHardware::with_serials(&["TRS00002", "TRS00000", "TRS00001"]);
    let report = run_to_done(&hw);
    let first = DeviceMap::reconcile(None, &report.serials(), 3, false);

    // Same dongles, different USB order.
    let hw = SimulatedHardware::with_serials(&["TRS00001", "TRS00002", "TRS00000"]);
    let report = run_to_done(&hw);
    let second = DeviceMap::reconcile(Some(&first), &report.serials(), 3, false);
    assert_eq!(first, second);

    let mut receivers = report.receivers();
    second.apply(&mut receivers);
    let by_serial = |s: &str| receivers.iter().find(|r| r.hardware_serial == s).unwrap();
    assert_eq!(by_serial("TRS00000").assigned_band_id, Some(0));
    assert_eq!(by_serial("TRS00000").bus_index, 2);
    assert_eq!(by_serial("TRS00002").assigned_band_id, Some(2));
}

#[test]
fn busy_device_left_unresolved_while_others_reassigned() {
    let hw = SimulatedHardware::factory_batch(3);
    hw.configure(2, |d| d.busy = true);
    let report = run_to_done(&hw);

    assert_eq!(report.serials(), vec!["TRS00000", "TRS00001"]);
    assert_eq!(report.unresolved.len(), 1);
    assert_eq!(hw.read_serial(1).unwrap(), "TRS00001");
    hw.configure(2, |d| d.busy = false);
    assert_eq!(hw.read_serial(2).unwrap(), FACTORY_SERIAL);
}

#[test]
fn missing_replug_fails_reverification() {
    let hw = SimulatedHardware::factory_batch(2);
    let mut registry = DeviceRegistry::new(&hw, DeviceLeases::new(), RegistryConfig::default());
    assert_eq!(
        registry.run_until_blocked().unwrap(),
        RegistryState::AwaitingReconnect
    );
    // Operator confirms without actually replugging.
    registry.confirm_reconnect().unwrap();
    assert!(matches!(
        registry.run_until_blocked(),
        Err(RegistryError::DuplicateSerialAfterReassign { .. })
    ));
    assert_eq!(registry.state(), RegistryState::Failed);
}
