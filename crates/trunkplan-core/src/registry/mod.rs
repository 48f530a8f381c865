//! # Device Registry
//!
//! Gives every attached receiver a stable identity. USB enumeration order
//! changes between boots, so bands are mapped to EEPROM serials instead of
//! bus indices. Dongles from one batch usually share a factory serial; the
//! registry detects that and writes unique serials, which only become
//! visible after the operator replugs the devices.
//!
//! ```text
//!   Idle ─▶ Detecting ─▶ ReadingSerials ──unique──────────────────────────▶ Done
//!                            │
//!                       duplicates
//!                            ▼
//!                      DuplicateFound ─▶ AssigningSerials ─▶ AwaitingReconnect
//!                                                                  │ confirm
//!                                                                  ▼
//!                                        Failed ◀──duplicates── ReVerifying ──▶ Done
//! ```
//!
//! `AwaitingReconnect` is the only state [`DeviceRegistry::advance`] cannot
//! leave on its own: the caller either confirms the replug or cancels.
//!
//! The recording service must be stopped before the registry runs and may
//! be restarted once it reaches `Done` or `Failed`. That ordering is the
//! caller's job.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use trunkplan_common::models::ReceiverDevice;

use crate::hardware::lease::DeviceLeases;
use crate::hardware::{DeviceDescriptor, HardwareError, SdrHardware};

/// Lease holder name used while probing.
const LEASE_HOLDER: &str = "registry";

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no receivers attached")]
    NoDevice,
    #[error("serials still duplicated after reassignment: {}", .serials.join(", "))]
    DuplicateSerialAfterReassign { serials: Vec<String> },
    #[error("registry run cancelled")]
    Cancelled,
    #[error("cannot {action} while {from}")]
    InvalidTransition {
        from: RegistryState,
        action: &'static str,
    },
    #[error("hardware error: {0}")]
    Hardware(#[from] HardwareError),
}

// ── State ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryState {
    Idle,
    Detecting,
    ReadingSerials,
    DuplicateFound,
    AssigningSerials,
    /// Waiting for the operator to replug the receivers.
    AwaitingReconnect,
    ReVerifying,
    Done,
    Failed,
    Cancelled,
}

impl RegistryState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RegistryState::Done | RegistryState::Failed | RegistryState::Cancelled
        )
    }

    /// Terminal, or waiting on the operator.
    pub fn is_blocked(self) -> bool {
        self.is_terminal() || self == RegistryState::AwaitingReconnect
    }
}

impl fmt::Display for RegistryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegistryState::Idle => "idle",
            RegistryState::Detecting => "detecting",
            RegistryState::ReadingSerials => "reading serials",
            RegistryState::DuplicateFound => "duplicate found",
            RegistryState::AssigningSerials => "assigning serials",
            RegistryState::AwaitingReconnect => "awaiting reconnect",
            RegistryState::ReVerifying => "re-verifying",
            RegistryState::Done => "done",
            RegistryState::Failed => "failed",
            RegistryState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ── Config ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Leading characters of every assigned serial.
    pub serial_prefix: String,
    /// Total serial length; the number is zero-padded to fill it.
    pub serial_width: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            serial_prefix: "TRS".into(),
            serial_width: 8,
        }
    }
}

impl RegistryConfig {
    /// `TRS` + `7` → `TRS00007`.
    pub fn serial_for(&self, number: u32) -> String {
        let digits = self.serial_width.saturating_sub(self.serial_prefix.len()).max(1);
        format!("{}{:0digits$}", self.serial_prefix, number)
    }
}

// ── Probe results ───────────────────────────────────────────────────

/// What a serial read produced for one bus index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Identity {
    Serial(String),
    /// Held open by another process.
    Busy,
    /// Read failed for another reason.
    Unreadable(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbedDevice {
    pub descriptor: DeviceDescriptor,
    pub identity: Identity,
}

impl ProbedDevice {
    fn serial(&self) -> Option<&str> {
        match &self.identity {
            Identity::Serial(s) => Some(s),
            _ => None,
        }
    }
}

/// A receiver whose serial was read and is unique among attached devices.
///
/// Only the registry constructs these; the calibrator accepts nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedDevice {
    logical_index: u32,
    bus_index: u32,
    serial: String,
    vendor: String,
    product: String,
}

impl ValidatedDevice {
    pub fn logical_index(&self) -> u32 {
        self.logical_index
    }

    pub fn bus_index(&self) -> u32 {
        self.bus_index
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn description(&self) -> String {
        format!("{} {}", self.vendor, self.product)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(logical_index: u32, bus_index: u32, serial: &str) -> Self {
        ValidatedDevice {
            logical_index,
            bus_index,
            serial: serial.to_string(),
            vendor: "Realtek".into(),
            product: "RTL2838UHIDIR".into(),
        }
    }

    pub fn to_receiver(&self) -> ReceiverDevice {
        ReceiverDevice {
            logical_index: self.logical_index,
            bus_index: self.bus_index,
            hardware_serial: self.serial.clone(),
            assigned_band_id: None,
        }
    }
}

/// Outcome of a completed registry run.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryReport {
    /// Uniquely identified receivers, ordered by serial.
    pub devices: Vec<ValidatedDevice>,
    /// Receivers whose identity could not be established (busy, unreadable).
    pub unresolved: Vec<ProbedDevice>,
    /// `(bus_index, serial)` written during this run.
    pub reassigned: Vec<(u32, String)>,
}

impl RegistryReport {
    pub fn receivers(&self) -> Vec<ReceiverDevice> {
        self.devices.iter().map(ValidatedDevice::to_receiver).collect()
    }

    pub fn serials(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.serial.clone()).collect()
    }

    pub fn find(&self, serial: &str) -> Option<&ValidatedDevice> {
        self.devices.iter().find(|d| d.serial == serial)
    }
}

// ── Registry ────────────────────────────────────────────────────────

pub struct DeviceRegistry<'a> {
    hardware: &'a dyn SdrHardware,
    leases: DeviceLeases,
    config: RegistryConfig,
    state: RegistryState,
    history: Vec<RegistryState>,
    probed: Vec<ProbedDevice>,
    /// Bus indices sharing a serial with another device.
    duplicates: Vec<u32>,
    /// Serials written this session; never handed out twice.
    issued: HashSet<String>,
    reassigned: Vec<(u32, String)>,
}

impl<'a> DeviceRegistry<'a> {
    pub fn new(hardware: &'a dyn SdrHardware, leases: DeviceLeases, config: RegistryConfig) -> Self {
        DeviceRegistry {
            hardware,
            leases,
            config,
            state: RegistryState::Idle,
            history: vec![RegistryState::Idle],
            probed: Vec::new(),
            duplicates: Vec::new(),
            issued: HashSet::new(),
            reassigned: Vec::new(),
        }
    }

    pub fn state(&self) -> RegistryState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn history(&self) -> &[RegistryState] {
        &self.history
    }

    /// Latest per-device probe results.
    pub fn probed(&self) -> &[ProbedDevice] {
        &self.probed
    }

    /// Serials written so far as `(bus_index, serial)`.
    pub fn reassigned(&self) -> &[(u32, String)] {
        &self.reassigned
    }

    /// Perform one step. Fatal errors move the registry to `Failed`.
    pub fn advance(&mut self) -> Result<RegistryState, RegistryError> {
        match self.step() {
            Ok(next) => {
                self.enter(next);
                Ok(next)
            }
            Err(e @ RegistryError::InvalidTransition { .. }) => Err(e),
            Err(e) => {
                tracing::error!(from = %self.state, error = %e, "device registry failed");
                self.enter(RegistryState::Failed);
                Err(e)
            }
        }
    }

    /// Advance until the operator is needed or the run is over.
    pub fn run_until_blocked(&mut self) -> Result<RegistryState, RegistryError> {
        while !self.state.is_blocked() {
            self.advance()?;
        }
        Ok(self.state)
    }

    /// Operator signal: the receivers have been replugged.
    pub fn confirm_reconnect(&mut self) -> Result<RegistryState, RegistryError> {
        if self.state != RegistryState::AwaitingReconnect {
            return Err(RegistryError::InvalidTransition {
                from: self.state,
                action: "confirm reconnect",
            });
        }
        tracing::info!("reconnect confirmed");
        self.enter(RegistryState::ReVerifying);
        Ok(self.state)
    }

    /// Abandon the run. Serials already written stay written.
    pub fn cancel(&mut self) -> Result<(), RegistryError> {
        if self.state.is_terminal() {
            return Err(RegistryError::InvalidTransition {
                from: self.state,
                action: "cancel",
            });
        }
        if !self.reassigned.is_empty() {
            tracing::warn!(
                written = self.reassigned.len(),
                "cancelled after writing serials; they take effect on the next replug"
            );
        }
        self.enter(RegistryState::Cancelled);
        Ok(())
    }

    /// Consume a finished registry.
    pub fn finish(self) -> Result<RegistryReport, RegistryError> {
        match self.state {
            RegistryState::Done => Ok(self.build_report()),
            RegistryState::Cancelled => Err(RegistryError::Cancelled),
            from => Err(RegistryError::InvalidTransition {
                from,
                action: "finish",
            }),
        }
    }

    fn enter(&mut self, next: RegistryState) {
        if next != self.state {
            tracing::debug!(from = %self.state, to = %next, "registry transition");
            self.state = next;
            self.history.push(next);
        }
    }

    fn step(&mut self) -> Result<RegistryState, RegistryError> {
        match self.state {
            RegistryState::Idle => Ok(RegistryState::Detecting),
            RegistryState::Detecting => {
                let found = self.detect()?;
                tracing::info!(count = found.len(), "receivers detected");
                self.probed = found
                    .into_iter()
                    .map(|descriptor| ProbedDevice {
                        descriptor,
                        identity: Identity::Unreadable("not read yet".into()),
                    })
                    .collect();
                Ok(RegistryState::ReadingSerials)
            }
            RegistryState::ReadingSerials => {
                self.read_serials();
                self.duplicates = duplicate_indices(&self.probed);
                if self.duplicates.is_empty() {
                    Ok(RegistryState::Done)
                } else {
                    Ok(RegistryState::DuplicateFound)
                }
            }
            RegistryState::DuplicateFound => {
                tracing::warn!(devices = ?self.duplicates, "duplicate serials found");
                Ok(RegistryState::AssigningSerials)
            }
            RegistryState::AssigningSerials => {
                self.assign_serials();
                tracing::info!("unplug and replug all receivers, then confirm");
                Ok(RegistryState::AwaitingReconnect)
            }
            RegistryState::ReVerifying => {
                let before = self.probed.len();
                let found = self.detect()?;
                if found.len() != before {
                    tracing::warn!(before, after = found.len(), "receiver count changed across replug");
                }
                self.probed = found
                    .into_iter()
                    .map(|descriptor| ProbedDevice {
                        descriptor,
                        identity: Identity::Unreadable("not read yet".into()),
                    })
                    .collect();
                self.read_serials();
                self.duplicates = duplicate_indices(&self.probed);
                if self.duplicates.is_empty() {
                    Ok(RegistryState::Done)
                } else {
                    let mut serials: Vec<String> = self
                        .duplicates
                        .iter()
                        .filter_map(|&i| self.probe(i).and_then(ProbedDevice::serial))
                        .map(str::to_string)
                        .collect();
                    serials.sort();
                    serials.dedup();
                    Err(RegistryError::DuplicateSerialAfterReassign { serials })
                }
            }
            from @ (RegistryState::AwaitingReconnect
            | RegistryState::Done
            | RegistryState::Failed
            | RegistryState::Cancelled) => Err(RegistryError::InvalidTransition {
                from,
                action: "advance",
            }),
        }
    }

    fn detect(&self) -> Result<Vec<DeviceDescriptor>, RegistryError> {
        let found = self.hardware.enumerate()?;
        if found.is_empty() {
            return Err(RegistryError::NoDevice);
        }
        Ok(found)
    }

    fn probe(&self, index: u32) -> Option<&ProbedDevice> {
        self.probed.iter().find(|p| p.descriptor.index == index)
    }

    /// Read every serial. Failures stay scoped to their device.
    fn read_serials(&mut self) {
        for probe in self.probed.iter_mut() {
            let index = probe.descriptor.index;
            probe.identity = match self.leases.acquire(index, LEASE_HOLDER) {
                Err(e) => {
                    tracing::warn!(device = index, error = %e, "device leased elsewhere");
                    Identity::Busy
                }
                Ok(_lease) => match self.hardware.read_serial(index) {
                    Ok(serial) => {
                        tracing::debug!(device = index, serial = %serial, "serial read");
                        Identity::Serial(serial)
                    }
                    Err(HardwareError::Busy { .. }) => {
                        tracing::warn!(device = index, "device busy; identity unresolved");
                        Identity::Busy
                    }
                    Err(e) => {
                        tracing::warn!(device = index, error = %e, "serial read failed");
                        Identity::Unreadable(e.to_string())
                    }
                },
            };
        }
    }

    fn assign_serials(&mut self) {
        let mut taken: HashSet<String> = self
            .probed
            .iter()
            .filter_map(ProbedDevice::serial)
            .map(str::to_string)
            .collect();
        taken.extend(self.issued.iter().cloned());

        for index in self.duplicates.clone() {
            let mut number = index;
            let mut serial = self.config.serial_for(number);
            while taken.contains(&serial) {
                number += 1;
                serial = self.config.serial_for(number);
            }
            taken.insert(serial.clone());
            self.issued.insert(serial.clone());

            let written = self
                .leases
                .acquire(index, LEASE_HOLDER)
                .and_then(|_lease| self.hardware.write_serial(index, &serial));
            match written {
                Ok(()) => {
                    tracing::info!(device = index, serial = %serial, "assigned serial");
                    self.reassigned.push((index, serial));
                }
                // The device keeps its duplicate serial and fails re-verification.
                Err(e) => tracing::warn!(device = index, serial = %serial, error = %e, "serial write failed"),
            }
        }
    }

    fn build_report(&self) -> RegistryReport {
        let mut resolved: Vec<&ProbedDevice> =
            self.probed.iter().filter(|p| p.serial().is_some()).collect();
        resolved.sort_by(|a, b| a.serial().cmp(&b.serial()));

        let devices = resolved
            .iter()
            .enumerate()
            .filter_map(|(logical, p)| {
                Some(ValidatedDevice {
                    logical_index: logical as u32,
                    bus_index: p.descriptor.index,
                    serial: p.serial()?.to_string(),
                    vendor: p.descriptor.vendor.clone(),
                    product: p.descriptor.product.clone(),
                })
            })
            .collect();

        RegistryReport {
            devices,
            unresolved: self
                .probed
                .iter()
                .filter(|p| p.serial().is_none())
                .cloned()
                .collect(),
            reassigned: self.reassigned.clone(),
        }
    }
}

/// Bus indices whose serial appears more than once, ascending.
fn duplicate_indices(probed: &[ProbedDevice]) -> Vec<u32> {
    let mut by_serial: HashMap<&str, Vec<u32>> = HashMap::new();
    for p in probed {
        if let Some(serial) = p.serial() {
            by_serial.entry(serial).or_default().push(p.descriptor.index);
        }
    }
    let mut dupes: Vec<u32> = by_serial
        .into_values()
        .filter(|group| group.len() > 1)
        .flatten()
        .collect();
    dupes.sort_unstable();
    dupes
}
