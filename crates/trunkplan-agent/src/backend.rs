//! Hardware backend selection (real rtl-sdr tools or simulated).

use trunkplan_core::hardware::rtl_tools::{RtlToolsBackend, ToolTimeouts};
use trunkplan_core::hardware::simulated::SimulatedHardware;
use trunkplan_core::hardware::SdrHardware;

pub enum Backend {
    RtlTools(RtlToolsBackend),
    Simulated(SimulatedHardware),
}

impl Backend {
    /// Simulated mode starts from a factory batch: every dongle shares the
    /// same serial, as they do out of the box.
    pub fn new(simulate: bool, sim_devices: usize) -> Self {
        if simulate {
            tracing::info!(devices = sim_devices, "using simulated receivers");
            Backend::Simulated(SimulatedHardware::factory_batch(sim_devices))
        } else {
            Backend::RtlTools(RtlToolsBackend::new(ToolTimeouts::default()))
        }
    }

    pub fn hardware(&self) -> &dyn SdrHardware {
        match self {
            Backend::RtlTools(hw) => hw,
            Backend::Simulated(hw) => hw,
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, Backend::Simulated(_))
    }

    /// Stand-in for the operator's physical replug in simulated mode.
    pub fn simulate_replug(&self) {
        if let Backend::Simulated(hw) = self {
            hw.replug();
        }
    }
}
