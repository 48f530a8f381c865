//! # Receiver Planning
//!
//! Pure, deterministic planning from a channel list to a receiver plan:
//! frequency allocation, recorder balancing, serial → band mapping, and the
//! recorder `sources` rendering.

pub mod allocator;
pub mod balancer;
pub mod coverage;
pub mod device_map;

use thiserror::Error;

use trunkplan_common::models::{Band, Channel};
use trunkplan_common::sources::{SiteInfo, SourceConfig};

use allocator::AllocatorConfig;
use device_map::DeviceMap;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("channel list is empty")]
    EmptyChannelList,
    #[error("invalid channel frequency {0} Hz")]
    InvalidFrequency(u64),
    #[error("invalid planner limits: bandwidth {max_bandwidth_hz} Hz, {max_devices} devices")]
    InvalidLimits {
        max_bandwidth_hz: u64,
        max_devices: usize,
    },
    #[error(
        "frequency span of {span_hz} Hz needs {required} receivers, only {max_devices} supported"
    )]
    FreqSpan {
        span_hz: u64,
        required: usize,
        max_devices: usize,
    },
}

// ── Plan ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerConfig {
    pub allocator: AllocatorConfig,
    pub total_recorders: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            allocator: AllocatorConfig::default(),
            total_recorders: 36,
        }
    }
}

/// Allocated and balanced bands for one site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverPlan {
    pub bands: Vec<Band>,
}

impl ReceiverPlan {
    /// Allocate bands and balance recorders. Fails without partial output.
    pub fn build(channels: &[Channel], config: &PlannerConfig) -> Result<Self, PlanError> {
        let mut bands = allocator::allocate(channels, &config.allocator)?;
        balancer::balance(config.total_recorders, &mut bands);
        tracing::info!(
            receivers = bands.len(),
            total_recorders = config.total_recorders,
            "receiver plan built"
        );
        Ok(ReceiverPlan { bands })
    }

    pub fn receiver_count(&self) -> usize {
        self.bands.len()
    }

    pub fn site_info(&self, channels: &[Channel]) -> SiteInfo {
        SiteInfo::from_channels(channels, self.receiver_count())
    }

    /// `(center, width)` pairs for [`coverage::render_graph`].
    pub fn receivers(&self) -> Vec<(u64, u64)> {
        self.bands
            .iter()
            .map(|b| (b.center_hz, b.bandwidth_hz))
            .collect()
    }

    /// Render one recorder source per band.
    ///
    /// A band with a mapped device selects it by serial (`rtl=<serial>`);
    /// unmapped bands fall back to the band id as a bus index.
    pub fn render_sources(&self, map: &DeviceMap, defaults: &SourceDefaults) -> Vec<SourceConfig> {
        self.bands
            .iter()
            .map(|band| {
                let device = match map.serial_for(band.id) {
                    Some(serial) => format!("rtl={serial}"),
                    None => format!("rtl={}", band.id),
                };
                SourceConfig {
                    center: band.center_hz,
                    rate: defaults.sample_rate,
                    ppm: defaults.ppm,
                    gain: defaults.gain_db,
                    agc: false,
                    digital_recorders: band.recorder_count,
                    analog_recorders: 0,
                    driver: defaults.driver.clone(),
                    device,
                }
            })
            .collect()
    }
}

/// Fixed fields of every rendered source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDefaults {
    pub sample_rate: u64,
    pub ppm: i32,
    pub gain_db: f64,
    pub driver: String,
}

impl Default for SourceDefaults {
    fn default() -> Self {
        SourceDefaults {
            sample_rate: allocator::DEFAULT_MAX_BANDWIDTH_HZ,
            ppm: 0,
            gain_db: 49.0,
            driver: "osmosdr".into(),
        }
    }
}
