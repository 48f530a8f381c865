//! `trunkplan.toml` configuration.
//!
//! Every field is optional in the file; [`TrunkplanConfigInput::resolve`]
//! fills defaults and validates limits. An empty file is the default config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::calibrate::{CalibrationConfig, DEFAULT_GAIN_LADDER_DB, DEFAULT_SATURATION_THRESHOLD_DB};
use crate::plan::allocator::{AllocatorConfig, DEFAULT_MAX_BANDWIDTH_HZ, DEFAULT_MAX_DEVICES};
use crate::plan::{PlannerConfig, SourceDefaults};
use crate::registry::RegistryConfig;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ── File shape ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrunkplanConfigInput {
    pub version: u32,
    pub planner: PlannerInput,
    pub registry: RegistryInput,
    pub calibration: CalibrationInput,
    pub service: ServiceInput,
    pub output: OutputInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlannerInput {
    pub max_bandwidth_hz: Option<u64>,
    pub max_devices: Option<usize>,
    pub total_recorders: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegistryInput {
    pub serial_prefix: Option<String>,
    pub serial_width: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CalibrationInput {
    pub gain_ladder_db: Option<Vec<f64>>,
    pub saturation_threshold_db: Option<f64>,
    pub measure_timeout_ms: Option<u64>,
    pub concurrent: Option<bool>,
    pub results_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceInput {
    pub unit: Option<String>,
    pub control_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputInput {
    pub sample_rate: Option<u64>,
    pub ppm: Option<i32>,
    pub default_gain_db: Option<f64>,
    pub driver: Option<String>,
    pub device_map_path: Option<PathBuf>,
}

// ── Resolved ────────────────────────────────────────────────────────

/// The recording service that holds the receivers open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// systemd unit name.
    pub unit: String,
    pub control_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            unit: "trunk-recorder".into(),
            control_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputConfig {
    pub sources: SourceDefaults,
    pub device_map_path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            sources: SourceDefaults::default(),
            device_map_path: PathBuf::from("device-map.toml"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrunkplanConfig {
    pub version: u32,
    pub planner: PlannerConfig,
    pub registry: RegistryConfig,
    pub calibration: CalibrationConfig,
    pub results_path: PathBuf,
    pub service: ServiceConfig,
    pub output: OutputConfig,
}

impl Default for TrunkplanConfig {
    fn default() -> Self {
        TrunkplanConfig {
            version: CONFIG_VERSION,
            planner: PlannerConfig::default(),
            registry: RegistryConfig::default(),
            calibration: CalibrationConfig::default(),
            results_path: PathBuf::from("calibration-results.csv"),
            service: ServiceConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl TrunkplanConfigInput {
    pub fn resolve(self) -> Result<TrunkplanConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {version}"
            )));
        }
        let defaults = TrunkplanConfig::default();

        let planner = PlannerConfig {
            allocator: AllocatorConfig {
                max_bandwidth_hz: self.planner.max_bandwidth_hz.unwrap_or(DEFAULT_MAX_BANDWIDTH_HZ),
                max_devices: self.planner.max_devices.unwrap_or(DEFAULT_MAX_DEVICES),
            },
            total_recorders: self
                .planner
                .total_recorders
                .unwrap_or(defaults.planner.total_recorders),
        };
        if planner.allocator.max_bandwidth_hz < 2 {
            return Err(ConfigError::Invalid("planner.max_bandwidth_hz must be at least 2".into()));
        }
        if planner.allocator.max_devices == 0 {
            return Err(ConfigError::Invalid("planner.max_devices must be positive".into()));
        }

        let registry = RegistryConfig {
            serial_prefix: self
                .registry
                .serial_prefix
                .map(|p| p.trim().to_string())
                .unwrap_or(defaults.registry.serial_prefix),
            serial_width: self
                .registry
                .serial_width
                .unwrap_or(defaults.registry.serial_width),
        };
        if !registry.serial_prefix.is_ascii() {
            return Err(ConfigError::Invalid("registry.serial_prefix must be ASCII".into()));
        }
        if registry.serial_width <= registry.serial_prefix.len() || registry.serial_width > 32 {
            return Err(ConfigError::Invalid(format!(
                "registry.serial_width {} must exceed the prefix length and be at most 32",
                registry.serial_width
            )));
        }

        let mut ladder = self
            .calibration
            .gain_ladder_db
            .unwrap_or_else(|| DEFAULT_GAIN_LADDER_DB.to_vec());
        if ladder.iter().any(|g| !g.is_finite() || *g < 0.0) {
            return Err(ConfigError::Invalid(
                "calibration.gain_ladder_db values must be finite and non-negative".into(),
            ));
        }
        ladder.sort_by(f64::total_cmp);
        ladder.dedup();
        if ladder.is_empty() {
            return Err(ConfigError::Invalid("calibration.gain_ladder_db is empty".into()));
        }
        let threshold = self
            .calibration
            .saturation_threshold_db
            .unwrap_or(DEFAULT_SATURATION_THRESHOLD_DB);
        if !(threshold.is_finite() && threshold > 0.0) {
            return Err(ConfigError::Invalid(
                "calibration.saturation_threshold_db must be positive".into(),
            ));
        }
        let calibration = CalibrationConfig {
            gain_ladder_db: ladder,
            saturation_threshold_db: threshold,
            measure_timeout: self
                .calibration
                .measure_timeout_ms
                .map(|ms| Duration::from_millis(ms.max(100)))
                .unwrap_or(defaults.calibration.measure_timeout),
            concurrent: self
                .calibration
                .concurrent
                .unwrap_or(defaults.calibration.concurrent),
        };

        let service = ServiceConfig {
            unit: self
                .service
                .unit
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .unwrap_or(defaults.service.unit),
            control_timeout: self
                .service
                .control_timeout_ms
                .map(|ms| Duration::from_millis(ms.max(1000)))
                .unwrap_or(defaults.service.control_timeout),
        };

        let source_defaults = defaults.output.sources;
        let output = OutputConfig {
            sources: SourceDefaults {
                sample_rate: self.output.sample_rate.unwrap_or(source_defaults.sample_rate),
                ppm: self.output.ppm.unwrap_or(source_defaults.ppm),
                gain_db: self.output.default_gain_db.unwrap_or(source_defaults.gain_db),
                driver: self.output.driver.unwrap_or(source_defaults.driver),
            },
            device_map_path: self
                .output
                .device_map_path
                .unwrap_or(defaults.output.device_map_path),
        };

        Ok(TrunkplanConfig {
            version,
            planner,
            registry,
            calibration,
            results_path: self.calibration.results_path.unwrap_or(defaults.results_path),
            service,
            output,
        })
    }
}

impl TrunkplanConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(TrunkplanConfig::default());
        }
        let parsed: TrunkplanConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    /// Load `path`; a missing file yields the default config.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                Ok(TrunkplanConfig::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}
