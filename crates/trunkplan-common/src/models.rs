//! Data models shared by the planner, the device registry and the calibrator.
//!
//! Frequencies are plain `u64` Hz values throughout; conversion to MHz only
//! happens at the edges (list parsing, display, JSON summaries).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Channel ─────────────────────────────────────────────────────────

/// What a channel carries on a trunked system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRole {
    /// Trunking signalling; the calibration reference.
    Control,
    Voice,
}

impl std::fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelRole::Control => write!(f, "control"),
            ChannelRole::Voice => write!(f, "voice"),
        }
    }
}

impl std::str::FromStr for ChannelRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "control" | "c" => Ok(ChannelRole::Control),
            "voice" | "v" => Ok(ChannelRole::Voice),
            other => Err(format!("unknown channel role: {other}")),
        }
    }
}

/// A single site frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub frequency_hz: u64,
    pub role: ChannelRole,
}

impl Channel {
    pub fn control(frequency_hz: u64) -> Self {
        Self {
            frequency_hz,
            role: ChannelRole::Control,
        }
    }

    pub fn voice(frequency_hz: u64) -> Self {
        Self {
            frequency_hz,
            role: ChannelRole::Voice,
        }
    }

    pub fn is_control(&self) -> bool {
        self.role == ChannelRole::Control
    }
}

// ── Band ────────────────────────────────────────────────────────────

/// A contiguous frequency interval served by one receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Band {
    /// Position in the plan, ascending by frequency.
    pub id: usize,
    pub center_hz: u64,
    /// Receiver sample width; coverage is `center ± bandwidth / 2`.
    pub bandwidth_hz: u64,
    /// Member channels, ascending by frequency.
    pub channels: Vec<Channel>,
    /// Decoder slots assigned by the balancer (0 until balanced).
    pub recorder_count: u32,
}

impl Band {
    pub fn lower_hz(&self) -> u64 {
        self.center_hz.saturating_sub(self.bandwidth_hz / 2)
    }

    pub fn upper_hz(&self) -> u64 {
        self.center_hz + self.bandwidth_hz / 2
    }

    /// Whether `frequency_hz` falls inside this band's coverage interval.
    pub fn covers(&self, frequency_hz: u64) -> bool {
        (self.lower_hz()..=self.upper_hz()).contains(&frequency_hz)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn control_channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter().filter(|c| c.is_control())
    }

    /// Frequency used to calibrate this band's receiver.
    ///
    /// The first control channel when the band has one, otherwise the
    /// lowest member channel.
    pub fn reference_frequency(&self) -> Option<u64> {
        self.control_channels()
            .next()
            .or_else(|| self.channels.first())
            .map(|c| c.frequency_hz)
    }
}

// ── Receiver Device ─────────────────────────────────────────────────

/// A physical receiver after its identity has been resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverDevice {
    /// Stable index derived from the serial ordering, not USB order.
    pub logical_index: u32,
    /// Current USB enumeration index, used to open the device.
    pub bus_index: u32,
    pub hardware_serial: String,
    pub assigned_band_id: Option<usize>,
}

// ── Calibration ─────────────────────────────────────────────────────

/// One gain step of a calibration sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub device_index: u32,
    pub gain_db: f64,
    /// `None` when the measurement failed (busy device, no samples, timeout).
    pub measured_power_dbm: Option<f64>,
}

impl CalibrationSample {
    pub fn valid(device_index: u32, gain_db: f64, power_dbm: f64) -> Self {
        Self {
            device_index,
            gain_db,
            measured_power_dbm: Some(power_dbm),
        }
    }

    pub fn invalid(device_index: u32, gain_db: f64) -> Self {
        Self {
            device_index,
            gain_db,
            measured_power_dbm: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.measured_power_dbm.is_some_and(f64::is_finite)
    }
}

/// Selected gain for one device. Reviewed and applied by an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub device_index: u32,
    pub hardware_serial: String,
    pub reference_hz: u64,
    pub chosen_gain_db: f64,
    pub best_power_dbm: f64,
    pub measured_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(center_hz: u64, channels: Vec<Channel>) -> Band {
        Band {
            id: 0,
            center_hz,
            bandwidth_hz: 2_400_000,
            channels,
            recorder_count: 0,
        }
    }

    #[test]
    fn coverage_interval_is_inclusive() {
        let b = band(852_000_000, vec![]);
        assert_eq!(b.lower_hz(), 850_800_000);
        assert_eq!(b.upper_hz(), 853_200_000);
        assert!(b.covers(850_800_000));
        assert!(b.covers(853_200_000));
        assert!(!b.covers(853_200_001));
    }

    #[test]
    fn reference_prefers_control_channel() {
        let b = band(
            852_000_000,
            vec![Channel::voice(851_000_000), Channel::control(851_500_000)],
        );
        assert_eq!(b.reference_frequency(), Some(851_500_000));

        let voice_only = band(852_000_000, vec![Channel::voice(851_000_000)]);
        assert_eq!(voice_only.reference_frequency(), Some(851_000_000));
        assert_eq!(band(852_000_000, vec![]).reference_frequency(), None);
    }

    #[test]
    fn role_round_trips_through_str() {
        assert_eq!("control".parse::<ChannelRole>(), Ok(ChannelRole::Control));
        assert_eq!("v".parse::<ChannelRole>(), Ok(ChannelRole::Voice));
        assert!("data".parse::<ChannelRole>().is_err());
        assert_eq!(ChannelRole::Control.to_string(), "control");
    }

    #[test]
    fn sample_validity() {
        assert!(CalibrationSample::valid(0, 20.0, -40.0).is_valid());
        assert!(!CalibrationSample::invalid(0, 20.0).is_valid());
        assert!(!CalibrationSample::valid(0, 20.0, f64::NAN).is_valid());
    }
}
