//! Recorder runtime-configuration shapes.
//!
//! `SourceConfig` mirrors one entry of the recorder's `sources` array (field
//! names are camelCase on the wire). `SiteInfo` is the site summary written
//! next to the generated configuration.

use serde::{Deserialize, Serialize};

use crate::HZ_PER_MHZ;
use crate::models::Channel;

/// One receiver entry of the recorder's `sources` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub center: u64,
    pub rate: u64,
    #[serde(default)]
    pub ppm: i32,
    pub gain: f64,
    #[serde(default)]
    pub agc: bool,
    pub digital_recorders: u32,
    #[serde(default)]
    pub analog_recorders: u32,
    pub driver: String,
    /// Driver device-selection string, e.g. `rtl=TRS00001`.
    pub device: String,
}

impl SourceConfig {
    pub fn lower_hz(&self) -> u64 {
        self.center.saturating_sub(self.rate / 2)
    }

    pub fn upper_hz(&self) -> u64 {
        self.center + self.rate / 2
    }

    pub fn covers(&self, frequency_hz: u64) -> bool {
        (self.lower_hz()..=self.upper_hz()).contains(&frequency_hz)
    }
}

/// Min/max/span of the site's frequencies, in MHz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyRange {
    pub min_mhz: f64,
    pub max_mhz: f64,
    pub span_mhz: f64,
}

/// Site summary written alongside the generated sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteInfo {
    pub control_channels: Vec<u64>,
    pub all_frequencies: Vec<u64>,
    pub frequency_range: FrequencyRange,
    pub receiver_count: usize,
}

impl SiteInfo {
    /// Summarise a channel list. `receiver_count` comes from the plan.
    pub fn from_channels(channels: &[Channel], receiver_count: usize) -> Self {
        let mut all: Vec<u64> = channels.iter().map(|c| c.frequency_hz).collect();
        all.sort_unstable();
        all.dedup();
        let mut control: Vec<u64> = channels
            .iter()
            .filter(|c| c.is_control())
            .map(|c| c.frequency_hz)
            .collect();
        control.sort_unstable();
        control.dedup();

        let min = all.first().copied().unwrap_or(0);
        let max = all.last().copied().unwrap_or(0);
        SiteInfo {
            control_channels: control,
            all_frequencies: all,
            frequency_range: FrequencyRange {
                min_mhz: min as f64 / HZ_PER_MHZ,
                max_mhz: max as f64 / HZ_PER_MHZ,
                span_mhz: (max - min) as f64 / HZ_PER_MHZ,
            },
            receiver_count,
        }
    }
}

/// The parts of a trunk-recorder `config.json` this tool reads back.
/// Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub systems: Vec<SystemConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub control_channels: Vec<u64>,
}

impl RecorderConfig {
    /// Control channels of every system, as channels.
    pub fn control_channels(&self) -> Vec<Channel> {
        self.systems
            .iter()
            .flat_map(|s| s.control_channels.iter().copied().map(Channel::control))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_serializes_camel_case() {
        let src = SourceConfig {
            center: 852_000_000,
            rate: 2_400_000,
            ppm: 0,
            gain: 49.0,
            agc: false,
            digital_recorders: 12,
            analog_recorders: 0,
            driver: "osmosdr".into(),
            device: "rtl=TRS00000".into(),
        };
        let json = serde_json::to_value(&src).unwrap();
        assert_eq!(json["digitalRecorders"], 12);
        assert_eq!(json["analogRecorders"], 0);
        assert_eq!(json["device"], "rtl=TRS00000");
        assert!(src.covers(850_800_000));
        assert!(!src.covers(853_300_000));
    }

    #[test]
    fn site_info_summarises_range() {
        let channels = vec![
            Channel::voice(853_000_000),
            Channel::control(851_000_000),
            Channel::voice(851_000_000),
        ];
        let info = SiteInfo::from_channels(&channels, 1);
        assert_eq!(info.all_frequencies, vec![851_000_000, 853_000_000]);
        assert_eq!(info.control_channels, vec![851_000_000]);
        assert!((info.frequency_range.span_mhz - 2.0).abs() < 1e-9);
    }

    #[test]
    fn reads_recorder_config_json() {
        let json = r#"{
            "ver": 2,
            "sources": [{"center": 851500000, "rate": 2400000, "gain": 49,
                         "digitalRecorders": 8, "driver": "osmosdr", "device": "rtl=0"}],
            "systems": [{"control_channels": [851012500, 851262500], "type": "p25"}],
            "captureDir": "/trunkrecorder/recordings"
        }"#;
        let cfg: RecorderConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.sources.len(), 1);
        assert_eq!(cfg.sources[0].ppm, 0);
        assert_eq!(cfg.control_channels(), vec![Channel::control(851_012_500), Channel::control(851_262_500)]);
    }
}
