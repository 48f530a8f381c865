//! Shared types for the trunkplan workspace.
//!
//! This crate contains:
//! - **Data models**: channels, receiver bands, receiver devices, calibration rows
//! - **Source config**: the recorder runtime `sources` entries and site summary
//!   produced from a receiver plan

pub mod models;
pub mod sources;

/// Hertz per megahertz, for display and list parsing.
pub const HZ_PER_MHZ: f64 = 1_000_000.0;

/// Format a frequency in Hz as `851.0125 MHz`.
pub fn format_mhz(hz: u64) -> String {
    format!("{:.4} MHz", hz as f64 / HZ_PER_MHZ)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_megahertz() {
        assert_eq!(format_mhz(851_012_500), "851.0125 MHz");
        assert_eq!(format_mhz(2_400_000), "2.4000 MHz");
    }
}
