//! Coverage reporting for a receiver plan or an existing source list.
//!
//! - [`analyze`] checks which channels each configured source covers, which
//!   control channels sit in each source, and which channels fall outside
//!   every source.
//! - [`render_graph`] draws the receivers over a MHz scale as text.

use std::fmt;

use trunkplan_common::format_mhz;
use trunkplan_common::models::Channel;
use trunkplan_common::sources::SourceConfig;
use trunkplan_common::HZ_PER_MHZ;

/// Coverage of one configured source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceCoverage {
    pub index: usize,
    pub center_hz: u64,
    pub lower_hz: u64,
    pub upper_hz: u64,
    pub recorders: u32,
    pub channel_count: usize,
    pub control_channels: Vec<u64>,
}

/// Result of [`analyze`].
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageReport {
    pub sources: Vec<SourceCoverage>,
    /// Channels no source covers.
    pub uncovered: Vec<u64>,
    pub total_recorders: u32,
}

impl CoverageReport {
    /// Every channel, control channels included, sits inside some source.
    pub fn is_complete(&self) -> bool {
        self.uncovered.is_empty()
    }
}

/// Check an existing source list against a site's channels.
pub fn analyze(sources: &[SourceConfig], channels: &[Channel]) -> CoverageReport {
    let coverage = sources
        .iter()
        .enumerate()
        .map(|(index, src)| {
            let in_range: Vec<&Channel> = channels
                .iter()
                .filter(|c| src.covers(c.frequency_hz))
                .collect();
            SourceCoverage {
                index,
                center_hz: src.center,
                lower_hz: src.lower_hz(),
                upper_hz: src.upper_hz(),
                recorders: src.digital_recorders,
                channel_count: in_range.len(),
                control_channels: in_range
                    .iter()
                    .filter(|c| c.is_control())
                    .map(|c| c.frequency_hz)
                    .collect(),
            }
        })
        .collect();

    let mut uncovered: Vec<u64> = channels
        .iter()
        .map(|c| c.frequency_hz)
        .filter(|&f| !sources.iter().any(|s| s.covers(f)))
        .collect();
    uncovered.sort_unstable();
    uncovered.dedup();

    CoverageReport {
        sources: coverage,
        uncovered,
        total_recorders: sources.iter().map(|s| s.digital_recorders).sum(),
    }
}

impl fmt::Display for CoverageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sources: {}", self.sources.len())?;
        for src in &self.sources {
            writeln!(f, "  source {} [{}]", src.index, format_mhz(src.center_hz))?;
            writeln!(
                f,
                "    range: {} - {}",
                format_mhz(src.lower_hz),
                format_mhz(src.upper_hz)
            )?;
            writeln!(f, "    channels in range: {}", src.channel_count)?;
            writeln!(f, "    digital recorders: {}", src.recorders)?;
            writeln!(f, "    control channels in range: {}", src.control_channels.len())?;
            for cc in &src.control_channels {
                writeln!(f, "      - {}", format_mhz(*cc))?;
            }
        }
        writeln!(f, "Total digital recorders: {}", self.total_recorders)?;
        if self.uncovered.is_empty() {
            writeln!(f, "All channels covered")
        } else {
            writeln!(f, "Uncovered channels: {}", self.uncovered.len())?;
            for hz in &self.uncovered {
                writeln!(f, "  - {}", format_mhz(*hz))?;
            }
            Ok(())
        }
    }
}

const GRAPH_WIDTH: usize = 60;

/// Draw receivers `(center_hz, width_hz)` and channels over a MHz scale.
///
/// `█` marks a centre, `●` a covered channel, `═` the coverage range.
pub fn render_graph(receivers: &[(u64, u64)], frequencies: &[u64]) -> String {
    let (Some(&min), Some(&max)) = (frequencies.iter().min(), frequencies.iter().max()) else {
        return String::new();
    };
    let scale_start = (min as f64 / HZ_PER_MHZ).floor();
    let scale_end = (max as f64 / HZ_PER_MHZ).floor() + 1.0;
    let scale = scale_end - scale_start;
    let pos = |hz: f64| -> i64 {
        ((hz / HZ_PER_MHZ - scale_start) / scale * GRAPH_WIDTH as f64).floor() as i64
    };

    let mut out = String::new();
    out.push_str(&format!(
        "Frequency range: {:.3} - {:.3} MHz (span {:.3} MHz)\n",
        min as f64 / HZ_PER_MHZ,
        max as f64 / HZ_PER_MHZ,
        (max - min) as f64 / HZ_PER_MHZ
    ));
    let ruler: String = (0..=GRAPH_WIDTH)
        .map(|i| if i % 10 == 0 { '|' } else { '-' })
        .collect();
    out.push_str(&format!("{:>21}{ruler} {scale_end:.0} MHz\n", format!("{scale_start:.0} MHz ")));

    for (i, &(center, width)) in receivers.iter().enumerate() {
        let lower = center.saturating_sub(width / 2);
        let upper = center + width / 2;
        let mut line = vec![' '; GRAPH_WIDTH + 1];
        for p in pos(lower as f64).max(0)..=pos(upper as f64).min(GRAPH_WIDTH as i64) {
            line[p as usize] = '═';
        }
        let mut count = 0;
        for &hz in frequencies {
            if (lower..=upper).contains(&hz) {
                count += 1;
                let p = pos(hz as f64);
                if (0..=GRAPH_WIDTH as i64).contains(&p) {
                    line[p as usize] = '●';
                }
            }
        }
        let c = pos(center as f64);
        if (0..=GRAPH_WIDTH as i64).contains(&c) {
            line[c as usize] = '█';
        }
        let line: String = line.into_iter().collect();
        out.push_str(&format!(
            "rx {i} [{:>13}]: {line} ({count} freqs)\n",
            format_mhz(center)
        ));
    }
    out.push_str("Legend: █ centre  ● frequency  ═ coverage\n");
    out
}
