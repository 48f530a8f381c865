//! # Frequency Allocation
//!
//! Groups a site's channels into the fewest receiver bands a fixed-width
//! receiver can cover.
//!
//! ## Strategy
//!
//! 1. Sort and merge the channel list (duplicate frequencies collapse, the
//!    control role wins).
//! 2. Greedy left-to-right scan: open a band at the lowest uncovered channel
//!    and extend it while the next channel is within the receiver width of
//!    the band start. The greedy count is the minimum band count.
//! 3. Among all splits into that many bands, pick the one with the smallest
//!    largest band (channel count). Ties keep the longest-first split, so a
//!    greedy split that is already balanced comes back unchanged.
//! 4. Centre each band on the midpoint of its members, nudged only when the
//!    midpoint would pull a neighbouring band's channel into coverage.
//!
//! The result is deterministic for a given channel set regardless of input
//! order, so band ids (and the devices mapped to them) stay stable between
//! runs.

use std::collections::BTreeMap;

use trunkplan_common::models::{Band, Channel, ChannelRole};

use super::PlanError;

/// Bandwidth of one RTL-SDR at 2.4 MS/s.
pub const DEFAULT_MAX_BANDWIDTH_HZ: u64 = 2_400_000;

/// Receivers a standard deployment supports.
pub const DEFAULT_MAX_DEVICES: usize = 3;

/// Allocator limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Receiver coverage width. Odd widths are rounded down to even so that
    /// coverage is a whole number of Hz either side of the centre.
    pub max_bandwidth_hz: u64,
    pub max_devices: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            max_bandwidth_hz: DEFAULT_MAX_BANDWIDTH_HZ,
            max_devices: DEFAULT_MAX_DEVICES,
        }
    }
}

impl AllocatorConfig {
    fn half_width(&self) -> u64 {
        self.max_bandwidth_hz / 2
    }

    fn usable_width(&self) -> u64 {
        self.half_width() * 2
    }
}

/// Sort channels by frequency and merge duplicates.
pub fn normalize_channels(channels: &[Channel]) -> Vec<Channel> {
    let mut merged: BTreeMap<u64, ChannelRole> = BTreeMap::new();
    for ch in channels {
        merged
            .entry(ch.frequency_hz)
            .and_modify(|role| {
                if ch.is_control() {
                    *role = ChannelRole::Control;
                }
            })
            .or_insert(ch.role);
    }
    merged
        .into_iter()
        .map(|(frequency_hz, role)| Channel { frequency_hz, role })
        .collect()
}

/// Partition `channels` into receiver bands.
///
/// Bands come back ascending by frequency with ids `0..n` and a
/// `recorder_count` of zero; see [`super::balancer`] for slot assignment.
pub fn allocate(channels: &[Channel], config: &AllocatorConfig) -> Result<Vec<Band>, PlanError> {
    if channels.is_empty() {
        return Err(PlanError::EmptyChannelList);
    }
    if config.max_bandwidth_hz < 2 || config.max_devices == 0 {
        return Err(PlanError::InvalidLimits {
            max_bandwidth_hz: config.max_bandwidth_hz,
            max_devices: config.max_devices,
        });
    }
    if let Some(bad) = channels.iter().find(|c| c.frequency_hz == 0) {
        return Err(PlanError::InvalidFrequency(bad.frequency_hz));
    }

    let sorted = normalize_channels(channels);
    let freqs: Vec<u64> = sorted.iter().map(|c| c.frequency_hz).collect();
    let width = config.usable_width();
    let span = freqs[freqs.len() - 1] - freqs[0];

    let groups = if span <= width {
        vec![(0, freqs.len() - 1)]
    } else {
        let greedy = greedy_groups(&freqs, width);
        let budget = config.max_devices as u64 * config.max_bandwidth_hz;
        if greedy.len() > config.max_devices || span > budget {
            let required = greedy
                .len()
                .max(span.div_ceil(config.max_bandwidth_hz) as usize);
            tracing::error!(
                span_hz = span,
                required,
                max_devices = config.max_devices,
                "channel span exceeds receiver capacity"
            );
            return Err(PlanError::FreqSpan {
                span_hz: span,
                required,
                max_devices: config.max_devices,
            });
        }
        balanced_groups(&freqs, config.half_width(), greedy.len()).unwrap_or(greedy)
    };

    let bands = groups
        .iter()
        .enumerate()
        .map(|(id, &(start, end))| {
            let prev = start.checked_sub(1).map(|i| freqs[i]);
            let next = freqs.get(end + 1).copied();
            Band {
                id,
                center_hz: center_for(freqs[start], freqs[end], prev, next, config.half_width())
                    .unwrap_or_else(|| midpoint(freqs[start], freqs[end])),
                bandwidth_hz: config.usable_width(),
                channels: sorted[start..=end].to_vec(),
                recorder_count: 0,
            }
        })
        .collect::<Vec<_>>();

    tracing::debug!(
        channels = sorted.len(),
        bands = bands.len(),
        span_hz = span,
        "allocated receiver bands"
    );
    Ok(bands)
}

/// Greedy left-to-right grouping; each group spans at most `width`.
/// Returns inclusive index ranges into `freqs`.
fn greedy_groups(freqs: &[u64], width: u64) -> Vec<(usize, usize)> {
    let mut groups = Vec::new();
    let mut start = 0;
    while start < freqs.len() {
        let mut end = start;
        while end + 1 < freqs.len() && freqs[end + 1] - freqs[start] <= width {
            end += 1;
        }
        groups.push((start, end));
        start = end + 1;
    }
    groups
}

/// Split `freqs` into exactly `k` contiguous groups minimising the largest
/// group, subject to every group being centreable without covering a
/// neighbour's channel.
///
/// Dynamic program over (group start, groups left). Candidate ends are
/// tried longest first and only strictly better results replace the
/// incumbent, which keeps the longest-first split on ties.
fn balanced_groups(freqs: &[u64], half: u64, k: usize) -> Option<Vec<(usize, usize)>> {
    let n = freqs.len();
    // best[r][i]: (largest group, end of first group) for freqs[i..] in r groups.
    let mut best: Vec<Vec<Option<(usize, usize)>>> = vec![vec![None; n + 1]; k + 1];

    for r in 1..=k {
        for i in (0..n).rev() {
            let mut choice: Option<(usize, usize)> = None;
            for j in (i..n).rev() {
                if freqs[j] - freqs[i] > 2 * half {
                    continue;
                }
                let rest = if r == 1 {
                    if j + 1 != n {
                        continue;
                    }
                    0
                } else {
                    if j + 1 >= n {
                        continue;
                    }
                    match best[r - 1][j + 1] {
                        Some((largest, _)) => largest,
                        None => continue,
                    }
                };
                let prev = i.checked_sub(1).map(|p| freqs[p]);
                let next = freqs.get(j + 1).copied();
                if center_for(freqs[i], freqs[j], prev, next, half).is_none() {
                    continue;
                }
                let largest = rest.max(j - i + 1);
                if choice.is_none_or(|(incumbent, _)| largest < incumbent) {
                    choice = Some((largest, j));
                }
            }
            best[r][i] = choice;
        }
    }

    let mut groups = Vec::with_capacity(k);
    let mut start = 0;
    for r in (1..=k).rev() {
        let (_, end) = best[r][start]?;
        groups.push((start, end));
        start = end + 1;
    }
    Some(groups)
}

/// Midpoint of `[lo, hi]`, clamped so coverage `c ± half` keeps `lo..=hi`
/// and excludes the neighbouring channels `prev` and `next`.
///
/// `None` when no centre at or above 0 Hz satisfies all four bounds.
fn center_for(lo: u64, hi: u64, prev: Option<u64>, next: Option<u64>, half: u64) -> Option<u64> {
    let mut floor = hi.saturating_sub(half);
    let mut ceil = lo + half;
    if let Some(p) = prev {
        floor = floor.max(p + half + 1);
    }
    if let Some(n) = next {
        ceil = ceil.min(n.checked_sub(half + 1)?);
    }
    if floor > ceil {
        return None;
    }
    Some(midpoint(lo, hi).clamp(floor, ceil))
}

fn midpoint(lo: u64, hi: u64) -> u64 {
    lo + (hi - lo) / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    const MHZ: u64 = 1_000_000;

    fn voices(freqs: &[u64]) -> Vec<Channel> {
        freqs.iter().map(|&f| Channel::voice(f)).collect()
    }

    fn assert_exclusive_coverage(bands: &[Band], channels: &[Channel]) {
        for ch in channels {
            let covering = bands.iter().filter(|b| b.covers(ch.frequency_hz)).count();
            assert_eq!(covering, 1, "{} Hz covered by {covering} bands", ch.frequency_hz);
        }
    }

    #[test]
    fn narrow_site_gets_one_band() {
        let channels = voices(&[851_000_000, 852_200_000, 853_400_000]);
        let bands = allocate(&channels, &AllocatorConfig::default()).unwrap();

        assert_eq!(bands.len(), 1);
        assert_eq!(bands[0].center_hz, 852_200_000);
        assert_eq!(bands[0].channel_count(), 3);
        assert_exclusive_coverage(&bands, &channels);
    }

    #[test]
    fn wide_site_splits_greedily() {
        let channels = voices(&[851 * MHZ, 852 * MHZ, 855 * MHZ, 856 * MHZ]);
        let bands = allocate(&channels, &AllocatorConfig::default()).unwrap();

        assert_eq!(bands.len(), 2);
        assert_eq!(bands[0].channels, voices(&[851 * MHZ, 852 * MHZ]));
        assert_eq!(bands[1].channels, voices(&[855 * MHZ, 856 * MHZ]));
        assert_eq!(bands[0].id, 0);
        assert_eq!(bands[1].id, 1);
        assert_exclusive_coverage(&bands, &channels);
    }

    #[test]
    fn balances_band_sizes_when_band_count_allows() {
        // Greedy gives [851.0, 851.5, 852.0, 853.0] + [853.5]; the balanced
        // split moves 853.0 across without adding a band.
        let channels = voices(&[
            851_000_000,
            851_500_000,
            852_000_000,
            853_000_000,
            853_500_000,
        ]);
        let cfg = AllocatorConfig {
            max_bandwidth_hz: 2_000_000,
            max_devices: 3,
        };
        let bands = allocate(&channels, &cfg).unwrap();
        assert_eq!(bands.len(), 2);
        let sizes: Vec<_> = bands.iter().map(Band::channel_count).collect();
        assert_eq!(sizes, vec![3, 2]);
    }

    #[test]
    fn three_band_split_has_exclusive_coverage() {
        let channels = voices(&[
            851_000_000,
            851_200_000,
            853_500_000,
            853_600_000,
            853_700_000,
            855_900_000,
            856_000_000,
        ]);
        let cfg = AllocatorConfig {
            max_bandwidth_hz: 2_000_000,
            max_devices: 3,
        };
        let bands = allocate(&channels, &cfg).unwrap();
        let sizes: Vec<_> = bands.iter().map(Band::channel_count).collect();
        assert_eq!(sizes, vec![2, 3, 2]);
        assert_exclusive_coverage(&bands, &channels);
    }

    #[test]
    fn midpoint_is_nudged_off_previous_band() {
        // Lone upper channel: midpoint coverage would reach back to 852.4.
        let channels = voices(&[850_000_000, 852_400_000, 852_500_000]);
        let bands = allocate(&channels, &AllocatorConfig::default()).unwrap();
        assert_eq!(bands.len(), 2);
        assert_eq!(bands[1].channels, voices(&[852_500_000]));
        assert!(!bands[1].covers(852_400_000));
        assert!(bands[1].covers(852_500_000));
        assert_exclusive_coverage(&bands, &channels);
    }

    #[test]
    fn low_frequency_split_keeps_centres_representable() {
        // Three channels in the first band would need a centre below 0 Hz
        // to keep 8 Hz out of coverage.
        let channels = voices(&[1, 4, 6, 8, 13, 24, 52]);
        let cfg = AllocatorConfig {
            max_bandwidth_hz: 18,
            max_devices: 3,
        };
        let bands = allocate(&channels, &cfg).unwrap();
        let sizes: Vec<_> = bands.iter().map(Band::channel_count).collect();
        assert_eq!(sizes, vec![4, 2, 1]);
        assert_exclusive_coverage(&bands, &channels);
    }

    #[test]
    fn centre_below_zero_is_infeasible() {
        assert_eq!(center_for(1, 6, None, Some(8), 9), None);
        assert_eq!(center_for(1, 8, None, Some(13), 9), Some(3));
    }

    #[test]
    fn too_wide_for_three_receivers() {
        let channels = voices(&[851 * MHZ, 854 * MHZ, 857 * MHZ, 860 * MHZ]);
        let err = allocate(&channels, &AllocatorConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            PlanError::FreqSpan {
                required: 4,
                max_devices: 3,
                ..
            }
        ));
    }

    #[test]
    fn sparse_site_beyond_budget_is_rejected() {
        let channels = voices(&[770 * MHZ, 851 * MHZ]);
        let err = allocate(&channels, &AllocatorConfig::default()).unwrap_err();
        assert!(matches!(err, PlanError::FreqSpan { .. }));
    }

    #[test]
    fn duplicates_merge_and_control_wins() {
        let channels = vec![
            Channel::voice(851_000_000),
            Channel::control(851_000_000),
            Channel::voice(852_000_000),
        ];
        let bands = allocate(&channels, &AllocatorConfig::default()).unwrap();
        assert_eq!(bands[0].channels.len(), 2);
        assert!(bands[0].channels[0].is_control());
    }

    #[test]
    fn empty_and_zero_inputs_rejected() {
        let cfg = AllocatorConfig::default();
        assert_eq!(allocate(&[], &cfg), Err(PlanError::EmptyChannelList));
        assert_eq!(
            allocate(&[Channel::voice(0)], &cfg),
            Err(PlanError::InvalidFrequency(0))
        );
    }

    #[test]
    fn order_of_input_does_not_matter() {
        let a = voices(&[856 * MHZ, 851 * MHZ, 855 * MHZ, 852 * MHZ]);
        let b = voices(&[851 * MHZ, 852 * MHZ, 855 * MHZ, 856 * MHZ]);
        let cfg = AllocatorConfig::default();
        assert_eq!(allocate(&a, &cfg).unwrap(), allocate(&b, &cfg).unwrap());
    }
}
