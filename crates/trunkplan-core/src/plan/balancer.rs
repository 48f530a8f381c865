//! Recorder balancing: splits the operator's decoder-slot budget across bands.
//!
//! Every band gets `total / bands`; the remainder goes one slot at a time to
//! the busiest bands (most channels first, lower id on ties).

use trunkplan_common::models::Band;

/// Recorder counts for bands with the given channel counts.
///
/// The result is index-aligned with `channel_counts` and always sums to
/// `total_recorders`.
pub fn distribute(total_recorders: u32, channel_counts: &[usize]) -> Vec<u32> {
    if channel_counts.is_empty() {
        return Vec::new();
    }
    let n = channel_counts.len() as u32;
    let base = total_recorders / n;
    let remainder = (total_recorders % n) as usize;

    let mut order: Vec<usize> = (0..channel_counts.len()).collect();
    order.sort_by(|&a, &b| channel_counts[b].cmp(&channel_counts[a]).then(a.cmp(&b)));

    let mut counts = vec![base; channel_counts.len()];
    for &idx in order.iter().take(remainder) {
        counts[idx] += 1;
    }
    counts
}

/// Assign `recorder_count` on each band in place.
pub fn balance(total_recorders: u32, bands: &mut [Band]) {
    let channel_counts: Vec<usize> = bands.iter().map(Band::channel_count).collect();
    let counts = distribute(total_recorders, &channel_counts);
    for (band, count) in bands.iter_mut().zip(counts) {
        band.recorder_count = count;
    }
    tracing::debug!(
        total_recorders,
        per_band = ?bands.iter().map(|b| b.recorder_count).collect::<Vec<_>>(),
        "balanced recorders"
    );
}
