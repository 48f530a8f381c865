//! Best-gain selection over one device's sweep.
//!
//! ## Strategy
//!
//! Samples are folded in ascending gain order. The first valid sample is
//! the starting best. A later sample replaces it only when its power is
//! higher and the rise stays below the saturation threshold. A larger rise
//! is a saturation artifact: it is rejected, and the gain where it happened
//! latches as the saturation point. Every higher gain is past the front-end
//! overload, so it is still compared against the retained best for the log
//! but never selected.

use serde::Serialize;
use trunkplan_common::models::CalibrationSample;

/// What the fold did with one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// First valid sample; becomes the best.
    First,
    /// Higher power within the threshold; becomes the best.
    Improved,
    /// Rise at or above the threshold; rejected and latched.
    SaturationRejected,
    /// No higher than the current best.
    NotBetter,
    /// At or above a latched saturation gain.
    AboveSaturation,
    /// Measurement failed; excluded.
    Invalid,
}

/// Current best `(gain, power)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BestGain {
    pub gain_db: f64,
    pub power_dbm: f64,
}

/// Fold state.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    threshold_db: f64,
    best: Option<BestGain>,
    saturated_at_db: Option<f64>,
    verdicts: Vec<Verdict>,
}

impl Selection {
    pub fn new(threshold_db: f64) -> Self {
        Selection {
            threshold_db,
            best: None,
            saturated_at_db: None,
            verdicts: Vec::new(),
        }
    }

    pub fn best(&self) -> Option<BestGain> {
        self.best
    }

    /// Gain of the first rejected saturation jump, if any.
    pub fn saturated_at_db(&self) -> Option<f64> {
        self.saturated_at_db
    }

    /// One verdict per folded sample, in fold order.
    pub fn verdicts(&self) -> &[Verdict] {
        &self.verdicts
    }

    /// Fold one sample in.
    pub fn push(mut self, sample: &CalibrationSample) -> Self {
        let verdict = self.judge(sample);
        match verdict {
            Verdict::First | Verdict::Improved => {
                if let Some(power_dbm) = sample.measured_power_dbm {
                    self.best = Some(BestGain {
                        gain_db: sample.gain_db,
                        power_dbm,
                    });
                }
            }
            Verdict::SaturationRejected => {
                tracing::info!(
                    device = sample.device_index,
                    gain_db = sample.gain_db,
                    power_dbm = ?sample.measured_power_dbm,
                    "saturation suspected; keeping previous best"
                );
                self.saturated_at_db = Some(sample.gain_db);
            }
            Verdict::Invalid => {
                tracing::warn!(
                    device = sample.device_index,
                    gain_db = sample.gain_db,
                    "invalid measurement skipped"
                );
            }
            Verdict::NotBetter | Verdict::AboveSaturation => {}
        }
        self.verdicts.push(verdict);
        self
    }

    fn judge(&self, sample: &CalibrationSample) -> Verdict {
        let Some(power) = sample.measured_power_dbm.filter(|_| sample.is_valid()) else {
            return Verdict::Invalid;
        };
        let Some(best) = self.best else {
            return Verdict::First;
        };
        if self.saturated_at_db.is_some_and(|sat| sample.gain_db >= sat) {
            return Verdict::AboveSaturation;
        }
        let rise = power - best.power_dbm;
        if rise <= 0.0 {
            Verdict::NotBetter
        } else if rise >= self.threshold_db {
            Verdict::SaturationRejected
        } else {
            Verdict::Improved
        }
    }
}

/// Fold a sweep. Samples are taken in ascending gain order regardless of
/// the order given; verdicts follow that sorted order.
pub fn select(samples: &[CalibrationSample], threshold_db: f64) -> Selection {
    let mut ordered: Vec<&CalibrationSample> = samples.iter().collect();
    ordered.sort_by(|a, b| a.gain_db.total_cmp(&b.gain_db));
    ordered
        .into_iter()
        .fold(Selection::new(threshold_db), Selection::push)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid(gain: f64, power: f64) -> CalibrationSample {
        CalibrationSample::valid(0, gain, power)
    }

    #[test]
    fn saturation_jump_is_rejected_and_latched() {
        let samples = [
            valid(20.0, -40.0),
            valid(25.0, -38.0),
            valid(30.0, -10.0),
            valid(35.0, -36.0),
        ];
        let sel = select(&samples, 15.0);
        assert_eq!(
            sel.best(),
            Some(BestGain {
                gain_db: 25.0,
                power_dbm: -38.0
            })
        );
        assert_eq!(sel.saturated_at_db(), Some(30.0));
        assert_eq!(
            sel.verdicts(),
            &[
                Verdict::First,
                Verdict::Improved,
                Verdict::SaturationRejected,
                Verdict::AboveSaturation
            ]
        );
    }

    #[test]
    fn invalid_samples_are_skipped() {
        let samples = [
            CalibrationSample::invalid(0, 0.0),
            valid(10.0, -50.0),
            CalibrationSample::invalid(0, 20.0),
            valid(30.0, -45.0),
        ];
        let sel = select(&samples, 15.0);
        assert_eq!(sel.best().map(|b| b.gain_db), Some(30.0));
        assert_eq!(
            sel.verdicts(),
            &[Verdict::Invalid, Verdict::First, Verdict::Invalid, Verdict::Improved]
        );
    }

    #[test]
    fn lower_power_keeps_best() {
        let sel = select(&[valid(10.0, -40.0), valid(20.0, -41.0), valid(30.0, -40.0)], 15.0);
        assert_eq!(sel.best().map(|b| b.gain_db), Some(10.0));
        assert_eq!(
            sel.verdicts(),
            &[Verdict::First, Verdict::NotBetter, Verdict::NotBetter]
        );
    }

    #[test]
    fn rise_equal_to_threshold_is_rejected() {
        let sel = select(&[valid(10.0, -50.0), valid(20.0, -35.0)], 15.0);
        assert_eq!(sel.best().map(|b| b.gain_db), Some(10.0));
        assert_eq!(sel.verdicts()[1], Verdict::SaturationRejected);
    }

    #[test]
    fn all_invalid_has_no_best() {
        let sel = select(&[CalibrationSample::invalid(0, 10.0)], 15.0);
        assert_eq!(sel.best(), None);
        let sel = select(&[], 15.0);
        assert_eq!(sel.best(), None);
        assert!(sel.verdicts().is_empty());
    }

    #[test]
    fn unsorted_input_is_folded_by_gain() {
        let sel = select(&[valid(35.0, -36.0), valid(25.0, -38.0), valid(30.0, -10.0), valid(20.0, -40.0)], 15.0);
        assert_eq!(sel.best().map(|b| b.gain_db), Some(25.0));
    }

    #[test]
    fn non_finite_power_is_invalid() {
        let sel = select(&[valid(10.0, f64::NAN), valid(20.0, -40.0)], 15.0);
        assert_eq!(sel.verdicts(), &[Verdict::Invalid, Verdict::First]);
    }
}
