//! Calibration results log.
//!
//! One CSV row per measured gain step. The operator reviews the log and
//! copies the chosen gain into the recorder configuration by hand; nothing
//! here touches the running configuration.

use std::io::{self, Write};

use super::{CalibrationError, DeviceSweep};

pub const CSV_HEADER: [&str; 8] = [
    "timestamp",
    "device_index",
    "serial",
    "reference_hz",
    "gain_db",
    "power_dbm",
    "valid",
    "selected",
];

/// Append every sample of `sweeps` to `out`. Pass `with_header` when the
/// destination is empty.
pub fn write_csv<W: Write>(
    out: W,
    sweeps: &[DeviceSweep],
    with_header: bool,
) -> Result<(), CalibrationError> {
    let mut writer = csv::Writer::from_writer(out);
    if with_header {
        writer.write_record(CSV_HEADER).map_err(io::Error::from)?;
    }
    for sweep in sweeps {
        let timestamp = sweep.finished_at.to_rfc3339();
        let device_index = sweep.target.device.logical_index().to_string();
        let reference_hz = sweep.target.reference_hz.to_string();
        let chosen = sweep.result.as_ref().map(|r| r.chosen_gain_db);
        for sample in &sweep.samples {
            let gain = format!("{:.1}", sample.gain_db);
            let power = sample
                .measured_power_dbm
                .filter(|_| sample.is_valid())
                .map(|p| format!("{p:.2}"))
                .unwrap_or_default();
            let selected = chosen.is_some_and(|g| g == sample.gain_db);
            let record: [&str; 8] = [
                &timestamp,
                &device_index,
                sweep.target.device.serial(),
                &reference_hz,
                &gain,
                &power,
                if sample.is_valid() { "true" } else { "false" },
                if selected { "true" } else { "false" },
            ];
            writer.write_record(record).map_err(io::Error::from)?;
        }
    }
    writer.flush()?;
    Ok(())
}
