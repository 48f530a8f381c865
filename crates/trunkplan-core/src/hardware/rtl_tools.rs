//! `rtl-sdr` command-line backend.
//!
//! Drives the stock librtlsdr utilities as child processes:
//!
//! | Operation     | Tool                                        |
//! |---------------|---------------------------------------------|
//! | enumerate     | `rtl_test -t` (device list on stderr)       |
//! | read serial   | `rtl_eeprom -d N`                           |
//! | write serial  | `rtl_eeprom -d N -s SERIAL` (answers `y`)   |
//! | measure power | `rtl_power -d N -f lo:hi:bin -g G -i 1 -1 -` |
//!
//! Every child is killed when its timeout expires. Tool paths can be
//! overridden with `RTL_TEST_BIN`, `RTL_EEPROM_BIN` and `RTL_POWER_BIN`.

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use super::{DeviceDescriptor, HardwareError, PowerRequest, SdrHardware};

/// Half-width of the `rtl_power` scan window around the reference.
const SCAN_HALF_WIDTH_HZ: u64 = 100_000;
/// `rtl_power` bin size.
const SCAN_BIN_HZ: u64 = 5_000;
/// Bins within this distance of the reference count as the channel.
const CHANNEL_HALF_WIDTH_HZ: f64 = 6_250.0;

/// Timeouts for the non-measurement tools.
#[derive(Debug, Clone, Copy)]
pub struct ToolTimeouts {
    pub enumerate: Duration,
    pub eeprom: Duration,
}

impl Default for ToolTimeouts {
    fn default() -> Self {
        ToolTimeouts {
            enumerate: Duration::from_secs(5),
            eeprom: Duration::from_secs(10),
        }
    }
}

/// Backend that shells out to the rtl-sdr utilities.
pub struct RtlToolsBackend {
    rtl_test: String,
    rtl_eeprom: String,
    rtl_power: String,
    timeouts: ToolTimeouts,
}

impl RtlToolsBackend {
    pub fn new(timeouts: ToolTimeouts) -> Self {
        let bin = |var: &str, default: &str| std::env::var(var).unwrap_or_else(|_| default.to_string());
        RtlToolsBackend {
            rtl_test: bin("RTL_TEST_BIN", "rtl_test"),
            rtl_eeprom: bin("RTL_EEPROM_BIN", "rtl_eeprom"),
            rtl_power: bin("RTL_POWER_BIN", "rtl_power"),
            timeouts,
        }
    }
}

impl SdrHardware for RtlToolsBackend {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, HardwareError> {
        // rtl_test keeps running on some tuners; the list is printed before
        // that, so a timeout still yields a usable listing.
        let out = run_tool(&self.rtl_test, &["-t"], None, self.timeouts.enumerate)?;
        let devices = parse_device_list(&out.combined());
        tracing::debug!(count = devices.len(), timed_out = out.timed_out, "rtl_test listing");
        Ok(devices)
    }

    fn read_serial(&self, index: u32) -> Result<String, HardwareError> {
        let idx = index.to_string();
        let out = run_tool(&self.rtl_eeprom, &["-d", &idx], None, self.timeouts.eeprom)?;
        let text = out.combined();
        classify_failure(index, &text)?;
        if out.timed_out {
            return Err(HardwareError::Timeout {
                index,
                after: self.timeouts.eeprom,
            });
        }
        parse_eeprom_serial(&text)
            .ok_or_else(|| HardwareError::Parse(format!("no serial in rtl_eeprom output for device {index}")))
    }

    fn write_serial(&self, index: u32, serial: &str) -> Result<(), HardwareError> {
        let idx = index.to_string();
        let out = run_tool(
            &self.rtl_eeprom,
            &["-d", &idx, "-s", serial],
            Some("y\n"),
            self.timeouts.eeprom,
        )?;
        let text = out.combined();
        classify_failure(index, &text)?;
        if out.timed_out {
            return Err(HardwareError::Timeout {
                index,
                after: self.timeouts.eeprom,
            });
        }
        if !text.contains("successfully written") {
            return Err(HardwareError::CommandFailed {
                command: format!("{} -d {idx} -s {serial}", self.rtl_eeprom),
                detail: last_line(&text),
            });
        }
        tracing::info!(device = index, serial, "EEPROM serial written");
        Ok(())
    }

    fn measure_power(&self, index: u32, request: &PowerRequest) -> Result<f64, HardwareError> {
        let lo = request.frequency_hz.saturating_sub(SCAN_HALF_WIDTH_HZ);
        let hi = request.frequency_hz + SCAN_HALF_WIDTH_HZ;
        let idx = index.to_string();
        let range = format!("{lo}:{hi}:{SCAN_BIN_HZ}");
        let gain = format!("{:.1}", request.gain_db);
        let out = run_tool(
            &self.rtl_power,
            &["-d", &idx, "-f", &range, "-g", &gain, "-i", "1", "-1", "-"],
            None,
            request.timeout,
        )?;
        classify_failure(index, &out.stderr)?;
        if out.timed_out {
            return Err(HardwareError::Timeout {
                index,
                after: request.timeout,
            });
        }
        parse_power_csv(&out.stdout, request.frequency_hz).ok_or(HardwareError::NoSamples { index })
    }
}

// ── Process helpers ─────────────────────────────────────────────────

/// Captured output of one tool run.
#[derive(Debug, Default)]
struct ToolOutput {
    stdout: String,
    stderr: String,
    timed_out: bool,
}

impl ToolOutput {
    fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

fn run_tool(
    program: &str,
    args: &[&str],
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<ToolOutput, HardwareError> {
    tracing::trace!(program, ?args, "running tool");
    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| HardwareError::CommandFailed {
            command: program.to_string(),
            detail: e.to_string(),
        })?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes())?;
    }

    // Drain both pipes on their own threads so a chatty tool cannot block
    // on a full pipe while we wait for it.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let timed_out = !wait_with_timeout(&mut child, timeout)?;
    if timed_out {
        tracing::warn!(program, ?timeout, "tool timed out, killing");
        let _ = child.kill();
        let _ = child.wait();
    }

    let join = |h: Option<std::thread::JoinHandle<String>>| {
        h.and_then(|h| h.join().ok()).unwrap_or_default()
    };
    Ok(ToolOutput {
        stdout: join(stdout),
        stderr: join(stderr),
        timed_out,
    })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Wait for a child process with a timeout. `Ok(false)` on expiry.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<bool, HardwareError> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait()? {
            Some(_status) => return Ok(true),
            None => {
                if Instant::now() >= deadline {
                    return Ok(false);
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

// ── Output parsing ──────────────────────────────────────────────────

/// Map librtlsdr's failure messages to typed errors.
fn classify_failure(index: u32, text: &str) -> Result<(), HardwareError> {
    if text.contains("usb_claim_interface error -6")
        || text.contains("Device or resource busy")
        || text.contains("Failed to open rtlsdr device")
    {
        return Err(HardwareError::Busy { index });
    }
    if text.contains("No matching devices found") || text.contains("No supported devices found") {
        return Err(HardwareError::NotFound { index });
    }
    Ok(())
}

/// Parse the `Found N device(s):` block printed by rtl_test / rtl_eeprom.
///
/// ```text
/// Found 2 device(s):
///   0:  Realtek, RTL2838UHIDIR, SN: 00000001
///   1:  Realtek, RTL2838UHIDIR, SN: 00000001
/// ```
fn parse_device_list(text: &str) -> Vec<DeviceDescriptor> {
    let mut devices = Vec::new();
    let mut in_list = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("Found ") && trimmed.contains("device(s)") {
            in_list = true;
            continue;
        }
        if !in_list {
            continue;
        }
        let Some((idx, rest)) = trimmed.split_once(':') else {
            if trimmed.is_empty() {
                in_list = false;
            }
            continue;
        };
        let Ok(index) = idx.trim().parse::<u32>() else {
            in_list = false;
            continue;
        };
        let mut fields = rest.split(',').map(str::trim);
        let vendor = fields.next().unwrap_or_default().to_string();
        let product = fields.next().unwrap_or_default().to_string();
        devices.push(DeviceDescriptor {
            index,
            vendor,
            product,
        });
    }
    devices
}

/// Pull `Serial number:` out of rtl_eeprom's configuration dump.
fn parse_eeprom_serial(text: &str) -> Option<String> {
    text.lines()
        .filter_map(|l| l.trim().strip_prefix("Serial number:"))
        .map(|v| v.trim().to_string())
        .next()
}

/// Peak power (dB) of the bins around `frequency_hz` in rtl_power CSV.
///
/// Rows look like `date, time, hz_low, hz_high, hz_step, samples, dB, dB, ...`.
fn parse_power_csv(text: &str, frequency_hz: u64) -> Option<f64> {
    let target = frequency_hz as f64;
    let mut best: Option<f64> = None;
    for line in text.lines() {
        let cols: Vec<&str> = line.split(',').map(str::trim).collect();
        if cols.len() < 7 {
            continue;
        }
        let (Ok(low), Ok(step)) = (cols[2].parse::<f64>(), cols[4].parse::<f64>()) else {
            continue;
        };
        for (k, value) in cols[6..].iter().enumerate() {
            let Ok(db) = value.parse::<f64>() else {
                continue;
            };
            if !db.is_finite() {
                continue;
            }
            let bin_lo = low + k as f64 * step;
            let bin_hi = bin_lo + step;
            if bin_hi >= target - CHANNEL_HALF_WIDTH_HZ && bin_lo <= target + CHANNEL_HALF_WIDTH_HZ {
                best = Some(best.map_or(db, |b: f64| b.max(db)));
            }
        }
    }
    best
}

fn last_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .unwrap_or("no output")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RTL_TEST_OUTPUT: &str = "\
Found 3 device(s):
  0:  Realtek, RTL2838UHIDIR, SN: 00000001
  1:  Realtek, RTL2838UHIDIR, SN: 00000001
  2:  NooElec, NESDR SMArt v5, SN: 00000102

Using device 0: Generic RTL2832U OEM
Found Rafael Micro R820T tuner
No E4000 tuner found, aborting.
";

    const RTL_EEPROM_OUTPUT: &str = "\
Found 1 device(s):
  0:  Generic RTL2832U OEM

Using device 0: Generic RTL2832U OEM
Found Rafael Micro R820T tuner

Current configuration:
__________________________________________
Vendor ID:\t\t0x0bda
Product ID:\t\t0x2838
Manufacturer:\t\tRealtek
Product:\t\tRTL2838UHIDIR
Serial number:\t\t00000001
Serial number enabled:\tyes
__________________________________________
";

    #[test]
    fn parses_rtl_test_listing() {
        let devices = parse_device_list(RTL_TEST_OUTPUT);
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].index, 0);
        assert_eq!(devices[0].vendor, "Realtek");
        assert_eq!(devices[0].product, "RTL2838UHIDIR");
        assert_eq!(devices[2].vendor, "NooElec");
    }

    #[test]
    fn empty_listing() {
        assert!(parse_device_list("No supported devices found.\n").is_empty());
    }

    #[test]
    fn parses_eeprom_serial() {
        assert_eq!(parse_eeprom_serial(RTL_EEPROM_OUTPUT).as_deref(), Some("00000001"));
        assert_eq!(parse_eeprom_serial("garbage"), None);
    }

    #[test]
    fn busy_and_missing_are_classified() {
        let busy = "Using device 0: Generic RTL2832U OEM\nusb_claim_interface error -6\n";
        assert!(matches!(classify_failure(0, busy), Err(HardwareError::Busy { index: 0 })));
        assert!(matches!(
            classify_failure(4, "No matching devices found.\n"),
            Err(HardwareError::NotFound { index: 4 })
        ));
        assert!(classify_failure(0, RTL_EEPROM_OUTPUT).is_ok());
    }

    #[test]
    fn picks_peak_bin_at_reference() {
        let csv = "2024-05-01, 12:00:00, 850912500, 851112500, 5000.00, 4096, \
-60.0, -59.0, -58.5, -61.0, -62.0, -63.0, -64.0, -65.0, -66.0, -67.0, \
-68.0, -69.0, -70.0, -71.0, -72.0, -73.0, -74.0, -75.0, -40.5, -41.0, -38.2, -39.0, -44.0";
        // Reference 851.0125 MHz → bins 18..=21 (850.9125 + k * 5 kHz).
        assert_eq!(parse_power_csv(csv, 851_012_500), Some(-38.2));
        assert_eq!(parse_power_csv("", 851_012_500), None);
    }

    #[test]
    fn last_line_skips_blanks() {
        assert_eq!(last_line("a\nb\n\n"), "b");
        assert_eq!(last_line(""), "no output");
    }

    #[test]
    fn missing_tool_is_command_failure() {
        let err = run_tool(
            "/nonexistent/rtl_test",
            &["-t"],
            None,
            Duration::from_millis(100),
        )
        .unwrap_err();
        assert!(matches!(err, HardwareError::CommandFailed { .. }));
    }
}
