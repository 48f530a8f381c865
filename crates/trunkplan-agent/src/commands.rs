//! Subcommand implementations.

use std::fs::OpenOptions;
use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::Context;
use trunkplan_common::format_mhz;
use trunkplan_common::models::Channel;
use trunkplan_common::sources::RecorderConfig;
use trunkplan_core::calibrate::{self, artifact, CalibrationTarget, DeviceSweep, GainCalibrator};
use trunkplan_core::channels::parse_channel_list;
use trunkplan_core::config::TrunkplanConfig;
use trunkplan_core::hardware::lease::DeviceLeases;
use trunkplan_core::hardware::SdrHardware;
use trunkplan_core::plan::coverage;
use trunkplan_core::plan::device_map::DeviceMap;
use trunkplan_core::plan::ReceiverPlan;
use trunkplan_core::registry::{DeviceRegistry, RegistryReport, RegistryState};

use crate::backend::Backend;
use crate::operator::{self, OperatorSignal};
use crate::service::{self, ServiceControl};

// ── plan ────────────────────────────────────────────────────────────

pub struct PlanOptions {
    pub channels: PathBuf,
    pub out_dir: PathBuf,
}

pub fn plan(config: &TrunkplanConfig, opts: &PlanOptions) -> anyhow::Result<()> {
    let channels = read_channels(&opts.channels)?;
    let plan = build_plan(config, &channels)?;

    let map = load_device_map(&config.output.device_map_path)?.unwrap_or_default();
    if map.assignments.is_empty() {
        tracing::warn!("no device map; sources select receivers by bus index");
    }
    let sources = plan.render_sources(&map, &config.output.sources);

    std::fs::create_dir_all(&opts.out_dir)
        .with_context(|| format!("creating {}", opts.out_dir.display()))?;
    let sources_path = opts.out_dir.join("sources.json");
    write_json(&sources_path, &serde_json::json!({ "sources": sources }))?;
    let siteinfo_path = opts.out_dir.join("siteinfo.json");
    write_json(&siteinfo_path, &plan.site_info(&channels))?;

    print_plan(&plan);
    let freqs: Vec<u64> = channels.iter().map(|c| c.frequency_hz).collect();
    println!();
    print!("{}", coverage::render_graph(&plan.receivers(), &freqs));
    println!();
    println!("Wrote {} and {}", sources_path.display(), siteinfo_path.display());
    Ok(())
}

// ── analyze ─────────────────────────────────────────────────────────

pub fn analyze(recorder_config: &Path, channels: Option<&Path>) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(recorder_config)
        .with_context(|| format!("reading {}", recorder_config.display()))?;
    let recorder: RecorderConfig = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", recorder_config.display()))?;

    let mut site = recorder.control_channels();
    if let Some(path) = channels {
        site.extend(read_channels(path)?);
    }
    let report = coverage::analyze(&recorder.sources, &site);
    print!("{report}");
    if !report.is_complete() {
        tracing::warn!(uncovered = report.uncovered.len(), "some channels are outside every source");
    }
    Ok(())
}

// ── devices ─────────────────────────────────────────────────────────

pub async fn devices(
    config: &TrunkplanConfig,
    backend: &Backend,
    service: &dyn ServiceControl,
    channels: &Path,
    regenerate: bool,
) -> anyhow::Result<()> {
    let channels = read_channels(channels)?;
    let plan = build_plan(config, &channels)?;

    let report = identify_devices(config, backend.hardware(), service, |written| {
        answer_replug(backend, written)
    })
    .await?;

    print_registry(&report);

    let previous = load_device_map(&config.output.device_map_path)?;
    let map = DeviceMap::reconcile(
        previous.as_ref(),
        &report.serials(),
        plan.receiver_count(),
        regenerate,
    );
    let encoded = map.to_toml_string().map_err(anyhow::Error::msg)?;
    std::fs::write(&config.output.device_map_path, encoded)
        .with_context(|| format!("writing {}", config.output.device_map_path.display()))?;

    println!();
    for band in &plan.bands {
        match map.serial_for(band.id) {
            Some(serial) => println!("  band {} ({}) -> {serial}", band.id, format_mhz(band.center_hz)),
            None => println!("  band {} ({}) -> unassigned", band.id, format_mhz(band.center_hz)),
        }
    }
    println!("Wrote {}", config.output.device_map_path.display());
    Ok(())
}

// ── calibrate ───────────────────────────────────────────────────────

pub struct CalibrateOptions {
    pub channels: PathBuf,
    pub device: Option<String>,
    pub results: Option<PathBuf>,
}

pub async fn calibrate(
    config: &TrunkplanConfig,
    backend: &Backend,
    service: &dyn ServiceControl,
    opts: &CalibrateOptions,
) -> anyhow::Result<()> {
    let channels = read_channels(&opts.channels)?;
    let plan = build_plan(config, &channels)?;

    let guard = service::pause(service)?;
    let sweeps = sweep_devices(
        config,
        backend.hardware(),
        &plan,
        opts.device.as_deref(),
        |written| answer_replug(backend, written),
    )
    .await;
    guard.restart()?;
    let sweeps = sweeps?;

    let results_path = opts.results.as_deref().unwrap_or(&config.results_path);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(results_path)
        .with_context(|| format!("opening {}", results_path.display()))?;
    let empty = file.metadata()?.len() == 0;
    artifact::write_csv(file, &sweeps, empty)?;

    println!();
    println!("{:<10} {:>4} {:>14} {:>9} {:>11}", "serial", "band", "reference", "gain dB", "power dBm");
    for sweep in &sweeps {
        let t = &sweep.target;
        match &sweep.result {
            Some(r) => println!(
                "{:<10} {:>4} {:>14} {:>9.1} {:>11.2}",
                t.device.serial(),
                t.band_id,
                format_mhz(t.reference_hz),
                r.chosen_gain_db,
                r.best_power_dbm
            ),
            None => println!(
                "{:<10} {:>4} {:>14} {:>9} {:>11}",
                t.device.serial(),
                t.band_id,
                format_mhz(t.reference_hz),
                "-",
                "no data"
            ),
        }
    }
    println!();
    println!("Results appended to {}", results_path.display());
    println!("Gains are not applied automatically; copy them into the recorder configuration.");
    Ok(())
}

/// Stop the recording service, run the registry, then restart the service
/// whatever the registry's outcome.
async fn identify_devices<F, Fut>(
    config: &TrunkplanConfig,
    hardware: &dyn SdrHardware,
    service: &dyn ServiceControl,
    on_replug: F,
) -> anyhow::Result<RegistryReport>
where
    F: FnMut(Vec<(u32, String)>) -> Fut,
    Fut: Future<Output = OperatorSignal>,
{
    let guard = service::pause(service)?;
    let leases = DeviceLeases::new();
    let report = run_registry(config, hardware, &leases, on_replug).await;
    guard.restart()?;
    report
}

/// Validate the receivers, then sweep the ones with a band. The caller
/// holds the recording service stopped.
async fn sweep_devices<F, Fut>(
    config: &TrunkplanConfig,
    hardware: &dyn SdrHardware,
    plan: &ReceiverPlan,
    only: Option<&str>,
    on_replug: F,
) -> anyhow::Result<Vec<DeviceSweep>>
where
    F: FnMut(Vec<(u32, String)>) -> Fut,
    Fut: Future<Output = OperatorSignal>,
{
    let leases = DeviceLeases::new();
    let report = run_registry(config, hardware, &leases, on_replug).await?;
    let previous = load_device_map(&config.output.device_map_path)?;
    let map = DeviceMap::reconcile(
        previous.as_ref(),
        &report.serials(),
        plan.receiver_count(),
        false,
    );

    let targets = match only {
        Some(serial) => {
            let band_id = map
                .band_for(serial)
                .with_context(|| format!("device {serial} has no band assignment"))?;
            let band = plan
                .bands
                .iter()
                .find(|b| b.id == band_id)
                .with_context(|| format!("band {band_id} is not in the plan"))?;
            vec![CalibrationTarget::for_band(&report, serial, band)?]
        }
        None => calibrate::targets(&report, &plan.bands, &map)?,
    };
    if targets.is_empty() {
        anyhow::bail!("no validated receiver has a band assignment");
    }

    let calibrator = GainCalibrator::new(hardware, leases, config.calibration.clone())?;
    Ok(tokio::task::block_in_place(|| calibrator.run(&targets)))
}

// ── Shared ──────────────────────────────────────────────────────────

/// Answer the replug barrier: the operator on real hardware, an immediate
/// simulated replug otherwise.
async fn answer_replug(backend: &Backend, written: Vec<(u32, String)>) -> OperatorSignal {
    if backend.is_simulated() {
        backend.simulate_replug();
        OperatorSignal::Confirmed
    } else {
        operator::await_reconnect(&written).await
    }
}

/// Drive the registry to completion, asking `on_replug` at the replug
/// barrier.
async fn run_registry<F, Fut>(
    config: &TrunkplanConfig,
    hardware: &dyn SdrHardware,
    leases: &DeviceLeases,
    mut on_replug: F,
) -> anyhow::Result<RegistryReport>
where
    F: FnMut(Vec<(u32, String)>) -> Fut,
    Fut: Future<Output = OperatorSignal>,
{
    let mut registry = DeviceRegistry::new(hardware, leases.clone(), config.registry.clone());
    loop {
        let state = tokio::task::block_in_place(|| registry.run_until_blocked())?;
        match state {
            RegistryState::AwaitingReconnect => {
                let signal = on_replug(registry.reassigned().to_vec()).await;
                match signal {
                    OperatorSignal::Confirmed => {
                        registry.confirm_reconnect()?;
                    }
                    OperatorSignal::Cancelled => registry.cancel()?,
                }
            }
            RegistryState::Done | RegistryState::Cancelled => break,
            other => anyhow::bail!("device registry stopped in state {other}"),
        }
    }
    Ok(registry.finish()?)
}

fn build_plan(config: &TrunkplanConfig, channels: &[Channel]) -> anyhow::Result<ReceiverPlan> {
    ReceiverPlan::build(channels, &config.planner).context("receiver planning failed")
}

fn read_channels(path: &Path) -> anyhow::Result<Vec<Channel>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let channels =
        parse_channel_list(&text).with_context(|| format!("parsing {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        channels = channels.len(),
        control = channels.iter().filter(|c| c.is_control()).count(),
        "channel list loaded"
    );
    Ok(channels)
}

fn load_device_map(path: &Path) -> anyhow::Result<Option<DeviceMap>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(DeviceMap::from_toml_str(&text).map_err(anyhow::Error::msg)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json + "\n").with_context(|| format!("writing {}", path.display()))
}

fn print_plan(plan: &ReceiverPlan) {
    println!("{} receiver(s):", plan.receiver_count());
    for band in &plan.bands {
        println!(
            "  band {}: center {} ({} - {}), {} channel(s), {} control, {} recorder(s)",
            band.id,
            format_mhz(band.center_hz),
            format_mhz(band.lower_hz()),
            format_mhz(band.upper_hz()),
            band.channel_count(),
            band.control_channels().count(),
            band.recorder_count
        );
    }
}

fn print_registry(report: &RegistryReport) {
    println!("{} receiver(s) identified:", report.devices.len());
    for dev in &report.devices {
        println!(
            "  #{} bus {} serial {} ({})",
            dev.logical_index(),
            dev.bus_index(),
            dev.serial(),
            dev.description()
        );
    }
    for probe in &report.unresolved {
        println!(
            "  bus {} unresolved: {:?}",
            probe.descriptor.index, probe.identity
        );
    }
    if !report.reassigned.is_empty() {
        println!("{} serial(s) reassigned this run", report.reassigned.len());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use trunkplan_core::hardware::simulated::SimulatedHardware;
    use trunkplan_core::hardware::{DeviceDescriptor, HardwareError, PowerRequest};
    use trunkplan_core::registry::RegistryError;

    use super::*;
    use crate::service::tests::FakeService;

    /// Simulated receivers that note every hardware call in a shared
    /// journal.
    struct JournaledHardware<'a> {
        inner: SimulatedHardware,
        journal: &'a Mutex<Vec<&'static str>>,
    }

    impl JournaledHardware<'_> {
        fn note(&self) {
            self.journal.lock().unwrap().push("hardware");
        }
    }

    impl SdrHardware for JournaledHardware<'_> {
        fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, HardwareError> {
            self.note();
            self.inner.enumerate()
        }

        fn read_serial(&self, index: u32) -> Result<String, HardwareError> {
            self.note();
            self.inner.read_serial(index)
        }

        fn write_serial(&self, index: u32, serial: &str) -> Result<(), HardwareError> {
            self.note();
            self.inner.write_serial(index, serial)
        }

        fn measure_power(&self, index: u32, request: &PowerRequest) -> Result<f64, HardwareError> {
            self.note();
            self.inner.measure_power(index, request)
        }
    }

    /// Stop first, hardware only in between, start last.
    fn assert_service_brackets_hardware(journal: &Mutex<Vec<&'static str>>) {
        let log = journal.lock().unwrap();
        assert!(log.len() > 3, "journal too short: {log:?}");
        assert_eq!(&log[..2], ["is-active", "stop"]);
        assert_eq!(log.last(), Some(&"start"));
        assert!(log[2..log.len() - 1].iter().all(|e| *e == "hardware"), "{log:?}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn registry_runs_while_service_is_stopped() {
        let journal = Mutex::new(Vec::new());
        let hw = JournaledHardware {
            inner: SimulatedHardware::factory_batch(3),
            journal: &journal,
        };
        let service = FakeService {
            journal: &journal,
            running: true,
        };

        let report = identify_devices(&TrunkplanConfig::default(), &hw, &service, |_| {
            hw.inner.replug();
            async { OperatorSignal::Confirmed }
        })
        .await
        .unwrap();

        assert_eq!(report.devices.len(), 3);
        assert_eq!(report.reassigned.len(), 3);
        assert_service_brackets_hardware(&journal);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_reverification_still_restarts_service() {
        let journal = Mutex::new(Vec::new());
        let inner = SimulatedHardware::factory_batch(2);
        inner.configure(0, |d| d.write_protected = true);
        inner.configure(1, |d| d.write_protected = true);
        let hw = JournaledHardware {
            inner,
            journal: &journal,
        };
        let service = FakeService {
            journal: &journal,
            running: true,
        };

        let err = identify_devices(&TrunkplanConfig::default(), &hw, &service, |_| {
            hw.inner.replug();
            async { OperatorSignal::Confirmed }
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<RegistryError>(),
            Some(RegistryError::DuplicateSerialAfterReassign { .. })
        ));
        assert_service_brackets_hardware(&journal);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_replug_still_restarts_service() {
        let journal = Mutex::new(Vec::new());
        let hw = JournaledHardware {
            inner: SimulatedHardware::factory_batch(2),
            journal: &journal,
        };
        let service = FakeService {
            journal: &journal,
            running: true,
        };

        let err = identify_devices(&TrunkplanConfig::default(), &hw, &service, |_| async {
            OperatorSignal::Cancelled
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<RegistryError>(),
            Some(RegistryError::Cancelled)
        ));
        assert_eq!(hw.inner.writes().len(), 2);
        assert_service_brackets_hardware(&journal);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn calibration_sweeps_while_service_is_stopped() {
        let journal = Mutex::new(Vec::new());
        let hw = JournaledHardware {
            inner: SimulatedHardware::with_serials(&["TRS00000", "TRS00001"]),
            journal: &journal,
        };
        let service = FakeService {
            journal: &journal,
            running: true,
        };
        let mut config = TrunkplanConfig::default();
        config.output.device_map_path = std::env::temp_dir().join("trunkplan-no-such-map.toml");
        let channels = vec![Channel::control(851_012_500), Channel::voice(851_500_000)];
        let plan = build_plan(&config, &channels).unwrap();

        let guard = service::pause(&service).unwrap();
        let sweeps = sweep_devices(&config, &hw, &plan, None, |_| async {
            OperatorSignal::Confirmed
        })
        .await;
        guard.restart().unwrap();

        let sweeps = sweeps.unwrap();
        assert_eq!(sweeps.len(), 1);
        assert_eq!(sweeps[0].target.reference_hz, 851_012_500);
        assert_service_brackets_hardware(&journal);
    }
}
