//! Recording-service control.
//!
//! trunk-recorder holds every receiver open while it runs, so the registry
//! and the calibrator need it stopped first. [`RecorderService::stop`]
//! returns a guard that brings the service back once the hardware work is
//! over, including on early return.

use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use trunkplan_core::config::ServiceConfig;

/// Start/stop access to the unit that consumes the receivers.
pub trait ServiceControl {
    fn unit(&self) -> &str;
    fn is_active(&self) -> anyhow::Result<bool>;
    fn stop(&self) -> anyhow::Result<()>;
    fn start(&self) -> anyhow::Result<()>;
}

/// Stop the service if it is running. The returned guard starts it again.
pub fn pause(service: &dyn ServiceControl) -> anyhow::Result<ServiceGuard<'_>> {
    let was_running = service.is_active()?;
    if was_running {
        tracing::info!(unit = service.unit(), "stopping recording service");
        service.stop()?;
    } else {
        tracing::info!(unit = service.unit(), "recording service not running");
    }
    Ok(ServiceGuard {
        service,
        was_running,
    })
}

/// The recorder's systemd unit, driven through `systemctl`.
pub struct RecorderService {
    unit: String,
    timeout: Duration,
    simulate: bool,
}

impl RecorderService {
    pub fn new(config: &ServiceConfig, simulate: bool) -> Self {
        Self {
            unit: config.unit.clone(),
            timeout: config.control_timeout,
            simulate,
        }
    }

    fn systemctl(&self, action: &str) -> anyhow::Result<()> {
        let mut child = Command::new("systemctl")
            .args([action, &self.unit])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        match wait_with_timeout(&mut child, self.timeout) {
            Ok(true) => Ok(()),
            Ok(false) => anyhow::bail!("systemctl {action} {} failed", self.unit),
            Err(e) => {
                tracing::warn!(unit = %self.unit, action, "systemctl didn't finish, killing");
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }
}

impl ServiceControl for RecorderService {
    fn unit(&self) -> &str {
        &self.unit
    }

    /// Always `false` in simulation mode, so systemd is never touched.
    fn is_active(&self) -> anyhow::Result<bool> {
        if self.simulate {
            tracing::info!(unit = %self.unit, "simulation mode, leaving service alone");
            return Ok(false);
        }
        let mut child = Command::new("systemctl")
            .args(["is-active", "--quiet", &self.unit])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        match wait_with_timeout(&mut child, self.timeout) {
            Ok(success) => Ok(success),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }

    fn stop(&self) -> anyhow::Result<()> {
        self.systemctl("stop")
    }

    fn start(&self) -> anyhow::Result<()> {
        self.systemctl("start")
    }
}

/// Restarts the service on [`ServiceGuard::restart`] or drop, if [`pause`]
/// stopped it.
pub struct ServiceGuard<'a> {
    service: &'a dyn ServiceControl,
    was_running: bool,
}

impl ServiceGuard<'_> {
    pub fn restart(mut self) -> anyhow::Result<()> {
        let result = self.start_if_needed();
        self.was_running = false;
        result
    }

    fn start_if_needed(&self) -> anyhow::Result<()> {
        if !self.was_running {
            return Ok(());
        }
        tracing::info!(unit = self.service.unit(), "restarting recording service");
        self.service.start()
    }
}

impl Drop for ServiceGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.start_if_needed() {
            tracing::error!(unit = self.service.unit(), error = %e, "failed to restart recording service");
        }
    }
}

/// Wait for a child process with a timeout. `Ok(true)` on a zero exit.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> anyhow::Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait()? {
            Some(status) => return Ok(status.success()),
            None => {
                if Instant::now() >= deadline {
                    anyhow::bail!("timeout waiting for systemctl");
                }
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Records every call in order. Shares the journal with other fakes so
    /// tests can check ordering across components.
    pub(crate) struct FakeService<'a> {
        pub journal: &'a Mutex<Vec<&'static str>>,
        pub running: bool,
    }

    impl ServiceControl for FakeService<'_> {
        fn unit(&self) -> &str {
            "trunk-recorder.service"
        }

        fn is_active(&self) -> anyhow::Result<bool> {
            self.journal.lock().unwrap().push("is-active");
            Ok(self.running)
        }

        fn stop(&self) -> anyhow::Result<()> {
            self.journal.lock().unwrap().push("stop");
            Ok(())
        }

        fn start(&self) -> anyhow::Result<()> {
            self.journal.lock().unwrap().push("start");
            Ok(())
        }
    }

    #[test]
    fn simulated_service_is_never_touched() {
        let service = RecorderService::new(&ServiceConfig::default(), true);
        let guard = pause(&service).unwrap();
        assert!(!guard.was_running);
        guard.restart().unwrap();
    }

    #[test]
    fn running_service_is_stopped_then_restarted_once() {
        let journal = Mutex::new(Vec::new());
        let service = FakeService {
            journal: &journal,
            running: true,
        };
        let guard = pause(&service).unwrap();
        guard.restart().unwrap();
        assert_eq!(*journal.lock().unwrap(), ["is-active", "stop", "start"]);
    }

    #[test]
    fn stopped_service_stays_stopped() {
        let journal = Mutex::new(Vec::new());
        let service = FakeService {
            journal: &journal,
            running: false,
        };
        pause(&service).unwrap().restart().unwrap();
        assert_eq!(*journal.lock().unwrap(), ["is-active"]);
    }

    #[test]
    fn early_return_restarts_on_drop() {
        fn fails_midway(service: &dyn ServiceControl) -> anyhow::Result<()> {
            let _guard = pause(service)?;
            anyhow::bail!("device registry stopped");
        }

        let journal = Mutex::new(Vec::new());
        let service = FakeService {
            journal: &journal,
            running: true,
        };
        assert!(fails_midway(&service).is_err());
        assert_eq!(*journal.lock().unwrap(), ["is-active", "stop", "start"]);
    }

    #[test]
    fn wait_reports_exit_status() {
        let mut ok = Command::new("true").spawn().unwrap();
        assert!(wait_with_timeout(&mut ok, Duration::from_secs(5)).unwrap());
        let mut failed = Command::new("false").spawn().unwrap();
        assert!(!wait_with_timeout(&mut failed, Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn wait_times_out() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        assert!(wait_with_timeout(&mut child, Duration::from_millis(200)).is_err());
        let _ = child.kill();
        let _ = child.wait();
    }
}
