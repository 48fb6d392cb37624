use std::path::PathBuf;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::process::{execute_best_effort, ProcessHandle};
use crate::readiness::{Readiness, ReadinessDetector};
use crate::runtime::Strategy;
use crate::telemetry::Component;

/**
 * ActiveDaemons
 * The long-running services a trial depends on: the container runtime
 * daemon and, per strategy, the snapshotter daemon that fetches layers.
 * Owned by the sweep and lent to each trial.
 */
#[derive(Debug)]
pub struct ActiveDaemons<'a> {
    config: &'a Config,
    runtime: Option<ProcessHandle>,
    lazy_fetch: Option<ProcessHandle>,
    delta_fetch: Option<ProcessHandle>,
}

impl<'a> ActiveDaemons<'a> {
    pub fn new(config: &'a Config) -> ActiveDaemons<'a> {
        ActiveDaemons {
            config,
            runtime: None,
            lazy_fetch: None,
            delta_fetch: None,
        }
    }

    fn log_path(&self, name: &str) -> Option<PathBuf> {
        self.config
            .runtime_log_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.log", name)))
    }

    /// Runs the reset script, then starts the runtime daemon and waits for
    /// its boot marker.
    ///
    /// A daemon that never prints the marker is logged and kept; the trials
    /// that follow will fail on their own timeouts.
    pub async fn reset_container_service(&mut self) -> Result<()> {
        if let Some(mut runtime) = self.runtime.take() {
            runtime
                .kill(&self.config.privilege_prefix, self.config.stop_timeout())
                .await;
        }

        let reset = self.config.privileged(self.config.reset_command.iter().cloned());
        execute_best_effort(&reset, self.config.command_timeout()).await;

        let argv = self
            .config
            .privileged(self.config.containerd_command.iter().cloned());
        let mut runtime = ProcessHandle::spawn("containerd", &argv, self.log_path("containerd"))?;
        let boot = ReadinessDetector::marker(&self.config.containerd_boot_marker)
            .with_timeout(Some(self.config.boot_timeout()))
            .detect(&mut runtime)
            .await;
        match boot {
            Readiness::Ready { elapsed, .. } => {
                info!("containerd booted in {:.3}s", elapsed.as_secs_f64())
            }
            Readiness::Failed {
                reason, last_line, ..
            } => warn!(?reason, last_line = ?last_line, "containerd did not report boot"),
        }
        self.runtime = Some(runtime);
        Ok(())
    }

    /// Starts the lazy-fetch (stargz) snapshotter daemon.
    pub async fn start_lazy_fetch(&mut self) -> Result<()> {
        self.stop_lazy_fetch().await;
        let argv = self.config.privileged(self.config.stargz_command.iter().cloned());
        self.lazy_fetch = Some(ProcessHandle::spawn("stargz", &argv, self.log_path("stargz"))?);
        tokio::time::sleep(self.config.plugin_wait()).await;
        Ok(())
    }

    /// Starts the delta-fetch (starlight) snapshotter daemon against the
    /// configured proxy.
    pub async fn start_delta_fetch(&mut self) -> Result<()> {
        self.stop_delta_fetch().await;
        let mut argv = self
            .config
            .privileged(self.config.starlight_command.iter().cloned());
        if !self.config.use_https {
            argv.push("--plain-http".to_string());
        }
        argv.push(format!("--server={}", self.config.proxy_server));
        self.delta_fetch = Some(ProcessHandle::spawn(
            "starlight",
            &argv,
            self.log_path("starlight"),
        )?);
        tokio::time::sleep(self.config.plugin_wait()).await;
        Ok(())
    }

    pub async fn stop_lazy_fetch(&mut self) {
        if let Some(mut daemon) = self.lazy_fetch.take() {
            daemon
                .kill(&self.config.privilege_prefix, self.config.stop_timeout())
                .await;
        }
    }

    pub async fn stop_delta_fetch(&mut self) {
        if let Some(mut daemon) = self.delta_fetch.take() {
            daemon
                .kill(&self.config.privilege_prefix, self.config.stop_timeout())
                .await;
        }
    }

    /// Starts whatever snapshotter `strategy` needs. Vanilla needs none.
    pub async fn start_for(&mut self, strategy: Strategy) -> Result<()> {
        match strategy {
            Strategy::Vanilla => Ok(()),
            Strategy::Estargz => self.start_lazy_fetch().await,
            Strategy::Starlight => self.start_delta_fetch().await,
        }
    }

    pub async fn stop_for(&mut self, strategy: Strategy) {
        match strategy {
            Strategy::Vanilla => {}
            Strategy::Estargz => self.stop_lazy_fetch().await,
            Strategy::Starlight => self.stop_delta_fetch().await,
        }
    }

    /// The snapshotter daemon of `strategy`, if it is running.
    pub fn fetch_daemon_mut(&mut self, strategy: Strategy) -> Option<&mut ProcessHandle> {
        match strategy {
            Strategy::Vanilla => None,
            Strategy::Estargz => self.lazy_fetch.as_mut(),
            Strategy::Starlight => self.delta_fetch.as_mut(),
        }
    }

    /// Adopts an already spawned snapshotter daemon, e.g. one started by
    /// another tool.
    pub fn attach_fetch_daemon(&mut self, strategy: Strategy, daemon: ProcessHandle) {
        match strategy {
            Strategy::Vanilla => {}
            Strategy::Estargz => self.lazy_fetch = Some(daemon),
            Strategy::Starlight => self.delta_fetch = Some(daemon),
        }
    }

    /// Daemons sampled by telemetry for a trial of `strategy`: the runtime
    /// daemon always, plus the strategy's snapshotter.
    pub fn components(&self, strategy: Strategy) -> Vec<Component> {
        let mut components = vec![Component::new("containerd", &self.config.containerd_exe)];
        match strategy {
            Strategy::Vanilla => {}
            Strategy::Estargz => {
                components.push(Component::new("estargz", &self.config.stargz_exe))
            }
            Strategy::Starlight => {
                components.push(Component::new("starlight", &self.config.starlight_exe))
            }
        }
        components
    }

    /// Stops every daemon.
    pub async fn shutdown(&mut self) {
        self.stop_lazy_fetch().await;
        self.stop_delta_fetch().await;
        if let Some(mut runtime) = self.runtime.take() {
            runtime
                .kill(&self.config.privilege_prefix, self.config.stop_timeout())
                .await;
        }
    }
}
