//! One trial of one delivery strategy, from pull to telemetry.
//!
//! Phases run strictly in order: start, pull, create, launch, measure, stop,
//! cleanup, resync, telemetry. A pull or create timeout records its
//! terminal event and returns immediately. Everything after launch is best
//! effort: failures are logged and the trial still reports its outcome.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::context::{Phase, TrialKey, TrialOptions, TrialOutcome};
use crate::daemons::ActiveDaemons;
use crate::error::Result;
use crate::events::EventLog;
use crate::experiment::Experiment;
use crate::mount::ScratchMount;
use crate::netem::NetworkEmulationController;
use crate::process::{execute_command, CommandOutput, ProcessHandle};
use crate::readiness::{FailureReason, Readiness, ReadinessDetector};
use crate::runtime::{ContainerRuntime, Strategy};
use crate::telemetry::TelemetryCollector;
use crate::utils::{display_command, epoch_seconds};

/// Follows snapshotter daemon output until a background transfer finishes.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferTracker {
    /// Lazy fetch: every resolve is balanced by a completion.
    Counting {
        resolve: String,
        complete: String,
        pending: i64,
    },
    /// Delta fetch: a single completion line.
    Marker { complete: String },
}

impl TransferTracker {
    pub fn for_strategy(strategy: Strategy, config: &Config) -> Option<TransferTracker> {
        match strategy {
            Strategy::Vanilla => None,
            Strategy::Estargz => Some(TransferTracker::Counting {
                resolve: config.estargz_resolve_marker.clone(),
                complete: config.estargz_complete_marker.clone(),
                pending: 0,
            }),
            Strategy::Starlight => Some(TransferTracker::Marker {
                complete: config.starlight_complete_marker.clone(),
            }),
        }
    }

    /// Feeds one line; `true` once the transfer is complete.
    pub fn observe(&mut self, line: &str) -> bool {
        match self {
            TransferTracker::Counting {
                resolve,
                complete,
                pending,
            } => {
                if line.contains(resolve.as_str()) {
                    *pending += 1;
                }
                if line.contains(complete.as_str()) {
                    *pending -= 1;
                    return *pending == 0;
                }
                false
            }
            TransferTracker::Marker { complete } => line.contains(complete.as_str()),
        }
    }
}

/**
 * Runner
 * Drives single trials against the external runtime CLIs.
 */
#[derive(Debug, Clone)]
pub struct Runner<'a> {
    config: &'a Config,
    netem: NetworkEmulationController,
    telemetry: TelemetryCollector,
}

impl<'a> Runner<'a> {
    pub fn new(config: &'a Config) -> Runner<'a> {
        Runner {
            config,
            netem: NetworkEmulationController::new(config),
            telemetry: TelemetryCollector::new(config),
        }
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryCollector) -> Runner<'a> {
        self.telemetry = telemetry;
        self
    }

    pub fn netem(&self) -> &NetworkEmulationController {
        &self.netem
    }

    /// Runs one trial of `strategy` and records its events.
    ///
    /// # Arguments
    /// * `experiment` - The subject; borrowed for the whole trial.
    /// * `log` - Receives the events, unless `options.dry_run` is set.
    /// * `daemons` - Runtime and snapshotter daemons; the snapshotter output
    ///   is consumed during resync.
    /// * `strategy` - Delivery method under test.
    /// * `key` - Network condition and round the events are keyed by.
    /// * `options` - Trial id, baseline/update, workload and debug switches.
    ///
    /// # Returns
    /// * `Err` only if the commands cannot be built, e.g. a baseline trial
    ///   of an experiment without an old version. Nothing is recorded then.
    /// * `Ok(TrialOutcome)` otherwise; failed phases show up as events and
    ///   in the outcome, never as errors.
    pub async fn run_trial(
        &self,
        experiment: &Experiment,
        log: &mut EventLog,
        daemons: &mut ActiveDaemons<'_>,
        strategy: Strategy,
        key: TrialKey,
        options: &TrialOptions,
    ) -> Result<TrialOutcome> {
        let runtime = ContainerRuntime::new(self.config, strategy);
        let method = options.method(strategy.name());
        let id = options.trial_id;
        let TrialKey { rtt, round } = key;

        let mounts: Vec<ScratchMount> = experiment
            .mounts()
            .iter()
            .map(|spec| {
                ScratchMount::new(
                    spec,
                    &self.config.scratch_workdir,
                    &self.config.privilege_prefix,
                    self.config.command_timeout(),
                )
            })
            .collect();
        let mount_args: Vec<String> = mounts.iter().map(|m| m.render(id)).collect();
        let pull = runtime.pull_command(experiment, options)?;
        let create = runtime.create_command(experiment, options, &mount_args)?;

        let mut discarded = EventLog::new();
        let log = if options.dry_run { &mut discarded } else { log };

        let mut workload = match options.workload {
            true => self.start_workload(experiment, round, &method).await,
            false => None,
        };

        let start = epoch_seconds();
        info!(method = %method, rtt, round, trial = id, "trial started");
        log.add_event(&method, "start", rtt, round, start, 0.0);

        // Pull
        if let Some(phase) = self.run_phase(Phase::Pull, &pull, options).await {
            self.abort(log, &method, key, phase, start, workload.as_mut()).await;
            return Ok(TrialOutcome::aborted(id, &method, phase));
        }
        let ts_pull = epoch_seconds();
        info!(method = %method, "pull {:.6}s", ts_pull - start);
        log.add_event(&method, "pull", rtt, round, ts_pull, ts_pull - start);

        // Create
        for mount in &mounts {
            mount.prepare(id).await;
        }
        if let Some(phase) = self.run_phase(Phase::Create, &create, options).await {
            self.abort(log, &method, key, phase, start, workload.as_mut()).await;
            if !options.use_old {
                for mount in &mounts {
                    mount.destroy(id).await;
                }
            }
            return Ok(TrialOutcome::aborted(id, &method, phase));
        }
        let ts_create = epoch_seconds();
        info!(method = %method, "create {:.6}s", ts_create - start);
        log.add_event(&method, "create", rtt, round, ts_create, ts_create - start);

        // Launch
        let tee = self
            .config
            .runtime_log_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}-runtime.log", strategy)));
        let start_argv = runtime.start_command(options);
        let mut launch = match ProcessHandle::spawn("task", &start_argv, tee) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "task start failed");
                None
            }
        };
        let readiness = match launch.as_mut() {
            Some(handle) => {
                ReadinessDetector::marker(&experiment.ready_marker)
                    .with_timeout(self.config.ready_timeout())
                    .detect(handle)
                    .await
            }
            None => Readiness::Failed {
                reason: FailureReason::StreamClosed,
                lines_read: 0,
                last_line: None,
            },
        };
        let ts_done = epoch_seconds();
        let duration = match &readiness {
            Readiness::Ready { .. } => {
                info!(method = %method, "done {:.6}s", ts_done - start);
                Some(ts_done - start)
            }
            Readiness::Failed {
                reason, last_line, ..
            } => {
                warn!(method = %method, ?reason, last_line = ?last_line, "container never became ready");
                None
            }
        };
        log.add_event(&method, "done", rtt, round, ts_done, duration.unwrap_or(f64::NAN));
        self.telemetry.record_traffic(log, &method, rtt, round, "launched");

        // Measure
        if let Some(mut generator) = workload.take() {
            if generator
                .wait_timeout(self.config.workload_timeout())
                .await
                .is_err()
            {
                warn!(method = %method, "workload did not finish");
                generator
                    .kill(&self.config.privilege_prefix, self.config.stop_timeout())
                    .await;
            }
            for line in generator.drain(Duration::from_secs(1)).await {
                debug!(workload = %line);
            }
        }

        // Stop
        tokio::time::sleep(self.config.pre_stop_settle()).await;
        match execute_command(&runtime.kill_command(options), self.config.stop_timeout()).await {
            Ok(output) => {
                self.log_output(&output, options);
                tokio::time::sleep(self.config.post_kill_settle()).await;
            }
            Err(e) if e.is_timeout() => warn!(method = %method, "[stop-timeout]"),
            Err(e) => warn!(method = %method, error = %e, "task kill failed"),
        }
        if let Some(handle) = launch.as_mut() {
            if handle.wait_timeout(self.config.proc_timeout()).await.is_err() {
                warn!(method = %method, "[proc-timeout]");
                handle
                    .kill(&self.config.privilege_prefix, self.config.stop_timeout())
                    .await;
            }
        }

        // Cleanup; a baseline's scratch directories are reused by the
        // update trial with the same id.
        if !options.use_old {
            for mount in &mounts {
                mount.destroy(id).await;
            }
        }

        // Resync
        if options.use_old && strategy.is_lazy() {
            self.resync(daemons, strategy, rtt).await;
        }

        self.telemetry
            .record(log, &method, rtt, round, "done", &daemons.components(strategy));

        Ok(match duration {
            Some(duration) => TrialOutcome::ready(id, &method, duration),
            None => TrialOutcome::not_ready(id, &method),
        })
    }

    /// Fetches the delta bundle straight from the proxy, bypassing the
    /// runtime, to measure the raw transfer cost.
    pub async fn run_transfer_probe(
        &self,
        experiment: &Experiment,
        log: &mut EventLog,
        key: TrialKey,
        options: &TrialOptions,
    ) -> Result<TrialOutcome> {
        let method = options.method("wget");
        let id = options.trial_id;
        let TrialKey { rtt, round } = key;

        let argv = vec![
            self.config.wget.clone(),
            "-O".to_string(),
            self.config.tmp_dir.join("test.bin").to_string_lossy().to_string(),
            "-q".to_string(),
            self.transfer_url(experiment, options)?,
        ];

        let mut discarded = EventLog::new();
        let log = if options.dry_run { &mut discarded } else { log };

        let start = epoch_seconds();
        log.add_event(&method, "start", rtt, round, start, 0.0);

        if let Some(phase) = self.run_phase(Phase::Pull, &argv, options).await {
            self.abort(log, &method, key, phase, start, None).await;
            return Ok(TrialOutcome::aborted(id, &method, phase));
        }

        let ts_done = epoch_seconds();
        info!(method = %method, rtt, round, "done {:.6}s", ts_done - start);
        log.add_event(&method, "done", rtt, round, ts_done, ts_done - start);
        Ok(TrialOutcome::ready(id, &method, ts_done - start))
    }

    /// `http://<proxy>/from/<old or _>/to/<new>`
    pub fn transfer_url(&self, experiment: &Experiment, options: &TrialOptions) -> Result<String> {
        let suffix = &self.config.starlight_suffix;
        let to = experiment.image(options.use_old, suffix)?;
        let from = match !options.use_old && experiment.has_old_version() {
            true => experiment.image(true, suffix)?,
            false => "_".to_string(),
        };
        Ok(format!(
            "http://{}/from/{}/to/{}",
            self.config.proxy_server, from, to
        ))
    }

    /// Runs a bounded phase command. Returns the phase if it timed out.
    /// Any other failure is logged and the trial goes on.
    async fn run_phase(&self, phase: Phase, argv: &[String], options: &TrialOptions) -> Option<Phase> {
        if options.debug {
            debug!(command = %display_command(argv));
        }
        match execute_command(argv, self.config.phase_timeout()).await {
            Ok(output) => {
                if !output.success() {
                    warn!(?phase, status = %output.status, stderr = %output.stderr.trim(), "command failed");
                }
                self.log_output(&output, options);
                None
            }
            Err(e) if e.is_timeout() => Some(phase),
            Err(e) => {
                warn!(?phase, error = %e, "command failed");
                None
            }
        }
    }

    /// Records the terminal timeout event and stops the workload.
    async fn abort(
        &self,
        log: &mut EventLog,
        method: &str,
        key: TrialKey,
        phase: Phase,
        start: f64,
        workload: Option<&mut ProcessHandle>,
    ) {
        let ts = epoch_seconds();
        warn!(method, rtt = key.rtt, round = key.round, "{}", phase.timeout_event());
        log.add_event(method, phase.timeout_event(), key.rtt, key.round, ts, ts - start);
        if let Some(generator) = workload {
            generator
                .kill(&self.config.privilege_prefix, self.config.stop_timeout())
                .await;
        }
    }

    fn log_output(&self, output: &CommandOutput, options: &TrialOptions) {
        if !options.debug {
            return;
        }
        for line in output.stdout.lines().chain(output.stderr.lines()) {
            debug!(output = %line);
        }
    }

    async fn start_workload(
        &self,
        experiment: &Experiment,
        round: usize,
        method: &str,
    ) -> Option<ProcessHandle> {
        let spec = experiment.workload()?;
        let argv = spec.render(round, method, experiment.experiment_name());
        match ProcessHandle::spawn("workload", &argv, None) {
            Ok(handle) => {
                tokio::time::sleep(Duration::from_secs(spec.warmup_secs)).await;
                Some(handle)
            }
            Err(e) => {
                warn!(error = %e, "workload start failed");
                None
            }
        }
    }

    /// Waits for the snapshotter to finish fetching the baseline image in
    /// the background, with emulation lifted, so the update trial starts
    /// from a complete local copy.
    async fn resync(&self, daemons: &mut ActiveDaemons<'_>, strategy: Strategy, rtt: u32) {
        self.netem.reset().await;

        if let Some(mut tracker) = TransferTracker::for_strategy(strategy, self.config) {
            match daemons.fetch_daemon_mut(strategy) {
                Some(daemon) => {
                    let synced = tokio::time::timeout(self.config.resync_timeout(), async {
                        while let Some(line) = daemon.next_line().await {
                            debug!(daemon = %strategy, line = %line);
                            if tracker.observe(&line) {
                                return true;
                            }
                        }
                        false
                    })
                    .await;
                    match synced {
                        Ok(true) => info!(strategy = %strategy, "deploy-synced"),
                        Ok(false) => warn!(strategy = %strategy, "daemon exited before the transfer completed"),
                        Err(_) => warn!(strategy = %strategy, "resync timed out"),
                    }
                }
                None => warn!(strategy = %strategy, "no snapshotter daemon to resync with"),
            }
        }

        self.netem.apply(rtt, self.config.bandwidth_mbit).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_tracker_balances_resolves() {
        let config = Config::default();
        let mut tracker = TransferTracker::for_strategy(Strategy::Estargz, &config).unwrap();
        assert!(!tracker.observe("resolving layer sha256:aa"));
        assert!(!tracker.observe("resolving layer sha256:bb"));
        assert!(!tracker.observe("completed to fetch all layer data in background"));
        assert!(!tracker.observe("unrelated"));
        assert!(tracker.observe("completed to fetch all layer data in background"));
    }

    #[test]
    fn test_marker_tracker() {
        let config = Config::default();
        let mut tracker = TransferTracker::for_strategy(Strategy::Starlight, &config).unwrap();
        assert!(!tracker.observe("extracting layer"));
        assert!(tracker.observe("msg=\"entire image extracted\""));
        assert!(TransferTracker::for_strategy(Strategy::Vanilla, &config).is_none());
    }

    #[test]
    fn test_transfer_url() {
        let config = Config::default();
        let runner = Runner::new(&config);
        let experiment = Experiment::new("redis", "ready", "6.2.2", Some("6.2.1"));

        let update = runner
            .transfer_url(&experiment, &TrialOptions::new(1))
            .unwrap();
        assert_eq!(
            update,
            "http://starlight:8090/from/redis:6.2.1-starlight/to/redis:6.2.2-starlight"
        );

        let baseline = runner
            .transfer_url(&experiment, &TrialOptions::new(1).baseline())
            .unwrap();
        assert_eq!(baseline, "http://starlight:8090/from/_/to/redis:6.2.1-starlight");
    }

    #[test]
    fn test_transfer_url_stays_plain_http() {
        let config = Config {
            use_https: true,
            ..Config::default()
        };
        let runner = Runner::new(&config);
        let experiment = Experiment::new("redis", "ready", "6.2.2", Some("6.2.1"));
        let url = runner
            .transfer_url(&experiment, &TrialOptions::new(1))
            .unwrap();
        assert!(url.starts_with("http://starlight:8090/from/"));
    }
}
