use crate::config::Config;
use crate::context::{TrialKey, TrialOptions, TrialOutcome};
use crate::csv_writer::{CSVWriter, ResultTable, ResultTableCSVWriter};
use crate::daemons::ActiveDaemons;
use crate::error::{Error, Result};
use crate::events::EventLog;
use crate::experiment::Experiment;
use crate::mount::reset_workdir;
use crate::runner::Runner;
use crate::runtime::Strategy;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

/// A column source of the result tables: a container delivery strategy, or
/// the raw transfer probe that fetches the bundle without starting anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Container(Strategy),
    TransferProbe,
}

impl Method {
    pub const ALL: [Method; 4] = [
        Method::Container(Strategy::Estargz),
        Method::Container(Strategy::Starlight),
        Method::Container(Strategy::Vanilla),
        Method::TransferProbe,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Method::Container(strategy) => strategy.name(),
            Method::TransferProbe => "wget",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "wget" => Ok(Method::TransferProbe),
            other => other.parse().map(Method::Container),
        }
    }
}

/**
 * MethodResults
 * Startup times of one method across the sweep. `deploy` holds the baseline
 * trials (old version from scratch), `update` the update trials.
 */
#[derive(Debug, Clone)]
pub struct MethodResults {
    pub method: Method,
    pub deploy: ResultTable,
    pub update: ResultTable,
}

/**
 * Benchmarker
 * Runs the (RTT x method x round) matrix of one experiment. Round 0 of
 * every cell is a warm-up: its events are recorded but its durations are
 * left out of the result tables.
 */
#[derive(Debug)]
pub struct Benchmarker<'a> {
    config: &'a Config,
    experiment: Experiment,
    methods: Vec<Method>,
    dry_run: bool,
    debug: bool,
    workload: bool,
    bundle_suffix: String,
    log: EventLog,
    results: Vec<MethodResults>,
}

impl<'a> Benchmarker<'a> {
    pub fn new(config: &'a Config, experiment: Experiment) -> Benchmarker<'a> {
        let workload = experiment.workload().is_some();
        Benchmarker {
            config,
            experiment,
            methods: Method::ALL.to_vec(),
            dry_run: false,
            debug: false,
            workload,
            bundle_suffix: String::new(),
            log: EventLog::new(),
            results: Vec::new(),
        }
    }

    pub fn with_methods(mut self, methods: Vec<Method>) -> Self {
        self.methods = methods;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_bundle_suffix(mut self, suffix: &str) -> Self {
        self.bundle_suffix = suffix.to_string();
        self
    }

    pub fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn results(&self) -> &[MethodResults] {
        &self.results
    }

    /// Options for both trials of `round`. The warm-up round runs without
    /// the workload generator since its measurements are discarded.
    fn trial_options(&self, round: usize) -> TrialOptions {
        TrialOptions::random()
            .with_dry_run(self.dry_run)
            .with_debug(self.debug)
            .with_workload(self.workload && round > 0)
    }

    /// Runs the whole sweep. Result tables and the event bundle are
    /// rewritten after every RTT value so an interrupted sweep keeps what it
    /// measured.
    pub async fn run(&mut self) -> Result<()> {
        info!("Running experiment {}", self.experiment);
        let runner = Runner::new(self.config);
        let mut daemons = ActiveDaemons::new(self.config);

        runner.netem().reset().await;
        reset_workdir(
            &self.config.scratch_workdir,
            &self.config.privilege_prefix,
            self.config.command_timeout(),
        )
        .await;

        self.results = self
            .methods
            .iter()
            .map(|method| MethodResults {
                method: *method,
                deploy: ResultTable::new(method.name()),
                update: ResultTable::new(method.name()),
            })
            .collect();

        let rtts = self.experiment.rtts.clone();
        for rtt in rtts {
            info!("RTT:{}", rtt);
            for index in 0..self.methods.len() {
                let method = self.methods[index];
                let (deploy, update) = match method {
                    Method::Container(strategy) => {
                        self.run_strategy(&runner, &mut daemons, strategy, rtt).await
                    }
                    Method::TransferProbe => self.run_transfer_probe(&runner, rtt).await,
                };
                self.results[index].deploy.push_column(rtt, deploy);
                self.results[index].update.push_column(rtt, update);
            }

            if let Err(e) = self.save_results() {
                warn!(error = %e, "cannot write result tables");
            }
            if let Err(e) = self.save_events() {
                warn!(error = %e, "cannot write event bundle");
            }
        }

        if let Err(e) = daemons.reset_container_service().await {
            warn!(error = %e, "final container service reset failed");
        }
        daemons.shutdown().await;
        runner.netem().reset().await;
        Ok(())
    }

    /// All rounds of one strategy at one RTT. Returns the measured deploy and
    /// update durations, warm-up excluded.
    async fn run_strategy(
        &mut self,
        runner: &Runner<'_>,
        daemons: &mut ActiveDaemons<'_>,
        strategy: Strategy,
        rtt: u32,
    ) -> (Vec<f64>, Vec<f64>) {
        let mut deploy = Vec::new();
        let mut update = Vec::new();

        for round in 0..=self.experiment.rounds() {
            if let Err(e) = daemons.reset_container_service().await {
                warn!(error = %e, "container service reset failed");
            }
            if let Err(e) = daemons.start_for(strategy).await {
                warn!(strategy = %strategy, error = %e, "snapshotter start failed");
            }
            runner.netem().apply(rtt, self.config.bandwidth_mbit).await;

            let key = TrialKey::new(rtt, round);
            let options = self.trial_options(round);
            if self.experiment.has_old_version() {
                let outcome = runner
                    .run_trial(
                        &self.experiment,
                        &mut self.log,
                        daemons,
                        strategy,
                        key,
                        &options.clone().baseline(),
                    )
                    .await;
                keep_measurement(&mut deploy, round, outcome);
            }
            let outcome = runner
                .run_trial(
                    &self.experiment,
                    &mut self.log,
                    daemons,
                    strategy,
                    key,
                    &options.update(),
                )
                .await;
            keep_measurement(&mut update, round, outcome);

            runner.netem().reset().await;
            daemons.stop_for(strategy).await;
        }

        (deploy, update)
    }

    async fn run_transfer_probe(&mut self, runner: &Runner<'_>, rtt: u32) -> (Vec<f64>, Vec<f64>) {
        let mut deploy = Vec::new();
        let mut update = Vec::new();

        for round in 0..=self.experiment.rounds() {
            runner.netem().apply(rtt, self.config.bandwidth_mbit).await;

            let key = TrialKey::new(rtt, round);
            let options = self.trial_options(round);
            if self.experiment.has_old_version() {
                let outcome = runner
                    .run_transfer_probe(&self.experiment, &mut self.log, key, &options.clone().baseline())
                    .await;
                keep_measurement(&mut deploy, round, outcome);
            }
            let outcome = runner
                .run_transfer_probe(&self.experiment, &mut self.log, key, &options.update())
                .await;
            keep_measurement(&mut update, round, outcome);

            runner.netem().reset().await;
        }

        (deploy, update)
    }

    /// Path of the `series` (`-deploy` or `-update`) table of `method`.
    pub fn result_path(&self, series: &str, method: Method) -> PathBuf {
        self.config.results_dir().join(format!(
            "{}{}-{}.csv",
            self.experiment.experiment_name(),
            series,
            method
        ))
    }

    /// Writes one table per method and series. Deploy tables are skipped
    /// when the experiment has no old version.
    pub fn save_results(&self) -> Result<Vec<PathBuf>> {
        let writer = ResultTableCSVWriter::new();
        let mut written = Vec::new();
        for results in &self.results {
            if self.experiment.has_old_version() {
                let path = self.result_path("-deploy", results.method);
                writer.write_csv(std::slice::from_ref(&results.deploy), &path)?;
                written.push(path);
            }
            let path = self.result_path("-update", results.method);
            writer.write_csv(std::slice::from_ref(&results.update), &path)?;
            written.push(path);
        }
        Ok(written)
    }

    pub fn save_events(&self) -> Result<PathBuf> {
        self.log.save_event(
            &self.config.csv_dir(),
            self.experiment.experiment_name(),
            &self.bundle_suffix,
        )
    }
}

/// Keeps the duration of every round but the warm-up; failed or
/// unrunnable trials count as NaN.
fn keep_measurement(column: &mut Vec<f64>, round: usize, outcome: Result<TrialOutcome>) {
    let delta = match outcome {
        Ok(outcome) => outcome.delta(),
        Err(e) => {
            warn!(round, error = %e, "trial not run");
            f64::NAN
        }
    };
    if round > 0 {
        column.push(delta);
    }
}
