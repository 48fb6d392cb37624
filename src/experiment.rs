use serde_derive::Deserialize;

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::mount::MountSpec;

pub const DEFAULT_RTTS: [u32; 7] = [2, 50, 100, 150, 200, 250, 300];
pub const DEFAULT_ROUNDS: usize = 20;

/// A synthetic load generator run next to the container, e.g. YCSB against
/// a freshly started database.
///
/// `command` may contain `{round}`, `{method}` and `{experiment}`
/// placeholders, substituted per trial.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WorkloadSpec {
    pub command: Vec<String>,
    /// Time given to the generator before the trial clock starts.
    #[serde(default = "default_warmup")]
    pub warmup_secs: u64,
}

fn default_warmup() -> u64 {
    15
}

impl WorkloadSpec {
    pub fn render(&self, round: usize, method: &str, experiment: &str) -> Vec<String> {
        self.command
            .iter()
            .map(|arg| {
                arg.replace("{round}", &round.to_string())
                    .replace("{method}", method)
                    .replace("{experiment}", experiment)
            })
            .collect()
    }
}

/// Identity and parameters of one benchmark subject.
#[derive(Debug, Clone, Deserialize)]
pub struct Experiment {
    pub image_name: String,
    pub version: String,
    #[serde(default)]
    old_version: Option<String>,
    pub ready_marker: String,
    #[serde(default)]
    mounts: Vec<MountSpec>,
    #[serde(default)]
    args: Option<Vec<String>>,
    /// Upper bound of the startup-time axis when plotting. Display only.
    #[serde(default = "default_expected_max_start_time")]
    pub expected_max_start_time: u64,
    #[serde(default = "default_rtts")]
    pub rtts: Vec<u32>,
    #[serde(default = "default_rounds")]
    rounds: usize,
    #[serde(default)]
    workload: Option<WorkloadSpec>,
    #[serde(skip)]
    experiment_name: String,
}

fn default_expected_max_start_time() -> u64 {
    30
}

fn default_rtts() -> Vec<u32> {
    DEFAULT_RTTS.to_vec()
}

fn default_rounds() -> usize {
    DEFAULT_ROUNDS
}

impl Experiment {
    pub fn new(image_name: &str, ready_marker: &str, version: &str, old_version: Option<&str>) -> Experiment {
        let mut experiment = Experiment {
            image_name: image_name.to_string(),
            version: version.to_string(),
            old_version: old_version.filter(|v| !v.is_empty()).map(str::to_string),
            ready_marker: ready_marker.to_string(),
            mounts: Vec::new(),
            args: None,
            expected_max_start_time: default_expected_max_start_time(),
            rtts: default_rtts(),
            rounds: DEFAULT_ROUNDS,
            workload: None,
            experiment_name: String::new(),
        };
        experiment.update_experiment_name();
        experiment
    }

    /// Loads an experiment definition from JSON.
    pub fn from_file(path: &Path) -> Result<Experiment> {
        let raw = fs::read_to_string(path)?;
        let mut experiment: Experiment = serde_json::from_str(&raw)?;
        if experiment.old_version.as_deref() == Some("") {
            experiment.old_version = None;
        }
        experiment.update_experiment_name();
        Ok(experiment)
    }

    /// `<image>-<MMDD>--deploy-<version>-r<rounds>` without an old version,
    /// `<image>-<MMDD>--<version>_<old>-r<rounds>` with one, `-wl` appended
    /// when a workload runs alongside.
    pub fn update_experiment_name(&mut self) {
        let today = chrono::Local::now().format("%m%d").to_string();
        self.experiment_name = self.name_for_date(&today);
    }

    fn name_for_date(&self, date: &str) -> String {
        let mut name = match &self.old_version {
            None => format!("{}-{}--deploy-{}-r{}", self.image_name, date, self.version, self.rounds),
            Some(old) => format!(
                "{}-{}--{}_{}-r{}",
                self.image_name, date, self.version, old, self.rounds
            ),
        };
        if self.workload.is_some() {
            name.push_str("-wl");
        }
        name
    }

    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    pub fn set_experiment_name(&mut self, name: &str) {
        self.experiment_name = name.to_string();
    }

    pub fn old_version(&self) -> Option<&str> {
        self.old_version.as_deref()
    }

    pub fn has_old_version(&self) -> bool {
        self.old_version.is_some()
    }

    pub fn mounts(&self) -> &[MountSpec] {
        &self.mounts
    }

    pub fn set_mounts(&mut self, mounts: Vec<MountSpec>) {
        self.mounts = mounts;
    }

    pub fn args(&self) -> Option<&[String]> {
        self.args.as_deref()
    }

    pub fn set_args(&mut self, args: Vec<String>) {
        self.args = Some(args);
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn set_rounds(&mut self, rounds: usize) {
        self.rounds = rounds;
        self.update_experiment_name();
    }

    pub fn workload(&self) -> Option<&WorkloadSpec> {
        self.workload.as_ref()
    }

    pub fn set_workload(&mut self, workload: WorkloadSpec) {
        self.workload = Some(workload);
        self.update_experiment_name();
    }

    fn tag(&self, old: bool) -> Result<&str> {
        if old {
            self.old_version
                .as_deref()
                .ok_or_else(|| Error::MissingOldVersion(self.image_name.clone()))
        } else {
            Ok(&self.version)
        }
    }

    /// Image reference `<image>:<tag><suffix>` for the current or old tag.
    pub fn image(&self, old: bool, suffix: &str) -> Result<String> {
        Ok(format!("{}:{}{}", self.image_name, self.tag(old)?, suffix))
    }
}

impl std::fmt::Display for Experiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContainerExperiment<{}>", self.experiment_name)
    }
}
