//! Command lines of the container runtime CLIs for each delivery strategy.

use std::fmt;
use std::str::FromStr;

use crate::config::Config;
use crate::context::TrialOptions;
use crate::error::{Error, Result};
use crate::experiment::Experiment;

/// An image delivery method under comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Pull every layer, then run (`ctr image pull`).
    Vanilla,
    /// Lazy, on-demand layer fetch (`ctr-remote image rpull`).
    Estargz,
    /// Differential delivery through the starlight proxy.
    Starlight,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Strategy::Estargz, Strategy::Starlight, Strategy::Vanilla];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Vanilla => "vanilla",
            Strategy::Estargz => "estargz",
            Strategy::Starlight => "starlight",
        }
    }

    pub fn namespace_prefix(&self) -> &'static str {
        match self {
            Strategy::Vanilla => "xv",
            Strategy::Estargz => "xe",
            Strategy::Starlight => "xs",
        }
    }

    /// Strategies whose snapshotter keeps fetching after the container
    /// started, and therefore need a resync after a baseline trial.
    pub fn is_lazy(&self) -> bool {
        !matches!(self, Strategy::Vanilla)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "vanilla" => Ok(Strategy::Vanilla),
            "estargz" => Ok(Strategy::Estargz),
            "starlight" => Ok(Strategy::Starlight),
            other => Err(Error::InvalidConfig(format!("unknown strategy {}", other))),
        }
    }
}

/// Builds the pull, create, start and kill commands of one strategy.
#[derive(Debug, Clone)]
pub struct ContainerRuntime<'a> {
    config: &'a Config,
    strategy: Strategy,
}

impl<'a> ContainerRuntime<'a> {
    pub fn new(config: &'a Config, strategy: Strategy) -> ContainerRuntime<'a> {
        ContainerRuntime { config, strategy }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn namespace(&self, trial_id: u32) -> String {
        format!("{}{}", self.strategy.namespace_prefix(), trial_id)
    }

    pub fn task_name(&self, options: &TrialOptions) -> String {
        format!("task{}{}", options.trial_id, options.task_suffix())
    }

    fn cli(&self) -> &str {
        match self.strategy {
            Strategy::Vanilla => &self.config.ctr,
            Strategy::Estargz => &self.config.ctr_remote,
            Strategy::Starlight => &self.config.ctr_starlight,
        }
    }

    /// Image reference as the strategy's CLI expects it.
    pub fn image(&self, experiment: &Experiment, old: bool) -> Result<String> {
        match self.strategy {
            Strategy::Vanilla => Ok(format!(
                "{}/{}",
                self.config.registry_server,
                experiment.image(old, "")?
            )),
            Strategy::Estargz => Ok(format!(
                "{}/{}",
                self.config.registry_server,
                experiment.image(old, &self.config.estargz_suffix)?
            )),
            Strategy::Starlight => experiment.image(old, &self.config.starlight_suffix),
        }
    }

    pub fn pull_command(&self, experiment: &Experiment, options: &TrialOptions) -> Result<Vec<String>> {
        let mut argv = self.config.privileged([self.cli(), "-n"]);
        argv.push(self.namespace(options.trial_id));
        match self.strategy {
            Strategy::Vanilla | Strategy::Estargz => {
                argv.push("image".to_string());
                argv.push(if self.strategy == Strategy::Vanilla { "pull" } else { "rpull" }.to_string());
                if !self.config.use_https {
                    argv.push("--plain-http".to_string());
                }
                argv.push(self.image(experiment, options.use_old)?);
            }
            Strategy::Starlight => {
                argv.push("pull".to_string());
                // An update pull names the deployed version so the proxy
                // ships only the difference.
                if !options.use_old && experiment.has_old_version() {
                    argv.push(self.image(experiment, true)?);
                }
                argv.push(self.image(experiment, options.use_old)?);
            }
        }
        Ok(argv)
    }

    /// The create command; `mounts` are rendered mount specifications.
    pub fn create_command(
        &self,
        experiment: &Experiment,
        options: &TrialOptions,
        mounts: &[String],
    ) -> Result<Vec<String>> {
        let mut argv = self.config.privileged([self.cli()]);
        if self.strategy == Strategy::Starlight {
            argv.extend(["--log-level".to_string(), "debug".to_string()]);
        }
        argv.push("-n".to_string());
        argv.push(self.namespace(options.trial_id));
        match self.strategy {
            Strategy::Vanilla => argv.extend(["c".to_string(), "create".to_string()]),
            Strategy::Estargz => argv.extend([
                "c".to_string(),
                "create".to_string(),
                "--snapshotter".to_string(),
                "stargz".to_string(),
            ]),
            Strategy::Starlight => argv.push("create".to_string()),
        }

        for mount in mounts {
            argv.push("--mount".to_string());
            argv.push(mount.clone());
        }
        argv.extend([
            "--env-file".to_string(),
            self.config.env_file.clone(),
            "--net-host".to_string(),
        ]);

        let image = self.image(experiment, options.use_old)?;
        if self.strategy == Strategy::Starlight {
            // Image combination, then the specific image.
            argv.push(image.clone());
        }
        argv.push(image);
        argv.push(self.task_name(options));

        if let Some(args) = experiment.args() {
            argv.extend(args.iter().cloned());
        }
        Ok(argv)
    }

    /// Task start is always issued through plain `ctr`.
    pub fn start_command(&self, options: &TrialOptions) -> Vec<String> {
        let mut argv = self.config.privileged([self.config.ctr.as_str(), "-n"]);
        argv.push(self.namespace(options.trial_id));
        argv.extend(["t".to_string(), "start".to_string(), self.task_name(options)]);
        argv
    }

    pub fn kill_command(&self, options: &TrialOptions) -> Vec<String> {
        let mut argv = self.config.privileged([self.config.ctr.as_str(), "-n"]);
        argv.push(self.namespace(options.trial_id));
        argv.extend([
            "t".to_string(),
            "kill".to_string(),
            "-s".to_string(),
            "9".to_string(),
            self.task_name(options),
        ]);
        argv
    }
}
