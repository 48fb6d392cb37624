use rand::Rng;
use serde_derive::Deserialize;

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::process::execute_best_effort;

/// A bind-mount requirement of an experiment, backed by a trial-scoped
/// scratch directory on the host.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MountSpec {
    pub guest_dst: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    /// `uid:gid` the scratch directory is re-owned to.
    #[serde(default)]
    pub owner: Option<String>,
    /// Fully specified mount string used verbatim instead of a scratch dir.
    #[serde(default)]
    pub overwrite: Option<String>,
    #[serde(default = "random_instance_id", skip_deserializing)]
    pub instance_id: u32,
}

fn default_mode() -> String {
    "rw".to_string()
}

fn random_instance_id() -> u32 {
    rand::thread_rng().gen_range(0..999_999)
}

impl MountSpec {
    pub fn new(guest_dst: &str) -> MountSpec {
        MountSpec {
            guest_dst: guest_dst.to_string(),
            mode: default_mode(),
            owner: None,
            overwrite: None,
            instance_id: random_instance_id(),
        }
    }

    pub fn with_mode(mut self, mode: &str) -> MountSpec {
        self.mode = mode.to_string();
        self
    }

    pub fn with_owner(mut self, owner: &str) -> MountSpec {
        self.owner = Some(owner.to_string());
        self
    }

    pub fn overwritten(spec: &str) -> MountSpec {
        MountSpec {
            overwrite: Some(spec.to_string()),
            ..MountSpec::new("")
        }
    }
}

/// Host side of a [`MountSpec`]: creates, re-owns and removes
/// `<workdir>/m<instance>-<trial>`.
#[derive(Debug, Clone)]
pub struct ScratchMount<'a> {
    spec: &'a MountSpec,
    workdir: &'a Path,
    privilege_prefix: &'a [String],
    timeout: Duration,
}

impl<'a> ScratchMount<'a> {
    pub fn new(
        spec: &'a MountSpec,
        workdir: &'a Path,
        privilege_prefix: &'a [String],
        timeout: Duration,
    ) -> ScratchMount<'a> {
        ScratchMount {
            spec,
            workdir,
            privilege_prefix,
            timeout,
        }
    }

    pub fn scratch_path(&self, trial_id: u32) -> PathBuf {
        self.workdir
            .join(format!("m{}-{}", self.spec.instance_id, trial_id))
    }

    fn privileged(&self, args: &[&str], path: &Path) -> Vec<String> {
        let mut argv = self.privilege_prefix.to_vec();
        argv.extend(args.iter().map(|a| a.to_string()));
        argv.push(path.to_string_lossy().to_string());
        argv
    }

    /// Creates the scratch directory and re-owns it if an owner is set.
    /// Failures are logged, never returned: a failed chown must not abort a
    /// round.
    pub async fn prepare(&self, trial_id: u32) {
        if self.spec.overwrite.is_some() {
            return;
        }
        let path = self.scratch_path(trial_id);
        debug!(path = %path.display(), "preparing scratch mount");
        if !execute_best_effort(&self.privileged(&["mkdir", "-p"], &path), self.timeout).await {
            warn!(path = %path.display(), "scratch directory not created");
            return;
        }
        if let Some(owner) = &self.spec.owner {
            execute_best_effort(&self.privileged(&["chown", "-R", owner], &path), self.timeout)
                .await;
        }
    }

    /// Removes the scratch directory. A missing directory is not an error.
    pub async fn destroy(&self, trial_id: u32) {
        if self.spec.overwrite.is_some() {
            return;
        }
        let path = self.scratch_path(trial_id);
        if !path.exists() {
            return;
        }
        debug!(path = %path.display(), "destroying scratch mount");
        execute_best_effort(&self.privileged(&["rm", "-rf"], &path), self.timeout).await;
    }

    /// The `--mount` argument for the container create command.
    pub fn render(&self, trial_id: u32) -> String {
        if let Some(overwrite) = &self.spec.overwrite {
            return overwrite.clone();
        }
        format!(
            "type=bind,src={},dst={},options=rbind:{}",
            self.scratch_path(trial_id).display(),
            self.spec.guest_dst,
            self.spec.mode
        )
    }
}

/// Removes the whole scratch work directory, e.g. before a sweep.
pub async fn reset_workdir(workdir: &Path, privilege_prefix: &[String], timeout: Duration) {
    if !workdir.exists() {
        return;
    }
    let mut argv = privilege_prefix.to_vec();
    argv.extend(["rm".to_string(), "-rf".to_string()]);
    argv.push(workdir.to_string_lossy().to_string());
    execute_best_effort(&argv, timeout).await;
}
