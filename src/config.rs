use serde_derive::Deserialize;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// A host whose egress is shaped during a sweep.
///
/// `remote_prefix` is prepended to every shaping command, e.g.
/// `["ssh", "bench@registry"]`. The local host has an empty prefix.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ShapingHost {
    pub name: String,
    pub interface: String,
    #[serde(default)]
    pub remote_prefix: Vec<String>,
}

impl ShapingHost {
    pub fn local(interface: &str) -> ShapingHost {
        ShapingHost {
            name: "local".to_string(),
            interface: interface.to_string(),
            remote_prefix: Vec::new(),
        }
    }
}

/// Environment of the benchmark: where the registry and proxy live, which
/// binaries to call, which interfaces to shape and how long to wait.
/// Read-only once the sweep starts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub registry_server: String,
    pub proxy_server: String,
    pub use_https: bool,
    pub env_file: String,
    pub tmp_dir: PathBuf,
    pub scratch_workdir: PathBuf,
    pub output_dir: PathBuf,
    /// Appends task output of every launch to `<dir>/<strategy>-runtime.log`.
    pub runtime_log_dir: Option<PathBuf>,

    pub privilege_prefix: Vec<String>,
    pub ctr: String,
    pub ctr_remote: String,
    pub ctr_starlight: String,
    pub tc: String,
    pub wget: String,

    pub reset_command: Vec<String>,
    pub containerd_command: Vec<String>,
    pub containerd_exe: String,
    pub containerd_boot_marker: String,
    pub stargz_command: Vec<String>,
    pub stargz_exe: String,
    pub starlight_command: Vec<String>,
    pub starlight_exe: String,
    pub plugin_wait_secs: u64,

    pub estargz_suffix: String,
    pub starlight_suffix: String,
    pub estargz_resolve_marker: String,
    pub estargz_complete_marker: String,
    pub starlight_complete_marker: String,

    pub local_interface: String,
    pub remote_hosts: Vec<ShapingHost>,
    pub bandwidth_mbit: u32,

    pub phase_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    pub proc_timeout_secs: u64,
    pub resync_timeout_secs: u64,
    pub workload_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub boot_timeout_secs: u64,
    /// Bound on the readiness scan; unbounded when unset.
    pub ready_timeout_secs: Option<u64>,
    pub pre_stop_settle_ms: u64,
    pub post_kill_settle_ms: u64,

    pub proc_root: PathBuf,
    pub sys_root: PathBuf,
    pub clock_ticks: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            registry_server: "cloudy:5000".to_string(),
            proxy_server: "starlight:8090".to_string(),
            use_https: false,
            env_file: "../config/all.env".to_string(),
            tmp_dir: PathBuf::from("/tmp"),
            scratch_workdir: PathBuf::from("/tmp/starlight-exp"),
            output_dir: PathBuf::from("."),
            runtime_log_dir: None,

            privilege_prefix: vec!["sudo".to_string()],
            ctr: "ctr".to_string(),
            ctr_remote: "ctr-remote".to_string(),
            ctr_starlight: "ctr-starlight".to_string(),
            tc: "tc".to_string(),
            wget: "wget".to_string(),

            reset_command: vec!["../reset.sh".to_string()],
            containerd_command: vec!["containerd".to_string()],
            containerd_exe: "containerd".to_string(),
            containerd_boot_marker: "containerd successfully booted".to_string(),
            stargz_command: vec![
                "stargz-grpc".to_string(),
                "--address=/run/containerd-stargz-grpc/containerd-stargz-grpc.socket".to_string(),
                "--config=/etc/containerd-stargz-grpc/config.toml".to_string(),
                "--log-level=debug".to_string(),
            ],
            stargz_exe: "stargz-grpc".to_string(),
            starlight_command: vec![
                "starlight-grpc".to_string(),
                "run".to_string(),
                "--log-level=debug".to_string(),
            ],
            starlight_exe: "starlight-grpc".to_string(),
            plugin_wait_secs: 3,

            estargz_suffix: "-starlight".to_string(),
            starlight_suffix: "-starlight".to_string(),
            estargz_resolve_marker: "resolving".to_string(),
            estargz_complete_marker: "completed to fetch all layer data in background".to_string(),
            starlight_complete_marker: "entire image extracted".to_string(),

            local_interface: "enp3s0".to_string(),
            remote_hosts: Vec::new(),
            bandwidth_mbit: 100,

            phase_timeout_secs: 120,
            stop_timeout_secs: 10,
            proc_timeout_secs: 10,
            resync_timeout_secs: 600,
            workload_timeout_secs: 600,
            command_timeout_secs: 30,
            boot_timeout_secs: 120,
            ready_timeout_secs: None,
            pre_stop_settle_ms: 1000,
            post_kill_settle_ms: 3000,

            proc_root: PathBuf::from("/proc"),
            sys_root: PathBuf::from("/sys"),
            clock_ticks: 100,
        }
    }
}

impl Config {
    /// Loads a configuration from a JSON file. Missing keys keep their
    /// defaults.
    pub fn from_file(path: &Path) -> Result<Config> {
        let raw = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.clock_ticks == 0 {
            return Err(Error::InvalidConfig("clock_ticks must be positive".to_string()));
        }
        if self.phase_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "phase_timeout_secs must be positive".to_string(),
            ));
        }
        for host in &self.remote_hosts {
            if host.remote_prefix.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "remote host {} has no remote_prefix",
                    host.name
                )));
            }
        }
        Ok(())
    }

    /// Prepends the privilege prefix to `argv`.
    pub fn privileged<I, S>(&self, argv: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.privilege_prefix
            .iter()
            .cloned()
            .chain(argv.into_iter().map(Into::into))
            .collect()
    }

    /// Local host first, then every remote host.
    pub fn shaping_hosts(&self) -> Vec<ShapingHost> {
        let mut hosts = vec![ShapingHost::local(&self.local_interface)];
        hosts.extend(self.remote_hosts.iter().cloned());
        hosts
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn proc_timeout(&self) -> Duration {
        Duration::from_secs(self.proc_timeout_secs)
    }

    pub fn resync_timeout(&self) -> Duration {
        Duration::from_secs(self.resync_timeout_secs)
    }

    pub fn workload_timeout(&self) -> Duration {
        Duration::from_secs(self.workload_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.boot_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Option<Duration> {
        self.ready_timeout_secs.map(Duration::from_secs)
    }

    pub fn plugin_wait(&self) -> Duration {
        Duration::from_secs(self.plugin_wait_secs)
    }

    pub fn pre_stop_settle(&self) -> Duration {
        Duration::from_millis(self.pre_stop_settle_ms)
    }

    pub fn post_kill_settle(&self) -> Duration {
        Duration::from_millis(self.post_kill_settle_ms)
    }

    pub fn csv_dir(&self) -> PathBuf {
        self.output_dir.join("csv")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.output_dir.join("results")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"registry_server": "registry.local:5000", "use_https": true}"#)
                .unwrap();
        assert_eq!(config.registry_server, "registry.local:5000");
        assert!(config.use_https);
        assert_eq!(config.phase_timeout_secs, 120);
        assert_eq!(config.privilege_prefix, vec!["sudo".to_string()]);
    }

    #[test]
    fn test_remote_host_requires_prefix() {
        let mut config = Config::default();
        config.remote_hosts.push(ShapingHost {
            name: "registry".to_string(),
            interface: "eth0".to_string(),
            remote_prefix: Vec::new(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shaping_hosts_local_first() {
        let mut config = Config::default();
        config.remote_hosts.push(ShapingHost {
            name: "proxy".to_string(),
            interface: "enp4s0".to_string(),
            remote_prefix: vec!["ssh".to_string(), "bench@proxy".to_string()],
        });
        let hosts = config.shaping_hosts();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].name, "local");
        assert!(hosts[0].remote_prefix.is_empty());
        assert_eq!(hosts[1].interface, "enp4s0");
    }

    #[test]
    fn test_privileged_prefix() {
        let mut config = Config::default();
        assert_eq!(config.privileged(["tc", "qdisc"]), vec!["sudo", "tc", "qdisc"]);
        config.privilege_prefix.clear();
        assert_eq!(config.privileged(["tc"]), vec!["tc"]);
    }
}
