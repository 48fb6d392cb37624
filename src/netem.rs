//! Network emulation across the worker and its remote peers.
//!
//! Rules are installed with `tc qdisc ... netem` on every configured host at
//! once and jointly awaited. The controller does not remember what it
//! installed: callers alternate `apply` and `reset`.

use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use crate::config::{Config, ShapingHost};
use crate::process::execute_command;
use crate::utils::display_command;

/// Hosts attempted and hosts whose command failed or timed out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapingReport {
    pub attempted: usize,
    pub failed: Vec<String>,
}

impl ShapingReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct NetworkEmulationController {
    hosts: Vec<ShapingHost>,
    privilege_prefix: Vec<String>,
    tc: String,
    timeout: Duration,
}

impl NetworkEmulationController {
    pub fn new(config: &Config) -> NetworkEmulationController {
        NetworkEmulationController {
            hosts: config.shaping_hosts(),
            privilege_prefix: config.privilege_prefix.clone(),
            tc: config.tc.clone(),
            timeout: config.command_timeout(),
        }
    }

    pub fn hosts(&self) -> &[ShapingHost] {
        &self.hosts
    }

    /// `[remote prefix] [privilege prefix] tc qdisc <args>`
    fn tc_command(&self, host: &ShapingHost, args: &[String]) -> Vec<String> {
        let mut argv = host.remote_prefix.clone();
        argv.extend(self.privilege_prefix.iter().cloned());
        argv.push(self.tc.clone());
        argv.push("qdisc".to_string());
        argv.extend(args.iter().cloned());
        argv
    }

    pub fn apply_command(&self, host: &ShapingHost, rtt: u32, bandwidth_mbit: u32) -> Vec<String> {
        let args = vec![
            "add".to_string(),
            "dev".to_string(),
            host.interface.clone(),
            "root".to_string(),
            "netem".to_string(),
            "delay".to_string(),
            format!("{:.1}ms", f64::from(rtt) / 2.0),
            "rate".to_string(),
            format!("{}Mbit", bandwidth_mbit),
        ];
        self.tc_command(host, &args)
    }

    pub fn reset_command(&self, host: &ShapingHost) -> Vec<String> {
        let args = vec![
            "del".to_string(),
            "dev".to_string(),
            host.interface.clone(),
            "root".to_string(),
        ];
        self.tc_command(host, &args)
    }

    /// Installs half of `rtt` as one-way delay and `bandwidth_mbit` as the
    /// rate cap on every host.
    pub async fn apply(&self, rtt: u32, bandwidth_mbit: u32) -> ShapingReport {
        info!(rtt, bandwidth_mbit, "applying network emulation");
        let commands = self
            .hosts
            .iter()
            .map(|host| (host.name.clone(), self.apply_command(host, rtt, bandwidth_mbit)))
            .collect();
        self.fan_out(commands).await
    }

    /// Removes the emulation rule from every host.
    pub async fn reset(&self) -> ShapingReport {
        info!("removing network emulation");
        let commands = self
            .hosts
            .iter()
            .map(|host| (host.name.clone(), self.reset_command(host)))
            .collect();
        self.fan_out(commands).await
    }

    async fn fan_out(&self, commands: Vec<(String, Vec<String>)>) -> ShapingReport {
        let attempted = commands.len();
        let timeout = self.timeout;
        let results = join_all(commands.into_iter().map(|(name, argv)| async move {
            let ok = match execute_command(&argv, timeout).await {
                Ok(output) if output.success() => true,
                Ok(output) => {
                    warn!(
                        host = %name,
                        command = %display_command(&argv),
                        stderr = %output.stderr.trim(),
                        "shaping command failed"
                    );
                    false
                }
                Err(e) => {
                    warn!(host = %name, error = %e, "shaping command failed");
                    false
                }
            };
            (name, ok)
        }))
        .await;

        ShapingReport {
            attempted,
            failed: results
                .into_iter()
                .filter(|(_, ok)| !ok)
                .map(|(name, _)| name)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller_with_remote() -> NetworkEmulationController {
        let mut config = Config::default();
        config.local_interface = "enp3s0".to_string();
        config.remote_hosts.push(ShapingHost {
            name: "registry".to_string(),
            interface: "ens4".to_string(),
            remote_prefix: vec!["ssh".to_string(), "bench@registry".to_string()],
        });
        NetworkEmulationController::new(&config)
    }

    #[test]
    fn test_apply_command_halves_rtt() {
        let controller = controller_with_remote();
        let argv = controller.apply_command(&controller.hosts()[0], 25, 100);
        assert_eq!(
            argv.join(" "),
            "sudo tc qdisc add dev enp3s0 root netem delay 12.5ms rate 100Mbit"
        );
    }

    #[test]
    fn test_remote_command_is_prefixed() {
        let controller = controller_with_remote();
        let argv = controller.reset_command(&controller.hosts()[1]);
        assert_eq!(argv.join(" "), "ssh bench@registry sudo tc qdisc del dev ens4 root");
    }
}
