use std::fs;
use std::path::Path;

use benchmark_delivery::config::{Config, ShapingHost};
use benchmark_delivery::netem::*;

/// A `tc` stand-in keeping one state file per interface. Like the real
/// tool, adding a second root qdisc or deleting a missing one fails.
///
/// Installed as the privilege prefix (`sh <script>`), so it sees
/// `tc qdisc <add|del> dev <iface> ...` as its arguments.
fn fake_tc(dir: &Path) -> Vec<String> {
	let state = dir.join("state");
	fs::create_dir_all(&state).unwrap();
	let script = dir.join("tc");
	fs::write(
		&script,
		format!(
			"f=\"{}/$5\"\ncase \"$3\" in\n  add) [ -e \"$f\" ] && exit 2; shift; echo \"$@\" > \"$f\" ;;\n  del) [ -e \"$f\" ] || exit 2; rm \"$f\" ;;\nesac\n",
			state.display()
		),
	)
	.unwrap();
	vec!["sh".to_string(), script.to_string_lossy().to_string()]
}

fn config_with(dir: &Path, remote: Vec<ShapingHost>) -> Config {
	Config {
		privilege_prefix: fake_tc(dir),
		local_interface: "eth0".to_string(),
		remote_hosts: remote,
		command_timeout_secs: 2,
		..Config::default()
	}
}

fn registry_host(prefix: &[&str]) -> ShapingHost {
	ShapingHost {
		name: "registry".to_string(),
		interface: "eth1".to_string(),
		remote_prefix: prefix.iter().map(|s| s.to_string()).collect(),
	}
}

#[tokio::test]
async fn test_apply_then_reset_restores_every_host() {
	let dir = tempfile::tempdir().unwrap();
	let config = config_with(dir.path(), vec![registry_host(&["env"])]);
	let netem = NetworkEmulationController::new(&config);

	let applied = netem.apply(50, 100).await;
	assert_eq!(applied.attempted, 2);
	assert!(applied.all_succeeded());
	let rule = fs::read_to_string(dir.path().join("state/eth0")).unwrap();
	assert_eq!(rule.trim(), "qdisc add dev eth0 root netem delay 25.0ms rate 100Mbit");
	assert!(dir.path().join("state/eth1").exists());

	let reset = netem.reset().await;
	assert!(reset.all_succeeded());
	assert!(!dir.path().join("state/eth0").exists());
	assert!(!dir.path().join("state/eth1").exists());
}

#[tokio::test]
async fn test_double_apply_is_reported_not_raised() {
	let dir = tempfile::tempdir().unwrap();
	let config = config_with(dir.path(), Vec::new());
	let netem = NetworkEmulationController::new(&config);

	assert!(netem.apply(2, 100).await.all_succeeded());
	let second = netem.apply(2, 100).await;
	assert_eq!(second.attempted, 1);
	assert_eq!(second.failed, vec!["local".to_string()]);

	// Reset on a clean host fails the same way.
	assert!(netem.reset().await.all_succeeded());
	assert!(!netem.reset().await.all_succeeded());
}

#[tokio::test]
async fn test_unreachable_host_does_not_block_others() {
	let dir = tempfile::tempdir().unwrap();
	let config = config_with(
		dir.path(),
		vec![registry_host(&["sh", "-c", "sleep 10", "unreachable"])],
	);
	let netem = NetworkEmulationController::new(&config);

	let report = netem.apply(300, 100).await;
	assert_eq!(report.attempted, 2);
	assert_eq!(report.failed, vec!["registry".to_string()]);
	let rule = fs::read_to_string(dir.path().join("state/eth0")).unwrap();
	assert!(rule.contains("delay 150.0ms"));
}
