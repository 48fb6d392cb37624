use std::path::Path;

use benchmark_delivery::benchmark::{Benchmarker, Method};
use benchmark_delivery::config::Config;
use benchmark_delivery::experiment::Experiment;

#[test]
fn test_demo_config_loads() {
	let config = Config::from_file(Path::new("demos/config.json")).unwrap();
	assert_eq!(config.shaping_hosts().len(), 3);
	assert_eq!(config.ready_timeout().map(|d| d.as_secs()), Some(300));
	// Keys left out keep their defaults.
	assert_eq!(config.privilege_prefix, vec!["sudo".to_string()]);
	assert_eq!(config.starlight_complete_marker, "entire image extracted");
}

#[test]
fn test_demo_experiments_load() {
	let redis = Experiment::from_file(Path::new("demos/redis.json")).unwrap();
	assert_eq!(redis.old_version(), Some("6.2.1"));
	assert_eq!(redis.mounts()[0].guest_dst, "/data");
	assert!(redis.workload().is_none());
	assert!(redis.experiment_name().ends_with("--6.2.2_6.2.1-r20"));

	let mariadb = Experiment::from_file(Path::new("demos/mariadb-ycsb.json")).unwrap();
	assert_eq!(mariadb.rounds(), 5);
	assert_eq!(mariadb.workload().unwrap().warmup_secs, 15);
	assert!(mariadb.experiment_name().ends_with("-r5-wl"));
}

#[tokio::test]
async fn test_dry_run_sweep_writes_tables() {
	let dir = tempfile::tempdir().unwrap();
	let script = dir.path().join("runtime.sh");
	std::fs::write(
		&script,
		"cmd=\"$1\"; shift\ncase \"$cmd\" in\n  ctr) case \" $* \" in *\" t start \"*) echo ready ;; esac ;;\n  tc|containerd) ;;\n  *) exec \"$cmd\" \"$@\" ;;\nesac\n",
	)
	.unwrap();
	let config = Config {
		privilege_prefix: vec!["sh".to_string(), script.to_string_lossy().to_string()],
		output_dir: dir.path().join("out"),
		scratch_workdir: dir.path().join("scratch"),
		proc_root: dir.path().join("proc"),
		sys_root: dir.path().join("sys"),
		reset_command: vec!["true".to_string()],
		containerd_command: vec!["containerd".to_string()],
		boot_timeout_secs: 1,
		phase_timeout_secs: 2,
		pre_stop_settle_ms: 0,
		post_kill_settle_ms: 0,
		..Config::default()
	};

	let mut experiment = Experiment::new("redis", "ready", "6.2.2", Some("6.2.1"));
	experiment.rtts = vec![2, 50];
	experiment.set_rounds(2);
	experiment.set_experiment_name("redis-test");

	let mut benchmarker = Benchmarker::new(&config, experiment)
		.with_methods(vec![Method::Container(benchmark_delivery::runtime::Strategy::Vanilla)])
		.with_dry_run(true);
	benchmarker.run().await.unwrap();

	assert!(benchmarker.log().is_empty());
	let results = &benchmarker.results()[0];
	assert_eq!(results.update.rtts, vec![2, 50]);
	// Warm-up round dropped
	assert_eq!(results.update.rows(), 2);
	assert!(results.update.columns.iter().flatten().all(|d| d.is_finite()));

	let table = std::fs::read_to_string(dir.path().join("out/results/redis-test-update-vanilla.csv")).unwrap();
	assert_eq!(table.lines().next(), Some("round,2,50"));
	assert!(dir.path().join("out/results/redis-test-deploy-vanilla.csv").exists());
	assert!(dir.path().join("out/csv/redis-test-bundle.csv").exists());
}
