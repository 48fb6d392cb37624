use std::os::unix::fs::MetadataExt;
use std::time::Duration;

use benchmark_delivery::mount::*;

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn test_render_bind_mount() {
	let spec = MountSpec::new("/var/lib/mysql").with_mode("ro");
	let workdir = std::path::PathBuf::from("/tmp/starlight-exp");
	let mount = ScratchMount::new(&spec, &workdir, &[], TIMEOUT);

	let expected = format!(
		"type=bind,src=/tmp/starlight-exp/m{}-42,dst=/var/lib/mysql,options=rbind:ro",
		spec.instance_id
	);
	assert_eq!(mount.render(42), expected);
}

#[test]
fn test_overwrite_is_used_verbatim() {
	let spec = MountSpec::overwritten("type=bind,src=/srv/data,dst=/data,options=rbind:rw");
	let workdir = std::path::PathBuf::from("/tmp/starlight-exp");
	let mount = ScratchMount::new(&spec, &workdir, &[], TIMEOUT);
	assert_eq!(mount.render(7), "type=bind,src=/srv/data,dst=/data,options=rbind:rw");
}

#[test]
fn test_instance_ids_are_in_range() {
	for _ in 0..200 {
		assert!(MountSpec::new("/data").instance_id < 999_999);
	}
}

#[test]
fn test_deserialized_specs_get_an_instance_id() {
	let specs: Vec<MountSpec> =
		serde_json::from_str(r#"[{"guest_dst": "/data"}, {"guest_dst": "/logs", "mode": "ro"}]"#).unwrap();
	assert_eq!(specs[0].mode, "rw");
	assert_eq!(specs[1].mode, "ro");
	assert!(specs.iter().all(|s| s.instance_id < 999_999));
}

#[tokio::test]
async fn test_prepare_and_destroy_scratch_directory() {
	let workdir = tempfile::tempdir().unwrap();
	let meta = std::fs::metadata(workdir.path()).unwrap();
	let owner = format!("{}:{}", meta.uid(), meta.gid());
	let spec = MountSpec::new("/data").with_owner(&owner);
	let mount = ScratchMount::new(&spec, workdir.path(), &[], TIMEOUT);

	mount.prepare(11).await;
	let path = mount.scratch_path(11);
	assert!(path.is_dir());
	assert_eq!(std::fs::metadata(&path).unwrap().uid(), meta.uid());

	std::fs::write(path.join("dump.rdb"), b"x").unwrap();
	mount.destroy(11).await;
	assert!(!path.exists());

	// Already gone
	mount.destroy(11).await;
	assert!(!path.exists());
}

#[tokio::test]
async fn test_failed_chown_is_not_fatal() {
	let workdir = tempfile::tempdir().unwrap();
	let spec = MountSpec::new("/data").with_owner("no-such-user-xyz:no-such-group-xyz");
	let mount = ScratchMount::new(&spec, workdir.path(), &[], TIMEOUT);

	mount.prepare(3).await;
	assert!(mount.scratch_path(3).is_dir());
}

#[tokio::test]
async fn test_reset_workdir_removes_everything() {
	let root = tempfile::tempdir().unwrap();
	let workdir = root.path().join("exp");
	std::fs::create_dir_all(workdir.join("m1-1")).unwrap();

	reset_workdir(&workdir, &[], TIMEOUT).await;
	assert!(!workdir.exists());

	// Missing work directory
	reset_workdir(&workdir, &[], TIMEOUT).await;
}
