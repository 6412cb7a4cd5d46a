#![cfg(unix)]

use std::{fs, os::unix::fs::PermissionsExt, path::Path};

use cryptainer::volume::{MountStatus, MountTable, SystemMountTable};

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    let mut permissions = fs::metadata(path).unwrap().permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions).unwrap();
}

#[test]
fn system_table_parses_mount_output() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mount = temp_dir.path().join("mount");
    write_script(
        &mount,
        r#"#!/usr/bin/env bash
cat <<'EOF'
proc on /proc type proc (rw,nosuid,nodev,noexec,relatime)
photos on /srv/mnt/photos type fuse.gocryptfs (rw,nosuid,nodev,relatime)
/dev/mapper/veracrypt1 on /srv/mnt/archive.hc type exfat (rw,relatime)
EOF
"#,
    );

    let snapshot = SystemMountTable::with_binary(mount.to_string_lossy()).refresh();
    assert!(!snapshot.is_degraded());
    assert_eq!(
        snapshot.status(Path::new("/srv/mnt/photos")),
        MountStatus::Mounted("/srv/mnt/photos".into())
    );
    assert_eq!(
        snapshot.status(Path::new("/srv/mnt/archive.hc")),
        MountStatus::Mounted("/srv/mnt/archive.hc".into())
    );
    assert_eq!(
        snapshot.status(Path::new("/srv/mnt/photo")),
        MountStatus::NotMounted
    );
}

#[test]
fn failing_mount_command_degrades_snapshot() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mount = temp_dir.path().join("mount");
    write_script(
        &mount,
        "#!/usr/bin/env bash\necho 'permission denied' >&2\nexit 1\n",
    );

    let snapshot = SystemMountTable::with_binary(mount.to_string_lossy()).refresh();
    assert!(snapshot.is_degraded());
    assert!(snapshot.warning().unwrap().contains("permission denied"));
    assert_eq!(
        snapshot.status(Path::new("/srv/mnt/photos")),
        MountStatus::Unknown
    );
}

#[test]
fn missing_mount_binary_degrades_snapshot() {
    let temp_dir = tempfile::tempdir().unwrap();
    let snapshot =
        SystemMountTable::with_binary(temp_dir.path().join("absent").to_string_lossy()).refresh();
    assert!(snapshot.is_degraded());
    assert!(!snapshot.is_mounted(Path::new("/srv/mnt/photos")).0);
}

#[test]
fn mount_status_serializes_with_state_tag() {
    let mounted = serde_json::to_value(MountStatus::Mounted("/srv/mnt/photos".into())).unwrap();
    assert_eq!(mounted["state"], "mounted");
    assert_eq!(mounted["mount_path"], "/srv/mnt/photos");
    let unknown = serde_json::to_value(MountStatus::Unknown).unwrap();
    assert_eq!(unknown["state"], "unknown");
}

#[test]
fn mount_paths_with_whitespace_are_not_matched() {
    let snapshot =
        cryptainer::volume::MountSnapshot::from_output("cipher on /srv/my mnt/box type fuse (rw)\n");
    assert!(!snapshot.is_mounted(Path::new("/srv/my mnt/box")).0);
    assert_eq!(
        snapshot.status(Path::new("/srv/my mnt/box")),
        MountStatus::NotMounted
    );
}
