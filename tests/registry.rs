use std::fs;

use cryptainer::{
    error::CryptainerError,
    paths::VolumePaths,
    registry::{detect_storage_type, VolumeRegistry},
    types::{BackendKind, VolumeName, VolumeType},
};

fn layout() -> (tempfile::TempDir, VolumePaths) {
    let temp_dir = tempfile::tempdir().unwrap();
    let volumes = temp_dir.path().join("volumes");
    let mounts = temp_dir.path().join("mnt");
    fs::create_dir_all(&volumes).unwrap();
    fs::create_dir_all(&mounts).unwrap();
    let paths = VolumePaths::new(&volumes, &mounts, temp_dir.path().join("config"));
    (temp_dir, paths)
}

fn name(raw: &str) -> VolumeName {
    VolumeName::new(raw).unwrap()
}

#[test]
fn fresh_registry_is_empty_and_consistent() {
    let (_temp_dir, paths) = layout();
    let registry = VolumeRegistry::load_or_create(&paths).unwrap();
    assert!(!registry.has_entries());
    assert!(registry.verify_integrity());
    assert!(!paths.registry_file().exists());
}

#[test]
fn register_persists_across_reloads() {
    let (_temp_dir, paths) = layout();
    let mut registry = VolumeRegistry::load_or_create(&paths).unwrap();
    registry.register(&name("photos"), BackendKind::Gocryptfs).unwrap();
    registry.register(&name("archive.hc"), BackendKind::Veracrypt).unwrap();

    let reloaded = VolumeRegistry::load_or_create(&paths).unwrap();
    assert!(reloaded.verify_integrity());
    let names = reloaded.names().map(VolumeName::as_str).collect::<Vec<_>>();
    assert_eq!(names, vec!["archive.hc", "photos"]);
    let record = reloaded.record(&name("photos")).unwrap();
    assert_eq!(record.kind, BackendKind::Gocryptfs);
    assert_eq!(record.path, paths.volumes_root().join("photos"));

    let raw: serde_json::Value =
        serde_json::from_slice(&fs::read(paths.registry_file()).unwrap()).unwrap();
    assert_eq!(raw["version"], 1);
    assert_eq!(raw["volumes"]["photos"]["type"], "gocryptfs");
    assert!(raw["integrity_tag"].as_str().unwrap().len() == 64);
}

#[test]
fn register_replaces_existing_record() {
    let (_temp_dir, paths) = layout();
    let mut registry = VolumeRegistry::load_or_create(&paths).unwrap();
    registry.register(&name("box"), BackendKind::Gocryptfs).unwrap();
    registry.register(&name("box"), BackendKind::Veracrypt).unwrap();

    let reloaded = VolumeRegistry::load_or_create(&paths).unwrap();
    assert_eq!(reloaded.names().count(), 1);
    assert_eq!(
        reloaded.record(&name("box")).unwrap().kind,
        BackendKind::Veracrypt
    );
}

#[test]
fn tampered_registry_still_loads_but_fails_integrity() {
    let (_temp_dir, paths) = layout();
    let mut registry = VolumeRegistry::load_or_create(&paths).unwrap();
    registry.register(&name("box"), BackendKind::Gocryptfs).unwrap();

    let mut document: serde_json::Value =
        serde_json::from_slice(&fs::read(paths.registry_file()).unwrap()).unwrap();
    document["volumes"]["box"]["path"] = serde_json::json!("/elsewhere/box");
    fs::write(paths.registry_file(), serde_json::to_vec(&document).unwrap()).unwrap();

    let reloaded = VolumeRegistry::load_or_create(&paths).unwrap();
    assert!(!reloaded.verify_integrity());
    assert_eq!(reloaded.record(&name("box")).unwrap().kind, BackendKind::Gocryptfs);
}

#[test]
fn unsupported_registry_version_is_rejected() {
    let (_temp_dir, paths) = layout();
    fs::create_dir_all(paths.config_dir()).unwrap();
    fs::write(
        paths.registry_file(),
        br#"{"version":9,"volumes":{},"integrity_tag":""}"#,
    )
    .unwrap();

    let error = VolumeRegistry::load_or_create(&paths).err().unwrap();
    assert!(matches!(error, CryptainerError::InvalidInput(_)));
}

#[test]
fn detection_probes_gocryptfs_before_veracrypt() {
    let (_temp_dir, paths) = layout();
    let volumes = paths.volumes_root();

    let cipher_dir = volumes.join("dir.hc");
    fs::create_dir(&cipher_dir).unwrap();
    fs::write(cipher_dir.join("gocryptfs.conf"), b"{}").unwrap();
    assert_eq!(detect_storage_type(&cipher_dir), VolumeType::Gocryptfs);

    fs::write(volumes.join("file.hc"), b"").unwrap();
    assert_eq!(detect_storage_type(&volumes.join("file.hc")), VolumeType::Veracrypt);

    fs::create_dir(volumes.join("bare")).unwrap();
    assert_eq!(detect_storage_type(&volumes.join("bare")), VolumeType::Unknown);
    assert_eq!(detect_storage_type(&volumes.join("absent")), VolumeType::Unknown);
}

#[test]
fn lookup_type_combines_record_and_detection() {
    let (_temp_dir, paths) = layout();
    let mut registry = VolumeRegistry::load_or_create(&paths).unwrap();
    assert_eq!(registry.lookup_type(&name("ghost")), VolumeType::Unknown);

    registry.register(&name("plain"), BackendKind::Veracrypt).unwrap();
    fs::write(paths.volumes_root().join("plain"), b"").unwrap();
    assert_eq!(registry.lookup_type(&name("plain")), VolumeType::Veracrypt);

    let cipher_dir = paths.volumes_root().join("moved.hc");
    fs::create_dir(&cipher_dir).unwrap();
    fs::write(cipher_dir.join("gocryptfs.conf"), b"{}").unwrap();
    registry.register(&name("moved.hc"), BackendKind::Veracrypt).unwrap();
    let resolution = registry.resolve(&name("moved.hc"));
    assert!(resolution.is_stale());
    assert_eq!(resolution.effective(), VolumeType::Gocryptfs);
}

fn block_registry_file(paths: &VolumePaths) {
    if paths.registry_file().exists() {
        fs::remove_file(paths.registry_file()).unwrap();
    }
    fs::create_dir_all(paths.registry_file()).unwrap();
}

#[test]
fn register_failure_restores_previous_state() {
    let (_temp_dir, paths) = layout();
    let mut registry = VolumeRegistry::load_or_create(&paths).unwrap();
    block_registry_file(&paths);

    assert!(registry.register(&name("box"), BackendKind::Gocryptfs).is_err());
    assert!(registry.record(&name("box")).is_none());
    assert!(!registry.has_entries());
    assert!(registry.verify_integrity());
}

#[test]
fn register_failure_keeps_replaced_record() {
    let (_temp_dir, paths) = layout();
    let mut registry = VolumeRegistry::load_or_create(&paths).unwrap();
    registry.register(&name("box"), BackendKind::Gocryptfs).unwrap();
    let original = registry.record(&name("box")).unwrap().clone();
    block_registry_file(&paths);

    assert!(registry.register(&name("box"), BackendKind::Veracrypt).is_err());
    assert_eq!(registry.record(&name("box")), Some(&original));
    assert!(registry.verify_integrity());
}

#[test]
fn failed_persist_leaves_no_temp_files() {
    let (_temp_dir, paths) = layout();
    let mut registry = VolumeRegistry::load_or_create(&paths).unwrap();
    block_registry_file(&paths);
    assert!(registry.register(&name("box"), BackendKind::Gocryptfs).is_err());

    let entries = fs::read_dir(paths.registry_file().parent().unwrap())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect::<Vec<_>>();
    assert_eq!(entries, vec![paths.registry_file().file_name().unwrap().to_owned()]);
}
