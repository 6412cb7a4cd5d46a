#![cfg(unix)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use cryptainer::{
    error::{classify_error_code, CryptainerError},
    types::SecretValue,
    volume::{
        gocryptfs::GocryptfsBackend, veracrypt::VeracryptBackend, CreateRequest, MountRequest,
        VolumeBackend,
    },
};

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    let mut permissions = fs::metadata(path).unwrap().permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions).unwrap();
}

struct Workspace {
    _temp_dir: tempfile::TempDir,
    bin_dir: PathBuf,
    logs_dir: PathBuf,
    volumes: PathBuf,
    mounts: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().to_path_buf();
        for dir in ["bin", "logs", "volumes", "mnt"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        Self {
            bin_dir: root.join("bin"),
            logs_dir: root.join("logs"),
            volumes: root.join("volumes"),
            mounts: root.join("mnt"),
            _temp_dir: temp_dir,
        }
    }

    /// Installs a tool that logs its arguments and stdin, then runs `extra`.
    fn install_tool(&self, name: &str, extra: &str) -> String {
        let script = format!(
            "#!/usr/bin/env bash\nset -euo pipefail\necho \"$*\" >> \"{args}\"\ncat >> \"{stdin}\"\n{extra}\n",
            args = self.args_log(name).display(),
            stdin = self.stdin_log(name).display(),
        );
        let path = self.bin_dir.join(name);
        write_script(&path, &script);
        path.to_string_lossy().into_owned()
    }

    fn args_log(&self, name: &str) -> PathBuf {
        self.logs_dir.join(format!("{name}.args"))
    }

    fn stdin_log(&self, name: &str) -> PathBuf {
        self.logs_dir.join(format!("{name}.stdin"))
    }

    fn args(&self, name: &str) -> Vec<String> {
        fs::read_to_string(self.args_log(name))
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    fn stdin(&self, name: &str) -> String {
        fs::read_to_string(self.stdin_log(name)).unwrap_or_default()
    }
}

const GOCRYPTFS_INIT: &str = r#"if [[ "$2" == "-init" ]]; then
  touch "${@: -1}/gocryptfs.conf"
fi"#;
const VERACRYPT_CREATE: &str = r#"if [[ "$1" == "--create" ]]; then
  : > "$2"
fi"#;
const FAIL_WITH_DIAGNOSTIC: &str = "echo 'wrong password' >&2\nexit 3";

fn secret(value: &str) -> SecretValue {
    SecretValue::from_string(value.to_owned())
}

#[test]
fn gocryptfs_create_initializes_directory_with_secret_on_stdin() {
    let workspace = Workspace::new();
    let gocryptfs = workspace.install_tool("gocryptfs", GOCRYPTFS_INIT);
    let fusermount = workspace.install_tool("fusermount", "");
    let backend = GocryptfsBackend::with_binaries(gocryptfs, fusermount);

    let cipher_dir = workspace.volumes.join("photos");
    backend
        .create(
            &CreateRequest {
                storage_path: cipher_dir.clone(),
                size: None,
            },
            &secret("hunter22"),
        )
        .unwrap();

    assert!(cipher_dir.join("gocryptfs.conf").is_file());
    assert_eq!(
        workspace.args("gocryptfs"),
        vec![format!("-q -init -passfile /dev/stdin {}", cipher_dir.display())]
    );
    assert_eq!(workspace.stdin("gocryptfs"), "hunter22\n");
}

#[test]
fn gocryptfs_create_failure_removes_partial_directory() {
    let workspace = Workspace::new();
    let gocryptfs = workspace.install_tool("gocryptfs", FAIL_WITH_DIAGNOSTIC);
    let backend = GocryptfsBackend::with_binaries(gocryptfs, "fusermount");

    let cipher_dir = workspace.volumes.join("photos");
    let error = backend
        .create(
            &CreateRequest {
                storage_path: cipher_dir.clone(),
                size: None,
            },
            &secret("pw"),
        )
        .unwrap_err();

    match &error {
        CryptainerError::BackendFailure { diagnostic, .. } => {
            assert_eq!(diagnostic, "wrong password");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(classify_error_code(&error), "E400");
    assert!(!cipher_dir.exists());
}

#[test]
fn gocryptfs_create_refuses_existing_storage() {
    let workspace = Workspace::new();
    let gocryptfs = workspace.install_tool("gocryptfs", GOCRYPTFS_INIT);
    let backend = GocryptfsBackend::with_binaries(gocryptfs, "fusermount");
    let cipher_dir = workspace.volumes.join("photos");
    fs::create_dir(&cipher_dir).unwrap();

    let error = backend
        .create(
            &CreateRequest {
                storage_path: cipher_dir,
                size: None,
            },
            &secret("pw"),
        )
        .unwrap_err();
    assert!(matches!(error, CryptainerError::AlreadyExists(_)));
    assert!(workspace.args("gocryptfs").is_empty());
}

#[test]
fn gocryptfs_mount_creates_mount_directory() {
    let workspace = Workspace::new();
    let gocryptfs = workspace.install_tool("gocryptfs", "");
    let backend = GocryptfsBackend::with_binaries(gocryptfs, "fusermount");
    let cipher_dir = workspace.volumes.join("photos");
    fs::create_dir(&cipher_dir).unwrap();
    let mount_path = workspace.mounts.join("photos");

    backend
        .mount(
            &MountRequest {
                storage_path: cipher_dir.clone(),
                mount_path: mount_path.clone(),
            },
            &secret("pw"),
        )
        .unwrap();

    assert!(mount_path.is_dir());
    assert_eq!(
        workspace.args("gocryptfs"),
        vec![format!(
            "-q -passfile /dev/stdin {} {}",
            cipher_dir.display(),
            mount_path.display()
        )]
    );
    assert_eq!(workspace.stdin("gocryptfs"), "pw\n");
}

#[test]
fn failed_mount_removes_the_directory_it_created() {
    let workspace = Workspace::new();
    let gocryptfs = workspace.install_tool("gocryptfs", FAIL_WITH_DIAGNOSTIC);
    let backend = GocryptfsBackend::with_binaries(gocryptfs, "fusermount");
    let cipher_dir = workspace.volumes.join("photos");
    fs::create_dir(&cipher_dir).unwrap();
    let mount_path = workspace.mounts.join("photos");

    let error = backend
        .mount(
            &MountRequest {
                storage_path: cipher_dir,
                mount_path: mount_path.clone(),
            },
            &secret("bad"),
        )
        .unwrap_err();
    assert!(matches!(error, CryptainerError::BackendFailure { .. }));
    assert!(!mount_path.exists());
}

#[test]
fn failed_mount_keeps_a_preexisting_empty_directory() {
    let workspace = Workspace::new();
    let gocryptfs = workspace.install_tool("gocryptfs", FAIL_WITH_DIAGNOSTIC);
    let backend = GocryptfsBackend::with_binaries(gocryptfs, "fusermount");
    let cipher_dir = workspace.volumes.join("photos");
    fs::create_dir(&cipher_dir).unwrap();
    let mount_path = workspace.mounts.join("photos");
    fs::create_dir(&mount_path).unwrap();

    backend
        .mount(
            &MountRequest {
                storage_path: cipher_dir,
                mount_path: mount_path.clone(),
            },
            &secret("bad"),
        )
        .unwrap_err();
    assert!(mount_path.is_dir());
}

#[test]
fn mount_refuses_non_empty_mount_directory() {
    let workspace = Workspace::new();
    let gocryptfs = workspace.install_tool("gocryptfs", "");
    let backend = GocryptfsBackend::with_binaries(gocryptfs, "fusermount");
    let cipher_dir = workspace.volumes.join("photos");
    fs::create_dir(&cipher_dir).unwrap();
    let mount_path = workspace.mounts.join("photos");
    fs::create_dir(&mount_path).unwrap();
    fs::write(mount_path.join("note.txt"), b"keep").unwrap();

    let error = backend
        .mount(
            &MountRequest {
                storage_path: cipher_dir,
                mount_path: mount_path.clone(),
            },
            &secret("pw"),
        )
        .unwrap_err();
    assert!(matches!(error, CryptainerError::AlreadyExists(_)));
    assert!(workspace.args("gocryptfs").is_empty());
    assert!(mount_path.join("note.txt").exists());
}

#[test]
fn mount_requires_existing_storage() {
    let workspace = Workspace::new();
    let gocryptfs = workspace.install_tool("gocryptfs", "");
    let backend = GocryptfsBackend::with_binaries(gocryptfs, "fusermount");

    let error = backend
        .mount(
            &MountRequest {
                storage_path: workspace.volumes.join("absent"),
                mount_path: workspace.mounts.join("absent"),
            },
            &secret("pw"),
        )
        .unwrap_err();
    assert!(matches!(error, CryptainerError::NotFound(_)));
    assert!(!workspace.mounts.join("absent").exists());
}

#[test]
fn gocryptfs_unmount_runs_fusermount_and_removes_directory() {
    let workspace = Workspace::new();
    let fusermount = workspace.install_tool("fusermount", "");
    let backend = GocryptfsBackend::with_binaries("gocryptfs", fusermount);
    let mount_path = workspace.mounts.join("photos");
    fs::create_dir(&mount_path).unwrap();

    backend.unmount(&mount_path).unwrap();
    assert_eq!(
        workspace.args("fusermount"),
        vec![format!("-u {}", mount_path.display())]
    );
    assert_eq!(workspace.stdin("fusermount"), "");
    assert!(!mount_path.exists());
}

#[test]
fn failed_unmount_keeps_mount_directory() {
    let workspace = Workspace::new();
    let fusermount = workspace.install_tool("fusermount", FAIL_WITH_DIAGNOSTIC);
    let backend = GocryptfsBackend::with_binaries("gocryptfs", fusermount);
    let mount_path = workspace.mounts.join("photos");
    fs::create_dir(&mount_path).unwrap();

    let error = backend.unmount(&mount_path).unwrap_err();
    assert!(matches!(error, CryptainerError::BackendFailure { .. }));
    assert!(mount_path.is_dir());
}

#[test]
fn missing_tool_binary_maps_to_missing_runtime_code() {
    let workspace = Workspace::new();
    let backend = GocryptfsBackend::with_binaries(
        workspace.bin_dir.join("absent-gocryptfs").to_string_lossy(),
        "fusermount",
    );
    let error = backend
        .create(
            &CreateRequest {
                storage_path: workspace.volumes.join("photos"),
                size: None,
            },
            &secret("pw"),
        )
        .unwrap_err();
    assert_eq!(classify_error_code(&error), "E103");
    assert!(!workspace.volumes.join("photos").exists());
}

#[test]
fn veracrypt_create_uses_default_size_and_text_mode() {
    let workspace = Workspace::new();
    let veracrypt = workspace.install_tool("veracrypt", VERACRYPT_CREATE);
    let backend = VeracryptBackend::with_binaries(veracrypt);
    let container = workspace.volumes.join("archive.hc");

    backend
        .create(
            &CreateRequest {
                storage_path: container.clone(),
                size: None,
            },
            &secret("pw"),
        )
        .unwrap();

    assert!(container.is_file());
    let args = workspace.args("veracrypt");
    assert_eq!(args.len(), 1);
    let line = &args[0];
    assert!(line.starts_with(&format!("--create {} --size 1024M ", container.display())));
    for flag in ["--non-interactive", "--stdin", "--text", "--random-source /dev/urandom"] {
        assert!(line.contains(flag), "missing {flag} in {line}");
    }
    assert_eq!(workspace.stdin("veracrypt"), "pw\n");
}

#[test]
fn veracrypt_create_passes_requested_size() {
    let workspace = Workspace::new();
    let veracrypt = workspace.install_tool("veracrypt", VERACRYPT_CREATE);
    let backend = VeracryptBackend::with_binaries(veracrypt);
    let container = workspace.volumes.join("archive.hc");

    backend
        .create(
            &CreateRequest {
                storage_path: container,
                size: Some("2G".to_owned()),
            },
            &secret("pw"),
        )
        .unwrap();
    assert!(workspace.args("veracrypt")[0].contains("--size 2G "));
}

#[test]
fn veracrypt_create_rejects_malformed_size_before_running_tool() {
    let workspace = Workspace::new();
    let veracrypt = workspace.install_tool("veracrypt", VERACRYPT_CREATE);
    let backend = VeracryptBackend::with_binaries(veracrypt);

    let error = backend
        .create(
            &CreateRequest {
                storage_path: workspace.volumes.join("archive.hc"),
                size: Some("lots".to_owned()),
            },
            &secret("pw"),
        )
        .unwrap_err();
    assert!(matches!(error, CryptainerError::InvalidInput(_)));
    assert!(workspace.args("veracrypt").is_empty());
}

#[test]
fn veracrypt_create_failure_removes_partial_container() {
    let workspace = Workspace::new();
    let veracrypt = workspace.install_tool(
        "veracrypt",
        &format!("{VERACRYPT_CREATE}\n{FAIL_WITH_DIAGNOSTIC}"),
    );
    let backend = VeracryptBackend::with_binaries(veracrypt);
    let container = workspace.volumes.join("archive.hc");

    backend
        .create(
            &CreateRequest {
                storage_path: container.clone(),
                size: None,
            },
            &secret("pw"),
        )
        .unwrap_err();
    assert!(!container.exists());
}

#[test]
fn veracrypt_mount_and_dismount_arguments() {
    let workspace = Workspace::new();
    let veracrypt = workspace.install_tool("veracrypt", "");
    let backend = VeracryptBackend::with_binaries(veracrypt);
    let container = workspace.volumes.join("archive.hc");
    fs::write(&container, b"").unwrap();
    let mount_path = workspace.mounts.join("archive.hc");

    backend
        .mount(
            &MountRequest {
                storage_path: container.clone(),
                mount_path: mount_path.clone(),
            },
            &secret("pw"),
        )
        .unwrap();
    assert!(mount_path.is_dir());
    backend.unmount(&mount_path).unwrap();
    assert!(!mount_path.exists());

    let args = workspace.args("veracrypt");
    assert_eq!(args.len(), 2);
    assert!(args[0].starts_with(&format!(
        "--mount {} {} ",
        container.display(),
        mount_path.display()
    )));
    assert!(args[0].contains("--protect-hidden no"));
    assert_eq!(
        args[1],
        format!("--text --non-interactive --dismount {}", mount_path.display())
    );
}
