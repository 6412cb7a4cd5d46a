use std::{
    ffi::{OsStr, OsString},
    fs,
    path::Path,
};

use crate::{
    error::{CryptainerError, Result},
    types::{BackendKind, SecretValue},
};

use super::{
    backend::{
        discard_created_mount_dir, ensure_mount_dir_present, ensure_storage_present,
        ensure_storage_vacant, prepare_mount_dir, remove_mount_dir, CreateRequest, MountRequest,
        VolumeBackend,
    },
    command::run_tool,
};

/// Container size used when create receives none.
pub const DEFAULT_CONTAINER_SIZE: &str = "1024M";
/// File extension recognized as a VeraCrypt container.
pub const CONTAINER_EXTENSION: &str = "hc";

static CREATE_ARGS: [&str; 17] = [
    "--volume-type",
    "normal",
    "--encryption",
    "AES",
    "--hash",
    "sha-512",
    "--filesystem",
    "exfat",
    "--pim",
    "0",
    "--keyfiles",
    "",
    "--random-source",
    "/dev/urandom",
    "--non-interactive",
    "--stdin",
    "--text",
];
static MOUNT_ARGS: [&str; 9] = [
    "--pim",
    "0",
    "--keyfiles",
    "",
    "--protect-hidden",
    "no",
    "--non-interactive",
    "--stdin",
    "--text",
];

/// Returns true when `storage_path` looks like a VeraCrypt container file.
pub fn has_veracrypt_marker(storage_path: &Path) -> bool {
    storage_path.is_file()
        && storage_path
            .extension()
            .is_some_and(|extension| extension == CONTAINER_EXTENSION)
}

/// Requires the `.hc` extension so a created container is detectable from storage alone.
pub fn validate_container_name(name: &str) -> Result<()> {
    let has_extension = Path::new(name)
        .extension()
        .is_some_and(|extension| extension == CONTAINER_EXTENSION);
    if !has_extension {
        return Err(CryptainerError::InvalidInput(format!(
            "veracrypt volume names must end in `.{CONTAINER_EXTENSION}` (got `{name}`)"
        )));
    }
    Ok(())
}

/// Validates a container size literal such as `512M` or `2G`.
pub fn validate_container_size(size: &str) -> Result<()> {
    let Some((digits, unit)) = size.split_at_checked(size.len().saturating_sub(1)) else {
        return Err(invalid_size(size));
    };
    let valid_digits = !digits.is_empty() && digits.bytes().all(|byte| byte.is_ascii_digit());
    let valid_unit = matches!(unit, "K" | "M" | "G" | "T");
    if !valid_digits || !valid_unit || digits.bytes().all(|byte| byte == b'0') {
        return Err(invalid_size(size));
    }
    Ok(())
}

fn invalid_size(size: &str) -> CryptainerError {
    CryptainerError::InvalidInput(format!(
        "invalid container size `{size}` (expected digits followed by K, M, G or T)"
    ))
}

/// System VeraCrypt text-mode command driver.
#[derive(Debug, Clone)]
pub struct VeracryptBackend {
    veracrypt_binary: String,
}

impl VeracryptBackend {
    /// Constructs a driver using the default binary name.
    pub fn new() -> Self {
        Self::with_binaries("veracrypt")
    }

    /// Constructs a driver with a custom binary.
    pub fn with_binaries(veracrypt_binary: impl Into<String>) -> Self {
        Self {
            veracrypt_binary: veracrypt_binary.into(),
        }
    }
}

impl Default for VeracryptBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeBackend for VeracryptBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Veracrypt
    }

    fn create(&self, request: &CreateRequest, secret: &SecretValue) -> Result<()> {
        let container = &request.storage_path;
        let size = request.size.as_deref().unwrap_or(DEFAULT_CONTAINER_SIZE);
        validate_container_size(size)?;
        ensure_storage_vacant(container)?;
        if let Some(parent) = container.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut args: Vec<OsString> = vec![
            "--create".into(),
            container.as_os_str().to_os_string(),
            "--size".into(),
            size.into(),
        ];
        args.extend(CREATE_ARGS.iter().map(OsString::from));
        if let Err(error) = run_tool(&self.veracrypt_binary, &args, Some(secret)) {
            if container.exists() {
                if let Err(cleanup_error) = fs::remove_file(container) {
                    tracing::warn!(
                        path = %container.display(),
                        error = %cleanup_error,
                        "failed to remove partial veracrypt container"
                    );
                }
            }
            return Err(error);
        }
        Ok(())
    }

    fn mount(&self, request: &MountRequest, secret: &SecretValue) -> Result<()> {
        ensure_storage_present(&request.storage_path)?;
        let created = prepare_mount_dir(&request.mount_path)?;

        let mut args: Vec<&OsStr> = vec![
            OsStr::new("--mount"),
            request.storage_path.as_os_str(),
            request.mount_path.as_os_str(),
        ];
        args.extend(MOUNT_ARGS.iter().map(OsStr::new));
        run_tool(&self.veracrypt_binary, &args, Some(secret)).inspect_err(|_| {
            discard_created_mount_dir(&request.mount_path, created);
        })
    }

    fn unmount(&self, mount_path: &Path) -> Result<()> {
        ensure_mount_dir_present(mount_path)?;
        run_tool(
            &self.veracrypt_binary,
            [
                OsStr::new("--text"),
                OsStr::new("--non-interactive"),
                OsStr::new("--dismount"),
                mount_path.as_os_str(),
            ],
            None,
        )?;
        remove_mount_dir(mount_path)
    }
}

#[cfg(test)]
mod unit_tests {
    use std::fs;

    use super::{has_veracrypt_marker, validate_container_name, validate_container_size};

    #[test]
    fn container_size_accepts_unit_suffixes() {
        for size in ["1024M", "1G", "750K", "2T"] {
            validate_container_size(size).unwrap();
        }
    }

    #[test]
    fn container_size_rejects_malformed_literals() {
        for size in ["", "M", "10", "10MB", "-5M", "1.5G", "0M", "10m"] {
            assert!(validate_container_size(size).is_err(), "{size}");
        }
    }

    #[test]
    fn container_names_need_the_container_extension() {
        validate_container_name("archive.hc").unwrap();
        validate_container_name("team.backup.hc").unwrap();
        for name in ["box", "archive.hcx", "archive.HC", "hc"] {
            assert!(validate_container_name(name).is_err(), "{name}");
        }
    }

    #[test]
    fn marker_requires_regular_file_with_container_extension() {
        let temp_dir = tempfile::tempdir().unwrap();
        let container = temp_dir.path().join("archive.hc");
        assert!(!has_veracrypt_marker(&container));
        fs::write(&container, b"").unwrap();
        assert!(has_veracrypt_marker(&container));

        let plain = temp_dir.path().join("archive");
        fs::write(&plain, b"").unwrap();
        assert!(!has_veracrypt_marker(&plain));

        let directory = temp_dir.path().join("dir.hc");
        fs::create_dir(&directory).unwrap();
        assert!(!has_veracrypt_marker(&directory));
    }
}
