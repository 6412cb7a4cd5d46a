use std::{ffi::OsStr, fs, path::Path};

use crate::{
    error::Result,
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

/// Config file gocryptfs writes into every initialized cipher directory.
pub const GOCRYPTFS_CONFIG_FILE: &str = "gocryptfs.conf";

const PASSFILE_STDIN: &str = "/dev/stdin";

/// Returns true when `storage_path` looks like an initialized gocryptfs directory.
pub fn has_gocryptfs_marker(storage_path: &Path) -> bool {
    storage_path.is_dir() && storage_path.join(GOCRYPTFS_CONFIG_FILE).is_file()
}

/// System gocryptfs/fuse command driver.
#[derive(Debug, Clone)]
pub struct GocryptfsBackend {
    gocryptfs_binary: String,
    fusermount_binary: String,
}

impl GocryptfsBackend {
    /// Constructs a driver using default binary names.
    pub fn new() -> Self {
        Self::with_binaries("gocryptfs", "fusermount")
    }

    /// Constructs a driver with custom binaries.
    pub fn with_binaries(
        gocryptfs_binary: impl Into<String>,
        fusermount_binary: impl Into<String>,
    ) -> Self {
        Self {
            gocryptfs_binary: gocryptfs_binary.into(),
            fusermount_binary: fusermount_binary.into(),
        }
    }
}

impl Default for GocryptfsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeBackend for GocryptfsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gocryptfs
    }

    fn create(&self, request: &CreateRequest, secret: &SecretValue) -> Result<()> {
        let cipher_dir = &request.storage_path;
        ensure_storage_vacant(cipher_dir)?;
        fs::create_dir_all(cipher_dir)?;

        let args: [&OsStr; 5] = [
            "-q".as_ref(),
            "-init".as_ref(),
            "-passfile".as_ref(),
            PASSFILE_STDIN.as_ref(),
            cipher_dir.as_os_str(),
        ];
        if let Err(error) = run_tool(&self.gocryptfs_binary, args, Some(secret)) {
            if let Err(cleanup_error) = fs::remove_dir_all(cipher_dir) {
                tracing::warn!(
                    path = %cipher_dir.display(),
                    error = %cleanup_error,
                    "failed to remove partial gocryptfs directory"
                );
            }
            return Err(error);
        }
        Ok(())
    }

    fn mount(&self, request: &MountRequest, secret: &SecretValue) -> Result<()> {
        ensure_storage_present(&request.storage_path)?;
        let created = prepare_mount_dir(&request.mount_path)?;

        let args: [&OsStr; 5] = [
            "-q".as_ref(),
            "-passfile".as_ref(),
            PASSFILE_STDIN.as_ref(),
            request.storage_path.as_os_str(),
            request.mount_path.as_os_str(),
        ];
        run_tool(&self.gocryptfs_binary, args, Some(secret)).inspect_err(|_| {
            discard_created_mount_dir(&request.mount_path, created);
        })
    }

    fn unmount(&self, mount_path: &Path) -> Result<()> {
        ensure_mount_dir_present(mount_path)?;
        run_tool(
            &self.fusermount_binary,
            [OsStr::new("-u"), mount_path.as_os_str()],
            None,
        )?;
        remove_mount_dir(mount_path)
    }
}
