use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::{
    error::{CryptainerError, Result},
    fs_secure::is_empty_dir,
    types::{BackendKind, SecretValue},
};

/// Request payload for creating a new encrypted volume artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    /// Artifact location under the volumes root.
    pub storage_path: PathBuf,
    /// Container size such as `512M`; only meaningful for sized backends.
    pub size: Option<String>,
}

/// Request payload for mounting an existing volume artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    /// Artifact location under the volumes root.
    pub storage_path: PathBuf,
    /// Plaintext mount point under the mount root.
    pub mount_path: PathBuf,
}

/// Encryption tool adapter for one volume type.
///
/// Adapters never decide which volume they own; the controller resolves the
/// type first and dispatches to exactly one adapter.
pub trait VolumeBackend: Send + Sync {
    /// Backend handled by this adapter.
    fn kind(&self) -> BackendKind;
    /// Creates a new artifact at `request.storage_path` protected by `secret`.
    fn create(&self, request: &CreateRequest, secret: &SecretValue) -> Result<()>;
    /// Mounts an existing artifact at `request.mount_path`.
    fn mount(&self, request: &MountRequest, secret: &SecretValue) -> Result<()>;
    /// Unmounts `mount_path` and removes the now-empty mount directory.
    fn unmount(&self, mount_path: &Path) -> Result<()>;
}

/// Fails with `AlreadyExists` when anything occupies `storage_path`.
pub(crate) fn ensure_storage_vacant(storage_path: &Path) -> Result<()> {
    match fs::symlink_metadata(storage_path) {
        Ok(_) => Err(CryptainerError::AlreadyExists(format!(
            "{}",
            storage_path.display()
        ))),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}

/// Fails with `NotFound` unless `storage_path` exists.
pub(crate) fn ensure_storage_present(storage_path: &Path) -> Result<()> {
    if storage_path.exists() {
        return Ok(());
    }
    Err(CryptainerError::NotFound(format!(
        "volume storage {}",
        storage_path.display()
    )))
}

/// Prepares the mount directory and reports whether this call created it.
///
/// An existing empty directory is reused; a non-empty one is rejected so a
/// mount never shadows unrelated content.
pub(crate) fn prepare_mount_dir(mount_path: &Path) -> Result<bool> {
    match fs::symlink_metadata(mount_path) {
        Ok(metadata) if metadata.is_dir() => {
            if is_empty_dir(mount_path)? {
                Ok(false)
            } else {
                Err(CryptainerError::AlreadyExists(format!(
                    "mount directory {} is not empty",
                    mount_path.display()
                )))
            }
        }
        Ok(_) => Err(CryptainerError::AlreadyExists(format!(
            "mount path {} is not a directory",
            mount_path.display()
        ))),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(mount_path)?;
            Ok(true)
        }
        Err(error) => Err(error.into()),
    }
}

/// Removes a mount directory created by a mount attempt that then failed.
pub(crate) fn discard_created_mount_dir(mount_path: &Path, created: bool) {
    if !created {
        return;
    }
    if let Err(error) = fs::remove_dir(mount_path) {
        tracing::warn!(
            path = %mount_path.display(),
            %error,
            "failed to remove mount directory after failed mount"
        );
    }
}

/// Fails with `NotFound` unless `mount_path` exists.
pub(crate) fn ensure_mount_dir_present(mount_path: &Path) -> Result<()> {
    if mount_path.exists() {
        return Ok(());
    }
    Err(CryptainerError::NotFound(format!(
        "mount directory {}",
        mount_path.display()
    )))
}

/// Removes the mount directory after a successful unmount.
pub(crate) fn remove_mount_dir(mount_path: &Path) -> Result<()> {
    fs::remove_dir(mount_path).map_err(|source| CryptainerError::CleanupFailure {
        path: mount_path.to_path_buf(),
        source,
    })
}
