use std::path::{Path, PathBuf};

use crate::types::VolumeName;

/// Canonical path layout for volumes, mounts, and metadata files.
#[derive(Debug, Clone)]
pub struct VolumePaths {
    volumes_root: PathBuf,
    mount_root: PathBuf,
    config_dir: PathBuf,
}

impl VolumePaths {
    /// Creates a layout from resolved absolute directories.
    pub fn new(
        volumes_root: impl AsRef<Path>,
        mount_root: impl AsRef<Path>,
        config_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            volumes_root: volumes_root.as_ref().to_path_buf(),
            mount_root: mount_root.as_ref().to_path_buf(),
            config_dir: config_dir.as_ref().to_path_buf(),
        }
    }

    /// Directory holding encrypted volume artifacts.
    pub fn volumes_root(&self) -> &Path {
        &self.volumes_root
    }

    /// Directory holding one mount point per mounted volume.
    pub fn mount_root(&self) -> &Path {
        &self.mount_root
    }

    /// Metadata directory.
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Encrypted artifact location for `name`.
    pub fn storage_path(&self, name: &VolumeName) -> PathBuf {
        self.volumes_root.join(name.as_str())
    }

    /// Mount point for `name`.
    pub fn mount_path(&self, name: &VolumeName) -> PathBuf {
        self.mount_root.join(name.as_str())
    }

    /// Volume registry JSON file.
    pub fn registry_file(&self) -> PathBuf {
        self.config_dir.join("volumes.json")
    }

    /// Audit log JSONL file.
    pub fn audit_file(&self) -> PathBuf {
        self.config_dir.join("audit.jsonl")
    }
}
