use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::{
    error::{CryptainerError, Result},
    fs_secure::write_private_file_atomic,
    paths::VolumePaths,
    types::{BackendKind, VolumeName, VolumeType},
    volume::{gocryptfs::has_gocryptfs_marker, veracrypt::has_veracrypt_marker},
};

const REGISTRY_VERSION: u32 = 1;

/// One persisted registry record.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RegistryRecord {
    /// Backend recorded at creation or last refresh.
    #[serde(rename = "type")]
    pub kind: BackendKind,
    /// Storage path at registration time; informational only.
    pub path: PathBuf,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct RegistryData {
    version: u32,
    volumes: BTreeMap<VolumeName, RegistryRecord>,
    integrity_tag: String,
}

impl RegistryData {
    fn new() -> Self {
        Self {
            version: REGISTRY_VERSION,
            volumes: BTreeMap::new(),
            integrity_tag: String::new(),
        }
    }
}

/// Registry record and structural detection for one name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeResolution {
    /// Backend in the registry, if any.
    pub recorded: Option<BackendKind>,
    /// Backend found by probing the storage path.
    pub detected: VolumeType,
}

impl TypeResolution {
    /// Type used for dispatch and display.
    ///
    /// A known detected type wins over the record; an undetectable storage
    /// path falls back to the record.
    pub fn effective(&self) -> VolumeType {
        match (self.detected.backend(), self.recorded) {
            (Some(detected), _) => detected.into(),
            (None, Some(recorded)) => recorded.into(),
            (None, None) => VolumeType::Unknown,
        }
    }

    /// Returns true when the record disagrees with a known detected type.
    pub fn is_stale(&self) -> bool {
        matches!(
            (self.recorded, self.detected.backend()),
            (Some(recorded), Some(detected)) if recorded != detected
        )
    }
}

/// Probes `storage_path` for backend markers: gocryptfs first, then veracrypt.
pub fn detect_storage_type(storage_path: &Path) -> VolumeType {
    if has_gocryptfs_marker(storage_path) {
        VolumeType::Gocryptfs
    } else if has_veracrypt_marker(storage_path) {
        VolumeType::Veracrypt
    } else {
        VolumeType::Unknown
    }
}

/// Durable map of volume names to backend types.
pub struct VolumeRegistry {
    path: PathBuf,
    volumes_root: PathBuf,
    data: RegistryData,
}

impl VolumeRegistry {
    /// Loads or initializes the registry for `paths`.
    ///
    /// An integrity mismatch is logged and the cache stays usable.
    pub fn load_or_create(paths: &VolumePaths) -> Result<Self> {
        let file_path = paths.registry_file();
        let existing = file_path.exists();
        let data: RegistryData = if existing {
            serde_json::from_slice(&fs::read(&file_path)?)?
        } else {
            RegistryData::new()
        };
        if data.version != REGISTRY_VERSION {
            return Err(CryptainerError::InvalidInput(format!(
                "unsupported registry version {} in {}",
                data.version,
                file_path.display()
            )));
        }
        let mut registry = Self {
            path: file_path,
            volumes_root: paths.volumes_root().to_path_buf(),
            data,
        };
        if !existing {
            registry.data.integrity_tag = registry.integrity_tag();
        } else if !registry.verify_integrity() {
            tracing::warn!(
                path = %registry.path.display(),
                "volume registry integrity tag mismatch"
            );
        }
        Ok(registry)
    }

    /// Registry file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record for `name`, if any.
    pub fn record(&self, name: &VolumeName) -> Option<&RegistryRecord> {
        self.data.volumes.get(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &VolumeName> {
        self.data.volumes.keys()
    }

    /// Returns true when at least one volume is registered.
    pub fn has_entries(&self) -> bool {
        !self.data.volumes.is_empty()
    }

    /// Probes the storage path of `name`.
    pub fn detect_type(&self, name: &VolumeName) -> VolumeType {
        detect_storage_type(&self.volumes_root.join(name.as_str()))
    }

    /// Combines the record and detection for `name`.
    pub fn resolve(&self, name: &VolumeName) -> TypeResolution {
        TypeResolution {
            recorded: self.record(name).map(|record| record.kind),
            detected: self.detect_type(name),
        }
    }

    /// Resolved type for `name`; total and deterministic.
    pub fn lookup_type(&self, name: &VolumeName) -> VolumeType {
        self.resolve(name).effective()
    }

    /// Inserts or replaces the record for `name` and persists.
    ///
    /// On a persist failure the in-memory map is restored.
    pub fn register(&mut self, name: &VolumeName, kind: BackendKind) -> Result<()> {
        let record = RegistryRecord {
            kind,
            path: self.volumes_root.join(name.as_str()),
            registered_at: Utc::now(),
        };
        let previous = self.data.volumes.insert(name.clone(), record);
        if let Err(error) = self.persist() {
            match previous {
                Some(previous) => {
                    self.data.volumes.insert(name.clone(), previous);
                }
                None => {
                    self.data.volumes.remove(name);
                }
            }
            self.data.integrity_tag = self.integrity_tag();
            return Err(error);
        }
        Ok(())
    }

    /// Validates the stored integrity tag.
    pub fn verify_integrity(&self) -> bool {
        self.integrity_tag() == self.data.integrity_tag
    }

    /// Rewrites the registry file wholesale.
    pub fn persist(&mut self) -> Result<()> {
        self.data.integrity_tag = self.integrity_tag();
        write_private_file_atomic(&self.path, &serde_json::to_vec_pretty(&self.data)?)
    }

    fn integrity_tag(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, record) in &self.data.volumes {
            hasher.update(name.as_str().as_bytes());
            hasher.update([0]);
            hasher.update(record.kind.as_str().as_bytes());
            hasher.update([0]);
            hasher.update(record.path.to_string_lossy().as_bytes());
            hasher.update([0]);
        }
        format!("{:x}", hasher.finalize())
    }
}
