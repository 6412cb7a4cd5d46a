use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    fs_secure::{create_private_file_if_missing, set_permissions, PRIVATE_FILE_MODE},
    types::{BackendKind, VolumeName},
};

/// Audit events emitted by the lifecycle controller.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Volume was created and registered.
    VolumeCreated {
        /// Volume name.
        volume: VolumeName,
        /// Owning backend.
        backend: BackendKind,
    },
    /// Volume was mounted.
    VolumeMounted {
        /// Volume name.
        volume: VolumeName,
        /// Owning backend.
        backend: BackendKind,
        /// Mount location.
        mount_path: PathBuf,
    },
    /// Volume was unmounted and its mount directory removed.
    VolumeUnmounted {
        /// Volume name.
        volume: VolumeName,
        /// Owning backend.
        backend: BackendKind,
    },
    /// Residual mount directory was removed by the cleanup sweep.
    MountDirectoryRemoved {
        /// Removed directory.
        path: PathBuf,
    },
    /// Registry record was rewritten to match structural detection.
    RegistryRefreshed {
        /// Volume name.
        volume: VolumeName,
        /// Previously recorded backend.
        previous: Option<BackendKind>,
        /// Detected backend.
        detected: BackendKind,
    },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct AuditLine {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: AuditEvent,
}

/// JSONL append-only audit log writer.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Creates a new audit log at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let file_path = path.as_ref().to_path_buf();
        create_private_file_if_missing(&file_path, b"")?;
        set_permissions(&file_path, PRIVATE_FILE_MODE)?;
        Ok(Self { path: file_path })
    }

    /// Appends one event as a JSON line.
    pub fn log(&self, event: AuditEvent) -> Result<()> {
        let line = AuditLine {
            timestamp: Utc::now(),
            event,
        };

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        serde_json::to_writer(&mut file, &line)?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Appends one event, downgrading a write failure to a warning.
    ///
    /// Used after an external operation already succeeded: the audit trail must
    /// not turn a completed mount or unmount into a reported failure.
    pub fn record(&self, event: AuditEvent) {
        if let Err(error) = self.log(event) {
            tracing::warn!(path = %self.path.display(), %error, "failed to append audit event");
        }
    }

    /// Reads every event in file order.
    pub fn read_all(&self) -> Result<Vec<(DateTime<Utc>, AuditEvent)>> {
        let raw = std::fs::read_to_string(&self.path)?;
        let mut events = Vec::new();
        for line in raw.lines().filter(|line| !line.trim().is_empty()) {
            let parsed: AuditLine = serde_json::from_str(line)?;
            events.push((parsed.timestamp, parsed.event));
        }
        Ok(events)
    }

    /// Returns the audit file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
