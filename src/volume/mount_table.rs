use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    process::Command,
};

use serde::Serialize;

use super::command::retry_exec_busy;

/// Live mount status of one volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "mount_path", rename_all = "snake_case")]
pub enum MountStatus {
    /// Mounted at the given path.
    Mounted(PathBuf),
    /// Not present in the mount table.
    NotMounted,
    /// Mount table could not be queried.
    Unknown,
}

impl MountStatus {
    /// Returns true only for a confirmed live mount.
    pub fn is_mounted(&self) -> bool {
        matches!(self, MountStatus::Mounted(_))
    }

    /// Short label for console output.
    pub fn label(&self) -> &'static str {
        match self {
            MountStatus::Mounted(_) => "yes",
            MountStatus::NotMounted => "no",
            MountStatus::Unknown => "unknown",
        }
    }
}

/// Point-in-time view of the OS mount table.
///
/// A snapshot is taken once per operation and never reused across operations.
#[derive(Debug, Clone, Default)]
pub struct MountSnapshot {
    tokens: BTreeSet<String>,
    warning: Option<String>,
}

impl MountSnapshot {
    /// Builds a snapshot from raw `mount` output.
    pub fn from_output(output: &str) -> Self {
        let tokens = output
            .split_whitespace()
            .map(|token| normalize(token).to_owned())
            .collect();
        Self {
            tokens,
            warning: None,
        }
    }

    /// Builds an empty snapshot that records why the table was unavailable.
    pub fn degraded(warning: impl Into<String>) -> Self {
        Self {
            tokens: BTreeSet::new(),
            warning: Some(warning.into()),
        }
    }

    /// Returns true when the mount table could not be read.
    pub fn is_degraded(&self) -> bool {
        self.warning.is_some()
    }

    /// Reason the snapshot is degraded, if it is.
    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    /// Exact token lookup; `/mnt/vault2` never matches `/mnt/vault`.
    ///
    /// Returns whether the path is mounted and, if so, the path as matched.
    pub fn is_mounted(&self, mount_path: &Path) -> (bool, Option<PathBuf>) {
        let Some(wanted) = mount_path.to_str() else {
            return (false, None);
        };
        let wanted = normalize(wanted);
        if self.tokens.contains(wanted) {
            (true, Some(PathBuf::from(wanted)))
        } else {
            (false, None)
        }
    }

    /// Tri-state status that reports `Unknown` for a degraded snapshot.
    pub fn status(&self, mount_path: &Path) -> MountStatus {
        if self.is_degraded() {
            return MountStatus::Unknown;
        }
        match self.is_mounted(mount_path) {
            (true, Some(path)) => MountStatus::Mounted(path),
            _ => MountStatus::NotMounted,
        }
    }
}

fn normalize(token: &str) -> &str {
    let trimmed = token.trim_end_matches('/');
    if trimmed.is_empty() {
        token
    } else {
        trimmed
    }
}

/// Source of mount snapshots.
pub trait MountTable: Send + Sync {
    /// Captures the current mount table; never fails, degrades instead.
    fn refresh(&self) -> MountSnapshot;
}

/// Mount table backed by the `mount` command.
///
/// Output is matched on whitespace-delimited tokens, so a mount path that
/// contains whitespace is never reported as mounted.
#[derive(Debug, Clone)]
pub struct SystemMountTable {
    mount_binary: String,
}

impl SystemMountTable {
    /// Uses `mount` from `PATH`.
    pub fn new() -> Self {
        Self::with_binary("mount")
    }

    /// Uses a custom binary.
    pub fn with_binary(mount_binary: impl Into<String>) -> Self {
        Self {
            mount_binary: mount_binary.into(),
        }
    }
}

impl Default for SystemMountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTable for SystemMountTable {
    fn refresh(&self) -> MountSnapshot {
        let output = retry_exec_busy(|| Command::new(&self.mount_binary).output());
        match output {
            Ok(output) if output.status.success() => {
                MountSnapshot::from_output(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
                let warning = format!("`{}` failed: {stderr}", self.mount_binary);
                tracing::warn!(%warning, "mount table unavailable");
                MountSnapshot::degraded(warning)
            }
            Err(error) => {
                let warning = format!("could not run `{}`: {error}", self.mount_binary);
                tracing::warn!(%warning, "mount table unavailable");
                MountSnapshot::degraded(warning)
            }
        }
    }
}
