use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::{
    audit::{AuditEvent, AuditLog},
    error::{CryptainerError, Result},
    fs_secure::is_empty_dir,
};

use super::mount_table::MountSnapshot;

/// Answer from a cleanup decision provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupDecision {
    /// Leave the directory in place.
    Keep,
    /// Remove the directory.
    Delete,
}

/// Decides whether an empty, unmounted mount directory should be removed.
pub trait CleanupDecider {
    /// Called once per candidate directory.
    fn decide(&mut self, path: &Path) -> CleanupDecision;
}

/// Decider that removes every candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl CleanupDecider for AutoApprove {
    fn decide(&mut self, _path: &Path) -> CleanupDecision {
        CleanupDecision::Delete
    }
}

/// Outcome of one sweep over the mount root.
#[derive(Debug, Default, Serialize)]
pub struct CleanupReport {
    /// Directories removed.
    pub removed: Vec<PathBuf>,
    /// Candidates the decider chose to keep.
    pub kept: Vec<PathBuf>,
    /// Directories skipped because they are live mounts.
    pub skipped_mounted: Vec<PathBuf>,
    /// Directories skipped because they still hold entries.
    pub skipped_non_empty: Vec<PathBuf>,
    /// Candidates that could not be inspected or removed.
    pub failed: Vec<FailedRemoval>,
    /// Set when the sweep aborted on a degraded mount snapshot.
    pub aborted: Option<String>,
}

impl CleanupReport {
    /// True when the sweep ran to completion without per-entry failures.
    pub fn is_complete(&self) -> bool {
        self.aborted.is_none() && self.failed.is_empty()
    }
}

/// One candidate directory the sweep could not handle.
#[derive(Debug, Serialize)]
pub struct FailedRemoval {
    /// Directory that was left in place.
    pub path: PathBuf,
    /// Rendered failure.
    pub error: String,
}

/// Offers every empty, unmounted directory directly under `mount_root` to
/// `decider` and removes the ones it approves.
///
/// Non-directories are ignored and non-empty directories are never removed.
/// A degraded snapshot aborts before any directory is examined. A directory
/// that cannot be inspected or removed is recorded in `failed` and the sweep
/// moves on.
pub fn sweep_mount_root(
    mount_root: &Path,
    snapshot: &MountSnapshot,
    decider: &mut dyn CleanupDecider,
    audit_log: &AuditLog,
) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();
    if let Some(warning) = snapshot.warning() {
        tracing::warn!(%warning, "mount table unavailable; cleanup skipped");
        report.aborted = Some(warning.to_owned());
        return Ok(report);
    }

    let mut candidates = Vec::new();
    for entry in fs::read_dir(mount_root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            candidates.push(entry.path());
        }
    }
    candidates.sort();

    for path in candidates {
        if snapshot.is_mounted(&path).0 {
            report.skipped_mounted.push(path);
            continue;
        }
        match is_empty_dir(&path) {
            Ok(true) => {}
            Ok(false) => {
                report.skipped_non_empty.push(path);
                continue;
            }
            Err(error) => {
                record_failure(&mut report, path, error.into());
                continue;
            }
        }
        match decider.decide(&path) {
            CleanupDecision::Keep => report.kept.push(path),
            CleanupDecision::Delete => match fs::remove_dir(&path) {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "removed residual mount directory");
                    audit_log.record(AuditEvent::MountDirectoryRemoved { path: path.clone() });
                    report.removed.push(path);
                }
                Err(source) => {
                    let error = CryptainerError::CleanupFailure {
                        path: path.clone(),
                        source,
                    };
                    record_failure(&mut report, path, error);
                }
            },
        }
    }
    Ok(report)
}

fn record_failure(report: &mut CleanupReport, path: PathBuf, error: CryptainerError) {
    tracing::warn!(path = %path.display(), %error, "cleanup left directory in place");
    report.failed.push(FailedRemoval {
        path,
        error: error.to_string(),
    });
}
