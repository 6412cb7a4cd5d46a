//! Volume lifecycle across gocryptfs and VeraCrypt backends.

/// Backend capability contract and shared mount-directory handling.
pub mod backend;
/// Residual mount directory sweep.
pub mod cleanup;
mod command;
/// Lifecycle controller.
pub mod controller;
/// gocryptfs adapter.
pub mod gocryptfs;
/// Live mount table oracle.
pub mod mount_table;
/// VeraCrypt adapter.
pub mod veracrypt;

pub use backend::{CreateRequest, MountRequest, VolumeBackend};
pub use cleanup::{AutoApprove, CleanupDecider, CleanupDecision, CleanupReport, FailedRemoval};
pub use controller::{
    Backends, CreateOptions, CreateOutcome, MountOutcome, StepOutcome, UnmountOutcome,
    VerifyReport, VolumeController, VolumeEntry, VolumeListing,
};
pub use mount_table::{MountSnapshot, MountStatus, MountTable, SystemMountTable};
