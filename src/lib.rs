#![deny(missing_docs)]
//! Cryptainer manages the lifecycle of gocryptfs and VeraCrypt encrypted volumes.

/// Append-only audit log.
pub mod audit;
/// Command-line interface.
pub mod cli;
/// Config file parsing and path resolution.
pub mod config;
/// Error types.
pub mod error;
/// Secure filesystem helpers.
pub mod fs_secure;
/// Volume and mount root layout.
pub mod paths;
/// Volume type registry.
pub mod registry;
/// Secret stores, prompts and password generation.
pub mod secrets;
/// Shared types.
pub mod types;
/// Encrypted volume backends and lifecycle controller.
pub mod volume;
