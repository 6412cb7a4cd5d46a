use std::{io, path::PathBuf};

use thiserror::Error;

/// Validation failures for volume names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Volume name is empty or too long.
    #[error("invalid name: must be 1..=128 characters")]
    InvalidName,
    /// Volume name would escape the volumes or mount root.
    #[error("invalid name: path separators and traversal are not allowed")]
    PathTraversal,
    /// Volume name contains unsupported characters.
    #[error("invalid character in name: use only A-Za-z0-9._-")]
    InvalidCharacter,
}

/// Top-level application errors.
#[derive(Debug, Error)]
pub enum CryptainerError {
    /// Resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Target name or path is already taken.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// Volume is not currently mounted.
    #[error("volume `{0}` is not mounted")]
    NotMounted(String),
    /// Volume is already mounted.
    #[error("volume `{name}` is already mounted at {}", .mount_path.display())]
    AlreadyMounted {
        /// Volume name.
        name: String,
        /// Live mount location.
        mount_path: PathBuf,
    },
    /// Volume type could not be determined.
    #[error("volume type for `{0}` is unknown")]
    TypeUnknown(String),
    /// External encryption tool exited unsuccessfully.
    #[error("{tool} failed: {diagnostic}")]
    BackendFailure {
        /// Tool binary that failed.
        tool: String,
        /// Captured diagnostic output.
        diagnostic: String,
    },
    /// Mount directory could not be removed after an operation.
    #[error("failed to remove mount directory {}: {source}", .path.display())]
    CleanupFailure {
        /// Directory that could not be removed.
        path: PathBuf,
        /// Underlying filesystem error.
        source: io::Error,
    },
    /// Secret could not be obtained from the selected source.
    #[error("secret source failed: {0}")]
    SecretSourceFailure(String),
    /// Input was syntactically valid but semantically unsupported.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation failed for one named volume.
    #[error("volume `{name}`: {source}")]
    Volume {
        /// Volume name.
        name: String,
        /// Underlying failure.
        #[source]
        source: Box<CryptainerError>,
    },
    /// Validation failure.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// JSON serialization error.
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    /// UTF-8 conversion error.
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl CryptainerError {
    /// Attaches a volume name to this error unless one is already present.
    pub fn for_volume(self, name: &str) -> Self {
        match self {
            Self::Volume { .. } => self,
            other => Self::Volume {
                name: name.to_owned(),
                source: Box::new(other),
            },
        }
    }

    /// Returns the innermost error, skipping volume-name wrappers.
    pub fn root_cause(&self) -> &CryptainerError {
        match self {
            Self::Volume { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// A typed result used across the crate.
pub type Result<T> = std::result::Result<T, CryptainerError>;

/// Generic invalid-input error.
pub const ERROR_CODE_INVALID_INPUT: &str = "E100";
/// Volume name validation error.
pub const ERROR_CODE_VOLUME_NAME: &str = "E101";
/// Missing runtime dependency or binary.
pub const ERROR_CODE_MISSING_RUNTIME: &str = "E103";
/// Resource lookup failed.
pub const ERROR_CODE_NOT_FOUND: &str = "E300";
/// Resource already exists.
pub const ERROR_CODE_ALREADY_EXISTS: &str = "E301";
/// Volume is not mounted.
pub const ERROR_CODE_NOT_MOUNTED: &str = "E302";
/// Volume is already mounted.
pub const ERROR_CODE_ALREADY_MOUNTED: &str = "E303";
/// Volume type is unknown.
pub const ERROR_CODE_TYPE_UNKNOWN: &str = "E304";
/// External backend tool failed.
pub const ERROR_CODE_BACKEND: &str = "E400";
/// Mount directory removal failed.
pub const ERROR_CODE_CLEANUP: &str = "E401";
/// Secret prompt or store lookup failed.
pub const ERROR_CODE_SECRET_SOURCE: &str = "E402";
/// Filesystem or stream I/O failed.
pub const ERROR_CODE_IO: &str = "E900";
/// Internal serialization/encoding failure.
pub const ERROR_CODE_INTERNAL: &str = "E999";

const ERROR_EXPLANATION_E100: &str = r#"E100 invalid input

The command arguments are syntactically valid but semantically unsupported.

Common fixes:
  - Run `cryptainer help <command>` for exact argument usage.
  - `--size` applies to veracrypt volumes only (example: `--size 500M`).
  - veracrypt volume names must end in `.hc` (example: `archive.hc`).
  - Check `volumes_dir` and `mount_dir` in the config file."#;
const ERROR_EXPLANATION_E101: &str = r#"E101 invalid volume name

Volume names must be 1..=128 chars, must not start with `.`, and use only:
  A-Z a-z 0-9 . _ -

Examples:
  - Valid: `box`, `photos-2024`, `archive.hc`
  - Invalid: `../box`, `nested/box`, `.hidden`"#;
const ERROR_EXPLANATION_E103: &str = r#"E103 missing runtime dependency

The command requires a binary that was not found in PATH.

Recovery:
  - Install the missing binary (for example `gocryptfs`, `fusermount`, `veracrypt`, `pass`).
  - Verify PATH in the current shell/session.
  - Retry the command."#;
const ERROR_EXPLANATION_E300: &str = r#"E300 resource not found

The referenced volume, mount directory, or stored secret could not be located.

Recovery:
  cryptainer list --all"#;
const ERROR_EXPLANATION_E301: &str = r#"E301 resource already exists

A volume or directory with the same name is already present.
Names are unique across all volume types.

Recovery:
  - Choose a different name.
  - Inspect existing entries with `cryptainer list --all`."#;
const ERROR_EXPLANATION_E302: &str = r#"E302 volume not mounted

The volume is not currently mounted, so there is nothing to unmount.

Recovery:
  cryptainer list
  cryptainer cleanup"#;
const ERROR_EXPLANATION_E303: &str = r#"E303 volume already mounted

The volume is already mounted at its mount path.

Recovery:
  cryptainer umount <name>"#;
const ERROR_EXPLANATION_E304: &str = r#"E304 unknown volume type

The volume is not registered and its storage carries no gocryptfs or
veracrypt marker. No backend was invoked.

Recovery:
  - gocryptfs volumes are directories containing `gocryptfs.conf`.
  - veracrypt containers are files with the `.hc` extension.
  - Run `cryptainer verify` to inspect the registry."#;
const ERROR_EXPLANATION_E400: &str = r#"E400 backend tool failure

The external encryption tool exited unsuccessfully. Its diagnostic output is
included in the error message.

Recovery:
  - Check the password.
  - Run the tool manually to inspect its output."#;
const ERROR_EXPLANATION_E401: &str = r#"E401 mount directory cleanup failed

The unmount command succeeded but the mount directory could not be removed.
The volume may still be attached or the directory holds foreign files.

Recovery:
  mount | grep <mount_dir>
  cryptainer cleanup"#;
const ERROR_EXPLANATION_E402: &str = r#"E402 secret source failure

The password could not be read from the selected source. Sources are never
combined: a secret-store miss does not fall back to a prompt.

Recovery:
  - `pass show cryptainer/<name>` to check the stored entry.
  - Retry without `--use-store` to enter the password interactively."#;
const ERROR_EXPLANATION_E900: &str = r#"E900 I/O failure

Filesystem or stream operations failed.

Recovery:
  - Verify the volumes, mount, and config directories exist and are writable.
  - Check file permissions and available disk space."#;
const ERROR_EXPLANATION_E999: &str = r#"E999 internal runtime failure

An internal serialization or encoding error occurred.

Recovery:
  - Run `cryptainer verify` to check the registry file.
  - If it persists, collect command, inputs, and stderr for diagnosis."#;

const KNOWN_ERROR_CODES: [&str; 13] = [
    ERROR_CODE_INVALID_INPUT,
    ERROR_CODE_VOLUME_NAME,
    ERROR_CODE_MISSING_RUNTIME,
    ERROR_CODE_NOT_FOUND,
    ERROR_CODE_ALREADY_EXISTS,
    ERROR_CODE_NOT_MOUNTED,
    ERROR_CODE_ALREADY_MOUNTED,
    ERROR_CODE_TYPE_UNKNOWN,
    ERROR_CODE_BACKEND,
    ERROR_CODE_CLEANUP,
    ERROR_CODE_SECRET_SOURCE,
    ERROR_CODE_IO,
    ERROR_CODE_INTERNAL,
];

/// Returns the stable error code for a runtime error.
pub fn classify_error_code(error: &CryptainerError) -> &'static str {
    match error {
        CryptainerError::Volume { source, .. } => classify_error_code(source),
        CryptainerError::Validation(_) => ERROR_CODE_VOLUME_NAME,
        CryptainerError::InvalidInput(message) => classify_invalid_input_code(message),
        CryptainerError::NotFound(_) => ERROR_CODE_NOT_FOUND,
        CryptainerError::AlreadyExists(_) => ERROR_CODE_ALREADY_EXISTS,
        CryptainerError::NotMounted(_) => ERROR_CODE_NOT_MOUNTED,
        CryptainerError::AlreadyMounted { .. } => ERROR_CODE_ALREADY_MOUNTED,
        CryptainerError::TypeUnknown(_) => ERROR_CODE_TYPE_UNKNOWN,
        CryptainerError::BackendFailure { diagnostic, .. } => {
            if diagnostic.starts_with(MISSING_BINARY_PREFIX) {
                ERROR_CODE_MISSING_RUNTIME
            } else {
                ERROR_CODE_BACKEND
            }
        }
        CryptainerError::CleanupFailure { .. } => ERROR_CODE_CLEANUP,
        CryptainerError::SecretSourceFailure(_) => ERROR_CODE_SECRET_SOURCE,
        CryptainerError::Io(_) => ERROR_CODE_IO,
        CryptainerError::Serde(_) | CryptainerError::Utf8(_) => ERROR_CODE_INTERNAL,
    }
}

/// Prefix used in diagnostics when a tool binary is missing from PATH.
pub const MISSING_BINARY_PREFIX: &str = "required binary not found";

fn classify_invalid_input_code(message: &str) -> &'static str {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains(MISSING_BINARY_PREFIX) {
        return ERROR_CODE_MISSING_RUNTIME;
    }
    if lowered.contains("not found") {
        return ERROR_CODE_NOT_FOUND;
    }
    ERROR_CODE_INVALID_INPUT
}

/// Normalizes a user-provided error code for lookups.
pub fn normalize_error_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Returns an explanation block for a known error code.
pub fn explain_error_code(raw: &str) -> Option<&'static str> {
    let normalized = normalize_error_code(raw);
    match normalized.as_str() {
        ERROR_CODE_INVALID_INPUT => Some(ERROR_EXPLANATION_E100),
        ERROR_CODE_VOLUME_NAME => Some(ERROR_EXPLANATION_E101),
        ERROR_CODE_MISSING_RUNTIME => Some(ERROR_EXPLANATION_E103),
        ERROR_CODE_NOT_FOUND => Some(ERROR_EXPLANATION_E300),
        ERROR_CODE_ALREADY_EXISTS => Some(ERROR_EXPLANATION_E301),
        ERROR_CODE_NOT_MOUNTED => Some(ERROR_EXPLANATION_E302),
        ERROR_CODE_ALREADY_MOUNTED => Some(ERROR_EXPLANATION_E303),
        ERROR_CODE_TYPE_UNKNOWN => Some(ERROR_EXPLANATION_E304),
        ERROR_CODE_BACKEND => Some(ERROR_EXPLANATION_E400),
        ERROR_CODE_CLEANUP => Some(ERROR_EXPLANATION_E401),
        ERROR_CODE_SECRET_SOURCE => Some(ERROR_EXPLANATION_E402),
        ERROR_CODE_IO => Some(ERROR_EXPLANATION_E900),
        ERROR_CODE_INTERNAL => Some(ERROR_EXPLANATION_E999),
        _ => None,
    }
}

/// Stable list of explainable error codes.
pub fn known_error_codes() -> &'static [&'static str] {
    &KNOWN_ERROR_CODES
}
