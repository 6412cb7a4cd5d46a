use std::{fmt, str::FromStr};

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

use crate::error::{CryptainerError, ValidationError};

const MAX_VOLUME_NAME_LENGTH: usize = 128;

/// Validated volume name.
///
/// A name is also the literal entry name under the volumes root and the mount
/// root, so it must never contain separators or traversal sequences.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct VolumeName(String);

impl VolumeName {
    /// Creates a validated volume name.
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > MAX_VOLUME_NAME_LENGTH {
            return Err(ValidationError::InvalidName);
        }
        if name.contains("..") || name.contains('/') || name.contains('\\') {
            return Err(ValidationError::PathTraversal);
        }
        if name.starts_with('.') {
            return Err(ValidationError::PathTraversal);
        }
        if !name
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || "_.-".contains(character))
        {
            return Err(ValidationError::InvalidCharacter);
        }
        Ok(Self(name.to_owned()))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolumeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for VolumeName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<VolumeName> for String {
    fn from(value: VolumeName) -> Self {
        value.0
    }
}

/// Supported encryption backends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Per-file encrypting FUSE filesystem.
    Gocryptfs,
    /// Encrypted container file.
    Veracrypt,
}

impl BackendKind {
    /// All supported backends, in detection order.
    pub const ALL: [BackendKind; 2] = [BackendKind::Gocryptfs, BackendKind::Veracrypt];

    /// Stable lowercase tag.
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Gocryptfs => "gocryptfs",
            BackendKind::Veracrypt => "veracrypt",
        }
    }

    /// Returns true when the backend accepts a container size on create.
    pub fn accepts_size(self) -> bool {
        matches!(self, BackendKind::Veracrypt)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = CryptainerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "gocryptfs" => Ok(BackendKind::Gocryptfs),
            "veracrypt" => Ok(BackendKind::Veracrypt),
            other => Err(CryptainerError::InvalidInput(format!(
                "unsupported volume type `{other}` (expected gocryptfs or veracrypt)"
            ))),
        }
    }
}

/// Resolved type of a volume entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VolumeType {
    /// Volume handled by gocryptfs.
    Gocryptfs,
    /// Volume handled by VeraCrypt.
    Veracrypt,
    /// No registry record and no structural marker.
    Unknown,
}

impl VolumeType {
    /// Returns the owning backend, if any.
    pub fn backend(self) -> Option<BackendKind> {
        match self {
            VolumeType::Gocryptfs => Some(BackendKind::Gocryptfs),
            VolumeType::Veracrypt => Some(BackendKind::Veracrypt),
            VolumeType::Unknown => None,
        }
    }

    /// Returns true when no backend owns the volume.
    pub fn is_unknown(self) -> bool {
        self == VolumeType::Unknown
    }
}

impl From<BackendKind> for VolumeType {
    fn from(value: BackendKind) -> Self {
        match value {
            BackendKind::Gocryptfs => VolumeType::Gocryptfs,
            BackendKind::Veracrypt => VolumeType::Veracrypt,
        }
    }
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.backend() {
            Some(kind) => f.write_str(kind.as_str()),
            None => f.write_str("unknown"),
        }
    }
}

/// Volume password wrapper that avoids accidental logging and zeroizes on drop.
pub struct SecretValue {
    inner: Secret<Vec<u8>>,
}

impl SecretValue {
    /// Constructs a secret value from bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: Secret::new(bytes),
        }
    }

    /// Constructs a secret value from a string.
    pub fn from_string(value: String) -> Self {
        Self::new(value.into_bytes())
    }

    /// Exposes the secret bytes to a closure.
    pub fn expose<F, R>(&self, function: F) -> R
    where
        F: FnOnce(&[u8]) -> R,
    {
        function(self.inner.expose_secret())
    }

    /// Returns true when the secret holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.expose(<[u8]>::is_empty)
    }
}

impl Clone for SecretValue {
    fn clone(&self) -> Self {
        Self::new(self.expose(<[u8]>::to_vec))
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue([REDACTED])")
    }
}
