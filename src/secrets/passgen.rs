use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};

use crate::{
    error::{CryptainerError, Result},
    types::SecretValue,
};

/// Length used when none is configured.
pub const DEFAULT_PASSWORD_LENGTH: usize = 30;
/// Shortest accepted password length.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Alphanumeric password generator backed by the OS RNG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordGenerator {
    length: usize,
}

impl PasswordGenerator {
    /// Creates a generator; lengths below the minimum are rejected.
    pub fn new(length: usize) -> Result<Self> {
        if length < MIN_PASSWORD_LENGTH {
            return Err(CryptainerError::InvalidInput(format!(
                "password length must be at least {MIN_PASSWORD_LENGTH}, got {length}"
            )));
        }
        Ok(Self { length })
    }

    /// Configured length.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Produces one fresh password.
    pub fn generate(&self) -> SecretValue {
        let bytes = OsRng
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .collect::<Vec<u8>>();
        SecretValue::new(bytes)
    }
}

impl Default for PasswordGenerator {
    fn default() -> Self {
        Self {
            length: DEFAULT_PASSWORD_LENGTH,
        }
    }
}
