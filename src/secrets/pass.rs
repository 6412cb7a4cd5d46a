use std::{
    io::Write,
    process::{Command, Stdio},
};

use zeroize::Zeroizing;

use crate::{
    error::{CryptainerError, Result},
    types::{SecretValue, VolumeName},
};

use super::SecretStore;

/// Default entry prefix inside the password store.
pub const DEFAULT_STORE_PREFIX: &str = "cryptainer";

/// Result type produced by pass command execution.
#[derive(Clone)]
pub struct PassOutput {
    /// Exit status code.
    pub status_code: i32,
    /// Standard output; may hold secret material.
    pub stdout: Zeroizing<Vec<u8>>,
    /// Standard error.
    pub stderr: String,
}

/// Executor abstraction for `pass` commands.
pub trait PassExecutor: Send + Sync {
    /// Executes pass with command-line arguments and optional stdin payload.
    fn exec(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<PassOutput>;
}

/// Real executor that calls the system `pass` binary.
pub struct SystemPassExecutor {
    binary: String,
}

impl SystemPassExecutor {
    /// Creates a system executor using the `pass` binary.
    pub fn new() -> Self {
        Self::with_binary("pass")
    }

    /// Creates a system executor with a custom binary path.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for SystemPassExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PassExecutor for SystemPassExecutor {
    fn exec(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<PassOutput> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| {
                CryptainerError::SecretSourceFailure(format!("could not run {}: {error}", self.binary))
            })?;
        if let (Some(payload), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(payload)?;
        }
        let output = child.wait_with_output()?;
        Ok(PassOutput {
            status_code: output.status.code().unwrap_or(1),
            stdout: Zeroizing::new(output.stdout),
            stderr: String::from_utf8(output.stderr)?,
        })
    }
}

/// Secret store over `pass`, one entry per volume at `<prefix>/<name>`.
///
/// Entries follow the `pass` multiline convention: the secret on the first
/// line and `username: <user>` below it.
pub struct PassSecretStore {
    executor: Box<dyn PassExecutor>,
    prefix: String,
}

impl PassSecretStore {
    /// Creates a store with the system executor.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_executor(Box::new(SystemPassExecutor::new()), prefix)
    }

    /// Creates a store with a custom executor, useful for tests.
    pub fn with_executor(executor: Box<dyn PassExecutor>, prefix: impl Into<String>) -> Self {
        Self {
            executor,
            prefix: prefix.into(),
        }
    }

    /// Store entry path for `name`.
    pub fn entry_name(&self, name: &VolumeName) -> String {
        format!("{}/{}", self.prefix.trim_end_matches('/'), name)
    }
}

impl SecretStore for PassSecretStore {
    fn lookup(&self, name: &VolumeName) -> Result<Option<SecretValue>> {
        let entry = self.entry_name(name);
        let output = self.executor.exec(&["show", &entry], None)?;
        if output.status_code == 0 {
            let first_line = output
                .stdout
                .split(|byte| *byte == b'\n')
                .next()
                .unwrap_or_default()
                .to_vec();
            if first_line.is_empty() {
                return Err(CryptainerError::SecretSourceFailure(format!(
                    "store entry `{entry}` is empty"
                )));
            }
            return Ok(Some(SecretValue::new(first_line)));
        }

        if output.stderr.contains("is not in the password store") {
            return Ok(None);
        }
        Err(CryptainerError::SecretSourceFailure(format!(
            "pass show {entry}: {}",
            output.stderr.trim()
        )))
    }

    fn upsert(&self, name: &VolumeName, username: &str, secret: &SecretValue) -> Result<()> {
        let entry = self.entry_name(name);
        let mut payload = Zeroizing::new(secret.expose(<[u8]>::to_vec));
        payload.extend_from_slice(format!("\nusername: {username}\n").as_bytes());

        let output = self.executor.exec(
            &["insert", "--multiline", "--force", &entry],
            Some(payload.as_slice()),
        )?;
        if output.status_code == 0 {
            return Ok(());
        }
        Err(CryptainerError::SecretSourceFailure(format!(
            "pass insert {entry}: {}",
            output.stderr.trim()
        )))
    }
}
