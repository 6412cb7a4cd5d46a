use std::{
    io::{self, BufRead, Read, Write},
    path::Path,
};

use zeroize::Zeroizing;

use crate::{
    error::{CryptainerError, Result},
    secrets::SecretPrompt,
    types::{SecretValue, VolumeName},
    volume::{CleanupDecider, CleanupDecision},
};

/// Reads a password from stdin, trimming trailing CR/LF.
pub(crate) fn read_secret_stdin() -> Result<SecretValue> {
    let mut bytes = Zeroizing::new(Vec::new());
    io::stdin().read_to_end(&mut bytes)?;
    while matches!(bytes.last().copied(), Some(b'\n' | b'\r')) {
        bytes.pop();
    }
    if bytes.is_empty() {
        return Err(CryptainerError::InvalidInput(
            "stdin password is empty".to_owned(),
        ));
    }
    Ok(SecretValue::new(bytes.to_vec()))
}

/// No-echo terminal prompt.
pub(crate) struct ConsolePrompt;

impl SecretPrompt for ConsolePrompt {
    fn prompt_secret(&self, name: &VolumeName, confirm: bool) -> Result<SecretValue> {
        let first = Zeroizing::new(read_password(&format!("Password for {name}: "))?);
        if first.is_empty() {
            return Err(CryptainerError::SecretSourceFailure(
                "empty password entered".to_owned(),
            ));
        }
        if confirm {
            let second = Zeroizing::new(read_password("Repeat password: ")?);
            if *first != *second {
                return Err(CryptainerError::SecretSourceFailure(
                    "passwords do not match".to_owned(),
                ));
            }
        }
        Ok(SecretValue::new(first.as_bytes().to_vec()))
    }
}

fn read_password(prompt: &str) -> Result<String> {
    rpassword::prompt_password(prompt)
        .map_err(|error| CryptainerError::SecretSourceFailure(format!("password prompt failed: {error}")))
}

/// Asks on the terminal before removing each directory; anything but yes keeps it.
pub(crate) struct ConsoleCleanupDecider;

impl CleanupDecider for ConsoleCleanupDecider {
    fn decide(&mut self, path: &Path) -> CleanupDecision {
        if !atty::is(atty::Stream::Stdin) {
            return CleanupDecision::Keep;
        }
        let mut stderr = io::stderr();
        let _ = write!(stderr, "Remove empty directory {}? [y/N] ", path.display());
        let _ = stderr.flush();

        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return CleanupDecision::Keep;
        }
        parse_confirmation(&answer)
    }
}

fn parse_confirmation(answer: &str) -> CleanupDecision {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => CleanupDecision::Delete,
        _ => CleanupDecision::Keep,
    }
}
