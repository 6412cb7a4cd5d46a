//! Secret collaborators: interactive prompt, `pass` store, and generator.

/// `pass`-backed secret store.
pub mod pass;
/// Random volume password generator.
pub mod passgen;

use crate::{
    error::Result,
    types::{SecretValue, VolumeName},
};

/// Lookup and upsert of volume secrets by name.
pub trait SecretStore: Send + Sync {
    /// Returns the stored secret for `name`, or `None` when no entry exists.
    fn lookup(&self, name: &VolumeName) -> Result<Option<SecretValue>>;
    /// Inserts or replaces the entry for `name` and persists the store.
    fn upsert(&self, name: &VolumeName, username: &str, secret: &SecretValue) -> Result<()>;
}

/// Interactive secret entry.
pub trait SecretPrompt: Send + Sync {
    /// Reads a secret for `name`; `confirm` asks for it twice.
    fn prompt_secret(&self, name: &VolumeName, confirm: bool) -> Result<SecretValue>;
}

/// Where a mount obtains its secret; exactly one source per call.
#[derive(Debug, Clone)]
pub enum SecretSource {
    /// Secret supplied by the caller.
    Value(SecretValue),
    /// Ask interactively.
    Prompt,
    /// Look up in the configured secret store.
    Store,
}
