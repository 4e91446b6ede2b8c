//! Deterministic scope derivation.

use std::env;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::{AppError, Result};

/// Length of the hex scope identifier.
const SCOPE_LEN: usize = 16;

/// Terminal context a scope is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeContext {
    /// Multiplexer session token (`$TMUX`).
    pub session: Option<String>,
    /// The caller's own pane (`$TMUX_PANE`).
    pub pane: Option<String>,
    /// Working directory.
    pub cwd: PathBuf,
}

impl ScopeContext {
    /// Read the context of the current process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the working directory cannot be read.
    pub fn from_env() -> Result<Self> {
        let cwd = env::current_dir()
            .map_err(|err| AppError::Io(format!("cannot read working directory: {err}")))?;
        Ok(Self {
            session: non_empty_var("TMUX"),
            pane: non_empty_var("TMUX_PANE"),
            cwd,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

/// Hash `context` into a short hex scope identifier.
///
/// Identical contexts always produce the same scope.
#[must_use]
pub fn compute_scope(context: &ScopeContext) -> String {
    let mut hasher = Sha256::new();
    hasher.update(context.session.as_deref().unwrap_or_default().as_bytes());
    hasher.update([0]);
    hasher.update(context.pane.as_deref().unwrap_or_default().as_bytes());
    hasher.update([0]);
    hasher.update(context.cwd.to_string_lossy().as_bytes());

    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>()
        .chars()
        .take(SCOPE_LEN)
        .collect()
}
