//! Canvas kind lookup and launch command construction.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

use crate::config::{CanvasKindConfig, GlobalConfig};
use crate::ipc::RetryPolicy;
use crate::{AppError, Result};

/// A launchable canvas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanvasKind {
    /// Registry name, e.g. `calendar`.
    pub name: String,
    /// Program followed by its leading arguments.
    pub command: Vec<String>,
    /// Accepted scenarios; empty accepts any.
    pub scenarios: Vec<String>,
}

impl CanvasKind {
    /// Check that this kind renders `scenario`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Resolve` if the scenario is not listed.
    pub fn validate_scenario(&self, scenario: &str) -> Result<()> {
        if self.scenarios.is_empty() || self.scenarios.iter().any(|s| s == scenario) {
            Ok(())
        } else {
            Err(AppError::Resolve(format!(
                "canvas '{}' has no scenario '{scenario}' (known: {})",
                self.name,
                self.scenarios.join(", ")
            )))
        }
    }
}

/// Maps a kind name to its launch template.
pub trait CanvasResolver: Send + Sync {
    /// Look up `kind`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Resolve` for an unknown kind.
    fn resolve(&self, kind: &str) -> Result<CanvasKind>;

    /// Every registered kind name, sorted.
    fn kinds(&self) -> Vec<String>;
}

/// Resolver backed by the `[canvases.<kind>]` tables.
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    canvases: HashMap<String, CanvasKindConfig>,
}

impl ConfigResolver {
    /// Resolver over an explicit registry.
    #[must_use]
    pub fn new(canvases: HashMap<String, CanvasKindConfig>) -> Self {
        Self { canvases }
    }

    /// Resolver over the registry in `config`.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self::new(config.canvases.clone())
    }
}

impl CanvasResolver for ConfigResolver {
    fn resolve(&self, kind: &str) -> Result<CanvasKind> {
        let entry = self
            .canvases
            .get(kind)
            .ok_or_else(|| AppError::Resolve(format!("unknown canvas kind '{kind}'")))?;
        if entry.command.is_empty() {
            return Err(AppError::Resolve(format!(
                "canvas kind '{kind}' has an empty command"
            )));
        }
        Ok(CanvasKind {
            name: kind.to_owned(),
            command: entry.command.clone(),
            scenarios: entry.scenarios.clone(),
        })
    }

    fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.canvases.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

/// Where an awaited canvas reports back, and how persistently it dials.
#[derive(Debug, Clone, Copy)]
pub struct Rendezvous<'a> {
    /// Controller socket.
    pub endpoint: &'a Path,
    /// Connect schedule the canvas should follow.
    pub retry: RetryPolicy,
}

/// Shell command line that starts `kind` for one instance.
///
/// Appends `--id`, `--scenario` and `--config` to the kind's command. An
/// awaited launch also gets `--socket` plus the connect retry schedule.
/// Every word is shell-quoted.
#[must_use]
pub fn build_launch_command(
    kind: &CanvasKind,
    instance_id: &str,
    scenario: &str,
    config: &Value,
    rendezvous: Option<Rendezvous<'_>>,
) -> String {
    let mut words: Vec<String> = kind.command.clone();
    words.extend([
        "--id".to_owned(),
        instance_id.to_owned(),
        "--scenario".to_owned(),
        scenario.to_owned(),
        "--config".to_owned(),
        config.to_string(),
    ]);
    if let Some(rendezvous) = rendezvous {
        words.extend([
            "--socket".to_owned(),
            rendezvous.endpoint.display().to_string(),
            "--connect-attempts".to_owned(),
            rendezvous.retry.max_attempts.to_string(),
            "--connect-delay-ms".to_owned(),
            rendezvous.retry.delay.as_millis().to_string(),
        ]);
    }

    words
        .iter()
        .map(|word| shell_quote(word))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote `word` for a POSIX shell, leaving plain words untouched.
#[must_use]
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if plain {
        word.to_owned()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
