//! Multiplexer pane ownership, reuse, and orphan cleanup.
//!
//! Every controller derives a deterministic scope from its terminal context
//! ([`scope`]). The [`manager::PaneManager`] keeps at most one owned pane per
//! scope: it records the pane in an injected [`store::ScopeStore`] and tags
//! the physical pane with [`OWNERSHIP_TAG`] so ownership can be verified
//! even when the record and reality disagree.
//!
//! The multiplexer itself sits behind [`backend::PaneBackend`]; tmux is the
//! production backend and [`headless::HeadlessBackend`] fakes panes in
//! memory for tests.

pub mod backend;
pub mod headless;
pub mod manager;
pub mod scope;
pub mod store;
pub mod tmux;

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub use backend::{BackendFuture, PaneBackend, SplitRequest};
pub use headless::HeadlessBackend;
pub use manager::{OrphanPane, OrphanReason, PaneLease, PaneManager, PaneStatus};
pub use scope::{compute_scope, ScopeContext};
pub use store::{FileScopeStore, MemoryScopeStore, ScopeStore, TrackingRecord};
pub use tmux::TmuxBackend;

/// Pane user option carrying the owning scope.
pub const OWNERSHIP_TAG: &str = "@canvas_scope";

/// Snapshot of one multiplexer pane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaneInfo {
    /// Multiplexer pane identifier (e.g. `%12`).
    pub id: String,
    /// The pane's process has exited but the pane remains.
    pub dead: bool,
    /// Value of [`OWNERSHIP_TAG`], if set.
    pub scope_tag: Option<String>,
    /// Command the pane was started with.
    pub start_command: String,
    /// Foreground command currently running in the pane.
    pub current_command: String,
}

impl PaneInfo {
    /// Liveness of a pane that exists.
    #[must_use]
    pub fn liveness(&self) -> Liveness {
        if self.dead {
            Liveness::Dead
        } else {
            Liveness::Alive
        }
    }
}

/// Whether a pane and its process are still around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    /// Pane exists and its process is running.
    Alive,
    /// Pane exists but its process has exited.
    Dead,
    /// No such pane.
    Missing,
}

/// Orientation of the split that hosts a canvas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitDirection {
    /// Side by side.
    #[default]
    Horizontal,
    /// Stacked.
    Vertical,
}

/// Tunables for [`PaneManager`].
#[derive(Debug, Clone)]
pub struct PaneSettings {
    /// Split orientation for new panes.
    pub split: SplitDirection,
    /// New pane size as a percentage.
    pub size_percent: u8,
    /// Pause between interrupting a running canvas and respawning.
    pub interrupt_grace: Duration,
    /// Start-command patterns of untagged canvas panes from older releases.
    pub legacy_patterns: Vec<Regex>,
}

impl Default for PaneSettings {
    fn default() -> Self {
        Self {
            split: SplitDirection::default(),
            size_percent: 67,
            interrupt_grace: Duration::from_millis(150),
            legacy_patterns: Vec::new(),
        }
    }
}
