//! Multiplexer abstraction.
//!
//! [`PaneBackend`] is the seam between pane ownership logic and the
//! terminal multiplexer. Methods return boxed futures so the trait stays
//! object-safe and can be shared as `Arc<dyn PaneBackend>`.

use std::future::Future;
use std::pin::Pin;

use crate::pane::{PaneInfo, SplitDirection};
use crate::Result;

/// Boxed future returned by [`PaneBackend`] methods.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Parameters for opening a new pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRequest {
    /// Shell command to run in the new pane.
    pub command: String,
    /// Pane to split; the multiplexer's current pane when `None`.
    pub target: Option<String>,
    /// Split orientation.
    pub direction: SplitDirection,
    /// New pane size as a percentage.
    pub size_percent: u8,
}

/// Operations a multiplexer must provide.
pub trait PaneBackend: Send + Sync {
    /// Describe one pane; `Ok(None)` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pane`](crate::AppError::Pane) if the multiplexer
    /// cannot be queried.
    fn describe<'a>(&'a self, pane_id: &'a str) -> BackendFuture<'a, Option<PaneInfo>>;

    /// Describe every pane the multiplexer knows about.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pane`](crate::AppError::Pane) if the multiplexer
    /// cannot be queried.
    fn list_panes(&self) -> BackendFuture<'_, Vec<PaneInfo>>;

    /// Split a new pane running `request.command` and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pane`](crate::AppError::Pane) if the split fails.
    fn split<'a>(&'a self, request: &'a SplitRequest) -> BackendFuture<'a, String>;

    /// Set a pane-scoped option (e.g. the ownership tag or `remain-on-exit`).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pane`](crate::AppError::Pane) if the pane does
    /// not exist or the option cannot be set.
    fn set_option<'a>(
        &'a self,
        pane_id: &'a str,
        key: &'a str,
        value: &'a str,
    ) -> BackendFuture<'a, ()>;

    /// Replace the pane's process with `command`, killing any running one.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pane`](crate::AppError::Pane) on failure.
    fn respawn<'a>(&'a self, pane_id: &'a str, command: &'a str) -> BackendFuture<'a, ()>;

    /// Send an interrupt (Ctrl-C) to the pane's foreground process.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pane`](crate::AppError::Pane) on failure.
    fn interrupt<'a>(&'a self, pane_id: &'a str) -> BackendFuture<'a, ()>;

    /// Destroy the pane.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pane`](crate::AppError::Pane) on failure.
    fn kill<'a>(&'a self, pane_id: &'a str) -> BackendFuture<'a, ()>;
}
