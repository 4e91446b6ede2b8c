//! In-memory pane backend.
//!
//! Fakes a multiplexer without a terminal: panes are map entries, launching
//! a command only records it, and an optional launch hook lets tests play
//! the canvas process. Helpers simulate the outside world (a canvas
//! exiting, a user closing a pane).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::pane::backend::{BackendFuture, PaneBackend, SplitRequest};
use crate::pane::{PaneInfo, OWNERSHIP_TAG};
use crate::{AppError, Result};

/// Callback invoked with `(pane_id, command)` whenever a command launches.
pub type LaunchHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Debug, Default)]
struct FakePane {
    dead: bool,
    options: HashMap<String, String>,
    launches: Vec<String>,
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_id: u64,
    panes: BTreeMap<String, FakePane>,
    fail_splits: bool,
    stall_splits: bool,
    fail_respawns: bool,
    killed: Vec<String>,
}

/// [`PaneBackend`] that keeps panes in memory.
#[derive(Default)]
pub struct HeadlessBackend {
    state: Mutex<HeadlessState>,
    hook: Option<LaunchHook>,
}

impl std::fmt::Debug for HeadlessBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessBackend")
            .field("state", &self.state)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl HeadlessBackend {
    /// Backend with no panes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that calls `hook` after every launch.
    #[must_use]
    pub fn with_launch_hook(hook: LaunchHook) -> Self {
        Self {
            state: Mutex::default(),
            hook: Some(hook),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut HeadlessState) -> Result<T>) -> Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| AppError::Pane("headless backend lock poisoned".into()))?;
        f(&mut state)
    }

    fn launched(&self, pane_id: &str, command: &str) {
        if let Some(hook) = &self.hook {
            hook(pane_id, command);
        }
    }

    /// Add a pane that was not created through [`PaneBackend::split`], such
    /// as one left behind by another controller. Returns its id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pane` if the internal lock is poisoned.
    pub fn insert_pane(&self, command: &str, scope_tag: Option<&str>, dead: bool) -> Result<String> {
        self.with_state(|state| {
            let id = allocate_id(state);
            let mut pane = FakePane {
                dead,
                launches: vec![command.to_owned()],
                ..FakePane::default()
            };
            if let Some(tag) = scope_tag {
                pane.options.insert(OWNERSHIP_TAG.to_owned(), tag.to_owned());
            }
            state.panes.insert(id.clone(), pane);
            Ok(id)
        })
    }

    /// Simulate the pane's process exiting while the pane stays open.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown pane.
    pub fn mark_exited(&self, pane_id: &str) -> Result<()> {
        self.with_state(|state| {
            let pane = pane_mut(state, pane_id)?;
            pane.dead = true;
            Ok(())
        })
    }

    /// Simulate the pane being closed outside the controller's control.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown pane.
    pub fn kill_externally(&self, pane_id: &str) -> Result<()> {
        self.with_state(|state| {
            state
                .panes
                .remove(pane_id)
                .map(drop)
                .ok_or_else(|| AppError::NotFound(format!("pane {pane_id}")))
        })
    }

    /// Make subsequent splits fail.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pane` if the internal lock is poisoned.
    pub fn fail_splits(&self, fail: bool) -> Result<()> {
        self.with_state(|state| {
            state.fail_splits = fail;
            Ok(())
        })
    }

    /// Make subsequent splits hang, like a multiplexer client that never
    /// answers.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pane` if the internal lock is poisoned.
    pub fn stall_splits(&self, stall: bool) -> Result<()> {
        self.with_state(|state| {
            state.stall_splits = stall;
            Ok(())
        })
    }

    /// Make subsequent respawns fail.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pane` if the internal lock is poisoned.
    pub fn fail_respawns(&self, fail: bool) -> Result<()> {
        self.with_state(|state| {
            state.fail_respawns = fail;
            Ok(())
        })
    }

    /// Commands launched in `pane_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown pane.
    pub fn launches(&self, pane_id: &str) -> Result<Vec<String>> {
        self.with_state(|state| Ok(pane_mut(state, pane_id)?.launches.clone()))
    }

    /// Ids of every existing pane.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pane` if the internal lock is poisoned.
    pub fn pane_ids(&self) -> Result<Vec<String>> {
        self.with_state(|state| Ok(state.panes.keys().cloned().collect()))
    }

    /// Panes destroyed through [`PaneBackend::kill`], in order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pane` if the internal lock is poisoned.
    pub fn killed(&self) -> Result<Vec<String>> {
        self.with_state(|state| Ok(state.killed.clone()))
    }
}

fn allocate_id(state: &mut HeadlessState) -> String {
    state.next_id += 1;
    format!("%{}", state.next_id)
}

fn pane_mut<'a>(state: &'a mut HeadlessState, pane_id: &str) -> Result<&'a mut FakePane> {
    state
        .panes
        .get_mut(pane_id)
        .ok_or_else(|| AppError::NotFound(format!("pane {pane_id}")))
}

fn snapshot(id: &str, pane: &FakePane) -> PaneInfo {
    let start_command = pane.launches.last().cloned().unwrap_or_default();
    let current_command = start_command
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_owned();
    PaneInfo {
        id: id.to_owned(),
        dead: pane.dead,
        scope_tag: pane.options.get(OWNERSHIP_TAG).cloned(),
        start_command,
        current_command,
    }
}

impl PaneBackend for HeadlessBackend {
    fn describe<'a>(&'a self, pane_id: &'a str) -> BackendFuture<'a, Option<PaneInfo>> {
        Box::pin(async move {
            self.with_state(|state| Ok(state.panes.get(pane_id).map(|p| snapshot(pane_id, p))))
        })
    }

    fn list_panes(&self) -> BackendFuture<'_, Vec<PaneInfo>> {
        Box::pin(async move {
            self.with_state(|state| {
                Ok(state
                    .panes
                    .iter()
                    .map(|(id, pane)| snapshot(id, pane))
                    .collect())
            })
        })
    }

    fn split<'a>(&'a self, request: &'a SplitRequest) -> BackendFuture<'a, String> {
        Box::pin(async move {
            if self.with_state(|state| Ok(state.stall_splits))? {
                std::future::pending::<()>().await;
            }
            let id = self.with_state(|state| {
                if state.fail_splits {
                    return Err(AppError::Pane("split refused by headless backend".into()));
                }
                let id = allocate_id(state);
                state.panes.insert(
                    id.clone(),
                    FakePane {
                        launches: vec![request.command.clone()],
                        ..FakePane::default()
                    },
                );
                Ok(id)
            })?;
            self.launched(&id, &request.command);
            Ok(id)
        })
    }

    fn set_option<'a>(
        &'a self,
        pane_id: &'a str,
        key: &'a str,
        value: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.with_state(|state| {
                pane_mut(state, pane_id)?
                    .options
                    .insert(key.to_owned(), value.to_owned());
                Ok(())
            })
        })
    }

    fn respawn<'a>(&'a self, pane_id: &'a str, command: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.with_state(|state| {
                if state.fail_respawns {
                    return Err(AppError::Pane("respawn refused by headless backend".into()));
                }
                let pane = pane_mut(state, pane_id)?;
                pane.dead = false;
                pane.launches.push(command.to_owned());
                Ok(())
            })?;
            self.launched(pane_id, command);
            Ok(())
        })
    }

    fn interrupt<'a>(&'a self, pane_id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.with_state(|state| {
                pane_mut(state, pane_id)?.dead = true;
                Ok(())
            })
        })
    }

    fn kill<'a>(&'a self, pane_id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.with_state(|state| {
                state
                    .panes
                    .remove(pane_id)
                    .ok_or_else(|| AppError::Pane(format!("can't find pane: {pane_id}")))?;
                state.killed.push(pane_id.to_owned());
                Ok(())
            })
        })
    }
}
