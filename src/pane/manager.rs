//! Scoped pane ownership: find, reuse, create, release, and clean up.
//!
//! Mutations of the scope's tracking record (create, reclaim, clear-stale)
//! run under a per-manager async mutex, so concurrent canvases sharing one
//! manager never both conclude they own a fresh pane. Across processes the
//! ownership tag on the physical pane is what breaks ties.
//!
//! Every [`PaneLease`] carries a token that is written into the tracking
//! record. A later launch that reuses the pane overwrites the token, and
//! [`PaneManager::release_pane`] only tears down a pane whose record still
//! names the releasing lease.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::pane::backend::{PaneBackend, SplitRequest};
use crate::pane::scope::{compute_scope, ScopeContext};
use crate::pane::store::{ScopeStore, TrackingRecord};
use crate::pane::{Liveness, PaneInfo, PaneSettings, OWNERSHIP_TAG};
use crate::{AppError, Result};

/// Pane handed to a canvas launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaneLease {
    /// Pane now running the command.
    pub pane_id: String,
    /// Whether an existing owned pane was respawned instead of split.
    pub reused: bool,
    /// Token identifying this launch in the scope's tracking record.
    pub lease: String,
}

/// Why a pane was judged orphaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanReason {
    /// Tagged pane whose process has exited.
    Dead,
    /// Live tagged pane that no tracking record points at.
    Untracked,
    /// Untagged pane running recognisable canvas content.
    Legacy,
}

/// A pane found by [`PaneManager::cleanup_orphans`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanPane {
    /// Pane identifier.
    pub pane_id: String,
    /// Scope tag carried by the pane, if any.
    pub scope: Option<String>,
    /// Classification.
    pub reason: OrphanReason,
    /// Command the pane was started with.
    pub command: String,
}

/// Read-only diagnostics snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaneStatus {
    /// This controller's scope.
    pub scope: String,
    /// Pane named by the tracking record.
    pub tracked_pane: Option<String>,
    /// Liveness of the tracked pane.
    pub liveness: Option<Liveness>,
    /// Whether the tracked pane carries this scope's tag.
    pub owned: bool,
    /// Every pane that is tagged or looks like canvas content.
    pub canvas_panes: Vec<PaneInfo>,
}

/// Keeps at most one owned canvas pane per scope.
pub struct PaneManager {
    backend: Arc<dyn PaneBackend>,
    store: Arc<dyn ScopeStore>,
    context: ScopeContext,
    scope: String,
    settings: PaneSettings,
    lock: Mutex<()>,
}

impl std::fmt::Debug for PaneManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaneManager")
            .field("scope", &self.scope)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl PaneManager {
    /// Build a manager for `context`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn PaneBackend>,
        store: Arc<dyn ScopeStore>,
        context: ScopeContext,
        settings: PaneSettings,
    ) -> Self {
        let scope = compute_scope(&context);
        Self {
            backend,
            store,
            context,
            scope,
            settings,
            lock: Mutex::new(()),
        }
    }

    /// This manager's scope identifier.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// The pane this scope verifiably owns, reclaiming an orphan if the
    /// tracking record is stale.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pane` or `AppError::Io` if the multiplexer or the
    /// tracking store cannot be read.
    pub async fn owned_pane(&self) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        self.owned_pane_locked().await
    }

    /// Split a new pane running `command`, tag it, and record it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pane` if the split or tagging fails; a pane that
    /// could not be tagged is killed again.
    pub async fn create_pane(&self, command: &str) -> Result<String> {
        let _guard = self.lock.lock().await;
        self.create_pane_locked(command, None).await
    }

    /// Relaunch `command` in an existing pane.
    ///
    /// A dead pane is respawned directly. A live one is interrupted first,
    /// given [`PaneSettings::interrupt_grace`] to wind down, then respawned.
    /// Returns `false` on any failure so the caller can fall back to
    /// [`PaneManager::create_pane`].
    pub async fn reuse_pane(&self, pane_id: &str, command: &str) -> bool {
        let span = info_span!("reuse_pane", pane_id);
        async move {
            let info = match self.backend.describe(pane_id).await {
                Ok(Some(info)) => info,
                Ok(None) => {
                    debug!("pane vanished before reuse");
                    return false;
                }
                Err(err) => {
                    warn!(%err, "cannot inspect pane for reuse");
                    return false;
                }
            };

            if !info.dead {
                if let Err(err) = self.backend.interrupt(pane_id).await {
                    warn!(%err, "interrupt failed");
                    return false;
                }
                tokio::time::sleep(self.settings.interrupt_grace).await;
            }

            match self.backend.respawn(pane_id, command).await {
                Ok(()) => {
                    info!(was_dead = info.dead, "pane respawned");
                    true
                }
                Err(err) => {
                    warn!(%err, "respawn failed");
                    false
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Run `command` in this scope's pane: reuse the owned pane when
    /// possible, otherwise create one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pane` or `AppError::Io` if no pane can be
    /// produced.
    pub async fn acquire_pane(&self, command: &str) -> Result<PaneLease> {
        let span = info_span!("acquire_pane", scope = %self.scope);
        async move {
            let _guard = self.lock.lock().await;
            let lease = new_lease_token();

            if let Some(pane_id) = self.owned_pane_locked().await? {
                if self.reuse_pane(&pane_id, command).await {
                    self.store.put_record(
                        &self.scope,
                        &TrackingRecord::new(&pane_id).with_lease(&lease),
                    )?;
                    return Ok(PaneLease {
                        pane_id,
                        reused: true,
                        lease,
                    });
                }
                warn!(pane_id = %pane_id, "owned pane not reusable, replacing it");
                if let Err(err) = self.backend.kill(&pane_id).await {
                    debug!(%err, pane_id = %pane_id, "could not kill unusable pane");
                }
                self.store.clear(&self.scope)?;
            }

            let pane_id = self.create_pane_locked(command, Some(&lease)).await?;
            Ok(PaneLease {
                pane_id,
                reused: false,
                lease,
            })
        }
        .instrument(span)
        .await
    }

    /// Kill the leased pane and forget it, unless a later launch has taken
    /// the pane over since.
    ///
    /// A pane whose tracking record names a different lease is left running.
    /// A pane the record no longer points at is killed without touching the
    /// record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the tracking record cannot be read or
    /// cleared.
    pub async fn release_pane(&self, lease: &PaneLease) -> Result<()> {
        let span = info_span!("release_pane", pane_id = %lease.pane_id, scope = %self.scope);
        async move {
            let _guard = self.lock.lock().await;

            if let Some(record) = self.store.get(&self.scope)? {
                if record.pane_id == lease.pane_id {
                    if record.lease.as_deref() != Some(lease.lease.as_str()) {
                        info!(holder = ?record.lease, "pane taken over by a later launch, leaving it");
                        return Ok(());
                    }
                    self.store.clear(&self.scope)?;
                }
            }

            if let Err(err) = self.backend.kill(&lease.pane_id).await {
                debug!(%err, "pane already gone at release");
            }
            info!("pane released");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Find orphaned canvas panes across every scope and, unless `dry_run`,
    /// kill them.
    ///
    /// A tagged pane is orphaned when its process is dead, or when it is
    /// alive but its scope's tracking record does not point at it. An
    /// untagged pane is orphaned when its command matches a legacy canvas
    /// pattern. The caller's own pane is never reported.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pane` or `AppError::Io` if the multiplexer or the
    /// tracking store cannot be read.
    pub async fn cleanup_orphans(&self, dry_run: bool) -> Result<Vec<OrphanPane>> {
        let span = info_span!("cleanup_orphans", dry_run);
        async move {
            let _guard = self.lock.lock().await;

            let tracked: HashMap<String, String> = self
                .store
                .entries()?
                .into_iter()
                .map(|(scope, record)| (scope, record.pane_id))
                .collect();

            let orphans: Vec<OrphanPane> = self
                .backend
                .list_panes()
                .await?
                .into_iter()
                .filter(|pane| self.context.pane.as_deref() != Some(pane.id.as_str()))
                .filter_map(|pane| self.classify(&pane, &tracked))
                .collect();

            if orphans.is_empty() {
                debug!("no orphaned panes");
                return Ok(orphans);
            }

            info!(count = orphans.len(), "orphaned panes found");
            if dry_run {
                return Ok(orphans);
            }

            for orphan in &orphans {
                if let Err(err) = self.backend.kill(&orphan.pane_id).await {
                    warn!(%err, pane_id = %orphan.pane_id, "failed to kill orphan");
                    continue;
                }
                for (scope, pane_id) in &tracked {
                    if *pane_id == orphan.pane_id {
                        self.store.clear(scope)?;
                    }
                }
                info!(pane_id = %orphan.pane_id, reason = ?orphan.reason, "orphan killed");
            }
            Ok(orphans)
        }
        .instrument(span)
        .await
    }

    /// Diagnostics snapshot; never mutates state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pane` or `AppError::Io` if the multiplexer or the
    /// tracking store cannot be read.
    pub async fn pane_status(&self) -> Result<PaneStatus> {
        let tracked_pane = self.store.get(&self.scope)?.map(|record| record.pane_id);

        let (liveness, owned) = match tracked_pane.as_deref() {
            Some(pane_id) => match self.backend.describe(pane_id).await? {
                Some(info) => (
                    Some(info.liveness()),
                    info.scope_tag.as_deref() == Some(self.scope.as_str()),
                ),
                None => (Some(Liveness::Missing), false),
            },
            None => (None, false),
        };

        let canvas_panes = self
            .backend
            .list_panes()
            .await?
            .into_iter()
            .filter(|pane| pane.scope_tag.is_some() || self.is_legacy(pane))
            .collect();

        Ok(PaneStatus {
            scope: self.scope.clone(),
            tracked_pane,
            liveness,
            owned,
            canvas_panes,
        })
    }

    async fn owned_pane_locked(&self) -> Result<Option<String>> {
        if let Some(record) = self.store.get(&self.scope)? {
            match self.backend.describe(&record.pane_id).await? {
                Some(info) if info.scope_tag.as_deref() == Some(self.scope.as_str()) => {
                    return Ok(Some(info.id));
                }
                Some(info) => {
                    warn!(
                        pane_id = %info.id,
                        tag = ?info.scope_tag,
                        "tracked pane is not tagged for this scope, bypassing"
                    );
                }
                None => debug!(pane_id = %record.pane_id, "tracked pane no longer exists"),
            }
            self.store.clear(&self.scope)?;
        }

        // Record lost or stale: look for a surviving pane tagged for us,
        // preferring one whose process is still running.
        let mut candidates: Vec<PaneInfo> = self
            .backend
            .list_panes()
            .await?
            .into_iter()
            .filter(|pane| pane.scope_tag.as_deref() == Some(self.scope.as_str()))
            .collect();
        candidates.sort_by_key(|pane| pane.dead);

        let Some(orphan) = candidates.into_iter().next() else {
            return Ok(None);
        };
        self.store.put(&self.scope, &orphan.id)?;
        info!(pane_id = %orphan.id, scope = %self.scope, "reclaimed orphaned pane");
        Ok(Some(orphan.id))
    }

    async fn create_pane_locked(&self, command: &str, lease: Option<&str>) -> Result<String> {
        let request = SplitRequest {
            command: command.to_owned(),
            target: self.context.pane.clone(),
            direction: self.settings.split,
            size_percent: self.settings.size_percent,
        };
        let pane_id = self.backend.split(&request).await?;

        if let Err(err) = self.mark_owned(&pane_id).await {
            if let Err(kill_err) = self.backend.kill(&pane_id).await {
                warn!(%kill_err, pane_id = %pane_id, "could not remove untagged pane");
            }
            return Err(err);
        }

        let record = TrackingRecord::new(&pane_id);
        let record = match lease {
            Some(lease) => record.with_lease(lease),
            None => record,
        };
        self.store.put_record(&self.scope, &record)?;
        info!(pane_id = %pane_id, scope = %self.scope, "canvas pane created");
        Ok(pane_id)
    }

    async fn mark_owned(&self, pane_id: &str) -> Result<()> {
        self.backend
            .set_option(pane_id, OWNERSHIP_TAG, &self.scope)
            .await
            .map_err(|err| AppError::Pane(format!("cannot tag pane {pane_id}: {err}")))?;
        self.backend
            .set_option(pane_id, "remain-on-exit", "on")
            .await
            .map_err(|err| AppError::Pane(format!("cannot keep pane {pane_id} on exit: {err}")))
    }

    fn classify(&self, pane: &PaneInfo, tracked: &HashMap<String, String>) -> Option<OrphanPane> {
        let reason = match pane.scope_tag.as_deref() {
            Some(_) if pane.dead => OrphanReason::Dead,
            Some(scope) if tracked.get(scope) != Some(&pane.id) => OrphanReason::Untracked,
            None if self.is_legacy(pane) => OrphanReason::Legacy,
            _ => return None,
        };

        Some(OrphanPane {
            pane_id: pane.id.clone(),
            scope: pane.scope_tag.clone(),
            reason,
            command: pane.start_command.clone(),
        })
    }

    fn is_legacy(&self, pane: &PaneInfo) -> bool {
        self.settings
            .legacy_patterns
            .iter()
            .any(|re| re.is_match(&pane.start_command))
    }
}

fn new_lease_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
