//! Canvas spawn orchestration.
//!
//! Runs one canvas instance end to end: resolve the kind, bind the
//! rendezvous endpoint, place the launch command in this scope's pane, and
//! wait for the first terminal event. Every path tears down the listener and
//! removes the endpoint; `run_canvas` never returns an error, only a failed
//! [`CanvasResult`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::ipc::{
    endpoint_path, CanvasMessage, ControllerMessage, ListenerEvent, PeerPolicy, ProtocolListener,
    RetryPolicy,
};
use crate::orchestrator::instance::{AwaitMachine, CanvasResult, InstanceState, Transition, Trigger};
use crate::orchestrator::resolver::{
    build_launch_command, CanvasKind, CanvasResolver, Rendezvous,
};
use crate::pane::PaneManager;

/// Default wait for a user decision.
pub const DEFAULT_SELECTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Instance-independent spawner settings.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Directory holding rendezvous sockets.
    pub socket_dir: PathBuf,
    /// Treatment of additional peers.
    pub peer_policy: PeerPolicy,
    /// Connect schedule passed to awaited canvases.
    pub retry: RetryPolicy,
    /// Keep the pane after an awaited result instead of killing it.
    pub retain_pane_after_result: bool,
    /// Send the request config as an `update` when the canvas reports ready.
    pub push_config_on_ready: bool,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            socket_dir: PathBuf::from("/tmp"),
            peer_policy: PeerPolicy::default(),
            retry: RetryPolicy::default(),
            retain_pane_after_result: false,
            push_config_on_ready: false,
        }
    }
}

impl SpawnOptions {
    /// Options taken from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            socket_dir: config.socket_dir.clone(),
            peer_policy: config.ipc.second_peer,
            retry: config.retry_policy(),
            retain_pane_after_result: config.panes.retain_pane_after_result,
            push_config_on_ready: config.ipc.push_config_on_ready,
        }
    }
}

/// One request to show a canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasRequest {
    /// Registered canvas kind.
    pub kind: String,
    /// Scenario the canvas should render.
    pub scenario: String,
    /// Opaque canvas configuration, passed through unmodified.
    pub config: Value,
    /// How long to wait for a terminal event.
    pub timeout: Duration,
    /// Wait for the user's decision instead of returning once displayed.
    pub wait_for_result: bool,
    /// Caller-chosen instance id; generated when absent.
    pub instance_id: Option<String>,
}

impl CanvasRequest {
    /// Awaited request with an empty config and the default timeout.
    #[must_use]
    pub fn new(kind: impl Into<String>, scenario: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            scenario: scenario.into(),
            config: Value::Null,
            timeout: DEFAULT_SELECTION_TIMEOUT,
            wait_for_result: true,
            instance_id: None,
        }
    }
}

/// Fresh instance id of the form `<kind>-<8 hex chars>`.
#[must_use]
pub fn new_instance_id(kind: &str) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{kind}-{}", &uuid[..8])
}

/// Launches canvases and awaits their results.
#[derive(Clone)]
pub struct CanvasSpawner {
    panes: Arc<PaneManager>,
    resolver: Arc<dyn CanvasResolver>,
    options: SpawnOptions,
}

impl std::fmt::Debug for CanvasSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanvasSpawner")
            .field("panes", &self.panes)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl CanvasSpawner {
    /// Build a spawner.
    #[must_use]
    pub fn new(
        panes: Arc<PaneManager>,
        resolver: Arc<dyn CanvasResolver>,
        options: SpawnOptions,
    ) -> Self {
        Self {
            panes,
            resolver,
            options,
        }
    }

    /// Pane manager used for launches.
    #[must_use]
    pub fn panes(&self) -> &Arc<PaneManager> {
        &self.panes
    }

    /// Run `request` to completion.
    pub async fn run_canvas(&self, request: CanvasRequest) -> CanvasResult {
        self.run_canvas_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Run `request` until it resolves or `cancel` fires.
    pub async fn run_canvas_with_cancel(
        &self,
        request: CanvasRequest,
        cancel: CancellationToken,
    ) -> CanvasResult {
        let instance_id = request
            .instance_id
            .clone()
            .unwrap_or_else(|| new_instance_id(&request.kind));
        let span = info_span!(
            "run_canvas",
            instance_id = %instance_id,
            kind = %request.kind,
            scenario = %request.scenario
        );

        async move {
            let kind = match self.resolver.resolve(&request.kind).and_then(|kind| {
                kind.validate_scenario(&request.scenario)?;
                Ok(kind)
            }) {
                Ok(kind) => kind,
                Err(err) => {
                    warn!(%err, "canvas request rejected");
                    return CanvasResult::failure(&instance_id, err.to_string());
                }
            };

            if request.wait_for_result {
                self.await_canvas(&kind, &instance_id, &request, &cancel)
                    .await
            } else {
                self.display_canvas(&kind, &instance_id, &request).await
            }
        }
        .instrument(span)
        .await
    }

    /// Launch without a listener and return once the pane is running.
    async fn display_canvas(
        &self,
        kind: &CanvasKind,
        instance_id: &str,
        request: &CanvasRequest,
    ) -> CanvasResult {
        let command =
            build_launch_command(kind, instance_id, &request.scenario, &request.config, None);
        match self.panes.acquire_pane(&command).await {
            Ok(lease) => {
                info!(pane_id = %lease.pane_id, reused = lease.reused, "canvas displayed");
                CanvasResult::displayed(instance_id, &lease.pane_id)
            }
            Err(err) => {
                warn!(%err, "canvas launch failed");
                CanvasResult::failure(instance_id, format!("failed to spawn canvas: {err}"))
            }
        }
    }

    async fn await_canvas(
        &self,
        kind: &CanvasKind,
        instance_id: &str,
        request: &CanvasRequest,
        cancel: &CancellationToken,
    ) -> CanvasResult {
        let mut machine = AwaitMachine::new(instance_id);
        let endpoint = endpoint_path(&self.options.socket_dir, instance_id);

        let mut listener = match ProtocolListener::bind(endpoint, self.options.peer_policy) {
            Ok(listener) => listener,
            Err(err) => {
                warn!(%err, "cannot bind rendezvous endpoint");
                machine.apply(Trigger::SpawnFailed(err.to_string()));
                return finish(machine, None);
            }
        };
        machine.mark_listening();

        let command = build_launch_command(
            kind,
            instance_id,
            &request.scenario,
            &request.config,
            Some(Rendezvous {
                endpoint: listener.endpoint(),
                retry: self.options.retry,
            }),
        );

        // Deadline runs from before the launch. `sleep` saturates oversized
        // durations instead of overflowing.
        let timer = tokio::time::sleep(request.timeout);
        tokio::pin!(timer);

        let launched = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                machine.apply(Trigger::Cancelled);
                None
            }

            acquired = self.panes.acquire_pane(&command) => match acquired {
                Ok(lease) => {
                    info!(pane_id = %lease.pane_id, reused = lease.reused, "canvas launched");
                    Some(lease)
                }
                Err(err) => {
                    warn!(%err, "canvas launch failed");
                    machine.apply(Trigger::SpawnFailed(err.to_string()));
                    None
                }
            },

            () = &mut timer => {
                warn!(timeout = ?request.timeout, "canvas launch did not finish before deadline");
                machine.apply(Trigger::Timeout);
                None
            }
        };
        let Some(lease) = launched else {
            listener.close().await;
            return finish(machine, None);
        };

        let mut send_close = false;

        while !machine.is_resolved() {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    machine.apply(Trigger::Cancelled);
                    send_close = true;
                }

                event = listener.next_event() => {
                    match event {
                        Some(event) => {
                            self.handle_event(event, &mut machine, &listener, request).await;
                        }
                        None => {
                            machine.apply(Trigger::PeerDisconnected);
                        }
                    }
                }

                () = &mut timer => {
                    warn!(timeout = ?request.timeout, "no decision before deadline");
                    machine.apply(Trigger::Timeout);
                    send_close = true;
                }
            }
        }

        if send_close {
            let delivered = listener.send(&ControllerMessage::Close).await;
            debug!(delivered, "close sent to canvas");
        }
        listener.close().await;

        if self.options.retain_pane_after_result {
            debug!(pane_id = %lease.pane_id, "retaining pane after result");
        } else if let Err(err) = self.panes.release_pane(&lease).await {
            warn!(%err, pane_id = %lease.pane_id, "failed to release pane");
        }

        finish(machine, Some(lease.pane_id))
    }

    async fn handle_event(
        &self,
        event: ListenerEvent,
        machine: &mut AwaitMachine,
        listener: &ProtocolListener,
        request: &CanvasRequest,
    ) {
        match event {
            ListenerEvent::PeerConnected { peer } => {
                debug!(peer, "canvas connected");
                machine.apply(Trigger::PeerConnected);
            }
            ListenerEvent::Message { peer, message } => {
                let is_ready = matches!(message, CanvasMessage::Ready { .. });
                let transition = machine.apply(Trigger::Message(message));
                if is_ready
                    && self.options.push_config_on_ready
                    && transition == Transition::Advanced(InstanceState::AwaitingSelection)
                {
                    let delivered = listener
                        .send(&ControllerMessage::Update {
                            config: request.config.clone(),
                        })
                        .await;
                    debug!(peer, delivered, "config pushed on ready");
                }
            }
            ListenerEvent::Malformed { peer, error } => {
                warn!(peer, error = %error, "skipping malformed envelope");
            }
            ListenerEvent::PeerDisconnected { peer } => {
                let remaining = listener.peer_count().await;
                if remaining == 0 {
                    machine.apply(Trigger::PeerDisconnected);
                } else {
                    debug!(peer, remaining, "peer left, others still connected");
                }
            }
            ListenerEvent::PeerRejected { peer } => {
                warn!(peer, "additional canvas rejected");
            }
        }
    }
}

fn finish(machine: AwaitMachine, pane_id: Option<String>) -> CanvasResult {
    let instance_id = machine.instance_id().to_owned();
    machine
        .into_result()
        .unwrap_or_else(|| CanvasResult::failure(&instance_id, "instance ended without a result"))
        .with_pane(pane_id)
}
