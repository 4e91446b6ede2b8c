//! Canvas instance lifecycle and result resolution.
//!
//! [`AwaitMachine`] is the single consumer of everything that can happen to
//! an instance: listener events, the deadline, controller cancellation and
//! launch failure all arrive as [`Trigger`]s. The first trigger that reaches
//! a terminal state fixes the [`CanvasResult`]; everything after is ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::ipc::{CanvasMessage, Envelope};

/// Failure text reported when the deadline passes.
pub const TIMEOUT_ERROR: &str = "Timeout waiting for user selection";

/// Failure text reported when the canvas leaves without a terminal message.
pub const DISCONNECT_ERROR: &str = "peer disconnected unexpectedly";

/// Failure text reported when the controller gives up on the instance.
pub const CANCELLED_ERROR: &str = "cancelled by controller";

/// Where an instance is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Created, nothing bound yet.
    Spawning,
    /// Endpoint bound, canvas not yet connected.
    Listening,
    /// Canvas connected but has not announced itself.
    PeerConnected,
    /// Canvas sent `ready` and is waiting on the user.
    AwaitingSelection,
    /// A terminal message or controller cancellation decided the outcome.
    Resolved,
    /// Deadline passed.
    TimedOut,
    /// Canvas left without a terminal message.
    PeerDisconnected,
    /// Canvas could not be launched.
    SpawnFailed,
}

impl InstanceState {
    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Resolved | Self::TimedOut | Self::PeerDisconnected | Self::SpawnFailed
        )
    }
}

/// Input to [`AwaitMachine::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// A canvas process connected to the endpoint.
    PeerConnected,
    /// The canvas sent an envelope.
    Message(CanvasMessage),
    /// The last connected canvas went away.
    PeerDisconnected,
    /// The per-instance deadline passed.
    Timeout,
    /// The controller abandoned the instance.
    Cancelled,
    /// The launch command could not be placed in a pane.
    SpawnFailed(String),
}

/// Effect of one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No state change.
    Ignored,
    /// Moved to a new non-terminal state.
    Advanced(InstanceState),
    /// Reached a terminal state; the result is now fixed.
    Resolved(InstanceState),
}

/// Outcome handed back to the caller of a canvas run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasResult {
    /// `true` for a selection, a user cancellation, or a display-only run.
    pub success: bool,
    /// Selection payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Set when the user dismissed the canvas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<bool>,
    /// Reason given with a user cancellation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Pane that hosted the canvas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pane_id: Option<String>,
    /// Instance this result belongs to.
    pub instance_id: String,
}

impl CanvasResult {
    fn base(instance_id: &str, success: bool) -> Self {
        Self {
            success,
            data: None,
            cancelled: None,
            reason: None,
            error: None,
            pane_id: None,
            instance_id: instance_id.to_owned(),
        }
    }

    /// The user selected `data`.
    #[must_use]
    pub fn selected(instance_id: &str, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::base(instance_id, true)
        }
    }

    /// The user dismissed the canvas.
    #[must_use]
    pub fn cancelled(instance_id: &str, reason: Option<String>) -> Self {
        Self {
            cancelled: Some(true),
            reason,
            ..Self::base(instance_id, true)
        }
    }

    /// The canvas is showing and nobody waits for it.
    #[must_use]
    pub fn displayed(instance_id: &str, pane_id: &str) -> Self {
        Self {
            pane_id: Some(pane_id.to_owned()),
            ..Self::base(instance_id, true)
        }
    }

    /// The run failed with `error`.
    #[must_use]
    pub fn failure(instance_id: &str, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::base(instance_id, false)
        }
    }

    /// Attach the hosting pane.
    #[must_use]
    pub fn with_pane(mut self, pane_id: Option<String>) -> Self {
        if self.pane_id.is_none() {
            self.pane_id = pane_id;
        }
        self
    }
}

/// Single-resolution state machine for one canvas instance.
#[derive(Debug, Clone)]
pub struct AwaitMachine {
    instance_id: String,
    state: InstanceState,
    result: Option<CanvasResult>,
}

impl AwaitMachine {
    /// Fresh machine in [`InstanceState::Spawning`].
    #[must_use]
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            state: InstanceState::Spawning,
            result: None,
        }
    }

    /// Instance identifier.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// Whether the outcome is fixed.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.state.is_terminal()
    }

    /// Record that the endpoint is bound.
    pub fn mark_listening(&mut self) {
        if self.state == InstanceState::Spawning {
            self.state = InstanceState::Listening;
        }
    }

    /// Feed one trigger through the machine.
    pub fn apply(&mut self, trigger: Trigger) -> Transition {
        if self.state.is_terminal() {
            debug!(instance_id = %self.instance_id, ?trigger, "instance already resolved, ignoring");
            return Transition::Ignored;
        }

        let id = self.instance_id.as_str();
        let (next, result) = match trigger {
            Trigger::PeerConnected => match self.state {
                InstanceState::Spawning | InstanceState::Listening => {
                    (InstanceState::PeerConnected, None)
                }
                _ => return Transition::Ignored,
            },
            Trigger::Message(message) => match message {
                CanvasMessage::Ready { scenario } => {
                    if self.state == InstanceState::AwaitingSelection {
                        return Transition::Ignored;
                    }
                    info!(instance_id = id, scenario = %scenario, "canvas ready");
                    (InstanceState::AwaitingSelection, None)
                }
                CanvasMessage::Selected { data } => (
                    InstanceState::Resolved,
                    Some(CanvasResult::selected(id, data)),
                ),
                CanvasMessage::Cancelled { reason } => (
                    InstanceState::Resolved,
                    Some(CanvasResult::cancelled(id, reason)),
                ),
                CanvasMessage::Error { message } => (
                    InstanceState::Resolved,
                    Some(CanvasResult::failure(id, message)),
                ),
                other => {
                    debug!(instance_id = id, tag = other.tag(), "non-terminal message");
                    return Transition::Ignored;
                }
            },
            Trigger::PeerDisconnected => (
                InstanceState::PeerDisconnected,
                Some(CanvasResult::failure(id, DISCONNECT_ERROR)),
            ),
            Trigger::Timeout => (
                InstanceState::TimedOut,
                Some(CanvasResult::failure(id, TIMEOUT_ERROR)),
            ),
            Trigger::Cancelled => (
                InstanceState::Resolved,
                Some(CanvasResult::failure(id, CANCELLED_ERROR)),
            ),
            Trigger::SpawnFailed(reason) => (
                InstanceState::SpawnFailed,
                Some(CanvasResult::failure(
                    id,
                    format!("failed to spawn canvas: {reason}"),
                )),
            ),
        };

        self.state = next;
        match result {
            Some(result) => {
                info!(
                    instance_id = %self.instance_id,
                    state = ?next,
                    success = result.success,
                    "instance resolved"
                );
                self.result = Some(result);
                Transition::Resolved(next)
            }
            None => Transition::Advanced(next),
        }
    }

    /// The fixed outcome, once resolved.
    #[must_use]
    pub fn result(&self) -> Option<&CanvasResult> {
        self.result.as_ref()
    }

    /// Consume the machine, returning the outcome if resolved.
    #[must_use]
    pub fn into_result(self) -> Option<CanvasResult> {
        self.result
    }
}
