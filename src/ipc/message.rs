//! Wire envelopes exchanged over the rendezvous socket.
//!
//! Every envelope is a JSON object discriminated by its `type` field.
//! Tags the receiving side does not know decode to an `Unknown` variant
//! instead of failing, so newer canvases can talk to older controllers.
//!
//! | Direction           | Tags                                                        |
//! |---------------------|-------------------------------------------------------------|
//! | controller → canvas | `update`, `close`, `ping`, `getSelection`, `getContent`     |
//! | canvas → controller | `ready`, `selected`, `cancelled`, `error`, `pong`, `selection`, `content` |

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Behaviour shared by both envelope directions.
pub trait Envelope: Serialize + DeserializeOwned + Send + 'static {
    /// Wire tag of this envelope.
    fn tag(&self) -> &'static str;

    /// Whether the envelope carried a tag this side does not understand.
    fn is_unknown(&self) -> bool {
        self.tag() == "unknown"
    }
}

/// Envelope sent by a canvas process to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CanvasMessage {
    /// Canvas connected and is interactive.
    Ready {
        /// Scenario the canvas is rendering.
        scenario: String,
    },
    /// User made a selection.
    Selected {
        /// Canvas-specific selection payload.
        #[serde(default)]
        data: Value,
    },
    /// User dismissed the canvas without choosing.
    Cancelled {
        /// Optional human-readable reason.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Canvas failed.
    Error {
        /// Failure description.
        message: String,
    },
    /// Reply to [`ControllerMessage::Ping`].
    Pong,
    /// Reply to [`ControllerMessage::GetSelection`].
    Selection {
        /// Current selection, `null` when nothing is selected.
        #[serde(default)]
        data: Value,
    },
    /// Reply to [`ControllerMessage::GetContent`].
    Content {
        /// Current canvas content.
        #[serde(default)]
        data: Value,
    },
    /// Tag not recognised by this build.
    #[serde(other)]
    Unknown,
}

impl CanvasMessage {
    /// Whether this message ends an instance.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Selected { .. } | Self::Cancelled { .. } | Self::Error { .. }
        )
    }
}

impl Envelope for CanvasMessage {
    fn tag(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Selected { .. } => "selected",
            Self::Cancelled { .. } => "cancelled",
            Self::Error { .. } => "error",
            Self::Pong => "pong",
            Self::Selection { .. } => "selection",
            Self::Content { .. } => "content",
            Self::Unknown => "unknown",
        }
    }
}

/// Envelope sent by the controller to a canvas process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControllerMessage {
    /// Replace the canvas configuration.
    Update {
        /// Opaque canvas configuration.
        #[serde(default)]
        config: Value,
    },
    /// Ask the canvas to exit.
    Close,
    /// Liveness probe.
    Ping,
    /// Ask for the current selection.
    GetSelection,
    /// Ask for the current content.
    GetContent,
    /// Tag not recognised by this build.
    #[serde(other)]
    Unknown,
}

impl Envelope for ControllerMessage {
    fn tag(&self) -> &'static str {
        match self {
            Self::Update { .. } => "update",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::GetSelection => "getSelection",
            Self::GetContent => "getContent",
            Self::Unknown => "unknown",
        }
    }
}
