//! Local IPC between the controller and a canvas process.
//!
//! The controller binds a Unix domain socket per canvas instance
//! ([`listener`]); the canvas dials it with bounded retry ([`connector`]).
//! Both sides exchange newline-delimited JSON envelopes ([`message`],
//! framed by [`codec`]).

pub mod codec;
pub mod connector;
pub mod endpoint;
pub mod listener;
pub mod message;

pub use codec::{decode_buffer, parse_line, to_line, Decoded, EnvelopeCodec};
pub use connector::{connect_with_retry, PeerConnection, PeerEvent, RetryPolicy};
pub use endpoint::endpoint_path;
pub use listener::{ListenerEvent, PeerId, PeerPolicy, ProtocolListener};
pub use message::{CanvasMessage, ControllerMessage, Envelope};
