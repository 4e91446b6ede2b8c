//! Canvas-side peer connector.
//!
//! A canvas process may start before its controller has finished binding,
//! so [`connect_with_retry`] dials the endpoint with a fixed delay between
//! attempts. Once connected, a background task pumps envelopes: outbound
//! [`CanvasMessage`]s queued with [`PeerConnection::send`] are written to
//! the socket and inbound [`ControllerMessage`]s are delivered through
//! [`PeerConnection::recv`].
//!
//! The connector never announces itself: callers must send
//! [`CanvasMessage::Ready`] right after a successful connect.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use interprocess::local_socket::tokio::{prelude::*, Stream};
use interprocess::local_socket::{GenericFilePath, ToFsName};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::ipc::codec::{Decoded, EnvelopeCodec};
use crate::ipc::message::{CanvasMessage, ControllerMessage, Envelope};
use crate::{AppError, Result};

/// How long [`PeerConnection::close`] waits for queued envelopes to flush.
const FLUSH_GRACE: Duration = Duration::from_millis(250);

/// Fixed-backoff connection schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connection attempts, including the first.
    pub max_attempts: u32,
    /// Pause after each failed attempt.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_millis(100),
        }
    }
}

/// Inbound traffic from the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A decoded control envelope.
    Message(ControllerMessage),
    /// A line that could not be decoded.
    Malformed(String),
}

/// Live connection from a canvas to its controller.
#[derive(Debug)]
pub struct PeerConnection {
    endpoint: PathBuf,
    outbound: mpsc::UnboundedSender<CanvasMessage>,
    inbound: mpsc::UnboundedReceiver<PeerEvent>,
    pump: JoinHandle<()>,
}

impl PeerConnection {
    /// Endpoint this connection dialled.
    #[must_use]
    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Queue an envelope for the controller.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the connection has already closed.
    pub fn send(&self, message: CanvasMessage) -> Result<()> {
        let tag = message.tag();
        self.outbound
            .send(message)
            .map_err(|_| AppError::Ipc(format!("connection closed, cannot send `{tag}`")))
    }

    /// Wait for the next inbound event.
    ///
    /// Returns `None` once the controller has closed the stream.
    pub async fn recv(&mut self) -> Option<PeerEvent> {
        self.inbound.recv().await
    }

    /// Flush queued envelopes and close the stream.
    pub async fn close(self) {
        let Self {
            endpoint,
            outbound,
            inbound,
            mut pump,
        } = self;
        drop(outbound);
        drop(inbound);

        if tokio::time::timeout(FLUSH_GRACE, &mut pump).await.is_err() {
            debug!(endpoint = %endpoint.display(), "connection pump did not finish, aborting");
            pump.abort();
        }
    }
}

/// Dial `endpoint`, retrying on failure according to `policy`.
///
/// Sleeps `policy.delay` after every failed attempt, so an endpoint that
/// never appears fails after roughly `max_attempts * delay`.
///
/// # Errors
///
/// Returns `AppError::Connect` once every attempt has failed, and
/// `AppError::Ipc` if `endpoint` is not a valid socket path.
pub async fn connect_with_retry(endpoint: &Path, policy: RetryPolicy) -> Result<PeerConnection> {
    let span = info_span!("connect", endpoint = %endpoint.display());
    async move {
        let attempts = policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let name = endpoint.to_fs_name::<GenericFilePath>().map_err(|err| {
                AppError::Ipc(format!("invalid endpoint '{}': {err}", endpoint.display()))
            })?;

            match Stream::connect(name).await {
                Ok(stream) => {
                    info!(attempt, "connected to controller");
                    return Ok(start_pump(endpoint.to_path_buf(), stream));
                }
                Err(err) => {
                    debug!(attempt, %err, "connection attempt failed");
                    last_error = err.to_string();
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }

        warn!(attempts, error = %last_error, "giving up on controller endpoint");
        Err(AppError::Connect(format!(
            "could not reach {} after {attempts} attempts: {last_error}",
            endpoint.display()
        )))
    }
    .instrument(span)
    .await
}

fn start_pump(endpoint: PathBuf, stream: Stream) -> PeerConnection {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let span = info_span!("peer_connection", endpoint = %endpoint.display());
    let pump = tokio::spawn(run_pump(stream, out_rx, in_tx).instrument(span));

    PeerConnection {
        endpoint,
        outbound: out_tx,
        inbound: in_rx,
        pump,
    }
}

async fn run_pump(
    stream: Stream,
    mut outbound: mpsc::UnboundedReceiver<CanvasMessage>,
    inbound: mpsc::UnboundedSender<PeerEvent>,
) {
    let (recv_half, send_half) = stream.split();
    let mut reader = FramedRead::new(recv_half, EnvelopeCodec::<ControllerMessage>::new());
    let mut writer = FramedWrite::new(send_half, EnvelopeCodec::<ControllerMessage>::new());

    loop {
        tokio::select! {
            biased;

            msg = outbound.recv() => {
                let Some(message) = msg else {
                    debug!("outbound queue closed");
                    break;
                };
                if let Err(err) = writer.send(message).await {
                    warn!(%err, "write to controller failed");
                    break;
                }
            }

            item = reader.next() => {
                match item {
                    None => {
                        debug!("controller closed the stream");
                        break;
                    }
                    Some(Ok(Decoded::Message(message))) => {
                        // The receiver may already be gone during close.
                        let _ = inbound.send(PeerEvent::Message(message));
                    }
                    Some(Ok(Decoded::Malformed(err))) => {
                        warn!(%err, "malformed envelope from controller, skipping");
                        let _ = inbound.send(PeerEvent::Malformed(err.to_string()));
                    }
                    Some(Err(err)) => {
                        warn!(%err, "controller stream error");
                        break;
                    }
                }
            }
        }
    }
}
