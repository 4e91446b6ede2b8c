//! Controller-side protocol listener.
//!
//! Binds a Unix domain socket at a filesystem path using the `interprocess`
//! crate and relays envelopes in both directions:
//!
//! - inbound [`CanvasMessage`]s, connection changes, and malformed lines are
//!   delivered as [`ListenerEvent`]s on a channel read via
//!   [`ProtocolListener::next_event`];
//! - outbound [`ControllerMessage`]s passed to [`ProtocolListener::send`] are
//!   written to every connected peer.
//!
//! [`ProtocolListener::bind`] returns only after the socket is bound, so a
//! process launched afterwards always finds the endpoint listening.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use interprocess::local_socket::tokio::{prelude::*, Stream};
use interprocess::local_socket::{GenericFilePath, ListenerOptions, ToFsName};
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::ipc::codec::{Decoded, EnvelopeCodec};
use crate::ipc::endpoint::remove_artifact;
use crate::ipc::message::{CanvasMessage, ControllerMessage, Envelope};
use crate::{AppError, Result};

/// How long [`ProtocolListener::close`] waits for queued envelopes to flush.
const FLUSH_GRACE: Duration = Duration::from_millis(250);

/// Connection-order identifier of an accepted peer, starting at 1.
pub type PeerId = u64;

type PeerSenders = Arc<Mutex<HashMap<PeerId, mpsc::UnboundedSender<ControllerMessage>>>>;

/// Treatment of peers that connect after the first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerPolicy {
    /// Accept every peer and route its messages like the first one's.
    #[default]
    Relay,
    /// Drop any peer after the first as soon as it connects.
    #[serde(rename = "reject")]
    RejectAdditional,
}

/// Something that happened on the listener.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent {
    /// A peer connected.
    PeerConnected {
        /// Accepted peer.
        peer: PeerId,
    },
    /// A peer sent a well-formed envelope.
    Message {
        /// Sending peer.
        peer: PeerId,
        /// Decoded envelope.
        message: CanvasMessage,
    },
    /// A peer sent a line that could not be decoded.
    Malformed {
        /// Sending peer.
        peer: PeerId,
        /// Decode failure description.
        error: String,
    },
    /// A peer's stream closed.
    PeerDisconnected {
        /// Departed peer.
        peer: PeerId,
    },
    /// A peer was dropped by [`PeerPolicy::RejectAdditional`].
    PeerRejected {
        /// Rejected peer.
        peer: PeerId,
    },
}

/// Bound rendezvous endpoint for one canvas instance.
pub struct ProtocolListener {
    endpoint: PathBuf,
    peers: PeerSenders,
    events: mpsc::UnboundedReceiver<ListenerEvent>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl ProtocolListener {
    /// Remove any stale artifact at `endpoint`, bind, and start accepting.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the stale artifact cannot be removed or the
    /// socket cannot be bound.
    pub fn bind(endpoint: impl Into<PathBuf>, policy: PeerPolicy) -> Result<Self> {
        let endpoint = endpoint.into();
        remove_artifact(&endpoint)?;

        let name = endpoint
            .as_path()
            .to_fs_name::<GenericFilePath>()
            .map_err(|err| {
                AppError::Ipc(format!("invalid endpoint '{}': {err}", endpoint.display()))
            })?;

        let listener = ListenerOptions::new()
            .name(name)
            .create_tokio()
            .map_err(|err| {
                AppError::Ipc(format!(
                    "failed to bind endpoint '{}': {err}",
                    endpoint.display()
                ))
            })?;

        info!(endpoint = %endpoint.display(), ?policy, "protocol listener bound");

        let peers: PeerSenders = Arc::default();
        let (event_tx, events) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();

        let span = info_span!("protocol_listener", endpoint = %endpoint.display());
        tasks.spawn(
            accept_loop(
                listener,
                policy,
                Arc::clone(&peers),
                event_tx,
                cancel.clone(),
                tasks.clone(),
            )
            .instrument(span),
        );

        Ok(Self {
            endpoint,
            peers,
            events,
            cancel,
            tasks,
        })
    }

    /// Filesystem path of the bound socket.
    #[must_use]
    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Wait for the next listener event.
    ///
    /// Returns `None` once the listener has been closed and every event has
    /// been drained.
    pub async fn next_event(&mut self) -> Option<ListenerEvent> {
        self.events.recv().await
    }

    /// Queue `message` for every connected peer.
    ///
    /// Returns how many peers the message was queued for; zero when no peer
    /// is connected.
    pub async fn send(&self, message: &ControllerMessage) -> usize {
        let peers = self.peers.lock().await;
        let mut delivered = 0;
        for (peer, tx) in peers.iter() {
            if tx.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!(peer, tag = message.tag(), "peer writer already stopped");
            }
        }
        delivered
    }

    /// Number of currently connected peers.
    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }

    /// Stop accepting, flush queued envelopes, drop every peer, and delete
    /// the endpoint artifact.
    pub async fn close(mut self) {
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        self.cancel.cancel();
        // Dropping the senders lets each peer writer drain its queue and exit.
        self.peers.lock().await.clear();
        self.tasks.close();
        if tokio::time::timeout(FLUSH_GRACE, self.tasks.wait())
            .await
            .is_err()
        {
            debug!(endpoint = %self.endpoint.display(), "peer tasks still running at close");
        }
        self.events.close();

        if let Err(err) = remove_artifact(&self.endpoint) {
            warn!(%err, "failed to remove endpoint artifact");
        }
        info!(endpoint = %self.endpoint.display(), "protocol listener closed");
    }
}

impl Drop for ProtocolListener {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            let _ = remove_artifact(&self.endpoint);
        }
    }
}

/// Accept peers until cancelled.
async fn accept_loop(
    listener: interprocess::local_socket::tokio::Listener,
    policy: PeerPolicy,
    peers: PeerSenders,
    event_tx: mpsc::UnboundedSender<ListenerEvent>,
    cancel: CancellationToken,
    tasks: TaskTracker,
) {
    let mut next_peer: PeerId = 0;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("accept loop stopping");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok(stream) => {
                        next_peer += 1;
                        let peer = next_peer;

                        if policy == PeerPolicy::RejectAdditional && peer > 1 {
                            warn!(peer, "rejecting additional peer");
                            drop(stream);
                            let _ = event_tx.send(ListenerEvent::PeerRejected { peer });
                            continue;
                        }

                        let (out_tx, out_rx) = mpsc::unbounded_channel();
                        {
                            let mut guard = peers.lock().await;
                            // Closed between accept and registration.
                            if cancel.is_cancelled() {
                                break;
                            }
                            guard.insert(peer, out_tx);
                        }
                        info!(peer, "peer connected");
                        let _ = event_tx.send(ListenerEvent::PeerConnected { peer });

                        let span = info_span!("peer", peer);
                        tasks.spawn(
                            run_peer(peer, stream, out_rx, event_tx.clone(), Arc::clone(&peers))
                                .instrument(span),
                        );
                    }
                    Err(err) => {
                        warn!(%err, "accept failed");
                    }
                }
            }
        }
    }
}

/// Pump one peer connection in both directions.
///
/// Ends when the peer closes its stream, a transport error occurs, or the
/// outbound queue is closed by the listener.
async fn run_peer(
    peer: PeerId,
    stream: Stream,
    mut outbound: mpsc::UnboundedReceiver<ControllerMessage>,
    event_tx: mpsc::UnboundedSender<ListenerEvent>,
    peers: PeerSenders,
) {
    let (recv_half, send_half) = stream.split();
    let mut reader = FramedRead::new(recv_half, EnvelopeCodec::<CanvasMessage>::new());
    let mut writer = FramedWrite::new(send_half, EnvelopeCodec::<CanvasMessage>::new());
    let mut listener_closed = false;

    loop {
        tokio::select! {
            biased;

            msg = outbound.recv() => {
                let Some(message) = msg else {
                    listener_closed = true;
                    break;
                };
                debug!(tag = message.tag(), "sending envelope");
                if let Err(err) = writer.send(message).await {
                    warn!(%err, "write to peer failed");
                    break;
                }
            }

            item = reader.next() => {
                match item {
                    None => {
                        debug!("peer stream closed");
                        break;
                    }
                    Some(Ok(Decoded::Message(message))) => {
                        debug!(tag = message.tag(), "envelope received");
                        if event_tx.send(ListenerEvent::Message { peer, message }).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Decoded::Malformed(err))) => {
                        warn!(%err, "malformed envelope, skipping");
                        let _ = event_tx.send(ListenerEvent::Malformed {
                            peer,
                            error: err.to_string(),
                        });
                    }
                    Some(Err(err)) => {
                        warn!(%err, "peer stream error");
                        break;
                    }
                }
            }
        }
    }

    peers.lock().await.remove(&peer);
    if !listener_closed {
        info!(peer, "peer disconnected");
        let _ = event_tx.send(ListenerEvent::PeerDisconnected { peer });
    }
}
