//! Coordination session actor.
//!
//! One task owns the framed transport, the pending-request table and the
//! local watch registry. Server-pushed watch events are routed here to the
//! one-shot channels handed out by
//! [`watch_node`](super::CoordinationNodeClient::watch_node); no caller code
//! ever runs on this task.

use std::collections::HashMap;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::protocol::{
    CoordOp, CorrelationId, EventFrame, Inbound, ReplyBody, ReplyFrame, RequestFrame,
    SessionCodec, EVENT_DATA_CHANGED, ERR_NONE,
};
use super::{WatchEvent, WatchEventKind};
use crate::config::CoordConfig;
use crate::error::TransportError;
use crate::metrics;

/// Observable lifecycle of a coordination session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Transport and handshake in progress.
    Connecting,
    /// Handshake complete; the session is synchronized with the server.
    Connected { session_id: u64 },
    /// The transport or handshake failed; the session is unusable.
    Failed { message: String },
    /// The client closed the session.
    Closed,
}

pub(super) enum Command {
    Request(CoordOp, oneshot::Sender<Result<ReplyFrame, TransportError>>),
    RegisterWatch {
        path: String,
        id: u64,
        tx: oneshot::Sender<WatchEvent>,
    },
    UnregisterWatch {
        path: String,
        id: u64,
    },
    Shutdown,
}

pub(super) struct Session {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<SessionState>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Session {
    /// Spawn the session actor; the handshake proceeds in the background and
    /// commands submitted before it completes are served after it.
    pub(super) fn spawn(config: CoordConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);

        let handle = tokio::spawn(run(config, cmd_rx, state_tx));

        Self {
            cmd_tx,
            state_rx,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub(super) fn send(&self, command: Command) -> Result<(), TransportError> {
        self.cmd_tx
            .send(command)
            .map_err(|_| TransportError::Closed)
    }

    pub(super) fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    pub(super) fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Terminate the session. Outstanding operations fail with a
    /// session-closed error and registered watches are discarded unfired.
    pub(super) async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn run(
    config: CoordConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<SessionState>,
) {
    match establish(&config).await {
        Ok((framed, session_id)) => {
            metrics::global().record_connection_created();
            info!(address = %config.address, session_id, "coordination session connected");
            let _ = state_tx.send(SessionState::Connected { session_id });
            serve(&config.address, framed, &mut cmd_rx, &state_tx).await;
        }
        Err(message) => {
            metrics::global().record_connection_failed();
            warn!(address = %config.address, %message, "coordination session failed");
            let _ = state_tx.send(SessionState::Failed { message });
        }
    }

    // Fail anything still queued rather than letting callers hang.
    cmd_rx.close();
    while let Some(command) = cmd_rx.recv().await {
        if let Command::Request(_, reply) = command {
            let _ = reply.send(Err(TransportError::Closed));
        }
    }
}

async fn establish(
    config: &CoordConfig,
) -> Result<(Framed<TcpStream, SessionCodec>, u64), String> {
    let stream = match timeout(
        config.connection_timeout,
        TcpStream::connect(&config.address),
    )
    .await
    {
        Err(_) => {
            return Err(format!(
                "connect to {} timed out after {:?}",
                config.address, config.connection_timeout
            ))
        }
        Ok(Err(e)) => return Err(format!("connect to {} failed: {e}", config.address)),
        Ok(Ok(stream)) => stream,
    };

    let mut framed = Framed::new(stream, SessionCodec);
    let handshake = RequestFrame {
        correlation_id: 0,
        op: CoordOp::Connect {
            session_timeout_ms: config.session_timeout.as_millis() as u32,
        },
    };
    if let Err(e) = framed.send(handshake).await {
        return Err(format!("handshake send failed: {e}"));
    }

    let reply = match timeout(config.connection_timeout, framed.next()).await {
        Err(_) => return Err("handshake timed out".to_string()),
        Ok(None) => return Err("server closed the connection during handshake".to_string()),
        Ok(Some(Err(e))) => return Err(format!("handshake failed: {e}")),
        Ok(Some(Ok(Inbound::Event(event)))) => {
            return Err(format!("unexpected event during handshake: {event:?}"))
        }
        Ok(Some(Ok(Inbound::Reply(reply)))) => reply,
    };

    if reply.error_code != ERR_NONE {
        return Err(format!(
            "handshake rejected with error code {}",
            reply.error_code
        ));
    }
    match reply.body {
        ReplyBody::Connect { session_id } => Ok((framed, session_id)),
        other => Err(format!("malformed handshake reply: {other:?}")),
    }
}

async fn serve(
    address: &str,
    mut framed: Framed<TcpStream, SessionCodec>,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    state_tx: &watch::Sender<SessionState>,
) {
    let mut pending: HashMap<CorrelationId, oneshot::Sender<Result<ReplyFrame, TransportError>>> =
        HashMap::new();
    let mut watches: HashMap<String, Vec<(u64, oneshot::Sender<WatchEvent>)>> = HashMap::new();
    let mut next_correlation: CorrelationId = 1;

    loop {
        tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(Command::Request(op, reply)) => {
                    let id = next_correlation;
                    // Correlation ids stay positive; -1 is the event sentinel.
                    next_correlation = if next_correlation == CorrelationId::MAX {
                        1
                    } else {
                        next_correlation + 1
                    };

                    let frame = RequestFrame { correlation_id: id, op };
                    debug!(address, correlation_id = id, "sending coordination request");
                    if let Err(e) = framed.send(frame).await {
                        warn!(address, error = %e, "send failed, session lost");
                        metrics::global().record_connection_error();
                        let _ = reply.send(Err(e));
                        let _ = state_tx.send(SessionState::Failed {
                            message: "transport failure".to_string(),
                        });
                        fail_pending(&mut pending);
                        return;
                    }
                    pending.insert(id, reply);
                }
                Some(Command::RegisterWatch { path, id, tx }) => {
                    watches.entry(path).or_default().push((id, tx));
                }
                Some(Command::UnregisterWatch { path, id }) => {
                    if let Some(list) = watches.get_mut(&path) {
                        list.retain(|(watch_id, _)| *watch_id != id);
                        if list.is_empty() {
                            watches.remove(&path);
                        }
                    }
                }
                Some(Command::Shutdown) | None => {
                    info!(address, "coordination session closed");
                    let _ = state_tx.send(SessionState::Closed);
                    fail_pending(&mut pending);
                    // Dropping the registry discards outstanding watches;
                    // their handles resolve to a session-closed error.
                    return;
                }
            },
            frame = framed.next() => match frame {
                Some(Ok(Inbound::Reply(reply))) => {
                    match pending.remove(&reply.correlation_id) {
                        Some(tx) => {
                            let _ = tx.send(Ok(reply));
                        }
                        None => {
                            warn!(
                                address,
                                correlation_id = reply.correlation_id,
                                "reply with no pending request"
                            );
                        }
                    }
                }
                Some(Ok(Inbound::Event(event))) => {
                    dispatch_event(&mut watches, event);
                }
                Some(Err(e)) => {
                    warn!(address, error = %e, "transport error, session lost");
                    metrics::global().record_connection_error();
                    let _ = state_tx.send(SessionState::Failed { message: e.to_string() });
                    fail_pending(&mut pending);
                    return;
                }
                None => {
                    debug!(address, "server closed the session");
                    let _ = state_tx.send(SessionState::Failed {
                        message: "server closed the session".to_string(),
                    });
                    fail_pending(&mut pending);
                    return;
                }
            },
        }
    }
}

fn dispatch_event(
    watches: &mut HashMap<String, Vec<(u64, oneshot::Sender<WatchEvent>)>>,
    event: EventFrame,
) {
    let kind = match event.kind {
        EVENT_DATA_CHANGED => WatchEventKind::DataChanged,
        other => {
            warn!(path = %event.path, kind = other, "unknown watch event kind");
            return;
        }
    };

    match watches.remove(&event.path) {
        Some(registrations) => {
            metrics::global().record_watches_fired(registrations.len() as u64);
            debug!(path = %event.path, count = registrations.len(), "watch event delivered");
            for (_, tx) in registrations {
                // Each registration fires exactly once; an abandoned handle
                // makes this a silent drop.
                let _ = tx.send(WatchEvent {
                    path: event.path.clone(),
                    kind,
                });
            }
        }
        None => {
            debug!(path = %event.path, "watch event with no local registration");
        }
    }
}

fn fail_pending(
    pending: &mut HashMap<CorrelationId, oneshot::Sender<Result<ReplyFrame, TransportError>>>,
) {
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(TransportError::Closed));
    }
}
