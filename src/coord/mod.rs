//! Client for the RelayMQ coordination service.
//!
//! A [`CoordinationNodeClient`] owns one session against a strongly
//! consistent store of slash-delimited node paths, each holding a byte
//! payload and a version counter that strictly increases with every
//! successful write. Change notification is one-shot: a watch delivers at
//! most one event over its channel and must be re-registered to keep
//! observing.

pub mod protocol;

mod session;

pub use session::SessionState;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::{timeout, Instant};
use tracing::debug;

use crate::config::CoordConfig;
use crate::error::{ConnectError, NodeError};
use crate::metrics;

use protocol::{error_for, CoordOp, NodeStat, ReplyBody, ReplyFrame, ERR_NODE_EXISTS, ERR_NONE, VERSION_ANY};
use session::{Command, Session};

/// Version expectation for a compare-and-set write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Write regardless of the node's current version.
    Any,
    /// Write only if the node's version equals this value.
    Exact(i32),
}

impl ExpectedVersion {
    fn to_wire(self) -> i32 {
        match self {
            ExpectedVersion::Any => VERSION_ANY,
            ExpectedVersion::Exact(version) => version,
        }
    }
}

/// Kinds of node change a watch can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// The node's data (and therefore version) changed.
    DataChanged,
}

/// A change notification. Carries no payload: the observer re-reads the node
/// to see the new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: String,
    pub kind: WatchEventKind,
}

/// Handle to a one-shot watch registration.
///
/// Resolves at most once, and only after a write that bumped the watched
/// node's version. If the session closes first, the handle resolves to
/// [`NodeError::SessionClosed`] and the event is never delivered.
#[derive(Debug)]
pub struct NodeWatch {
    path: String,
    rx: oneshot::Receiver<WatchEvent>,
}

impl NodeWatch {
    /// The watched path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the change notification.
    pub async fn changed(self) -> Result<WatchEvent, NodeError> {
        self.rx.await.map_err(|_| NodeError::SessionClosed)
    }
}

/// Client for node CRUD and one-shot change watches.
pub struct CoordinationNodeClient {
    config: CoordConfig,
    session: Session,
    watch_ids: AtomicU64,
}

impl CoordinationNodeClient {
    /// Start connecting to the coordination service.
    ///
    /// The TCP connect and session handshake proceed in the background;
    /// operations submitted before the handshake completes are queued and
    /// served once the session is synchronized. Use
    /// [`wait_connected`](Self::wait_connected) to observe the outcome.
    pub fn connect(config: CoordConfig) -> Self {
        let session = Session::spawn(config.clone());
        Self {
            config,
            session,
            watch_ids: AtomicU64::new(0),
        }
    }

    /// Suspend until the session reaches the connected state, the session
    /// fails, or `wait` elapses.
    pub async fn wait_connected(&self, wait: Duration) -> Result<(), ConnectError> {
        let deadline = Instant::now() + wait;
        let mut state_rx = self.session.state_receiver();

        loop {
            let state = state_rx.borrow().clone();
            match state {
                SessionState::Connected { .. } => return Ok(()),
                SessionState::Failed { message } => {
                    return Err(ConnectError::Handshake {
                        endpoint: self.config.address.clone(),
                        message,
                    })
                }
                SessionState::Closed => return Err(ConnectError::Closed),
                SessionState::Connecting => {}
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ConnectError::Timeout {
                    endpoint: self.config.address.clone(),
                    elapsed: wait,
                });
            }
            match timeout(remaining, state_rx.changed()).await {
                Err(_) => {
                    return Err(ConnectError::Timeout {
                        endpoint: self.config.address.clone(),
                        elapsed: wait,
                    })
                }
                Ok(Err(_)) => return Err(ConnectError::Closed),
                Ok(Ok(())) => {}
            }
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Create the node with `initial` data if it does not exist.
    ///
    /// Idempotent: an existing node is left untouched, so the data always
    /// reflects the first successful creation. Losing a creation race to a
    /// concurrent client counts as success for the same reason.
    pub async fn ensure_node<D: Into<Bytes>>(
        &self,
        path: &str,
        initial: D,
    ) -> Result<(), NodeError> {
        if self.stat_node(path).await?.is_some() {
            return Ok(());
        }

        let reply = self
            .request(CoordOp::Create {
                path: path.to_string(),
                data: initial.into(),
            })
            .await?;

        match reply.error_code {
            ERR_NONE | ERR_NODE_EXISTS => {
                debug!(path, "node ensured");
                Ok(())
            }
            _ => Err(error_for(&reply, path, VERSION_ANY)),
        }
    }

    /// Probe a node's existence, returning its current version if present.
    pub async fn stat_node(&self, path: &str) -> Result<Option<NodeStat>, NodeError> {
        let reply = self
            .request(CoordOp::Exists {
                path: path.to_string(),
            })
            .await?;

        if reply.error_code != ERR_NONE {
            return Err(error_for(&reply, path, VERSION_ANY));
        }
        match reply.body {
            ReplyBody::Exists { stat } => Ok(stat),
            other => Err(NodeError::protocol(format!(
                "unexpected reply to exists: {other:?}"
            ))),
        }
    }

    /// Read the node's data.
    pub async fn read_node(&self, path: &str) -> Result<Bytes, NodeError> {
        let reply = self
            .request(CoordOp::GetData {
                path: path.to_string(),
            })
            .await?;

        if reply.error_code != ERR_NONE {
            return Err(error_for(&reply, path, VERSION_ANY));
        }
        match reply.body {
            ReplyBody::GetData { data, .. } => Ok(data),
            other => Err(NodeError::protocol(format!(
                "unexpected reply to get-data: {other:?}"
            ))),
        }
    }

    /// Register a one-shot watch for the node's next data change.
    ///
    /// The returned handle resolves once, after a write that bumps the
    /// node's version; the event carries no payload and the observer
    /// re-reads the node. Fails with [`NodeError::NotFound`] for an absent
    /// path.
    pub async fn watch_node(&self, path: &str) -> Result<NodeWatch, NodeError> {
        let id = self.watch_ids.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        // Register locally before the server does, so an event racing the
        // registration reply cannot be dropped.
        self.session
            .send(Command::RegisterWatch {
                path: path.to_string(),
                id,
                tx,
            })
            .map_err(|_| NodeError::SessionClosed)?;

        let outcome = self
            .request(CoordOp::Watch {
                path: path.to_string(),
            })
            .await;

        let unregister = |client: &Self| {
            let _ = client.session.send(Command::UnregisterWatch {
                path: path.to_string(),
                id,
            });
        };

        match outcome {
            Ok(reply) if reply.error_code == ERR_NONE => {
                metrics::global().record_watch_registered();
                debug!(path, "watch registered");
                Ok(NodeWatch {
                    path: path.to_string(),
                    rx,
                })
            }
            Ok(reply) => {
                unregister(self);
                Err(error_for(&reply, path, VERSION_ANY))
            }
            Err(e) => {
                unregister(self);
                Err(e)
            }
        }
    }

    /// Write the node's data, compare-and-set on version.
    ///
    /// [`ExpectedVersion::Any`] skips the check. On a mismatch the write
    /// fails with [`NodeError::VersionConflict`] and the stored data is
    /// unchanged. Returns the node's new version.
    pub async fn write_node<D: Into<Bytes>>(
        &self,
        path: &str,
        data: D,
        expected: ExpectedVersion,
    ) -> Result<i32, NodeError> {
        let expected_version = expected.to_wire();
        let reply = self
            .request(CoordOp::SetData {
                path: path.to_string(),
                data: data.into(),
                expected_version,
            })
            .await?;

        if reply.error_code != ERR_NONE {
            return Err(error_for(&reply, path, expected_version));
        }
        match reply.body {
            ReplyBody::SetData { version } => {
                debug!(path, version, "node written");
                Ok(version)
            }
            other => Err(NodeError::protocol(format!(
                "unexpected reply to set-data: {other:?}"
            ))),
        }
    }

    /// Terminate the session.
    ///
    /// Outstanding operations fail with [`NodeError::SessionClosed`];
    /// registered watches are discarded and never fire.
    pub async fn close(self) {
        self.session.shutdown().await;
    }

    async fn request(&self, op: CoordOp) -> Result<ReplyFrame, NodeError> {
        metrics::global().record_node_op();

        let (tx, rx) = oneshot::channel();
        self.session
            .send(Command::Request(op, tx))
            .map_err(|_| NodeError::SessionClosed)?;

        // Requests queued behind the handshake need the connect timeout on
        // top of the session's own.
        let bound = self.config.connection_timeout + self.config.session_timeout;
        match timeout(bound, rx).await {
            Err(_) => Err(NodeError::connection(format!(
                "request to {} timed out after {bound:?}",
                self.config.address
            ))),
            Ok(Err(_)) => Err(NodeError::SessionClosed),
            Ok(Ok(result)) => result.map_err(NodeError::from),
        }
    }
}
