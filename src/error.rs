//! Error types for the RelayMQ client libraries.
//!
//! Every failure is surfaced to the immediate caller as a typed result; the
//! client never retries internally and never swallows an error.

use std::time::Duration;

/// Errors establishing a client connection or session.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The endpoint could not be reached.
    #[error("I/O error connecting to {endpoint}: {source}")]
    Io {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The connection or session handshake did not complete in time.
    #[error("connection to {endpoint} timed out after {elapsed:?}")]
    Timeout { endpoint: String, elapsed: Duration },

    /// The session handshake was rejected or the transport failed mid-handshake.
    #[error("handshake with {endpoint} failed: {message}")]
    Handshake { endpoint: String, message: String },

    /// The configuration cannot name a reachable service.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The client was closed before the connection was established.
    #[error("client closed")]
    Closed,
}

/// Errors from the publish path of a [`TopicClient`](crate::topic::TopicClient).
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The broker connection failed or was lost.
    #[error("connection error: {message}")]
    Connection { message: String },

    /// The topic does not exist and auto-creation is disabled on the broker.
    #[error("topic '{topic}' does not exist")]
    TopicNotFound { topic: String },

    /// The record exceeds the configured size limit.
    #[error("record of {size} bytes exceeds maximum {max_size}")]
    MessageTooLarge { size: usize, max_size: usize },

    /// The broker rejected the record with a typed error code.
    #[error("broker error {code}: {message}")]
    Broker { code: i16, message: String },

    /// The request timed out waiting for the broker.
    #[error("publish timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The client was closed while the operation was outstanding.
    #[error("client closed")]
    ClientClosed,
}

/// Errors from the poll path of a [`TopicClient`](crate::topic::TopicClient).
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// The broker connection failed or was lost.
    #[error("connection error: {message}")]
    Connection { message: String },

    /// A fetched record could not be decoded into a string payload.
    #[error("deserialization error at {topic}/{partition}@{offset}: {message}")]
    Deserialization {
        topic: String,
        partition: u32,
        offset: u64,
        message: String,
    },

    /// The subscription could not be established for the configured topic.
    #[error("subscription rejected for topic '{topic}': {message}")]
    SubscriptionRejected { topic: String, message: String },

    /// The broker rejected a fetch with a typed error code.
    #[error("broker error {code}: {message}")]
    Broker { code: i16, message: String },

    /// The client was closed while the operation was outstanding.
    #[error("client closed")]
    ClientClosed,
}

/// Errors from [`CoordinationNodeClient`](crate::coord::CoordinationNodeClient)
/// node operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The path does not name an existing node.
    #[error("node '{path}' not found")]
    NotFound { path: String },

    /// A compare-and-set write observed a different version than expected.
    #[error("version conflict on '{path}': expected {expected}, current {current}")]
    VersionConflict {
        path: String,
        expected: i32,
        current: i32,
    },

    /// The server denied access to the node.
    #[error("access denied on '{path}'")]
    AccessDenied { path: String },

    /// The session terminated while the operation was outstanding.
    #[error("session closed")]
    SessionClosed,

    /// The transport to the coordination service failed.
    #[error("connection error: {message}")]
    Connection { message: String },

    /// The server sent a frame the client could not interpret.
    #[error("protocol error: {message}")]
    Protocol { message: String },
}

impl NodeError {
    pub(crate) fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub(crate) fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// True when the error means the node was absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True when the error came from a failed version check.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl PublishError {
    pub(crate) fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// True when the failure was in the transport rather than the request.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::ClientClosed)
    }
}

impl ConsumerError {
    pub(crate) fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// True when the failure was in the transport rather than the request.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::ClientClosed)
    }
}

/// Transport-level failure shared by both wire codecs.
///
/// Converted into the public error types at the operation that observed it.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A malformed frame was read or an unencodable value was written.
    #[error("codec error: {message}")]
    Codec { message: String },

    /// The peer closed the transport.
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    pub(crate) fn codec<S: Into<String>>(message: S) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }
}

impl From<TransportError> for PublishError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => Self::ClientClosed,
            other => Self::connection(other.to_string()),
        }
    }
}

impl From<TransportError> for ConsumerError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => Self::ClientClosed,
            other => Self::connection(other.to_string()),
        }
    }
}

impl From<TransportError> for NodeError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => Self::SessionClosed,
            TransportError::Codec { message } => Self::protocol(message),
            other => Self::connection(other.to_string()),
        }
    }
}
