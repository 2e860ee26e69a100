//! Single-topic publish/poll client for the RelayMQ broker.
//!
//! A [`TopicClient`] owns one connection to one bootstrap broker and works
//! against one topic. Publishing is a non-blocking enqueue whose completion
//! is observed through the returned [`Delivery`]; polling is a blocking call
//! bounded by an explicit timeout. A client instance is one logical session:
//! `poll` must not be called concurrently with itself.

pub mod protocol;

mod connection;
mod consumer;
mod producer;

pub use producer::Delivery;

use parking_lot::Mutex;

use crate::config::TopicConfig;
use crate::error::ConnectError;

use connection::Connection;
use consumer::SubscriptionState;

/// A record returned from [`TopicClient::poll`].
///
/// Immutable snapshot; partition and offset were assigned by the broker when
/// the record was published.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicRecord {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: Option<String>,
    pub value: String,
    pub timestamp: u64,
}

/// Broker-assigned placement of a published record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

/// Client for publishing to and polling from a single topic.
pub struct TopicClient {
    config: TopicConfig,
    connection: Connection,
    subscription: Mutex<Option<SubscriptionState>>,
}

impl TopicClient {
    /// Connect to the configured bootstrap broker.
    ///
    /// The subscription itself is resolved lazily on the first
    /// [`poll`](Self::poll).
    pub async fn connect(config: TopicConfig) -> Result<Self, ConnectError> {
        if config.topic.is_empty() {
            return Err(ConnectError::InvalidConfig {
                message: "a topic must be configured".to_string(),
            });
        }

        let connection = Connection::open(&config.broker, config.connection_timeout).await?;

        Ok(Self {
            config,
            connection,
            subscription: Mutex::new(None),
        })
    }

    /// The topic this client publishes to and polls from.
    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    /// Whether the broker connection is still accepting requests.
    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    /// Flush outstanding sends, then release the connection.
    ///
    /// Requests already enqueued are delivered before the transport is
    /// released; the drain is bounded by the configured request timeout.
    /// [`Delivery`] handles outstanding at that point resolve to a
    /// client-closed error rather than hang.
    pub async fn close(self) {
        self.connection.close(self.config.request_timeout).await;
    }
}
