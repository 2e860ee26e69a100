//! Configuration types for the RelayMQ clients.
//!
//! Every knob is carried by an explicit configuration value passed at
//! construction; there are no process-wide constants.

use std::time::Duration;

/// Where a subscription with no committed position starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Start from the earliest record the broker still retains.
    Earliest,
    /// Start after the last record present at subscription time.
    Latest,
}

/// How the consumer position advances after a poll.
///
/// The policy is always explicit; neither value is implied by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPolicy {
    /// Every successful poll commits the new position.
    Auto,
    /// Polls re-deliver from the committed position until
    /// [`TopicClient::commit`](crate::topic::TopicClient::commit) is called.
    Manual,
}

/// Configuration for a [`TopicClient`](crate::topic::TopicClient).
#[derive(Debug, Clone)]
pub struct TopicConfig {
    /// Single bootstrap broker address, `host:port`.
    pub broker: String,
    /// The one topic this client publishes to and polls from.
    pub topic: String,
    /// Client identifier sent in every request header.
    pub client_id: Option<String>,
    /// TCP connect timeout.
    pub connection_timeout: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Producer acknowledgement level (0, 1, -1/all).
    pub acks: i16,
    /// Maximum accepted record value size in bytes.
    pub max_message_size: usize,
    /// Start position for a subscription with no committed offsets.
    pub start_position: StartPosition,
    /// Position commit policy.
    pub commit_policy: CommitPolicy,
    /// Maximum bytes returned by one fetch.
    pub fetch_max_bytes: u32,
    /// How long the broker may hold one fetch waiting for data.
    pub fetch_max_wait: Duration,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            broker: "localhost:9092".to_string(),
            topic: String::new(),
            client_id: None,
            connection_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            acks: 1,
            max_message_size: 1024 * 1024,
            start_position: StartPosition::Earliest,
            commit_policy: CommitPolicy::Manual,
            fetch_max_bytes: 4 * 1024 * 1024,
            fetch_max_wait: Duration::from_millis(500),
        }
    }
}

impl TopicConfig {
    /// Create a builder.
    pub fn builder() -> TopicConfigBuilder {
        TopicConfigBuilder::new()
    }

    /// Convenience constructor for the common case.
    pub fn new<B: Into<String>, T: Into<String>>(broker: B, topic: T) -> Self {
        Self {
            broker: broker.into(),
            topic: topic.into(),
            ..Self::default()
        }
    }
}

/// Builder for [`TopicConfig`].
#[derive(Debug, Default)]
pub struct TopicConfigBuilder {
    config: TopicConfig,
}

impl TopicConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broker<S: Into<String>>(mut self, broker: S) -> Self {
        self.config.broker = broker.into();
        self
    }

    pub fn topic<S: Into<String>>(mut self, topic: S) -> Self {
        self.config.topic = topic.into();
        self
    }

    pub fn client_id<S: Into<String>>(mut self, client_id: S) -> Self {
        self.config.client_id = Some(client_id.into());
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn acks(mut self, acks: i16) -> Self {
        self.config.acks = acks;
        self
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    pub fn start_position(mut self, position: StartPosition) -> Self {
        self.config.start_position = position;
        self
    }

    pub fn commit_policy(mut self, policy: CommitPolicy) -> Self {
        self.config.commit_policy = policy;
        self
    }

    pub fn fetch_max_bytes(mut self, max_bytes: u32) -> Self {
        self.config.fetch_max_bytes = max_bytes;
        self
    }

    pub fn fetch_max_wait(mut self, max_wait: Duration) -> Self {
        self.config.fetch_max_wait = max_wait;
        self
    }

    pub fn build(self) -> TopicConfig {
        self.config
    }
}

/// Configuration for a
/// [`CoordinationNodeClient`](crate::coord::CoordinationNodeClient).
#[derive(Debug, Clone)]
pub struct CoordConfig {
    /// Coordination service address, `host:port`.
    pub address: String,
    /// Session timeout negotiated with the server.
    pub session_timeout: Duration,
    /// TCP connect timeout.
    pub connection_timeout: Duration,
}

impl Default for CoordConfig {
    fn default() -> Self {
        Self {
            address: "localhost:2181".to_string(),
            session_timeout: Duration::from_secs(3),
            connection_timeout: Duration::from_secs(10),
        }
    }
}

impl CoordConfig {
    /// Create a builder.
    pub fn builder() -> CoordConfigBuilder {
        CoordConfigBuilder::new()
    }

    /// Convenience constructor for the common case.
    pub fn new<S: Into<String>>(address: S) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }
}

/// Builder for [`CoordConfig`].
#[derive(Debug, Default)]
pub struct CoordConfigBuilder {
    config: CoordConfig,
}

impl CoordConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address<S: Into<String>>(mut self, address: S) -> Self {
        self.config.address = address.into();
        self
    }

    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    pub fn build(self) -> CoordConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_config_builder() {
        let config = TopicConfig::builder()
            .broker("broker1:9092")
            .topic("events")
            .client_id("test-client")
            .connection_timeout(Duration::from_secs(10))
            .acks(-1)
            .commit_policy(CommitPolicy::Auto)
            .start_position(StartPosition::Latest)
            .build();

        assert_eq!(config.broker, "broker1:9092");
        assert_eq!(config.topic, "events");
        assert_eq!(config.client_id, Some("test-client".to_string()));
        assert_eq!(config.connection_timeout, Duration::from_secs(10));
        assert_eq!(config.acks, -1);
        assert_eq!(config.commit_policy, CommitPolicy::Auto);
        assert_eq!(config.start_position, StartPosition::Latest);
    }

    #[test]
    fn topic_config_defaults_are_explicit() {
        let config = TopicConfig::new("localhost:9092", "demo-topic");
        assert_eq!(config.start_position, StartPosition::Earliest);
        assert_eq!(config.commit_policy, CommitPolicy::Manual);
        assert_eq!(config.max_message_size, 1024 * 1024);
    }

    #[test]
    fn coord_config_builder() {
        let config = CoordConfig::builder()
            .address("coord1:2181")
            .session_timeout(Duration::from_millis(3000))
            .build();

        assert_eq!(config.address, "coord1:2181");
        assert_eq!(config.session_timeout, Duration::from_millis(3000));
    }
}
