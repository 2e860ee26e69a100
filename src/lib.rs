//! # RelayMQ Client Library
//!
//! Async Rust clients for the RelayMQ message broker and its companion
//! coordination service.
//!
//! Two independent clients, each one logical session over one connection:
//!
//! - [`topic::TopicClient`]: publish to and poll from a single topic on a
//!   single bootstrap broker. Publishing is a non-blocking enqueue with the
//!   broker acknowledgement delivered through a [`topic::Delivery`] handle;
//!   polling is a blocking call bounded by an explicit timeout.
//! - [`coord::CoordinationNodeClient`]: node CRUD and one-shot data-change
//!   watches against a strongly consistent coordination store, with watch
//!   events delivered over channels the caller drains.
//!
//! All failures surface as typed results ([`error`]); nothing is retried or
//! swallowed internally.
//!
//! ## Publish and poll
//!
//! ```rust,no_run
//! use relaymq_client::config::TopicConfig;
//! use relaymq_client::topic::TopicClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = TopicClient::connect(TopicConfig::new("localhost:9092", "demo-topic")).await?;
//!
//!     let delivery = client.publish("Hello from RelayMQ!")?;
//!     let metadata = delivery.wait().await?;
//!     println!("sent to {} at offset {}", metadata.topic, metadata.offset);
//!
//!     for record in client.poll(Duration::from_secs(5)).await? {
//!         println!("received {} at offset {}", record.value, record.offset);
//!     }
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Coordination nodes
//!
//! ```rust,no_run
//! use relaymq_client::config::CoordConfig;
//! use relaymq_client::coord::{CoordinationNodeClient, ExpectedVersion};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = CoordinationNodeClient::connect(CoordConfig::new("localhost:2181"));
//!     client.wait_connected(Duration::from_secs(5)).await?;
//!
//!     client.ensure_node("/myapp", "hello").await?;
//!     let watch = client.watch_node("/myapp").await?;
//!     client.write_node("/myapp", "updated", ExpectedVersion::Any).await?;
//!
//!     let event = watch.changed().await?;
//!     let data = client.read_node(&event.path).await?;
//!     println!("node changed, now holds {:?}", data);
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coord;
pub mod error;
pub mod metrics;
pub mod topic;

pub use config::{CommitPolicy, CoordConfig, StartPosition, TopicConfig};
pub use coord::{CoordinationNodeClient, ExpectedVersion, NodeWatch, WatchEvent, WatchEventKind};
pub use error::{ConnectError, ConsumerError, NodeError, PublishError};
pub use topic::{Delivery, RecordMetadata, TopicClient, TopicRecord};

/// Client library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
