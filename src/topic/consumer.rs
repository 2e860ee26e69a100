//! Poll path of the [`TopicClient`].

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

use super::protocol::{
    ErrorCode, FetchRequest, MetadataRequest, Offset, PartitionId, Request, Response, WireRecord,
};
use super::{TopicClient, TopicRecord};
use crate::config::{CommitPolicy, StartPosition};
use crate::error::ConsumerError;
use crate::metrics;

/// Resolved subscription: the topic's partitions and the client-local
/// positions. Offsets are never persisted to the broker.
pub(super) struct SubscriptionState {
    partitions: Vec<PartitionId>,
    committed: HashMap<PartitionId, Offset>,
    /// Positions observed by the last poll that returned records, waiting for
    /// [`TopicClient::commit`] under [`CommitPolicy::Manual`].
    polled: Option<HashMap<PartitionId, Offset>>,
}

impl TopicClient {
    /// Block up to `timeout`, returning whatever records are available at the
    /// current position (possibly none).
    ///
    /// The first call resolves the subscription: the topic's partitions are
    /// discovered and each position starts at the configured
    /// [`StartPosition`]. Under [`CommitPolicy::Auto`] a successful poll
    /// commits the new position; under [`CommitPolicy::Manual`] the same
    /// records are re-delivered until [`commit`](Self::commit) is called.
    ///
    /// Must not be called concurrently with itself on one client.
    pub async fn poll(&self, timeout: Duration) -> Result<Vec<TopicRecord>, ConsumerError> {
        let deadline = Instant::now() + timeout;
        self.ensure_subscription().await?;

        loop {
            let (partitions, positions) = {
                let guard = self.subscription.lock();
                let sub = guard.as_ref().expect("subscription resolved above");
                (sub.partitions.clone(), sub.committed.clone())
            };

            let mut records = Vec::new();
            let mut new_positions = positions.clone();

            for partition in &partitions {
                let start = new_positions.get(partition).copied().unwrap_or(0);
                let fetched = self.fetch_partition(*partition, start).await?;
                if let Some(last) = fetched.last() {
                    new_positions.insert(*partition, last.offset + 1);
                }
                for wire in fetched {
                    records.push(self.decode_record(*partition, wire)?);
                }
            }

            if !records.is_empty() {
                let bytes: u64 = records.iter().map(|r| r.value.len() as u64).sum();
                metrics::global().record_poll(records.len() as u64, bytes);

                let mut guard = self.subscription.lock();
                let sub = guard.as_mut().expect("subscription resolved above");
                match self.config.commit_policy {
                    CommitPolicy::Auto => sub.committed = new_positions,
                    CommitPolicy::Manual => sub.polled = Some(new_positions),
                }
                debug!(
                    topic = %self.config.topic,
                    count = records.len(),
                    "poll returned records"
                );
                return Ok(records);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            sleep(self.config.fetch_max_wait.min(remaining)).await;
        }
    }

    /// Commit the position reached by the last poll that returned records.
    ///
    /// Client-local under both policies; a no-op under [`CommitPolicy::Auto`]
    /// or when nothing was polled since the last commit.
    pub fn commit(&self) -> Result<(), ConsumerError> {
        let mut guard = self.subscription.lock();
        if let Some(sub) = guard.as_mut() {
            if let Some(polled) = sub.polled.take() {
                sub.committed = polled;
            }
        }
        Ok(())
    }

    async fn ensure_subscription(&self) -> Result<(), ConsumerError> {
        if self.subscription.lock().is_some() {
            return Ok(());
        }

        let request = Request::Metadata(MetadataRequest {
            correlation_id: 0,
            client_id: self.config.client_id.clone(),
            topic: self.config.topic.clone(),
        });

        let response = self
            .connection
            .request(request, self.config.request_timeout)
            .await?;

        let metadata = match response {
            Response::Metadata(m) => m,
            other => {
                return Err(ConsumerError::connection(format!(
                    "unexpected response to metadata: {other:?}"
                )))
            }
        };

        if metadata.error_code != 0 {
            return Err(ErrorCode::to_consumer_error(
                metadata.error_code,
                metadata.error_message.as_deref(),
                &self.config.topic,
            ));
        }

        let mut partitions: Vec<PartitionId> = metadata.partitions.iter().map(|p| p.id).collect();
        partitions.sort_unstable();

        let committed = metadata
            .partitions
            .iter()
            .map(|p| {
                let start = match self.config.start_position {
                    StartPosition::Earliest => p.earliest_offset,
                    StartPosition::Latest => p.latest_offset,
                };
                (p.id, start)
            })
            .collect();

        debug!(
            topic = %self.config.topic,
            partitions = partitions.len(),
            "subscription resolved"
        );

        *self.subscription.lock() = Some(SubscriptionState {
            partitions,
            committed,
            polled: None,
        });
        Ok(())
    }

    async fn fetch_partition(
        &self,
        partition: PartitionId,
        offset: Offset,
    ) -> Result<Vec<WireRecord>, ConsumerError> {
        let request = Request::Fetch(FetchRequest {
            correlation_id: 0,
            client_id: self.config.client_id.clone(),
            topic: self.config.topic.clone(),
            partition,
            offset,
            max_bytes: self.config.fetch_max_bytes,
            max_wait_ms: self.config.fetch_max_wait.as_millis() as u32,
        });

        let response = self
            .connection
            .request(request, self.config.request_timeout)
            .await?;

        match response {
            Response::Fetch(fetch) => {
                if fetch.error_code != 0 {
                    return Err(ErrorCode::to_consumer_error(
                        fetch.error_code,
                        fetch.error_message.as_deref(),
                        &self.config.topic,
                    ));
                }
                Ok(fetch.records)
            }
            other => Err(ConsumerError::connection(format!(
                "unexpected response to fetch: {other:?}"
            ))),
        }
    }

    fn decode_record(
        &self,
        partition: PartitionId,
        wire: WireRecord,
    ) -> Result<TopicRecord, ConsumerError> {
        let deserialization = |what: &str| ConsumerError::Deserialization {
            topic: self.config.topic.clone(),
            partition,
            offset: wire.offset,
            message: format!("record {what} is not valid UTF-8"),
        };

        let key = match &wire.key {
            Some(key) => Some(
                std::str::from_utf8(key)
                    .map_err(|_| deserialization("key"))?
                    .to_string(),
            ),
            None => None,
        };
        let value = std::str::from_utf8(&wire.value)
            .map_err(|_| deserialization("value"))?
            .to_string();

        Ok(TopicRecord {
            topic: self.config.topic.clone(),
            partition,
            offset: wire.offset,
            key,
            value,
            timestamp: wire.timestamp,
        })
    }
}
