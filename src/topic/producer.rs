//! Publish path of the [`TopicClient`].

use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tokio::time::timeout;
use tracing::debug;

use super::connection::ResponseReceiver;
use super::protocol::{ErrorCode, ProduceRequest, Request, Response};
use super::{RecordMetadata, TopicClient};
use crate::error::PublishError;
use crate::metrics;

/// Pending completion of one published record.
///
/// Returned by [`TopicClient::publish`] as soon as the record is enqueued;
/// [`wait`](Delivery::wait) resolves once the broker has acknowledged the
/// record with its assigned partition and offset. Completions for records
/// published by one client arrive in publish order for a given
/// topic-partition. Dropping the handle abandons the acknowledgement but not
/// the send.
#[derive(Debug)]
pub struct Delivery {
    rx: ResponseReceiver,
    topic: String,
    request_timeout: Duration,
}

impl Delivery {
    /// Wait for the broker acknowledgement.
    pub async fn wait(self) -> Result<RecordMetadata, PublishError> {
        let outcome = match timeout(self.request_timeout, self.rx).await {
            Err(_) => {
                return Err(PublishError::Timeout {
                    timeout: self.request_timeout,
                })
            }
            Ok(Err(_)) => return Err(PublishError::ClientClosed),
            Ok(Ok(result)) => result,
        };

        match outcome? {
            Response::Produce(resp) => {
                if resp.error_code != 0 {
                    metrics::global().record_publish_error();
                    return Err(ErrorCode::to_publish_error(
                        resp.error_code,
                        resp.error_message.as_deref(),
                        &self.topic,
                    ));
                }
                Ok(RecordMetadata {
                    topic: resp.topic,
                    partition: resp.partition,
                    offset: resp.offset,
                })
            }
            other => Err(PublishError::connection(format!(
                "unexpected response to produce: {other:?}"
            ))),
        }
    }
}

impl TopicClient {
    /// Publish one record with no key to the configured topic.
    ///
    /// The call enqueues the record and returns without touching the network;
    /// the broker-assigned placement (or the failure) is observed by awaiting
    /// the returned [`Delivery`].
    pub fn publish<V: Into<String>>(&self, value: V) -> Result<Delivery, PublishError> {
        self.enqueue(None, value.into())
    }

    /// Publish one keyed record to the configured topic.
    pub fn publish_with_key<K, V>(&self, key: K, value: V) -> Result<Delivery, PublishError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.enqueue(Some(key.into()), value.into())
    }

    fn enqueue(&self, key: Option<String>, value: String) -> Result<Delivery, PublishError> {
        if value.len() > self.config.max_message_size {
            return Err(PublishError::MessageTooLarge {
                size: value.len(),
                max_size: self.config.max_message_size,
            });
        }

        let value = Bytes::from(value);
        let request = Request::Produce(ProduceRequest {
            correlation_id: 0,
            client_id: self.config.client_id.clone(),
            topic: self.config.topic.clone(),
            acks: self.config.acks,
            timeout_ms: self.config.request_timeout.as_millis() as u32,
            key: key.map(Bytes::from),
            value: value.clone(),
            timestamp: unix_millis(),
        });

        let rx = self.connection.submit(request).map_err(|_| {
            metrics::global().record_publish_error();
            PublishError::ClientClosed
        })?;

        metrics::global().record_publish(value.len() as u64);
        debug!(topic = %self.config.topic, bytes = value.len(), "record enqueued");

        Ok(Delivery {
            rx,
            topic: self.config.topic.clone(),
            request_timeout: self.config.request_timeout,
        })
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
