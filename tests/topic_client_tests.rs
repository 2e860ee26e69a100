//! Integration tests for the topic client against an in-process stand-in
//! broker speaking the RelayMQ wire protocol.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use relaymq_client::config::{CommitPolicy, StartPosition, TopicConfig};
use relaymq_client::error::{ConsumerError, PublishError};
use relaymq_client::topic::protocol::{
    FetchResponse, MetadataResponse, PartitionMetadata, ProduceResponse, Request, Response,
    WireRecord,
};
use relaymq_client::topic::TopicClient;

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Bytes>,
    value: Bytes,
    timestamp: u64,
}

#[derive(Debug)]
struct BrokerState {
    topics: HashMap<String, Vec<StoredRecord>>,
    auto_create: bool,
}

type SharedBroker = Arc<Mutex<BrokerState>>;

async fn spawn_broker(auto_create: bool) -> (SocketAddr, SharedBroker) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(Mutex::new(BrokerState {
        topics: HashMap::new(),
        auto_create,
    }));

    let accept_state = state.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(serve_connection(stream, accept_state.clone()));
        }
    });

    (addr, state)
}

async fn serve_connection(mut stream: TcpStream, state: SharedBroker) {
    while let Some(frame) = read_frame(&mut stream).await {
        let request = Request::decode(&frame).expect("well-formed request");
        let response = handle_request(&state, request);
        write_frame(&mut stream, &response).await;
    }
}

async fn read_frame(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.ok()?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.ok()?;
    Some(body)
}

async fn write_frame(stream: &mut TcpStream, response: &Response) {
    let mut body = BytesMut::new();
    response.encode(&mut body).expect("encodable response");
    let mut framed = BytesMut::with_capacity(body.len() + 4);
    framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
    framed.extend_from_slice(&body);
    stream.write_all(&framed).await.expect("write response");
}

fn handle_request(state: &SharedBroker, request: Request) -> Response {
    let mut state = state.lock().unwrap();
    match request {
        Request::Produce(req) => {
            if !state.topics.contains_key(&req.topic) && !state.auto_create {
                return Response::Produce(ProduceResponse {
                    correlation_id: req.correlation_id,
                    error_code: 3,
                    error_message: Some("unknown topic".to_string()),
                    topic: req.topic,
                    partition: 0,
                    offset: 0,
                });
            }
            let log = state.topics.entry(req.topic.clone()).or_default();
            log.push(StoredRecord {
                key: req.key,
                value: req.value,
                timestamp: req.timestamp,
            });
            Response::Produce(ProduceResponse {
                correlation_id: req.correlation_id,
                error_code: 0,
                error_message: None,
                topic: req.topic,
                partition: 0,
                offset: (log.len() - 1) as u64,
            })
        }
        Request::Fetch(req) => match state.topics.get(&req.topic) {
            None => Response::Fetch(FetchResponse {
                correlation_id: req.correlation_id,
                error_code: 3,
                error_message: Some("unknown topic".to_string()),
                topic: req.topic,
                partition: req.partition,
                records: Vec::new(),
            }),
            Some(log) => {
                let records = log
                    .iter()
                    .enumerate()
                    .skip(req.offset as usize)
                    .map(|(offset, stored)| WireRecord {
                        offset: offset as u64,
                        key: stored.key.clone(),
                        value: stored.value.clone(),
                        timestamp: stored.timestamp,
                    })
                    .collect();
                Response::Fetch(FetchResponse {
                    correlation_id: req.correlation_id,
                    error_code: 0,
                    error_message: None,
                    topic: req.topic,
                    partition: req.partition,
                    records,
                })
            }
        },
        Request::Metadata(req) => match state.topics.get(&req.topic) {
            None => Response::Metadata(MetadataResponse {
                correlation_id: req.correlation_id,
                error_code: 3,
                error_message: Some("unknown topic".to_string()),
                topic: req.topic,
                partitions: Vec::new(),
            }),
            Some(log) => Response::Metadata(MetadataResponse {
                correlation_id: req.correlation_id,
                error_code: 0,
                error_message: None,
                topic: req.topic,
                partitions: vec![PartitionMetadata {
                    id: 0,
                    earliest_offset: 0,
                    latest_offset: log.len() as u64,
                }],
            }),
        },
    }
}

fn seed_topic(state: &SharedBroker, topic: &str, values: &[&str]) {
    let mut state = state.lock().unwrap();
    let log = state.topics.entry(topic.to_string()).or_default();
    for value in values {
        log.push(StoredRecord {
            key: None,
            value: Bytes::copy_from_slice(value.as_bytes()),
            timestamp: 0,
        });
    }
}

fn config(addr: SocketAddr, topic: &str) -> TopicConfig {
    TopicConfig::builder()
        .broker(addr.to_string())
        .topic(topic)
        .client_id("test-client")
        .request_timeout(Duration::from_secs(5))
        .fetch_max_wait(Duration::from_millis(50))
        .build()
}

#[tokio::test]
async fn publish_then_poll_returns_the_record() {
    let (addr, _state) = spawn_broker(true).await;
    let client = TopicClient::connect(config(addr, "demo-topic")).await.unwrap();

    let delivery = client.publish("Hello from refactored KafkaClient!").unwrap();
    let metadata = delivery.wait().await.unwrap();
    assert_eq!(metadata.topic, "demo-topic");
    assert_eq!(metadata.offset, 0);

    let records = client.poll(Duration::from_secs(5)).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].value, "Hello from refactored KafkaClient!");
    assert_eq!(records[0].topic, "demo-topic");
    assert_eq!(records[0].offset, 0);
    assert_eq!(records[0].key, None);

    client.close().await;
}

#[tokio::test]
async fn publish_completions_arrive_in_send_order() {
    let (addr, _state) = spawn_broker(true).await;
    let client = TopicClient::connect(config(addr, "ordered")).await.unwrap();

    let first = client.publish("one").unwrap();
    let second = client.publish("two").unwrap();
    let third = client.publish("three").unwrap();

    assert_eq!(first.wait().await.unwrap().offset, 0);
    assert_eq!(second.wait().await.unwrap().offset, 1);
    assert_eq!(third.wait().await.unwrap().offset, 2);

    client.close().await;
}

#[tokio::test]
async fn keyed_record_roundtrips_key() {
    let (addr, _state) = spawn_broker(true).await;
    let client = TopicClient::connect(config(addr, "keyed")).await.unwrap();

    client
        .publish_with_key("user-123", "login")
        .unwrap()
        .wait()
        .await
        .unwrap();

    let records = client.poll(Duration::from_secs(5)).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key.as_deref(), Some("user-123"));
    assert_eq!(records[0].value, "login");

    client.close().await;
}

#[tokio::test]
async fn poll_on_empty_topic_returns_empty_at_timeout() {
    let (addr, state) = spawn_broker(true).await;
    seed_topic(&state, "quiet", &[]);
    let client = TopicClient::connect(config(addr, "quiet")).await.unwrap();

    let records = client.poll(Duration::from_millis(200)).await.unwrap();
    assert!(records.is_empty());

    client.close().await;
}

#[tokio::test]
async fn manual_commit_redelivers_until_committed() {
    let (addr, _state) = spawn_broker(true).await;
    let config = TopicConfig::builder()
        .broker(addr.to_string())
        .topic("manual")
        .commit_policy(CommitPolicy::Manual)
        .fetch_max_wait(Duration::from_millis(50))
        .build();
    let client = TopicClient::connect(config).await.unwrap();

    client.publish("payload").unwrap().wait().await.unwrap();

    let first = client.poll(Duration::from_secs(5)).await.unwrap();
    assert_eq!(first.len(), 1);

    // Not committed: the same record comes back.
    let again = client.poll(Duration::from_secs(5)).await.unwrap();
    assert_eq!(again, first);

    client.commit().unwrap();
    let after_commit = client.poll(Duration::from_millis(200)).await.unwrap();
    assert!(after_commit.is_empty());

    client.close().await;
}

#[tokio::test]
async fn auto_commit_advances_past_polled_records() {
    let (addr, _state) = spawn_broker(true).await;
    let config = TopicConfig::builder()
        .broker(addr.to_string())
        .topic("auto")
        .commit_policy(CommitPolicy::Auto)
        .fetch_max_wait(Duration::from_millis(50))
        .build();
    let client = TopicClient::connect(config).await.unwrap();

    client.publish("first").unwrap().wait().await.unwrap();
    let records = client.poll(Duration::from_secs(5)).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].value, "first");

    client.publish("second").unwrap().wait().await.unwrap();
    let records = client.poll(Duration::from_secs(5)).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].value, "second");

    client.close().await;
}

#[tokio::test]
async fn earliest_start_position_reads_retained_history() {
    let (addr, state) = spawn_broker(true).await;
    seed_topic(&state, "history", &["old-1", "old-2"]);

    let config = TopicConfig::builder()
        .broker(addr.to_string())
        .topic("history")
        .start_position(StartPosition::Earliest)
        .fetch_max_wait(Duration::from_millis(50))
        .build();
    let client = TopicClient::connect(config).await.unwrap();

    let records = client.poll(Duration::from_secs(5)).await.unwrap();
    let values: Vec<_> = records.iter().map(|r| r.value.as_str()).collect();
    assert_eq!(values, vec!["old-1", "old-2"]);

    client.close().await;
}

#[tokio::test]
async fn latest_start_position_skips_history() {
    let (addr, state) = spawn_broker(true).await;
    seed_topic(&state, "fresh", &["old-1", "old-2"]);

    let config = TopicConfig::builder()
        .broker(addr.to_string())
        .topic("fresh")
        .start_position(StartPosition::Latest)
        .fetch_max_wait(Duration::from_millis(50))
        .build();
    let client = TopicClient::connect(config).await.unwrap();

    let records = client.poll(Duration::from_millis(200)).await.unwrap();
    assert!(records.is_empty());

    client.publish("new").unwrap().wait().await.unwrap();
    let records = client.poll(Duration::from_secs(5)).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].value, "new");

    client.close().await;
}

#[tokio::test]
async fn oversized_record_is_rejected_before_enqueue() {
    let (addr, _state) = spawn_broker(true).await;
    let config = TopicConfig::builder()
        .broker(addr.to_string())
        .topic("limits")
        .max_message_size(16)
        .build();
    let client = TopicClient::connect(config).await.unwrap();

    // At the limit: accepted.
    let delivery = client.publish("x".repeat(16)).unwrap();
    delivery.wait().await.unwrap();

    // One byte over: rejected synchronously.
    let err = client.publish("x".repeat(17)).unwrap_err();
    assert!(matches!(
        err,
        PublishError::MessageTooLarge { size: 17, max_size: 16 }
    ));

    client.close().await;
}

#[tokio::test]
async fn publish_to_missing_topic_without_auto_create_fails() {
    let (addr, _state) = spawn_broker(false).await;
    let client = TopicClient::connect(config(addr, "absent")).await.unwrap();

    let delivery = client.publish("payload").unwrap();
    let err = delivery.wait().await.unwrap_err();
    assert!(matches!(err, PublishError::TopicNotFound { topic } if topic == "absent"));

    client.close().await;
}

#[tokio::test]
async fn poll_on_unknown_topic_is_rejected() {
    let (addr, _state) = spawn_broker(false).await;
    let client = TopicClient::connect(config(addr, "absent")).await.unwrap();

    let err = client.poll(Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(
        err,
        ConsumerError::SubscriptionRejected { topic, .. } if topic == "absent"
    ));

    client.close().await;
}

#[tokio::test]
async fn non_utf8_record_value_is_a_deserialization_error() {
    let (addr, state) = spawn_broker(true).await;
    {
        let mut state = state.lock().unwrap();
        state.topics.entry("binary".to_string()).or_default().push(StoredRecord {
            key: None,
            value: Bytes::from_static(&[0xff, 0xfe, 0xfd]),
            timestamp: 0,
        });
    }
    let client = TopicClient::connect(config(addr, "binary")).await.unwrap();

    let err = client.poll(Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, ConsumerError::Deserialization { offset: 0, .. }));

    client.close().await;
}

#[tokio::test]
async fn close_flushes_outstanding_sends() {
    let (addr, state) = spawn_broker(true).await;
    let client = TopicClient::connect(config(addr, "flush")).await.unwrap();

    let delivery = client.publish("still in flight").unwrap();
    client.close().await;

    // The enqueued record went out before the transport was released.
    let metadata = delivery.wait().await.unwrap();
    assert_eq!(metadata.offset, 0);
    assert_eq!(state.lock().unwrap().topics["flush"].len(), 1);
}
