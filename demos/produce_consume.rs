//! Publish one record to a topic and poll it back.
//!
//! Expects a RelayMQ broker on localhost:9092. Every failure propagates as a
//! typed error and exits the process non-zero.

use std::time::Duration;

use relaymq_client::config::{CommitPolicy, StartPosition, TopicConfig};
use relaymq_client::topic::TopicClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = TopicConfig::builder()
        .broker("localhost:9092")
        .topic("demo-topic")
        .client_id("produce-consume-demo")
        .start_position(StartPosition::Earliest)
        .commit_policy(CommitPolicy::Manual)
        .build();

    let client = TopicClient::connect(config).await?;
    println!("connected to broker, topic {}", client.topic());

    let delivery = client.publish("Hello from refactored KafkaClient!")?;
    let metadata = delivery.wait().await?;
    println!(
        "sent to topic {} at offset {}",
        metadata.topic, metadata.offset
    );

    let records = client.poll(Duration::from_secs(5)).await?;
    for record in &records {
        println!(
            "received: {} from topic {} at offset {}",
            record.value, record.topic, record.offset
        );
    }
    client.commit()?;

    client.close().await;
    Ok(())
}
