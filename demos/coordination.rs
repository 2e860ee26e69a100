//! Create, read, watch and update one coordination node.
//!
//! Expects a RelayMQ coordination service on localhost:2181. Every failure
//! propagates as a typed error and exits the process non-zero.

use std::time::Duration;

use relaymq_client::config::CoordConfig;
use relaymq_client::coord::{CoordinationNodeClient, ExpectedVersion};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = CoordConfig::builder()
        .address("localhost:2181")
        .session_timeout(Duration::from_millis(3000))
        .build();

    let client = CoordinationNodeClient::connect(config);
    client.wait_connected(Duration::from_secs(10)).await?;
    println!("connected to coordination service");

    let path = "/myapp";
    client.ensure_node(path, "hello").await?;
    println!("ensured node {path}");

    let data = client.read_node(path).await?;
    println!("read node data: {}", String::from_utf8_lossy(&data));

    let watch = client.watch_node(path).await?;
    let version = client
        .write_node(path, "updated", ExpectedVersion::Any)
        .await?;
    println!("wrote node, version now {version}");

    // The event carries no payload; re-read to observe the new value.
    let event = watch.changed().await?;
    let data = client.read_node(&event.path).await?;
    println!("node data changed: {}", String::from_utf8_lossy(&data));

    client.close().await;
    Ok(())
}
