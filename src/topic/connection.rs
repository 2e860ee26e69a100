//! Broker connection handling.
//!
//! One actor task owns the framed transport and the table of in-flight
//! requests. Callers submit requests over a channel and receive completions
//! on per-request oneshot channels, so a submit never blocks on the network.

use std::collections::HashMap;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::protocol::{ClientCodec, CorrelationId, Request, Response};
use crate::error::{ConnectError, TransportError};
use crate::metrics;

pub(crate) type ResponseReceiver = oneshot::Receiver<Result<Response, TransportError>>;

enum Command {
    Request(Request, oneshot::Sender<Result<Response, TransportError>>),
    Shutdown,
}

/// A single connection to the bootstrap broker.
pub(crate) struct Connection {
    endpoint: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Connection {
    /// Connect to the endpoint and spawn the connection actor.
    pub(crate) async fn open(
        endpoint: &str,
        connection_timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let stream = timeout(connection_timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| ConnectError::Timeout {
                endpoint: endpoint.to_string(),
                elapsed: connection_timeout,
            })?
            .map_err(|e| {
                metrics::global().record_connection_failed();
                ConnectError::Io {
                    endpoint: endpoint.to_string(),
                    source: e,
                }
            })?;

        let framed = Framed::new(stream, ClientCodec);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let actor_endpoint = endpoint.to_string();
        let handle = tokio::spawn(async move {
            connection_loop(actor_endpoint, framed, cmd_rx).await;
        });

        metrics::global().record_connection_created();
        info!(endpoint, "connected to broker");

        Ok(Self {
            endpoint: endpoint.to_string(),
            cmd_tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Enqueue a request without waiting for its completion.
    pub(crate) fn submit(&self, request: Request) -> Result<ResponseReceiver, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Request(request, reply_tx))
            .map_err(|_| TransportError::Closed)?;
        Ok(reply_rx)
    }

    /// Enqueue a request and wait for its completion, bounded by `deadline`.
    pub(crate) async fn request(
        &self,
        request: Request,
        deadline: Duration,
    ) -> Result<Response, TransportError> {
        let rx = self.submit(request)?;
        match timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::codec(format!(
                "request to {} timed out after {:?}",
                self.endpoint, deadline
            ))),
        }
    }

    /// Stop accepting requests, let in-flight ones complete, then release the
    /// transport. Bounded by `drain_timeout`.
    pub(crate) async fn close(&self, drain_timeout: Duration) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if timeout(drain_timeout, handle).await.is_err() {
                warn!(
                    endpoint = %self.endpoint,
                    "connection drain did not finish within {:?}", drain_timeout
                );
            }
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

async fn connection_loop(
    endpoint: String,
    mut framed: Framed<TcpStream, ClientCodec>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut pending: HashMap<CorrelationId, oneshot::Sender<Result<Response, TransportError>>> =
        HashMap::new();
    let mut next_correlation: CorrelationId = 1;
    let mut accepting = true;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if accepting => match cmd {
                Some(Command::Request(mut request, reply)) => {
                    let id = next_correlation;
                    next_correlation = next_correlation.wrapping_add(1);
                    request.set_correlation_id(id);
                    debug!(%endpoint, correlation_id = id, "sending request");

                    if let Err(e) = framed.send(request).await {
                        warn!(%endpoint, error = %e, "send failed, closing connection");
                        metrics::global().record_connection_error();
                        let _ = reply.send(Err(e));
                        fail_pending(&mut pending);
                        return;
                    }
                    pending.insert(id, reply);
                }
                Some(Command::Shutdown) => {
                    cmd_rx.close();
                    // Requests already submitted still go out before the
                    // transport is released.
                    while let Ok(cmd) = cmd_rx.try_recv() {
                        if let Command::Request(mut request, reply) = cmd {
                            let id = next_correlation;
                            next_correlation = next_correlation.wrapping_add(1);
                            request.set_correlation_id(id);
                            if let Err(e) = framed.send(request).await {
                                let _ = reply.send(Err(e));
                                fail_pending(&mut pending);
                                return;
                            }
                            pending.insert(id, reply);
                        }
                    }
                    accepting = false;
                }
                None => {
                    accepting = false;
                }
            },
            frame = framed.next() => match frame {
                Some(Ok(response)) => {
                    let id = response.correlation_id();
                    match pending.remove(&id) {
                        Some(reply) => {
                            let _ = reply.send(Ok(response));
                        }
                        None => {
                            warn!(%endpoint, correlation_id = id, "response with no pending request");
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(%endpoint, error = %e, "transport error");
                    metrics::global().record_connection_error();
                    fail_pending(&mut pending);
                    return;
                }
                None => {
                    debug!(%endpoint, "broker closed the connection");
                    fail_pending(&mut pending);
                    return;
                }
            },
        }

        if !accepting && pending.is_empty() {
            break;
        }
    }

    info!(%endpoint, "connection closed");
}

fn fail_pending(
    pending: &mut HashMap<CorrelationId, oneshot::Sender<Result<Response, TransportError>>>,
) {
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(TransportError::Closed));
    }
}
