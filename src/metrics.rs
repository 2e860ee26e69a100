//! Client-side operation counters.
//!
//! Lock-free atomics with relaxed ordering; cheap enough to update on every
//! operation. [`snapshot`](ClientMetrics::snapshot) gives a consistent-enough
//! point-in-time view for logging or assertions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for one process's RelayMQ clients.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    // Topic client
    pub records_published: AtomicU64,
    pub bytes_published: AtomicU64,
    pub publish_errors: AtomicU64,
    pub records_polled: AtomicU64,
    pub bytes_polled: AtomicU64,

    // Coordination client
    pub node_ops: AtomicU64,
    pub watches_registered: AtomicU64,
    pub watches_fired: AtomicU64,

    // Connections
    pub connections_created: AtomicU64,
    pub connections_failed: AtomicU64,
    pub connection_errors: AtomicU64,
}

impl ClientMetrics {
    pub fn record_publish(&self, bytes: u64) {
        self.records_published.fetch_add(1, Ordering::Relaxed);
        self.bytes_published.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_publish_error(&self) {
        self.publish_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll(&self, records: u64, bytes: u64) {
        self.records_polled.fetch_add(records, Ordering::Relaxed);
        self.bytes_polled.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_node_op(&self) {
        self.node_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_watch_registered(&self) {
        self.watches_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_watches_fired(&self, count: u64) {
        self.watches_fired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_failed(&self) {
        self.connections_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_published: self.records_published.load(Ordering::Relaxed),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
            records_polled: self.records_polled.load(Ordering::Relaxed),
            bytes_polled: self.bytes_polled.load(Ordering::Relaxed),
            node_ops: self.node_ops.load(Ordering::Relaxed),
            watches_registered: self.watches_registered.load(Ordering::Relaxed),
            watches_fired: self.watches_fired.load(Ordering::Relaxed),
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_failed: self.connections_failed.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`ClientMetrics`] at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub records_published: u64,
    pub bytes_published: u64,
    pub publish_errors: u64,
    pub records_polled: u64,
    pub bytes_polled: u64,
    pub node_ops: u64,
    pub watches_registered: u64,
    pub watches_fired: u64,
    pub connections_created: u64,
    pub connections_failed: u64,
    pub connection_errors: u64,
}

static GLOBAL_METRICS: once_cell::sync::Lazy<Arc<ClientMetrics>> =
    once_cell::sync::Lazy::new(|| Arc::new(ClientMetrics::default()));

/// Process-wide metrics instance shared by all clients.
pub fn global() -> Arc<ClientMetrics> {
    GLOBAL_METRICS.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = ClientMetrics::default();
        metrics.record_publish(5);
        metrics.record_publish(7);
        metrics.record_poll(3, 12);
        metrics.record_watches_fired(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.records_published, 2);
        assert_eq!(snapshot.bytes_published, 12);
        assert_eq!(snapshot.records_polled, 3);
        assert_eq!(snapshot.bytes_polled, 12);
        assert_eq!(snapshot.watches_fired, 2);
    }
}
