//! Prometheus Metrics for the Relay
//!
//! Provides observability metrics for monitoring the relay server.

use prometheus::{IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Relay server metrics.
#[derive(Clone)]
pub struct RelayMetrics {
    /// Registry for all metrics.
    pub registry: Arc<Registry>,

    // Connection metrics
    /// Total WebSocket connections accepted.
    pub connections_total: IntCounter,
    /// Current active WebSocket connections.
    pub connections_active: IntGauge,
    /// Connection errors (handshake failures, capacity rejections).
    pub connection_errors: IntCounter,

    // Authentication metrics
    /// Connections that failed authentication.
    pub auth_failures: IntCounter,
    /// Prior sessions closed because the same identity reconnected.
    pub evictions: IntCounter,

    // Message metrics
    /// Envelopes relayed to a room.
    pub messages_relayed: IntCounter,
    /// Frames dropped as malformed or oversized.
    pub frames_dropped: IntCounter,

    // Room metrics
    /// Current number of active rooms.
    pub rooms_active: IntGauge,
}

impl RelayMetrics {
    /// Creates a new metrics instance with all counters registered.
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections_total = IntCounter::with_opts(Opts::new(
            "relay_connections_total",
            "Total WebSocket connections accepted",
        ))
        .unwrap();

        let connections_active = IntGauge::with_opts(Opts::new(
            "relay_connections_active",
            "Current active WebSocket connections",
        ))
        .unwrap();

        let connection_errors = IntCounter::with_opts(Opts::new(
            "relay_connection_errors_total",
            "Total connection errors",
        ))
        .unwrap();

        let auth_failures = IntCounter::with_opts(Opts::new(
            "relay_auth_failures_total",
            "Total connections that failed authentication",
        ))
        .unwrap();

        let evictions = IntCounter::with_opts(Opts::new(
            "relay_evictions_total",
            "Total sessions evicted by a reconnecting identity",
        ))
        .unwrap();

        let messages_relayed = IntCounter::with_opts(Opts::new(
            "relay_messages_relayed_total",
            "Total envelopes relayed to a room",
        ))
        .unwrap();

        let frames_dropped = IntCounter::with_opts(Opts::new(
            "relay_frames_dropped_total",
            "Total frames dropped as malformed or oversized",
        ))
        .unwrap();

        let rooms_active = IntGauge::with_opts(Opts::new(
            "relay_rooms_active",
            "Current number of active rooms",
        ))
        .unwrap();

        registry
            .register(Box::new(connections_total.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_active.clone()))
            .unwrap();
        registry
            .register(Box::new(connection_errors.clone()))
            .unwrap();
        registry.register(Box::new(auth_failures.clone())).unwrap();
        registry.register(Box::new(evictions.clone())).unwrap();
        registry
            .register(Box::new(messages_relayed.clone()))
            .unwrap();
        registry.register(Box::new(frames_dropped.clone())).unwrap();
        registry.register(Box::new(rooms_active.clone())).unwrap();

        RelayMetrics {
            registry: Arc::new(registry),
            connections_total,
            connections_active,
            connection_errors,
            auth_failures,
            evictions,
            messages_relayed,
            frames_dropped,
            rooms_active,
        }
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_registered_metrics() {
        let metrics = RelayMetrics::new();
        metrics.connections_total.inc();
        metrics.rooms_active.set(3);

        let text = metrics.encode();
        assert!(text.contains("relay_connections_total 1"));
        assert!(text.contains("relay_rooms_active 3"));
    }
}
