//! Observability and Metrics
//!
//! Process-wide counters for the relay, kept with relaxed atomics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Global metrics collector for relay operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections accepted
    pub connections_total: AtomicU64,
    /// Currently registered connections
    pub connections_active: AtomicU64,
    /// Connections turned away at the connection limit
    pub connections_rejected: AtomicU64,
    /// Frames read from clients
    pub frames_received: AtomicU64,
    /// Of which arrived encrypted
    pub frames_encrypted: AtomicU64,
    /// Broadcasts started
    pub broadcasts: AtomicU64,
    /// Successful per-recipient deliveries
    pub deliveries: AtomicU64,
    /// Recipients skipped because their send failed
    pub deliveries_skipped: AtomicU64,
    /// Bytes read from clients
    pub bytes_received: AtomicU64,
    /// Bytes written to clients
    pub bytes_sent: AtomicU64,
    /// Frames that failed to parse
    pub parse_errors: AtomicU64,
    /// Envelopes that failed to open or seal
    pub crypto_errors: AtomicU64,
    /// Sessions ended by I/O failure or timeout
    pub connection_errors: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_encrypted: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            deliveries_skipped: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            crypto_errors: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self, byte_count: u64, encrypted: bool) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
        if encrypted {
            self.frames_encrypted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn broadcast_started(&self) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery(&self, byte_count: u64) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn delivery_skipped(&self) {
        self.deliveries_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn crypto_error(&self) {
        self.crypto_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_encrypted: self.frames_encrypted.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            deliveries_skipped: self.deliveries_skipped.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            crypto_errors: self.crypto_errors.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            connections_rejected = snapshot.connections_rejected,
            frames_received = snapshot.frames_received,
            frames_encrypted = snapshot.frames_encrypted,
            broadcasts = snapshot.broadcasts,
            deliveries = snapshot.deliveries,
            deliveries_skipped = snapshot.deliveries_skipped,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            parse_errors = snapshot.parse_errors,
            crypto_errors = snapshot.crypto_errors,
            connection_errors = snapshot.connection_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Relay metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub frames_received: u64,
    pub frames_encrypted: u64,
    pub broadcasts: u64,
    pub deliveries: u64,
    pub deliveries_skipped: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub parse_errors: u64,
    pub crypto_errors: u64,
    pub connection_errors: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}
