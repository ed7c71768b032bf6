//! Prometheus metrics for the quote stream client.
//!
//! Covers connection state, reconnects, frame decoding, quote delivery, and
//! credential pool health.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_int_counter, CounterVec,
    Gauge, GaugeVec, IntCounter,
};

/// Stream connection state (1 = connected, 0 = disconnected).
pub static STREAM_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "tickstream_connected",
        "Stream connection state (1=connected)"
    )
    .unwrap()
});

/// Total reconnection attempts.
/// Labels: reason (error/stale/rate_limit/auth)
pub static RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickstream_reconnect_total",
        "Total stream reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

/// Total inbound frames by kind.
/// Labels: kind (trade/heartbeat/error/unknown)
pub static FRAMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickstream_frames_total",
        "Total inbound frames by kind",
        &["kind"]
    )
    .unwrap()
});

/// Total malformed frames dropped.
pub static FRAMES_MALFORMED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickstream_frames_malformed_total",
        "Total malformed frames dropped"
    )
    .unwrap()
});

/// Total quotes published to the bus.
pub static QUOTES_PUBLISHED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickstream_quotes_published_total",
        "Total quotes published to the bus"
    )
    .unwrap()
});

/// Credential pool slot counts by state.
/// Labels: state (available/cooling/exhausted)
pub static CREDENTIAL_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tickstream_credential_state",
        "Credential pool slot counts by state",
        &["state"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record stream connected.
    pub fn stream_connected() {
        STREAM_CONNECTED.set(1.0);
    }

    /// Record stream disconnected.
    pub fn stream_disconnected() {
        STREAM_CONNECTED.set(0.0);
    }

    /// Record a reconnection attempt.
    pub fn reconnect(reason: &str) {
        RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record inbound frames of one kind.
    pub fn frames(kind: &str, count: u64) {
        FRAMES_TOTAL.with_label_values(&[kind]).inc_by(count as f64);
    }

    /// Record malformed frames dropped.
    pub fn frames_malformed(count: u64) {
        FRAMES_MALFORMED_TOTAL.inc_by(count);
    }

    /// Record quotes published to the bus.
    pub fn quotes_published(count: u64) {
        QUOTES_PUBLISHED_TOTAL.inc_by(count);
    }

    /// Update credential pool state gauges.
    pub fn credential_states(available: usize, cooling: usize, exhausted: usize) {
        CREDENTIAL_STATE
            .with_label_values(&["available"])
            .set(available as f64);
        CREDENTIAL_STATE
            .with_label_values(&["cooling"])
            .set(cooling as f64);
        CREDENTIAL_STATE
            .with_label_values(&["exhausted"])
            .set(exhausted as f64);
    }
}
