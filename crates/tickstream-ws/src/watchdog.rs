//! Inbound staleness detection.
//!
//! The provider sends periodic ping frames alongside trade data, so a
//! healthy session always has recent inbound traffic. The watchdog tracks
//! the last inbound frame of any kind and flags the session once silence
//! crosses the timeout.

use parking_lot::RwLock;
use std::time::{Duration, Instant};

/// Tracks time since the last inbound frame on a session.
pub struct StalenessWatchdog {
    timeout_ms: u64,
    last_frame: RwLock<Instant>,
}

impl StalenessWatchdog {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            last_frame: RwLock::new(Instant::now()),
        }
    }

    /// Reset on session establishment.
    pub fn reset(&self) {
        *self.last_frame.write() = Instant::now();
    }

    /// Record any inbound frame: trade, heartbeat, pong, anything.
    pub fn record_frame(&self) {
        *self.last_frame.write() = Instant::now();
    }

    /// Milliseconds since the last inbound frame.
    pub fn elapsed_ms(&self) -> u64 {
        self.last_frame.read().elapsed().as_millis() as u64
    }

    /// Silence has crossed the timeout; the session should be torn down.
    pub fn is_stale(&self) -> bool {
        self.elapsed_ms() >= self.timeout_ms
    }

    /// Halfway to the timeout with no traffic; a transport ping is due.
    pub fn should_probe(&self) -> bool {
        self.elapsed_ms() >= self.timeout_ms / 2
    }

    /// How often the session loop should evaluate staleness.
    pub fn check_period(&self) -> Duration {
        Duration::from_millis((self.timeout_ms / 4).max(250))
    }
}
