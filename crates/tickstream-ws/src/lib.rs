//! WebSocket client for the quote stream.
//!
//! Provides resilient streaming connectivity with:
//! - Automatic reconnection with exponential backoff and jitter
//! - Credential rotation on rate-limit and auth faults
//! - Subscription replay after reconnection
//! - Staleness detection on inbound traffic

pub mod connection;
pub mod error;
pub mod message;
pub mod watchdog;

pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState};
pub use error::{WsError, WsResult};
pub use message::StreamRequest;
pub use watchdog::StalenessWatchdog;

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
