//! Streaming quote client.
//!
//! Maintains one resilient WebSocket session against the quote provider,
//! rotating across a pool of API keys on rate-limit and auth faults, and
//! fans decoded quotes out to per-symbol subscribers with latest-value
//! coalescing.

pub mod client;
pub mod config;
pub mod error;

pub use client::{QuoteHandle, StreamClient};
pub use config::{AppConfig, KeysConfig, StreamConfig};
pub use error::{AppError, AppResult};
