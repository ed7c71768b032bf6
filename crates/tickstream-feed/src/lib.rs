//! Streaming frame decoding for the tickstream pipeline.
//!
//! Parses raw provider frames into typed events:
//! - Trade frames become [`tickstream_core::Quote`] batches
//! - Heartbeats and control frames are classified, not dropped silently
//! - Malformed frames produce an error the caller logs and skips; decode
//!   failures never terminate a session
//!
//! Also hosts the pluggable rate-limit signal predicate: the exact way a
//! provider announces a per-key limit (in-band error frame vs. handshake
//! status) is provider-specific, so the connection layer asks a
//! [`RateLimitSignal`] instead of hard-coding one mechanism.

pub mod decoder;
pub mod error;
pub mod signal;

pub use decoder::{DecodeStats, DecodedFrame, QuoteDecoder};
pub use error::{DecodeError, FeedResult};
pub use signal::{CredentialFault, ProviderRateLimitSignal, RateLimitSignal};
