//! Pluggable rate-limit and auth-failure detection.
//!
//! Providers differ in how they announce a per-key limit: some send an
//! in-band error frame on an open stream, some reject the WebSocket
//! handshake with an HTTP status. The connection layer asks this predicate
//! instead of hard-coding either mechanism.

use crate::decoder::DecodedFrame;

/// Fault attributed to the credential used for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialFault {
    /// Transient per-key limit; rotate and cool down.
    RateLimited,
    /// The key itself was rejected; never retry it.
    AuthRejected,
}

/// Predicate over inbound frames and handshake statuses deciding whether a
/// credential fault was signaled.
pub trait RateLimitSignal: Send + Sync {
    /// Classify an in-band frame received on an open session.
    fn classify_frame(&self, frame: &DecodedFrame) -> Option<CredentialFault>;

    /// Classify an HTTP status returned during the WebSocket handshake.
    fn classify_handshake(&self, status: u16) -> Option<CredentialFault>;
}

/// Default classification for the stock-data provider.
///
/// In-band error frames mentioning a limit mean the key is rate limited;
/// handshake 429 means the same, while 401/403 mean the key is invalid.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProviderRateLimitSignal;

impl RateLimitSignal for ProviderRateLimitSignal {
    fn classify_frame(&self, frame: &DecodedFrame) -> Option<CredentialFault> {
        let DecodedFrame::ErrorFrame(msg) = frame else {
            return None;
        };
        let msg = msg.to_lowercase();
        if msg.contains("limit") || msg.contains("too many") {
            Some(CredentialFault::RateLimited)
        } else if msg.contains("invalid api key") || msg.contains("auth") {
            Some(CredentialFault::AuthRejected)
        } else {
            None
        }
    }

    fn classify_handshake(&self, status: u16) -> Option<CredentialFault> {
        match status {
            429 => Some(CredentialFault::RateLimited),
            401 | 403 => Some(CredentialFault::AuthRejected),
            _ => None,
        }
    }
}
