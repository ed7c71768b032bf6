//! Advisory connection lifecycle events.

use serde::{Deserialize, Serialize};

/// Connection lifecycle event for UI status indicators.
///
/// Advisory only: correctness of the pipeline never depends on a consumer
/// observing these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum LifecycleEvent {
    /// A streaming session completed its handshake.
    Connected,
    /// The active session closed (error, staleness, or shutdown).
    Disconnected,
    /// A reconnect attempt is pending after backoff.
    Reconnecting { attempt: u32 },
    /// Every credential is Cooling or Exhausted; connects resume once a
    /// cooldown expires.
    AllCredentialsExhausted,
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "CONNECTED"),
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Reconnecting { attempt } => write!(f, "RECONNECTING({attempt})"),
            Self::AllCredentialsExhausted => write!(f, "ALL_CREDENTIALS_EXHAUSTED"),
        }
    }
}
