//! Outbound stream control requests.

use serde::Serialize;
use tickstream_core::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum RequestKind {
    Subscribe,
    Unsubscribe,
}

/// A subscribe or unsubscribe request in the provider's wire format:
/// `{"type":"subscribe","symbol":"AAPL"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamRequest {
    #[serde(rename = "type")]
    kind: RequestKind,
    symbol: String,
}

impl StreamRequest {
    pub fn subscribe(symbol: &Symbol) -> Self {
        Self {
            kind: RequestKind::Subscribe,
            symbol: symbol.as_str().to_string(),
        }
    }

    pub fn unsubscribe(symbol: &Symbol) -> Self {
        Self {
            kind: RequestKind::Unsubscribe,
            symbol: symbol.as_str().to_string(),
        }
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
