//! Provider frame decoding.
//!
//! The provider sends JSON text frames:
//! - trades:    `{"type":"trade","data":[{"s":"AAPL","p":150.25,"t":1690000000000,"v":100}]}`
//! - heartbeat: `{"type":"ping"}`
//! - errors:    `{"type":"error","msg":"..."}`
//!
//! Unknown message types and extra fields are tolerated for forward
//! compatibility. Price and volume deserialize through serde_json's
//! arbitrary-precision number representation straight into `Decimal`, so no
//! tick is rounded through an f64.

use crate::error::{DecodeError, FeedResult};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Raw provider envelope. `type` decides the variant; everything else is
/// optional so partial or future messages still classify.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    msg: Option<String>,
}

/// Raw trade record inside a trade frame.
#[derive(Debug, Deserialize)]
struct RawTrade {
    /// Symbol.
    s: String,
    /// Price.
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    p: Decimal,
    /// Millisecond epoch timestamp.
    t: i64,
    /// Volume, optional.
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision_option")]
    v: Option<Decimal>,
}

/// Classified provider frame.
///
/// Tagged-variant result keeps decode total: every inbound frame lands in
/// exactly one arm and the caller matches exhaustively.
#[derive(Debug, Clone)]
pub enum DecodedFrame {
    /// One or more quotes. A trade frame may carry a batch.
    Quotes(Vec<tickstream_core::Quote>),
    /// Provider heartbeat; feeds the staleness watchdog only.
    Heartbeat,
    /// In-band provider error frame.
    ErrorFrame(String),
    /// Valid JSON with an unrecognized message type.
    Unknown,
}

/// Decode statistics.
#[derive(Debug, Default)]
pub struct DecodeStats {
    pub frames_decoded: AtomicU64,
    pub frames_malformed: AtomicU64,
    pub heartbeats: AtomicU64,
}

impl DecodeStats {
    pub fn decoded(&self) -> u64 {
        self.frames_decoded.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.frames_malformed.load(Ordering::Relaxed)
    }

    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }
}

/// Provider frame decoder.
pub struct QuoteDecoder {
    stats: DecodeStats,
}

impl QuoteDecoder {
    pub fn new() -> Self {
        Self {
            stats: DecodeStats::default(),
        }
    }

    /// Decode statistics.
    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    /// Decode one raw text frame.
    ///
    /// The transport (tungstenite) reassembles fragmented WebSocket messages,
    /// so every call receives one complete logical message.
    pub fn decode(&self, raw: &str) -> FeedResult<DecodedFrame> {
        let envelope: RawEnvelope = serde_json::from_str(raw).map_err(|e| {
            self.stats.frames_malformed.fetch_add(1, Ordering::Relaxed);
            DecodeError::MalformedFrame(e.to_string())
        })?;

        match envelope.kind.as_deref() {
            Some("trade") => self.decode_trades(envelope.data),
            Some("ping") => {
                self.stats.heartbeats.fetch_add(1, Ordering::Relaxed);
                Ok(DecodedFrame::Heartbeat)
            }
            Some("error") => {
                let msg = envelope.msg.unwrap_or_else(|| "unknown error".to_string());
                Ok(DecodedFrame::ErrorFrame(msg))
            }
            other => {
                debug!(kind = ?other, "Unknown frame type, ignoring");
                Ok(DecodedFrame::Unknown)
            }
        }
    }

    fn decode_trades(&self, data: Option<serde_json::Value>) -> FeedResult<DecodedFrame> {
        let data = data.ok_or_else(|| {
            self.stats.frames_malformed.fetch_add(1, Ordering::Relaxed);
            DecodeError::MalformedFrame("trade frame without data".to_string())
        })?;

        let raw_trades: Vec<RawTrade> = serde_json::from_value(data).map_err(|e| {
            self.stats.frames_malformed.fetch_add(1, Ordering::Relaxed);
            DecodeError::MalformedFrame(format!("invalid trade data: {e}"))
        })?;

        let mut quotes = Vec::with_capacity(raw_trades.len());
        for trade in raw_trades {
            let timestamp = parse_timestamp_ms(trade.t).ok_or_else(|| {
                self.stats.frames_malformed.fetch_add(1, Ordering::Relaxed);
                DecodeError::MalformedFrame(format!("invalid timestamp: {}", trade.t))
            })?;

            quotes.push(tickstream_core::Quote::new(
                tickstream_core::Symbol::new(&trade.s),
                tickstream_core::Price::new(trade.p),
                timestamp,
                trade.v,
            ));
        }

        self.stats.frames_decoded.fetch_add(1, Ordering::Relaxed);
        Ok(DecodedFrame::Quotes(quotes))
    }
}

impl Default for QuoteDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_timestamp_ms(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}
