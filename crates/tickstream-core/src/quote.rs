//! Decoded quote value type.

use crate::{Price, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One decoded price update for a symbol.
///
/// Immutable value produced by the decoder; never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Trade price with full tick precision.
    pub price: Price,
    /// Provider trade timestamp.
    pub timestamp: DateTime<Utc>,
    /// Trade volume, when the provider includes it.
    pub volume: Option<Decimal>,
}

impl Quote {
    /// Create a new quote.
    pub fn new(
        symbol: Symbol,
        price: Price,
        timestamp: DateTime<Utc>,
        volume: Option<Decimal>,
    ) -> Self {
        Self {
            symbol,
            price,
            timestamp,
            volume,
        }
    }

    /// Age of this quote in milliseconds.
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.timestamp).num_milliseconds()
    }
}
