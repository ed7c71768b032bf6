//! Coalescing quote fan-out.
//!
//! Each subscriber owns a `watch` channel, which holds exactly the latest
//! value: publishing overwrites whatever the consumer has not yet read, so a
//! slow consumer skips intermediate quotes instead of stalling the publisher.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tickstream_core::{Quote, Symbol};
use tokio::sync::watch;
use tracing::trace;
use uuid::Uuid;

struct SubscriberSlot {
    id: Uuid,
    tx: watch::Sender<Option<Quote>>,
}

#[derive(Default)]
struct BusInner {
    subscribers: HashMap<Symbol, Vec<SubscriberSlot>>,
    latest: HashMap<Symbol, Quote>,
}

/// Fan-out point between the connection task and quote consumers.
///
/// Guarantees per symbol: timestamps delivered to any one subscriber are
/// non-decreasing, and publishing never blocks regardless of consumer speed.
pub struct QuoteBus {
    inner: Mutex<BusInner>,
    published: AtomicU64,
}

impl QuoteBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner::default()),
            published: AtomicU64::new(0),
        }
    }

    /// Publish a quote to every subscriber of its symbol.
    ///
    /// Quotes older than the last published timestamp for the symbol are
    /// dropped. Out-of-order delivery from the provider never reaches
    /// consumers. Returns whether the quote was accepted.
    pub fn publish(&self, quote: Quote) -> bool {
        let mut inner = self.inner.lock();

        if let Some(last) = inner.latest.get(&quote.symbol) {
            if quote.timestamp < last.timestamp {
                trace!(
                    symbol = %quote.symbol,
                    ts = %quote.timestamp,
                    last = %last.timestamp,
                    "Dropping out-of-order quote"
                );
                return false;
            }
        }

        inner.latest.insert(quote.symbol.clone(), quote.clone());

        if let Some(slots) = inner.subscribers.get_mut(&quote.symbol) {
            // send_replace never waits on receivers; drop slots whose
            // subscription handle has gone away.
            slots.retain(|slot| !slot.tx.is_closed());
            for slot in slots.iter() {
                slot.tx.send_replace(Some(quote.clone()));
            }
        }

        self.published.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Cumulative count of quotes accepted by [`publish`](Self::publish).
    /// Dropped out-of-order quotes are not counted.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Subscribe to quotes for one symbol.
    pub fn subscribe(&self, symbol: Symbol) -> QuoteSubscription {
        let mut inner = self.inner.lock();
        let (tx, rx) = watch::channel(None);
        let id = Uuid::new_v4();

        inner
            .subscribers
            .entry(symbol.clone())
            .or_default()
            .push(SubscriberSlot { id, tx });

        QuoteSubscription { id, symbol, rx }
    }

    /// Remove a subscriber slot. Dropping the [`QuoteSubscription`] has the
    /// same effect at the next publish or prune.
    pub fn unsubscribe(&self, subscription: &QuoteSubscription) {
        let mut inner = self.inner.lock();
        if let Some(slots) = inner.subscribers.get_mut(&subscription.symbol) {
            slots.retain(|slot| slot.id != subscription.id);
            if slots.is_empty() {
                inner.subscribers.remove(&subscription.symbol);
            }
        }
    }

    /// Latest quote published for a symbol, if any.
    pub fn latest(&self, symbol: &Symbol) -> Option<Quote> {
        self.inner.lock().latest.get(symbol).cloned()
    }

    /// Drop subscriber slots whose handles were dropped and snapshot entries
    /// for symbols with no subscribers. Returns the number of slots removed.
    pub fn prune_closed(&self) -> usize {
        let mut inner = self.inner.lock();
        let mut removed = 0;

        inner.subscribers.retain(|_, slots| {
            let before = slots.len();
            slots.retain(|slot| !slot.tx.is_closed());
            removed += before - slots.len();
            !slots.is_empty()
        });

        let live: Vec<Symbol> = inner.subscribers.keys().cloned().collect();
        inner.latest.retain(|symbol, _| live.contains(symbol));

        removed
    }

    /// Number of live subscriber slots across all symbols.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.values().map(Vec::len).sum()
    }
}

impl Default for QuoteBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a bus subscription.
pub struct QuoteSubscription {
    id: Uuid,
    symbol: Symbol,
    rx: watch::Receiver<Option<Quote>>,
}

impl QuoteSubscription {
    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Wait for the next quote.
    ///
    /// Coalescing applies: if several quotes were published since the last
    /// call, only the most recent one is returned. `None` means the bus side
    /// of the channel was dropped.
    pub async fn recv(&mut self) -> Option<Quote> {
        loop {
            self.rx.changed().await.ok()?;
            let quote = self.rx.borrow_and_update().clone();
            if let Some(quote) = quote {
                return Some(quote);
            }
        }
    }

    /// Latest quote seen on this subscription without waiting.
    pub fn latest(&self) -> Option<Quote> {
        self.rx.borrow().clone()
    }
}
