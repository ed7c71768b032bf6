//! Reference-counted symbol subscription registry.

use parking_lot::Mutex;
use std::collections::HashMap;
use tickstream_core::Symbol;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Incremental change to the wanted symbol set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolChange {
    /// First consumer subscribed to the symbol.
    Added(Symbol),
    /// Last consumer unsubscribed from the symbol.
    Removed(Symbol),
}

/// Opaque token returned from [`SubscriptionRegistry::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(Uuid);

#[derive(Default)]
struct RegistryInner {
    refcounts: HashMap<Symbol, usize>,
    tokens: HashMap<Uuid, Symbol>,
}

/// Tracks which symbols are currently wanted and by how many consumers.
///
/// Deduplicates subscription requests: the provider sees one subscribe per
/// symbol no matter how many consumers want it. Safe for concurrent
/// subscribe/unsubscribe.
pub struct SubscriptionRegistry {
    inner: Mutex<RegistryInner>,
    changes_tx: mpsc::UnboundedSender<SymbolChange>,
}

impl SubscriptionRegistry {
    /// Create a registry and the change stream consumed by the connection
    /// layer for incremental subscribe/unsubscribe emission.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SymbolChange>) {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: Mutex::new(RegistryInner::default()),
                changes_tx,
            },
            changes_rx,
        )
    }

    /// Register a consumer's interest in a symbol.
    ///
    /// The symbol joins the wanted set before this call returns.
    pub fn subscribe(&self, symbol: Symbol) -> SubscriptionToken {
        let token = Uuid::new_v4();
        let mut inner = self.inner.lock();
        inner.tokens.insert(token, symbol.clone());

        let count = inner.refcounts.entry(symbol.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            debug!(%symbol, "Symbol added to wanted set");
            let _ = self.changes_tx.send(SymbolChange::Added(symbol));
        }

        SubscriptionToken(token)
    }

    /// Release a consumer's interest. The symbol leaves the wanted set as
    /// soon as the last consumer unsubscribes.
    pub fn unsubscribe(&self, token: SubscriptionToken) {
        let mut inner = self.inner.lock();
        let Some(symbol) = inner.tokens.remove(&token.0) else {
            return; // Already released.
        };

        let remove = match inner.refcounts.get_mut(&symbol) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };

        if remove {
            inner.refcounts.remove(&symbol);
            debug!(%symbol, "Symbol removed from wanted set");
            let _ = self.changes_tx.send(SymbolChange::Removed(symbol));
        }
    }

    /// Snapshot of the currently wanted symbol set.
    pub fn current_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.inner.lock().refcounts.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Consumer count for a symbol.
    pub fn refcount(&self, symbol: &Symbol) -> usize {
        self.inner.lock().refcounts.get(symbol).copied().unwrap_or(0)
    }
}
