//! High-level streaming client facade.
//!
//! Wires the credential pool, subscription registry, quote bus, and
//! connection manager together and owns the background tasks. Consumers
//! only see [`StreamClient`] and per-symbol [`QuoteHandle`]s.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tickstream_bus::{QuoteBus, QuoteSubscription, SubscriptionRegistry, SubscriptionToken};
use tickstream_core::{LifecycleEvent, Quote, Symbol};
use tickstream_keys::CredentialPool;
use tickstream_feed::ProviderRateLimitSignal;
use tickstream_telemetry::Metrics;
use tickstream_ws::{ConnectionManager, ConnectionState};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Streaming quote client.
pub struct StreamClient {
    manager: Arc<ConnectionManager>,
    registry: Arc<SubscriptionRegistry>,
    bus: Arc<QuoteBus>,
    pool: Arc<CredentialPool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamClient {
    /// Build a client from configuration. Fails if no usable API key is
    /// configured in the file or the environment.
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let keys = config.resolve_api_keys();
        if keys.is_empty() {
            return Err(AppError::Config(
                "No API keys configured (set FINNHUB_API_KEY or [keys].api_keys)".to_string(),
            ));
        }
        info!(key_count = keys.len(), "API keys resolved");

        let pool = Arc::new(CredentialPool::new(keys, config.pool_config()));
        let (registry, changes_rx) = SubscriptionRegistry::new();
        let registry = Arc::new(registry);
        let bus = Arc::new(QuoteBus::new());

        let manager = Arc::new(ConnectionManager::new(
            config.connection_config(),
            pool.clone(),
            registry.clone(),
            changes_rx,
            bus.clone(),
            Box::new(ProviderRateLimitSignal),
        ));

        Ok(Self {
            manager,
            registry,
            bus,
            pool,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the connection loop and housekeeping tasks.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();

        let manager = self.manager.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = manager.run().await {
                error!(?e, "Connection loop terminated");
            }
        }));

        let mut events = self.manager.lifecycle_events();
        tasks.push(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(LifecycleEvent::Connected) => Metrics::stream_connected(),
                    Ok(LifecycleEvent::Disconnected) => Metrics::stream_disconnected(),
                    Ok(LifecycleEvent::Reconnecting { .. }) => Metrics::reconnect("disconnect"),
                    Ok(LifecycleEvent::AllCredentialsExhausted) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        let manager = self.manager.clone();
        let pool = self.pool.clone();
        let bus = self.bus.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            let mut seen_decoded = 0u64;
            let mut seen_malformed = 0u64;
            let mut seen_heartbeats = 0u64;
            let mut seen_published = 0u64;

            loop {
                interval.tick().await;
                if manager.is_shutdown() {
                    break;
                }

                pool.expire_cooldowns();
                bus.prune_closed();

                let (available, cooling, exhausted) = pool.state_counts();
                Metrics::credential_states(available, cooling, exhausted);

                // Decode stats are cumulative; export the delta each tick.
                let stats = manager.decode_stats();
                let decoded = stats.decoded();
                let malformed = stats.malformed();
                let heartbeats = stats.heartbeat_count();
                Metrics::frames("trade", decoded - seen_decoded);
                Metrics::frames("heartbeat", heartbeats - seen_heartbeats);
                Metrics::frames_malformed(malformed - seen_malformed);
                seen_decoded = decoded;
                seen_malformed = malformed;
                seen_heartbeats = heartbeats;

                let published = bus.published_count();
                Metrics::quotes_published(published - seen_published);
                seen_published = published;
            }
        }));
    }

    /// Subscribe to live quotes for a symbol.
    ///
    /// Subscription interest is reference counted across handles; the
    /// provider sees one subscribe per symbol. Dropping the handle releases
    /// the interest.
    pub fn subscribe(&self, symbol: Symbol) -> QuoteHandle {
        let token = self.registry.subscribe(symbol.clone());
        let subscription = self.bus.subscribe(symbol);
        QuoteHandle {
            registry: self.registry.clone(),
            token: Some(token),
            subscription,
        }
    }

    /// Latest quote seen for a symbol. Snapshots for symbols no handle
    /// watches anymore are pruned by the maintenance task.
    pub fn last_quote(&self, symbol: &Symbol) -> Option<Quote> {
        self.bus.latest(symbol)
    }

    /// Subscribe to connection lifecycle events.
    pub fn lifecycle_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.manager.lifecycle_events()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Credential pool counts: (available, cooling, exhausted).
    pub fn credential_counts(&self) -> (usize, usize, usize) {
        self.pool.state_counts()
    }

    /// Request shutdown and wait up to `grace` for background tasks.
    /// Tasks still running after the grace period are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        info!("Shutting down stream client");
        self.manager.shutdown();

        let handles = std::mem::take(&mut *self.tasks.lock());
        for mut handle in handles {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        info!("Stream client stopped");
    }
}

/// Per-symbol quote receiver. Unsubscribes on drop.
pub struct QuoteHandle {
    registry: Arc<SubscriptionRegistry>,
    token: Option<SubscriptionToken>,
    subscription: QuoteSubscription,
}

impl QuoteHandle {
    pub fn symbol(&self) -> &Symbol {
        self.subscription.symbol()
    }

    /// Wait for the next quote. Intermediate quotes published while the
    /// caller was busy are coalesced into the most recent one.
    pub async fn recv(&mut self) -> Option<Quote> {
        self.subscription.recv().await
    }

    /// Latest quote on this subscription without waiting.
    pub fn latest(&self) -> Option<Quote> {
        self.subscription.latest()
    }
}

impl Drop for QuoteHandle {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.registry.unsubscribe(token);
        }
    }
}
