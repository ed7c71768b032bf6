//! WebSocket connection manager.
//!
//! Owns the reconnect loop: acquires a credential, runs one streaming
//! session until it fails or shutdown is requested, reports the credential
//! outcome back to the pool, then backs off and tries again. Subscription
//! state is replayed on every new session so consumers never resubscribe.

use crate::error::{WsError, WsResult};
use crate::message::StreamRequest;
use crate::watchdog::StalenessWatchdog;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tickstream_bus::{QuoteBus, SubscriptionRegistry, SymbolChange};
use tickstream_core::{LifecycleEvent, Symbol};
use tickstream_feed::{CredentialFault, DecodeStats, DecodedFrame, QuoteDecoder, RateLimitSignal};
use tickstream_keys::{AcquiredCredential, CredentialPool, Outcome};
use tokio::sync::{broadcast, mpsc, Mutex as TokioMutex};
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Provider WebSocket URL without the token query parameter.
    pub url: String,
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub reconnect_max_delay_ms: u64,
    /// A session older than this resets the backoff sequence.
    pub stable_reset_ms: u64,
    /// Inbound silence tolerated before the session is torn down.
    pub staleness_timeout_ms: u64,
    /// How long to wait for a credential when all are cooling.
    pub acquire_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 0, // Infinite
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 60000,
            stable_reset_ms: 60000,
            staleness_timeout_ms: 30000,
            acquire_timeout_ms: 30000,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Exponential backoff with jitter.
pub(crate) struct Backoff {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            attempt: 0,
        }
    }

    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Advance to the next attempt and return its delay.
    ///
    /// attempt=1 -> base, attempt=2 -> 2*base, attempt=3 -> 4*base,
    /// capped at max, plus 0-1000ms jitter.
    pub(crate) fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let exponent = self.attempt.saturating_sub(1).min(10);
        let delay = self.base_ms.saturating_mul(1u64 << exponent).min(self.max_ms);
        Duration::from_millis(delay + rand_jitter())
    }
}

/// Generate random jitter (0-1000ms).
fn rand_jitter() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as u64
}

/// Build the session URL with the token query parameter.
///
/// A bare `wss://host` base gets an explicit `/` path; without it the
/// handshake request line is malformed and every connect is rejected.
fn session_url(base: &str, key: &str) -> String {
    let base = base.trim_end_matches('/');
    let has_path = base
        .find("://")
        .map(|i| &base[i + 3..])
        .is_some_and(|rest| rest.contains('/'));
    if has_path {
        format!("{base}?token={key}")
    } else {
        format!("{base}/?token={key}")
    }
}

/// Symbols subscribed on the current session.
///
/// Pending registry changes are drained before the replay snapshot is taken.
/// A change landing between the drain and the snapshot arrives twice, once in
/// the snapshot and once as a queued event. Tracking the session's set here
/// keeps the wire traffic to one subscribe per symbol.
#[derive(Default)]
struct SessionSubscriptions {
    active: HashSet<Symbol>,
}

impl SessionSubscriptions {
    fn new() -> Self {
        Self::default()
    }

    /// Returns true when the symbol was not yet subscribed this session.
    fn subscribe(&mut self, symbol: &Symbol) -> bool {
        self.active.insert(symbol.clone())
    }

    /// Returns true when the symbol was subscribed this session.
    fn unsubscribe(&mut self, symbol: &Symbol) -> bool {
        self.active.remove(symbol)
    }
}

/// Map a session result to the credential outcome reported to the pool.
fn outcome_for(result: &WsResult<()>) -> Outcome {
    match result {
        Err(WsError::CredentialRateLimited) => Outcome::RateLimited,
        Err(WsError::CredentialRejected) => Outcome::AuthRejected,
        _ => Outcome::Success,
    }
}

/// WebSocket connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    pool: Arc<CredentialPool>,
    registry: Arc<SubscriptionRegistry>,
    changes_rx: TokioMutex<mpsc::UnboundedReceiver<SymbolChange>>,
    bus: Arc<QuoteBus>,
    decoder: QuoteDecoder,
    signal: Box<dyn RateLimitSignal>,
    watchdog: StalenessWatchdog,
    state: Arc<RwLock<ConnectionState>>,
    lifecycle_tx: broadcast::Sender<LifecycleEvent>,
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        pool: Arc<CredentialPool>,
        registry: Arc<SubscriptionRegistry>,
        changes_rx: mpsc::UnboundedReceiver<SymbolChange>,
        bus: Arc<QuoteBus>,
        signal: Box<dyn RateLimitSignal>,
    ) -> Self {
        let (lifecycle_tx, _) = broadcast::channel(64);
        let watchdog = StalenessWatchdog::new(config.staleness_timeout_ms);
        Self {
            config,
            pool,
            registry,
            changes_rx: TokioMutex::new(changes_rx),
            bus,
            decoder: QuoteDecoder::new(),
            signal,
            watchdog,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            lifecycle_tx,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Subscribe to lifecycle events. Events are advisory; a lagging
    /// receiver misses old events rather than stalling the connection.
    pub fn lifecycle_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle_tx.subscribe()
    }

    /// Decode statistics for the life of this manager.
    pub fn decode_stats(&self) -> &DecodeStats {
        self.decoder.stats()
    }

    /// Signal graceful shutdown. The session loop sends a Close frame and
    /// exits; the reconnect loop stops retrying.
    pub fn shutdown(&self) {
        info!("ConnectionManager shutdown requested");
        self.shutdown_token.cancel();
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Run the connect/reconnect loop until shutdown or the attempt limit.
    pub async fn run(&self) -> WsResult<()> {
        let mut backoff = Backoff::new(
            self.config.reconnect_base_delay_ms,
            self.config.reconnect_max_delay_ms,
        );

        loop {
            if self.is_shutdown() {
                info!("Shutdown requested, exiting connect loop");
                *self.state.write() = ConnectionState::Disconnected;
                return Ok(());
            }

            *self.state.write() = ConnectionState::Connecting;

            let cred = match self
                .pool
                .acquire_when_available(Duration::from_millis(self.config.acquire_timeout_ms))
                .await
            {
                Ok(cred) => cred,
                Err(e) => {
                    warn!(?e, "No credential available");
                    self.emit(LifecycleEvent::AllCredentialsExhausted);
                    if !self.wait_for_credential().await {
                        *self.state.write() = ConnectionState::Disconnected;
                        return Ok(());
                    }
                    continue;
                }
            };

            let session_start = Instant::now();
            let result = self.run_session(&cred).await;
            let outcome = outcome_for(&result);
            self.pool.report(cred, outcome);

            match result {
                Ok(()) => {
                    // Only a shutdown request ends a session cleanly.
                    info!("Session closed");
                }
                Err(e) => {
                    error!(?e, "Session ended with error");
                }
            }

            self.emit(LifecycleEvent::Disconnected);

            if self.is_shutdown() {
                info!("Shutdown requested after disconnect, not reconnecting");
                *self.state.write() = ConnectionState::Disconnected;
                return Ok(());
            }

            // A session that stayed up long enough proves the endpoint is
            // healthy again; later failures restart backoff from the base.
            if session_start.elapsed() >= Duration::from_millis(self.config.stable_reset_ms) {
                backoff.reset();
            }

            if self.config.max_reconnect_attempts > 0
                && backoff.attempt() + 1 > self.config.max_reconnect_attempts
            {
                error!(
                    attempts = backoff.attempt(),
                    "Max reconnection attempts reached"
                );
                *self.state.write() = ConnectionState::Disconnected;
                return Err(WsError::ConnectionFailed(
                    "Max reconnection attempts reached".to_string(),
                ));
            }

            *self.state.write() = ConnectionState::Reconnecting;
            let delay = backoff.next_delay();
            self.emit(LifecycleEvent::Reconnecting {
                attempt: backoff.attempt(),
            });
            warn!(
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis(),
                "Reconnecting"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    *self.state.write() = ConnectionState::Disconnected;
                    return Ok(());
                }
            }
        }
    }

    /// Wait for the earliest cooldown to expire (or shutdown).
    /// Returns false when shutdown was requested.
    async fn wait_for_credential(&self) -> bool {
        let wait = self
            .pool
            .next_available_at()
            .and_then(|at| (at - chrono::Utc::now()).to_std().ok())
            .unwrap_or(Duration::from_secs(5));

        tokio::select! {
            () = tokio::time::sleep(wait) => {
                self.pool.expire_cooldowns();
                true
            }
            () = self.shutdown_token.cancelled() => false,
        }
    }

    async fn run_session(&self, cred: &AcquiredCredential) -> WsResult<()> {
        let url = session_url(&self.config.url, cred.key());
        // Log the credential id, never the key.
        info!(credential = cred.id(), url = %self.config.url, "Connecting to stream");

        let (ws_stream, _response) =
            match connect_async_tls_with_config(&url, None, true, None).await {
                Ok(pair) => pair,
                Err(tungstenite::Error::Http(response)) => {
                    let status = response.status().as_u16();
                    warn!(status, credential = cred.id(), "Handshake rejected");
                    return Err(match self.signal.classify_handshake(status) {
                        Some(CredentialFault::RateLimited) => WsError::CredentialRateLimited,
                        Some(CredentialFault::AuthRejected) => WsError::CredentialRejected,
                        None => WsError::ConnectionFailed(format!(
                            "handshake rejected with status {status}"
                        )),
                    });
                }
                Err(e) => return Err(e.into()),
            };
        let (mut write, mut read) = ws_stream.split();

        *self.state.write() = ConnectionState::Connected;
        self.watchdog.reset();
        self.emit(LifecycleEvent::Connected);
        info!(credential = cred.id(), "Stream connected");

        // Changes queued while disconnected are superseded by the full
        // replay below.
        {
            let mut changes = self.changes_rx.lock().await;
            while changes.try_recv().is_ok() {}
        }

        let mut session = SessionSubscriptions::new();
        let symbols = self.registry.current_symbols();
        info!(count = symbols.len(), "Replaying subscriptions");
        for symbol in &symbols {
            if session.subscribe(symbol) {
                let text = StreamRequest::subscribe(symbol).to_text()?;
                write.send(Message::Text(text)).await?;
            }
        }

        let mut check_timer = tokio::time::interval(self.watchdog.check_period());

        loop {
            let change_recv = async { self.changes_rx.lock().await.recv().await };

            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in stream loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(?e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.watchdog.record_frame();
                            if let Some(fault) = self.handle_text_frame(&text) {
                                return Err(match fault {
                                    CredentialFault::RateLimited => WsError::CredentialRateLimited,
                                    CredentialFault::AuthRejected => WsError::CredentialRejected,
                                });
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.watchdog.record_frame();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.watchdog.record_frame();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "Stream closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(?e, "Stream read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("Stream ended");
                            return Err(WsError::ConnectionClosed {
                                code: 1006,
                                reason: "Stream ended".to_string(),
                            });
                        }
                        // Binary and raw frames count as liveness even
                        // though the provider only speaks text.
                        Some(Ok(_)) => {
                            self.watchdog.record_frame();
                        }
                    }
                }

                change = change_recv => {
                    match change {
                        Some(SymbolChange::Added(symbol)) => {
                            if session.subscribe(&symbol) {
                                debug!(%symbol, "Subscribing");
                                let text = StreamRequest::subscribe(&symbol).to_text()?;
                                write.send(Message::Text(text)).await?;
                            }
                        }
                        Some(SymbolChange::Removed(symbol)) => {
                            if session.unsubscribe(&symbol) {
                                debug!(%symbol, "Unsubscribing");
                                let text = StreamRequest::unsubscribe(&symbol).to_text()?;
                                write.send(Message::Text(text)).await?;
                            }
                        }
                        // Registry dropped; the session keeps its current set.
                        None => {}
                    }
                }

                _ = check_timer.tick() => {
                    if self.watchdog.is_stale() {
                        let silent_ms = self.watchdog.elapsed_ms();
                        error!(silent_ms, "Stale connection");
                        return Err(WsError::StaleConnection { silent_ms });
                    }
                    if self.watchdog.should_probe() {
                        debug!("Probing silent connection");
                        write.send(Message::Ping(Vec::new())).await?;
                    }
                }
            }
        }
    }

    /// Decode and dispatch one text frame. Returns a credential fault when
    /// the provider signaled one in-band.
    fn handle_text_frame(&self, text: &str) -> Option<CredentialFault> {
        let frame = match self.decoder.decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                // One bad frame never tears the session down.
                warn!(?e, "Dropping malformed frame");
                return None;
            }
        };

        if let Some(fault) = self.signal.classify_frame(&frame) {
            return Some(fault);
        }

        match frame {
            DecodedFrame::Quotes(quotes) => {
                for quote in quotes {
                    self.bus.publish(quote);
                }
            }
            DecodedFrame::Heartbeat => {
                debug!("Provider heartbeat");
            }
            DecodedFrame::ErrorFrame(msg) => {
                warn!(%msg, "Provider error frame");
            }
            DecodedFrame::Unknown => {}
        }

        None
    }

    fn emit(&self, event: LifecycleEvent) {
        let _ = self.lifecycle_tx.send(event);
    }
}
