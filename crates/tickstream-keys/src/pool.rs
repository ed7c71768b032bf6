//! Credential pool implementation.

use crate::error::{PoolError, PoolResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Base cooldown after the first rate-limit report (ms).
    pub cooldown_base_ms: u64,
    /// Maximum cooldown regardless of consecutive rate limits (ms).
    pub cooldown_max_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            cooldown_base_ms: 10_000,
            cooldown_max_ms: 900_000,
        }
    }
}

impl PoolConfig {
    /// Cooldown for the n-th consecutive rate limit: `base * 2^(n-1)`, capped.
    pub fn cooldown_for(&self, consecutive_rate_limits: u32) -> Duration {
        let exponent = consecutive_rate_limits.saturating_sub(1).min(10);
        let ms = self
            .cooldown_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.cooldown_max_ms);
        Duration::from_millis(ms)
    }
}

/// Credential state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// Usable now.
    Available,
    /// Rate limited; usable again once the cooldown expires.
    Cooling,
    /// Auth rejected; never retried for the process lifetime.
    Exhausted,
}

impl std::fmt::Display for CredentialState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "AVAILABLE"),
            Self::Cooling => write!(f, "COOLING"),
            Self::Exhausted => write!(f, "EXHAUSTED"),
        }
    }
}

/// Outcome of using a credential, reported back to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Session ended without a credential fault.
    Success,
    /// Provider signaled a per-key rate limit.
    RateLimited,
    /// Provider rejected the key itself.
    AuthRejected,
}

/// Internal per-key slot.
#[derive(Debug)]
struct CredentialSlot {
    key: String,
    state: CredentialState,
    cooldown_until: Option<DateTime<Utc>>,
    last_used: Option<DateTime<Utc>>,
    consecutive_rate_limits: u32,
    /// Held by an active session. Guards the one-open-session-per-credential
    /// invariant independently of cooldown state.
    in_use: bool,
}

/// A credential leased from the pool.
///
/// Must be returned via [`CredentialPool::report`]; taking it by value there
/// prevents reuse after the outcome is recorded.
#[derive(Debug)]
pub struct AcquiredCredential {
    id: usize,
    key: String,
}

impl AcquiredCredential {
    /// Slot index, used in logs instead of the key itself.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The raw API key to present to the provider.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Credential pool.
///
/// All selection runs under a single mutex so concurrent sessions can never
/// claim the same credential.
pub struct CredentialPool {
    config: PoolConfig,
    slots: Mutex<Vec<CredentialSlot>>,
}

impl CredentialPool {
    /// Create a pool from raw key strings. Blank entries are skipped.
    pub fn new(keys: Vec<String>, config: PoolConfig) -> Self {
        let slots: Vec<CredentialSlot> = keys
            .into_iter()
            .filter(|k| !k.trim().is_empty())
            .map(|key| CredentialSlot {
                key: key.trim().to_string(),
                state: CredentialState::Available,
                cooldown_until: None,
                last_used: None,
                consecutive_rate_limits: 0,
                in_use: false,
            })
            .collect();

        info!(count = slots.len(), "Credential pool initialized");
        Self {
            config,
            slots: Mutex::new(slots),
        }
    }

    /// Number of credentials in the pool.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Acquire the Available credential with the earliest last-used time.
    ///
    /// Cooling credentials are never selected before their cooldown expires;
    /// callers must wait. Updates the last-used timestamp on selection.
    pub fn acquire(&self) -> PoolResult<AcquiredCredential> {
        let now = Utc::now();
        let mut slots = self.slots.lock();
        Self::expire_locked(&mut slots, now);

        let candidate = slots
            .iter_mut()
            .enumerate()
            .filter(|(_, s)| s.state == CredentialState::Available && !s.in_use)
            .min_by_key(|(_, s)| s.last_used)
            .map(|(i, s)| {
                s.last_used = Some(now);
                s.in_use = true;
                (i, s.key.clone())
            });

        match candidate {
            Some((id, key)) => {
                debug!(credential = id, "Credential acquired");
                Ok(AcquiredCredential { id, key })
            }
            None => Err(PoolError::NoCredentialsAvailable),
        }
    }

    /// Acquire, waiting up to `timeout` for a cooldown to expire.
    ///
    /// Returns `NoCredentialsAvailable` once the timeout elapses or when
    /// every credential is permanently Exhausted.
    pub async fn acquire_when_available(
        &self,
        timeout: Duration,
    ) -> PoolResult<AcquiredCredential> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.acquire() {
                Ok(cred) => return Ok(cred),
                Err(PoolError::NoCredentialsAvailable) => {
                    if self.is_exhausted() {
                        return Err(PoolError::NoCredentialsAvailable);
                    }
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PoolError::NoCredentialsAvailable);
            }

            // Sleep until the soonest cooldown expiry, but poll at least
            // every 100ms in case a leased key is returned.
            let wait = self
                .next_available_at()
                .and_then(|t| (t - Utc::now()).to_std().ok())
                .unwrap_or(Duration::from_millis(100))
                .min(Duration::from_millis(100))
                .min(remaining)
                .max(Duration::from_millis(5));
            tokio::time::sleep(wait).await;
        }
    }

    /// Report the outcome of using a credential and release the lease.
    pub fn report(&self, cred: AcquiredCredential, outcome: Outcome) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(cred.id) else {
            return;
        };
        slot.in_use = false;

        match outcome {
            Outcome::Success => {
                slot.consecutive_rate_limits = 0;
                if slot.state == CredentialState::Available {
                    debug!(credential = cred.id, "Credential returned after success");
                }
            }
            Outcome::RateLimited => {
                slot.consecutive_rate_limits += 1;
                let cooldown = self.config.cooldown_for(slot.consecutive_rate_limits);
                slot.state = CredentialState::Cooling;
                slot.cooldown_until =
                    Some(Utc::now() + ChronoDuration::from_std(cooldown).unwrap_or_default());
                warn!(
                    credential = cred.id,
                    consecutive = slot.consecutive_rate_limits,
                    cooldown_ms = cooldown.as_millis(),
                    "Credential rate limited, cooling"
                );
            }
            Outcome::AuthRejected => {
                slot.state = CredentialState::Exhausted;
                slot.cooldown_until = None;
                error!(
                    credential = cred.id,
                    "Credential auth rejected, permanently exhausted"
                );
            }
        }
    }

    /// Move expired Cooling credentials back to Available.
    ///
    /// Called by the maintenance task and on every acquire.
    pub fn expire_cooldowns(&self) -> usize {
        let mut slots = self.slots.lock();
        Self::expire_locked(&mut slots, Utc::now())
    }

    fn expire_locked(slots: &mut [CredentialSlot], now: DateTime<Utc>) -> usize {
        let mut expired = 0;
        for (i, slot) in slots.iter_mut().enumerate() {
            if slot.state == CredentialState::Cooling
                && slot.cooldown_until.is_some_and(|t| t <= now)
            {
                slot.state = CredentialState::Available;
                slot.cooldown_until = None;
                expired += 1;
                debug!(credential = i, "Cooldown expired, credential available");
            }
        }
        expired
    }

    /// Earliest cooldown expiry among Cooling credentials.
    pub fn next_available_at(&self) -> Option<DateTime<Utc>> {
        self.slots
            .lock()
            .iter()
            .filter(|s| s.state == CredentialState::Cooling)
            .filter_map(|s| s.cooldown_until)
            .min()
    }

    /// True when every credential is permanently Exhausted (or the pool is
    /// empty). Terminal for the process lifetime.
    pub fn is_exhausted(&self) -> bool {
        self.slots
            .lock()
            .iter()
            .all(|s| s.state == CredentialState::Exhausted)
    }

    /// Count of credentials per state, for metrics.
    pub fn state_counts(&self) -> (usize, usize, usize) {
        let slots = self.slots.lock();
        let mut counts = (0, 0, 0);
        for s in slots.iter() {
            match s.state {
                CredentialState::Available => counts.0 += 1,
                CredentialState::Cooling => counts.1 += 1,
                CredentialState::Exhausted => counts.2 += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> PoolConfig {
        PoolConfig {
            cooldown_base_ms: 50,
            cooldown_max_ms: 400,
        }
    }

    fn pool_with(n: usize) -> CredentialPool {
        let keys = (0..n).map(|i| format!("key-{i}")).collect();
        CredentialPool::new(keys, fast_config())
    }

    #[test]
    fn test_empty_pool_reports_no_credentials() {
        let pool = CredentialPool::new(vec![], PoolConfig::default());
        assert!(matches!(
            pool.acquire(),
            Err(PoolError::NoCredentialsAvailable)
        ));
        // Blank keys are filtered like empty config entries.
        let pool = CredentialPool::new(vec!["  ".to_string()], PoolConfig::default());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_round_robin_bias() {
        let pool = pool_with(2);

        let c0 = pool.acquire().unwrap();
        assert_eq!(c0.id(), 0);
        pool.report(c0, Outcome::Success);

        // Never-used key 1 has the earliest last-used time.
        let c1 = pool.acquire().unwrap();
        assert_eq!(c1.id(), 1);
        pool.report(c1, Outcome::Success);

        // Key 0 is now the least recently used again.
        let c0 = pool.acquire().unwrap();
        assert_eq!(c0.id(), 0);
        pool.report(c0, Outcome::Success);
    }

    #[test]
    fn test_leased_credential_not_reacquired() {
        let pool = pool_with(1);
        let c = pool.acquire().unwrap();
        assert!(pool.acquire().is_err());
        pool.report(c, Outcome::Success);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn test_cooling_never_selected_before_expiry() {
        let pool = pool_with(1);
        let c = pool.acquire().unwrap();
        pool.report(c, Outcome::RateLimited);

        assert!(matches!(
            pool.acquire(),
            Err(PoolError::NoCredentialsAvailable)
        ));

        std::thread::sleep(Duration::from_millis(70));
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn test_rate_limit_rotates_to_second_key() {
        let pool = pool_with(2);

        let c0 = pool.acquire().unwrap();
        assert_eq!(c0.id(), 0);
        pool.report(c0, Outcome::RateLimited);

        // Retry must land on the second key until key 0's cooldown elapses.
        let c1 = pool.acquire().unwrap();
        assert_eq!(c1.id(), 1);
        pool.report(c1, Outcome::Success);

        let again = pool.acquire().unwrap();
        assert_eq!(again.id(), 1);
        pool.report(again, Outcome::Success);
    }

    #[test]
    fn test_auth_rejected_is_terminal_and_deterministic() {
        let pool = pool_with(3);
        for _ in 0..3 {
            let c = pool.acquire().unwrap();
            pool.report(c, Outcome::AuthRejected);
        }

        assert!(pool.is_exhausted());
        // Idempotent terminal state.
        for _ in 0..3 {
            assert!(matches!(
                pool.acquire(),
                Err(PoolError::NoCredentialsAvailable)
            ));
        }
    }

    #[test]
    fn test_cooldown_exponential_and_capped() {
        let config = fast_config();
        assert_eq!(config.cooldown_for(1), Duration::from_millis(50));
        assert_eq!(config.cooldown_for(2), Duration::from_millis(100));
        assert_eq!(config.cooldown_for(3), Duration::from_millis(200));
        assert_eq!(config.cooldown_for(4), Duration::from_millis(400));
        // Cap
        assert_eq!(config.cooldown_for(10), Duration::from_millis(400));
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let pool = pool_with(1);

        let c = pool.acquire().unwrap();
        pool.report(c, Outcome::RateLimited);
        std::thread::sleep(Duration::from_millis(70));

        let c = pool.acquire().unwrap();
        pool.report(c, Outcome::Success);

        // The next rate limit restarts at the base cooldown.
        let c = pool.acquire().unwrap();
        pool.report(c, Outcome::RateLimited);
        let expiry = pool.next_available_at().unwrap();
        let remaining = (expiry - Utc::now()).num_milliseconds();
        assert!(remaining <= 60, "expected base cooldown, got {remaining}ms");
    }

    #[tokio::test]
    async fn test_acquire_when_available_waits_out_cooldown() {
        let pool = pool_with(1);
        let c = pool.acquire().unwrap();
        pool.report(c, Outcome::RateLimited);

        let cred = pool
            .acquire_when_available(Duration::from_millis(500))
            .await;
        assert!(cred.is_ok());
    }

    #[tokio::test]
    async fn test_acquire_when_available_exhausted_fails_fast() {
        let pool = pool_with(1);
        let c = pool.acquire().unwrap();
        pool.report(c, Outcome::AuthRejected);

        let start = Instant::now();
        let result = pool.acquire_when_available(Duration::from_secs(5)).await;
        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_state_counts() {
        let pool = pool_with(3);
        let c0 = pool.acquire().unwrap();
        pool.report(c0, Outcome::RateLimited);
        let c1 = pool.acquire().unwrap();
        pool.report(c1, Outcome::AuthRejected);

        assert_eq!(pool.state_counts(), (1, 1, 1));
    }
}
