//! API credential pool with cooldown-aware rotation.
//!
//! Owns the set of provider API keys and tracks per-key state so the
//! connection layer can survive per-key rate limits:
//! - Round-robin-biased selection (earliest last-used Available key)
//! - Exponential cooldown on rate-limit reports, capped
//! - Permanent exhaustion on auth rejection
//! - Serialized acquisition so two sessions never claim the same key

pub mod error;
pub mod pool;

pub use error::{PoolError, PoolResult};
pub use pool::{AcquiredCredential, CredentialPool, CredentialState, Outcome, PoolConfig};
