//! Credential pool error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    /// Every key is Cooling or Exhausted. New connection attempts must wait
    /// for a cooldown to expire; if all keys are Exhausted this state is
    /// terminal for the process lifetime.
    #[error("No credentials available")]
    NoCredentialsAvailable,
}

pub type PoolResult<T> = Result<T, PoolError>;
