//! Feed error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame could not be parsed as a provider message. The caller
    /// drops the frame and keeps the session alive.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
}

pub type FeedResult<T> = Result<T, DecodeError>;
