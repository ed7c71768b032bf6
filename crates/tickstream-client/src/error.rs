//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tickstream_ws::WsError>),

    #[error("Decode error: {0}")]
    Decode(#[from] tickstream_feed::DecodeError),

    #[error("Credential pool error: {0}")]
    Pool(#[from] tickstream_keys::PoolError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] tickstream_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
