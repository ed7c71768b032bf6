//! Core domain types for the tickstream quote pipeline.
//!
//! This crate provides fundamental types used throughout the streaming stack:
//! - `Symbol`: Normalized ticker symbol identifier
//! - `Price`: Precision-safe decimal price
//! - `Quote`: One decoded price update for a symbol
//! - `LifecycleEvent`: Advisory connection status events for UI consumers

pub mod decimal;
pub mod error;
pub mod event;
pub mod quote;
pub mod symbol;

pub use decimal::Price;
pub use error::{CoreError, Result};
pub use event::LifecycleEvent;
pub use quote::Quote;
pub use symbol::Symbol;
