//! Subscription registry and coalescing quote fan-out.
//!
//! - [`SubscriptionRegistry`] reference-counts wanted symbols across
//!   consumers and emits incremental add/remove changes so an open session
//!   subscribes and unsubscribes without full resubscription churn.
//! - [`QuoteBus`] delivers decoded quotes to all subscribers of a symbol
//!   with latest-value coalescing: a slow consumer only ever sees the most
//!   recent quote, and publishing never blocks on any consumer.

pub mod bus;
pub mod registry;

pub use bus::{QuoteBus, QuoteSubscription};
pub use registry::{SubscriptionRegistry, SubscriptionToken, SymbolChange};
