//! Upstream quote capability consumed by the OHLC cache.
//!
//! The cache treats its upstream as an opaque `fetch(symbol, window) -> raw bars`
//! capability. This crate defines that seam ([`providers::QuoteProvider`]), the
//! vendor-agnostic raw bar model, and one concrete JSON-over-HTTP provider.

pub mod models;
pub mod providers;

pub use models::{FetchWindow, RawBar};
pub use providers::{ProviderError, ProviderInitError, QuoteProvider};
