//! Provider abstraction for upstream quote sources.
//!
//! This module defines the [`QuoteProvider`] trait, a unified interface for
//! fetching raw daily bars from any market data vendor. Each concrete vendor
//! implements it to handle its own API details; the cache layer sits above the
//! trait and never learns the wire format.
//!
//! The trait is async and object safe, so callers can hold an
//! `Arc<dyn QuoteProvider>` chosen at runtime.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use quote_provider::{FetchWindow, ProviderError, QuoteProvider, RawBar};
//!
//! struct MyProvider;
//!
//! #[async_trait]
//! impl QuoteProvider for MyProvider {
//!     fn name(&self) -> &str {
//!         "mine"
//!     }
//!
//!     async fn fetch(
//!         &self,
//!         _symbol: &str,
//!         _window: FetchWindow,
//!     ) -> Result<Vec<RawBar>, ProviderError> {
//!         Ok(vec![])
//!     }
//! }
//! ```

pub mod http;

use async_trait::async_trait;
use shared_utils::env::MissingEnvVarError;
use snafu::{Backtrace, Snafu};

use crate::models::{FetchWindow, RawBar};

/// Trait for fetching raw daily bars from an upstream quote provider.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Short provider name used in logs.
    fn name(&self) -> &str;

    /// Fetches daily bars for `symbol` whose timestamps fall in `window`.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<RawBar>)` - Bars in provider order. They are not validated.
    /// * `Err(ProviderError)` - If the request fails. See [`ProviderError::is_transient`].
    async fn fetch(&self, symbol: &str, window: FetchWindow) -> Result<Vec<RawBar>, ProviderError>;
}

/// Errors that can occur during the creation of a provider instance
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProviderInitError {
    /// missed environment variable.
    #[snafu(display("Missing environment variable: {source}"))]
    MissingEnvVar {
        source: MissingEnvVarError,
        backtrace: Backtrace,
    },

    /// failed to init reqwest client
    #[snafu(display("Failed to build HTTP client: {source}"))]
    ClientBuild {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// API key contains invalid characters.
    #[snafu(display("Invalid API key format: {source}"))]
    InvalidApiKey {
        source: reqwest::header::InvalidHeaderValue,
        backtrace: Backtrace,
    },

    /// The base URL cannot be used to build requests.
    #[snafu(display("Invalid base URL {url}: {message}"))]
    InvalidBaseUrl {
        url: String,
        message: String,
        backtrace: Backtrace,
    },
}

/// Errors that can occur within a `QuoteProvider` implementation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProviderError {
    /// An error during an API request (e.g., network failure, timeout).
    #[snafu(display("API request failed: {source}"))]
    Reqwest {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// The provider's API answered with a non-success status.
    #[snafu(display("API error (status {status}): {message}"))]
    Api {
        status: u16,
        message: String,
        backtrace: Backtrace,
    },

    /// The request parameters were invalid for this specific provider.
    #[snafu(display("Invalid parameters for provider: {message}"))]
    Validation {
        message: String,
        backtrace: Backtrace,
    },

    /// An internal error occurred while processing data within the provider.
    #[snafu(display("Internal provider error: {message}"))]
    Internal {
        message: String,
        backtrace: Backtrace,
    },

    /// An error during provider configuration or initialization.
    #[snafu(display("Provider initialization error: {source}"))]
    Init {
        #[snafu(backtrace)]
        source: ProviderInitError,
    },
}

impl ProviderError {
    /// Whether retrying the same request later may succeed.
    ///
    /// Transport failures, throttling (429) and server errors (5xx) are
    /// transient. Bad parameters, undecodable bodies and client errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Reqwest { source, .. } => !source.is_decode() && !source.is_builder(),
            ProviderError::Api { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Validation { .. }
            | ProviderError::Internal { .. }
            | ProviderError::Init { .. } => false,
        }
    }
}
