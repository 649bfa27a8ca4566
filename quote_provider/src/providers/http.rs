//! Generic JSON-over-HTTP quote provider.
//!
//! Expects an endpoint shaped like `GET {base_url}/bars?symbol=..&start=..&end=..`
//! that pages with `next_page_token`. Vendor adapters with other shapes get
//! their own module next to this one.

pub mod params;
pub mod provider;
pub mod response;

pub use provider::{HttpProviderSettings, HttpQuoteProvider};
