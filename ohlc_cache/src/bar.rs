//! Canonical bar value and its invariants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One OHLCV candle for a single bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Upper-cased ticker.
    pub symbol: String,
    /// Interval-aligned bucket start (UTC).
    pub bucket_start: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Why a bar fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BarViolation {
    #[error("non-finite price or volume")]
    NonFinite,
    #[error("negative volume")]
    NegativeVolume,
    #[error("low <= open,close <= high does not hold")]
    OhlcOrder,
}

impl Bar {
    /// Checks finiteness, non-negative volume and `low <= min(open, close) <= max(open, close) <= high`.
    pub fn check_invariants(&self) -> Result<(), BarViolation> {
        let values = [self.open, self.high, self.low, self.close, self.volume];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(BarViolation::NonFinite);
        }
        if self.volume < 0.0 {
            return Err(BarViolation::NegativeVolume);
        }
        let body_lo = self.open.min(self.close);
        let body_hi = self.open.max(self.close);
        if !(self.low <= body_lo && body_hi <= self.high) {
            return Err(BarViolation::OhlcOrder);
        }
        Ok(())
    }

    /// Bitwise equality of the OHLCV values; symbol and bucket are not compared.
    pub fn same_values(&self, other: &Bar) -> bool {
        self.open.to_bits() == other.open.to_bits()
            && self.high.to_bits() == other.high.to_bits()
            && self.low.to_bits() == other.low.to_bits()
            && self.close.to_bits() == other.close.to_bits()
            && self.volume.to_bits() == other.volume.to_bits()
    }
}
