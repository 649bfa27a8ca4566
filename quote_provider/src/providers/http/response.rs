use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::RawBar;

#[derive(Deserialize, Debug)]
pub struct WireBar {
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "c")]
    pub close: f64,
    #[serde(rename = "v", default)]
    pub volume: f64,
}

#[derive(Deserialize, Debug)]
pub struct BarsResponse {
    #[serde(default)]
    pub bars: Vec<WireBar>,
    pub next_page_token: Option<String>,
}

impl From<WireBar> for RawBar {
    fn from(w: WireBar) -> Self {
        RawBar {
            timestamp: w.timestamp,
            open: w.open,
            high: w.high,
            low: w.low,
            close: w.close,
            volume: w.volume,
        }
    }
}
