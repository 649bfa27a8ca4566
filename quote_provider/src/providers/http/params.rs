use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::models::FetchWindow;

/// Sort order requested from the endpoint. The cache only ever asks for ascending.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Sort {
    #[default]
    Asc,
    Desc,
}

impl Sort {
    fn as_str(self) -> &'static str {
        match self {
            Sort::Asc => "asc",
            Sort::Desc => "desc",
        }
    }
}

/// Optional knobs for a bars request.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct BarsQueryOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Sort>,
}

/// Build the query string pairs for one page of a bars request.
pub fn construct_params(
    symbol: &str,
    window: &FetchWindow,
    options: &BarsQueryOptions,
    page_token: Option<&str>,
) -> Vec<(String, String)> {
    let mut query = vec![
        ("symbol".to_string(), symbol.to_string()),
        (
            "start".to_string(),
            window.start.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        (
            "end".to_string(),
            window.end.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        (
            "sort".to_string(),
            options.sort.unwrap_or_default().as_str().to_string(),
        ),
    ];
    if let Some(limit) = options.limit {
        query.push(("limit".to_string(), limit.to_string()));
    }
    if let Some(token) = page_token {
        query.push(("page_token".to_string(), token.to_string()));
    }
    query
}
