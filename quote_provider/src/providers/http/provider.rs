use std::num::NonZeroU32;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, header};
use secrecy::{ExposeSecret, SecretString};
use shared_utils::env::get_env_var;
use snafu::{ResultExt, ensure};
use tracing::debug;

use crate::{
    models::{FetchWindow, RawBar},
    providers::{
        ApiSnafu, ClientBuildSnafu, InvalidApiKeySnafu, InvalidBaseUrlSnafu, MissingEnvVarSnafu,
        ProviderError, ProviderInitError, QuoteProvider, ReqwestSnafu,
        http::{
            params::{BarsQueryOptions, construct_params},
            response::BarsResponse,
        },
    },
};

/// Upper bound on pages per request so a looping token cannot spin forever.
const MAX_PAGES: usize = 1_000;

/// Everything needed to build an [`HttpQuoteProvider`].
#[derive(Debug, Clone)]
pub struct HttpProviderSettings {
    /// Base URL without the trailing `/bars`.
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Client-side request budget.
    pub requests_per_minute: NonZeroU32,
    /// Per-request options forwarded as query params.
    pub options: BarsQueryOptions,
}

pub struct HttpQuoteProvider {
    client: Client,
    bars_url: String,
    options: BarsQueryOptions,
    limiter: DefaultDirectRateLimiter,
    _api_key: SecretString,
}

impl HttpQuoteProvider {
    /// Creates a new provider.
    ///
    /// Reads the API key from the environment variable named in `settings` and
    /// sends it as a bearer token on every request.
    pub fn new(settings: HttpProviderSettings) -> Result<Self, ProviderInitError> {
        let base = settings.base_url.trim_end_matches('/');
        ensure!(
            base.starts_with("http://") || base.starts_with("https://"),
            InvalidBaseUrlSnafu {
                url: settings.base_url.clone(),
                message: "expected an http(s) URL",
            }
        );

        let api_key = SecretString::new(
            get_env_var(&settings.api_key_env)
                .context(MissingEnvVarSnafu)?
                .into(),
        );

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", api_key.expose_secret()))
                .context(InvalidApiKeySnafu)?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .context(ClientBuildSnafu)?;

        Ok(Self {
            client,
            bars_url: format!("{base}/bars"),
            options: settings.options,
            limiter: RateLimiter::direct(Quota::per_minute(settings.requests_per_minute)),
            _api_key: api_key,
        })
    }
}

#[async_trait]
impl QuoteProvider for HttpQuoteProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, symbol: &str, window: FetchWindow) -> Result<Vec<RawBar>, ProviderError> {
        let mut out: Vec<RawBar> = Vec::new();
        let mut next_page_token: Option<String> = None;

        for page in 0..MAX_PAGES {
            self.limiter.until_ready().await;

            let query = construct_params(symbol, &window, &self.options, next_page_token.as_deref());
            let response = self
                .client
                .get(&self.bars_url)
                .query(&query)
                .send()
                .await
                .context(ReqwestSnafu)?;

            let status = response.status();
            if !status.is_success() {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown API error".to_string());
                return ApiSnafu {
                    status: status.as_u16(),
                    message,
                }
                .fail();
            }

            let body = response.json::<BarsResponse>().await.context(ReqwestSnafu)?;
            debug!(symbol, page, bars = body.bars.len(), "received bars page");
            out.extend(body.bars.into_iter().map(RawBar::from));

            match body.next_page_token {
                Some(token) if !token.is_empty() => next_page_token = Some(token),
                _ => return Ok(out),
            }
        }

        ApiSnafu {
            status: 500u16,
            message: format!("pagination did not terminate after {MAX_PAGES} pages"),
        }
        .fail()
    }
}
