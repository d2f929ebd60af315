//! HTTP client for AEMET OpenData
//!
//! Most endpoints are staged: the first request returns an [`Envelope`]
//! whose `datos` field points at the real payload, which is fetched with a
//! second request. Both requests carry the API key.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::RetryTransientMiddleware;
use reqwest_retry::policies::ExponentialBackoff;
use tracing::{debug, error, info, instrument, warn};

use super::payload::Envelope;
use super::{Resource, Upstream};
use crate::config::ApiConfig;
use crate::{Result, WeatherError};

pub const API_BASE_URL: &str = "https://opendata.aemet.es/opendata/api";

/// Attribution AEMET requires alongside its data
pub const ATTRIBUTION: &str = "Data provided by AEMET. www.aemet.es";

/// AEMET OpenData client with transient-failure retries
pub struct AemetClient {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
}

impl AemetClient {
    /// Create a new client from the API configuration
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_seconds);

        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("aemet-weather/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WeatherError::config(format!("Failed to create HTTP client: {e}")))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(config.max_retries);
        let client = ClientBuilder::new(inner)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn with_key(&self, url: &str) -> String {
        let separator = if url.contains('?') { '&' } else { '?' };
        format!("{url}{separator}api_key={}", urlencoding::encode(&self.api_key))
    }

    /// GET `url` and return the body as text
    #[instrument(skip(self))]
    async fn get_text(&self, url: &str) -> Result<String> {
        let request_start = Instant::now();
        let response = self.client.get(self.with_key(url)).send().await.map_err(|e| {
            warn!("Request failed: {}", e);
            WeatherError::upstream(format!("Request failed: {e}"))
        })?;

        let status = response.status();
        debug!(
            "HTTP response received: {} in {:.3}s",
            status,
            request_start.elapsed().as_secs_f64()
        );

        match status {
            StatusCode::UNAUTHORIZED => {
                error!("API authentication failed (HTTP 401)");
                return Err(WeatherError::InvalidApiKey {
                    message: "HTTP 401".to_string(),
                });
            }
            StatusCode::TOO_MANY_REQUESTS => {
                warn!("Server rate limit exceeded (HTTP 429)");
                return Err(WeatherError::upstream("Too many requests (HTTP 429)"));
            }
            status if !status.is_success() => {
                return Err(WeatherError::upstream(format!(
                    "API request failed with status: {} - {}",
                    status,
                    status.canonical_reason().unwrap_or("Unknown error")
                )));
            }
            _ => {}
        }

        response
            .text()
            .await
            .map_err(|e| WeatherError::upstream(format!("Failed to read response body: {e}")))
    }
}

#[async_trait]
impl Upstream for AemetClient {
    #[instrument(skip(self), fields(resource = %resource))]
    async fn fetch(&self, resource: &Resource) -> Result<String> {
        let url = format!("{}{}", self.base_url, resource.path());

        if !resource.is_staged() {
            debug!("Loading direct data");
            return self.get_text(&url).await;
        }

        debug!("Loading staged data");
        let envelope_body = self.get_text(&url).await?;
        let envelope: Envelope = serde_json::from_str(&envelope_body)
            .map_err(|e| WeatherError::upstream(format!("Malformed envelope: {e}")))?;
        let data_url = envelope.into_data_url()?;

        let body = self.get_text(&data_url).await?;
        info!("Fetched {} ({} bytes)", resource, body.len());
        Ok(body)
    }
}
