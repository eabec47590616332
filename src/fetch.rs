//! The Fetcher: HTTP GETs against the two remote providers, with
//! retry/backoff on transient failures and a small response cache.
//!
//! Retries everything except a definite 4xx, bounded by `max_retries`, with a fixed
//! per-attempt timeout built via `reqwest::Client`'s builder and a `USER_AGENT` header.
//! Responses are cached keyed by `(location, region)` with a TTL, since one Fetcher
//! instance serves many distinct location/region pairs concurrently rather than a
//! single cached slot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::{HttpConfig, PricesConfig, WeatherConfig};
use crate::error::FetchError;

#[derive(Clone)]
struct CacheEntry {
    fetched_at: DateTime<Utc>,
    body: Vec<u8>,
}

/// Issues the two remote GETs the pipeline's Fetch stage needs, with retry/backoff and
/// a short-lived cache in front of each provider.
pub struct Fetcher {
    client: Client,
    max_retries: u32,
    weather_base_url: String,
    weather_timezone: String,
    weather_cache_ttl: Duration,
    prices_base_url: String,
    prices_cache_ttl: Duration,
    cache: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl Fetcher {
    pub fn new(http: &HttpConfig, weather: &WeatherConfig, prices: &PricesConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("gridguard-leop/1.0"));
        let client = Client::builder()
            .timeout(Duration::from_secs(http.timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            max_retries: http.max_retries,
            weather_base_url: weather.base_url.trim_end_matches('/').to_string(),
            weather_timezone: weather.timezone.clone(),
            weather_cache_ttl: Duration::from_secs(weather.cache_ttl_secs),
            prices_base_url: prices.base_url.trim_end_matches('/').to_string(),
            prices_cache_ttl: Duration::from_secs(prices.cache_ttl_secs),
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Fetches the Open-Meteo hourly forecast for `(lat, lon)`. Returns an empty
    /// buffer on any unresolved failure rather than propagating an error to the
    /// caller — the Fetch stage pushes a `FetchedBundle` even on partial failure.
    pub async fn fetch_weather(&self, location: &str, lat: f64, lon: f64) -> Vec<u8> {
        let url = format!(
            "{}/v1/forecast?latitude={:.4}&longitude={:.4}&hourly=temperature_2m,relative_humidity_2m,cloud_cover,wind_speed_10m,shortwave_radiation&timezone={}&forecast_days=1",
            self.weather_base_url, lat, lon, self.weather_timezone,
        );
        self.cached_get(&format!("weather:{location}"), &url, self.weather_cache_ttl)
            .await
            .unwrap_or_else(|err| {
                warn!(%err, location, "weather fetch exhausted retries, returning empty body");
                Vec::new()
            })
    }

    /// Fetches today's elprisetjustnu.se spot prices for `region`.
    pub async fn fetch_prices(&self, region: &str) -> Vec<u8> {
        let now = Utc::now();
        let url = format!(
            "{}/api/v1/prices/{:04}/{:02}-{:02}_{}.json",
            self.prices_base_url,
            now.year(),
            now.month(),
            now.day(),
            region,
        );
        self.cached_get(&format!("prices:{region}"), &url, self.prices_cache_ttl)
            .await
            .unwrap_or_else(|err| {
                warn!(%err, region, "price fetch exhausted retries, returning empty body");
                Vec::new()
            })
    }

    async fn cached_get(&self, key: &str, url: &str, ttl: Duration) -> Result<Vec<u8>, FetchError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(key) {
                if (Utc::now() - entry.fetched_at).num_seconds() < ttl.as_secs() as i64 {
                    debug!(key, "cache hit");
                    return Ok(entry.body.clone());
                }
            }
        }

        let body = self.get_with_retry(url).await?;

        let mut cache = self.cache.write().await;
        cache.insert(
            key.to_string(),
            CacheEntry {
                fetched_at: Utc::now(),
                body: body.clone(),
            },
        );
        Ok(body)
    }

    /// Retries transport errors and 5xx up to `max_retries`. Does
    /// not retry 4xx. `reqwest::Client` follows redirects by default.
    async fn get_with_retry(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 0;
        loop {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .bytes()
                            .await
                            .map(|b| b.to_vec())
                            .map_err(|e| FetchError::Transient(e.to_string()));
                    }
                    if status.is_client_error() {
                        return Err(FetchError::Permanent(
                            format!("client error fetching {url}"),
                            status.as_u16(),
                        ));
                    }
                    if attempt >= self.max_retries {
                        return Err(transient_status_error(status, url));
                    }
                }
                Err(err) if err.is_timeout() => {
                    if attempt >= self.max_retries {
                        return Err(FetchError::Timeout(Duration::from_secs(0)));
                    }
                }
                Err(err) => {
                    if attempt >= self.max_retries {
                        return Err(FetchError::Transient(err.to_string()));
                    }
                }
            }

            attempt += 1;
            let backoff = Duration::from_millis(100 * 2u64.pow(attempt.min(5)));
            debug!(url, attempt, ?backoff, "retrying fetch after backoff");
            sleep(backoff).await;
        }
    }
}

fn transient_status_error(status: StatusCode, url: &str) -> FetchError {
    FetchError::Transient(format!("server error {status} fetching {url}"))
}
