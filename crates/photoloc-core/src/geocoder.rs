//! Reverse geocoding with a process-wide rate limit and fixed-backoff retry.

use crate::types::{Coordinate, Geocoded};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";
pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum GeocodeError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("status {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid geocoder response: {0}")]
    Decode(String),
}

/// Reverse-geocoding service boundary.
pub trait ReverseGeocode: Send + Sync {
    /// Address for a coordinate; `Ok(None)` when the service has none.
    fn reverse(
        &self,
        coordinate: Coordinate,
        language: &str,
        timeout: Duration,
    ) -> Result<Option<String>, GeocodeError>;
}

#[derive(Debug, Deserialize)]
struct NominatimReverseDto {
    display_name: Option<String>,
    error: Option<String>,
}

/// Blocking client for the Nominatim `/reverse` endpoint.
pub struct NominatimClient {
    client: Client,
    base_url: String,
}

impl NominatimClient {
    /// Nominatim's usage policy requires an identifying user agent.
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self, GeocodeError> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl ReverseGeocode for NominatimClient {
    fn reverse(
        &self,
        coordinate: Coordinate,
        language: &str,
        timeout: Duration,
    ) -> Result<Option<String>, GeocodeError> {
        let url = format!("{}/reverse", self.base_url);
        let response = self
            .client
            .get(url)
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", coordinate.latitude.to_string()),
                ("lon", coordinate.longitude.to_string()),
                ("accept-language", language.to_string()),
            ])
            .timeout(timeout)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Status(status));
        }
        parse_reverse(&response.bytes()?)
    }
}

fn parse_reverse(body: &[u8]) -> Result<Option<String>, GeocodeError> {
    let dto: NominatimReverseDto =
        serde_json::from_slice(body).map_err(|e| GeocodeError::Decode(e.to_string()))?;
    if let Some(error) = dto.error {
        tracing::debug!(%error, "geocoder has no address");
        return Ok(None);
    }
    Ok(dto.display_name.filter(|name| !name.trim().is_empty()))
}

/// Minimum spacing between outbound requests, shared by every caller.
///
/// The lock is held while waiting, so concurrent callers queue up and each
/// one leaves at least `min_interval` after the previous.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// Block until a request may be sent, then record it.
    pub fn wait(&self) {
        // The guarded value is a plain timestamp; a poisoned lock is still usable.
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                std::thread::sleep(self.min_interval - elapsed);
            }
        }
        *last = Some(Instant::now());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

/// Fixed-backoff retry for transient geocoder failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Reverse geocoder front: validation, rate limiting, retry, sentinels.
pub struct ReverseGeocoder {
    backend: Box<dyn ReverseGeocode>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    language: String,
    timeout: Duration,
}

impl ReverseGeocoder {
    pub fn new(backend: Box<dyn ReverseGeocode>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            backend,
            limiter,
            retry: RetryPolicy::default(),
            language: DEFAULT_LANGUAGE.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Address for `coordinate`, or the sentinel describing why there is none.
    ///
    /// Invalid coordinates never reach the network. An empty answer is final;
    /// only errors are retried.
    pub fn address(&self, coordinate: Coordinate) -> Geocoded {
        if !coordinate.is_valid() {
            tracing::info!(
                lat = coordinate.latitude,
                lon = coordinate.longitude,
                "coordinates out of range"
            );
            return Geocoded::InvalidCoordinates;
        }

        let attempts = self.retry.attempts.max(1);
        for attempt in 1..=attempts {
            self.limiter.wait();
            tracing::info!(attempt, %coordinate, "reverse geocoding");

            match self.backend.reverse(coordinate, &self.language, self.timeout) {
                Ok(Some(address)) => {
                    tracing::info!(%address, "reverse geocode success");
                    return Geocoded::Address(address);
                }
                Ok(None) => {
                    tracing::info!(%coordinate, "no address for coordinate");
                    return Geocoded::NotFound;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "reverse geocode attempt failed");
                    if attempt < attempts {
                        std::thread::sleep(self.retry.backoff);
                    }
                }
            }
        }

        tracing::error!(%coordinate, attempts, "all geocoding attempts failed");
        Geocoded::Unavailable
    }
}
