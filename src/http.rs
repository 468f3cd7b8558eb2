//! Google Geocoding API client with bounded retry.
//!
//! Implements both geocoding contracts the core consumes:
//! - [`ForwardGeocoder`] for the audit engine's biased/global passes
//! - [`ReverseGeocoder`] for place-name resolution behind the cache
//!
//! Rate-limit responses (HTTP 429 or an `OVER_QUERY_LIMIT` body status) and
//! transport errors retry with exponential backoff up to a capped attempt
//! count; there is no unbounded recursion on persistent throttling.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::audit::{BiasBox, ForwardGeocoder};
use crate::error::GeocodeError;
use crate::place_names::{PlaceLevel, ReverseGeocoder};
use crate::GeoCandidate;

const GEOCODE_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 250;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    formatted_address: String,
    geometry: Geometry,
    #[serde(default)]
    types: Vec<String>,
    #[serde(default)]
    address_components: Vec<AddressComponent>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct AddressComponent {
    long_name: String,
    #[serde(default)]
    types: Vec<String>,
}

impl GeocodeResult {
    fn into_candidate(self) -> GeoCandidate {
        GeoCandidate {
            place_name: self.formatted_address,
            latitude: self.geometry.location.lat,
            longitude: self.geometry.location.lng,
            types: self.types,
        }
    }
}

/// Google address-component types queried for a place level, in fallback
/// order (neighborhood falls back to locality).
fn component_types(level: PlaceLevel) -> &'static [&'static str] {
    match level {
        PlaceLevel::Country => &["country"],
        PlaceLevel::Region => &["administrative_area_level_1"],
        PlaceLevel::Place => &["locality"],
        PlaceLevel::Neighborhood => &["neighborhood", "locality"],
    }
}

/// `bounds` bias parameter: `south,west|north,east`.
fn bounds_param(bias: &BiasBox) -> String {
    format!(
        "{},{}|{},{}",
        bias.min_lat, bias.min_lng, bias.max_lat, bias.max_lng
    )
}

/// Exponential backoff for the nth retry: 500ms, 1s, 2s, capped.
fn retry_backoff(attempt: u32) -> Duration {
    Duration::from_millis(BASE_BACKOFF_MS * (1 << attempt.min(3)))
}

// ============================================================================
// Client
// ============================================================================

/// Geocoding client for the Google Geocoding API.
pub struct GoogleGeocoder {
    client: Client,
    api_key: String,
}

impl GoogleGeocoder {
    /// Create a client with the given API key.
    ///
    /// An empty key produces a usable client that reports itself
    /// unconfigured, which the audit engine folds into soft-warning results.
    pub fn new(api_key: impl Into<String>) -> Result<Self, GeocodeError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| GeocodeError::Request(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
        })
    }

    /// Issue one geocode request with bounded retry on throttling.
    async fn fetch(&self, params: &[(&str, String)]) -> Result<Vec<GeocodeResult>, GeocodeError> {
        let mut attempt: u32 = 0;

        loop {
            let response = self
                .client
                .get(GEOCODE_ENDPOINT)
                .query(params)
                .query(&[("key", self.api_key.as_str())])
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    attempt += 1;
                    if attempt > MAX_RETRIES {
                        return Err(GeocodeError::Request(err.to_string()));
                    }
                    let wait = retry_backoff(attempt);
                    warn!("geocode transport error ({err}), retry {attempt} after {wait:?}");
                    tokio::time::sleep(wait).await;
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                attempt += 1;
                if attempt > MAX_RETRIES {
                    return Err(GeocodeError::RateLimited(attempt));
                }
                let wait = retry_backoff(attempt);
                warn!("geocode HTTP 429, retry {attempt} after {wait:?}");
                tokio::time::sleep(wait).await;
                continue;
            }
            if !status.is_success() {
                return Err(GeocodeError::Status(status.as_u16()));
            }

            let body: GeocodeResponse = response
                .json()
                .await
                .map_err(|e| GeocodeError::InvalidResponse(e.to_string()))?;

            match body.status.as_str() {
                "OK" => {
                    debug!("geocode returned {} results", body.results.len());
                    return Ok(body.results);
                }
                "ZERO_RESULTS" => return Ok(Vec::new()),
                "OVER_QUERY_LIMIT" => {
                    attempt += 1;
                    if attempt > MAX_RETRIES {
                        return Err(GeocodeError::RateLimited(attempt));
                    }
                    let wait = retry_backoff(attempt);
                    warn!("geocode over query limit, retry {attempt} after {wait:?}");
                    tokio::time::sleep(wait).await;
                }
                other => {
                    return Err(GeocodeError::InvalidResponse(format!(
                        "status {other}"
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl ForwardGeocoder for GoogleGeocoder {
    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn geocode(
        &self,
        query: &str,
        bias: Option<BiasBox>,
    ) -> Result<Vec<GeoCandidate>, GeocodeError> {
        let mut params = vec![("address", query.to_string())];
        if let Some(bias) = bias {
            params.push(("bounds", bounds_param(&bias)));
        }

        let results = self.fetch(&params).await?;
        Ok(results.into_iter().map(GeocodeResult::into_candidate).collect())
    }
}

#[async_trait]
impl ReverseGeocoder for GoogleGeocoder {
    async fn reverse(
        &self,
        latitude: f64,
        longitude: f64,
        level: PlaceLevel,
    ) -> Result<Option<String>, GeocodeError> {
        let wanted = component_types(level);
        let params = vec![
            ("latlng", format!("{latitude},{longitude}")),
            ("result_type", wanted.join("|")),
        ];

        let results = self.fetch(&params).await?;
        let Some(first) = results.into_iter().next() else {
            return Ok(None);
        };

        // Prefer the component matching the requested level, most specific
        // first; fall back to the formatted address.
        for wanted_type in wanted {
            if let Some(component) = first
                .address_components
                .iter()
                .find(|c| c.types.iter().any(|t| t == wanted_type))
            {
                return Ok(Some(component.long_name.clone()));
            }
        }
        Ok(Some(first.formatted_address))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
