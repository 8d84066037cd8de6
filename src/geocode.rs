//! Geocoding gateway.
//!
//! Resolves free-text addresses to coordinates. The dialog machine treats an
//! unresolvable address (`Ok(None)`) and a gateway failure (`Err(_)`) the
//! same way: re-prompt during registration, id-order fallback during listing.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::GeocodingConfig;
use crate::error::GeocodeError;
use crate::model::Coordinates;

/// Address resolution seam. Implemented by the Google backend in production
/// and by table-backed fakes in tests.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve `address` to coordinates. `Ok(None)` means the address is
    /// well-formed but unresolvable.
    async fn resolve(&self, address: &str) -> Result<Option<Coordinates>, GeocodeError>;
}

const GEOCODING_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

/// Google Maps Geocoding API backend.
pub struct GoogleGeocoder {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: Location,
}

#[derive(Debug, Deserialize)]
struct Location {
    lat: f64,
    lng: f64,
}

impl GoogleGeocoder {
    pub fn new(config: &GeocodingConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
        }
    }

    fn parse_response(body: GeocodeResponse) -> Result<Option<Coordinates>, GeocodeError> {
        match body.status.as_str() {
            "OK" => Ok(body
                .results
                .first()
                .map(|r| Coordinates::new(r.geometry.location.lat, r.geometry.location.lng))),
            "ZERO_RESULTS" => Ok(None),
            status => Err(GeocodeError::ApiStatus {
                status: status.to_string(),
            }),
        }
    }
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    async fn resolve(&self, address: &str) -> Result<Option<Coordinates>, GeocodeError> {
        let Some(ref key) = self.api_key else {
            tracing::warn!("GOOGLE_MAPS_API_KEY not set, treating address as unresolvable");
            return Ok(None);
        };

        let request = self
            .client
            .get(GEOCODING_URL)
            .query(&[("address", address), ("key", key.expose_secret())])
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| GeocodeError::Timeout {
                timeout: self.timeout,
            })??
            .error_for_status()?;

        let body: GeocodeResponse = response.json().await?;
        let resolved = Self::parse_response(body)?;
        match resolved {
            Some(coords) => {
                tracing::debug!(lat = coords.lat, lng = coords.lng, "resolved address");
            }
            None => tracing::debug!(address, "address unresolvable"),
        }
        Ok(resolved)
    }
}
