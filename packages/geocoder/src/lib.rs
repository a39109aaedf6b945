#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geocoding providers for home-health provider addresses.
//!
//! Converts street addresses to latitude/longitude coordinates using
//! interchangeable providers configured via TOML files in `services/`:
//!
//! 1. **Nominatim / OpenStreetMap** (priority 1): free, 1 req/sec rate
//!    limit. The primary source.
//! 2. **US Census Bureau** (priority 2): free, no API key, single-line
//!    address endpoint.
//! 3. **Google Geocoding API** (priority 3): requires an API key in the
//!    environment. Skipped when the key is not set.
//!
//! Every provider implements [`Geocoder`]. Rate limiting, timeouts,
//! retries, and circuit breaking are applied by the caller (the batch
//! executor), never by the clients themselves.

pub mod census;
pub mod google;
pub mod nominatim;
pub mod service_registry;

use std::time::Duration;

use async_trait::async_trait;
use hh_atlas_geocoder_models::{AddressKey, Coordinates};
use thiserror::Error;

/// A successful geocoding match.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeHit {
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Longitude (WGS84).
    pub longitude: f64,
    /// The matched/canonical address returned by the provider.
    pub matched_address: Option<String>,
    /// Provider-specific match descriptor (e.g., `"ROOFTOP"`, `"place:house"`).
    pub match_quality: String,
}

impl GeocodeHit {
    /// Returns the hit's coordinates, or `None` if the provider returned
    /// values outside WGS84 bounds.
    #[must_use]
    pub fn coordinates(&self) -> Option<Coordinates> {
        Coordinates::from_parts(Some(self.latitude), Some(self.longitude))
    }
}

/// Errors from geocoding operations.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The request did not complete within the per-request timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Non-success HTTP status.
    #[error("HTTP status {status}")]
    Status {
        /// The status code returned.
        status: u16,
    },

    /// The provider reported a temporary internal failure.
    #[error("Provider unavailable: {reason}")]
    Unavailable {
        /// Provider-supplied reason.
        reason: String,
    },

    /// The provider refused the request (bad key, invalid request).
    #[error("Request rejected: {reason}")]
    Rejected {
        /// Provider-supplied reason.
        reason: String,
    },

    /// Response parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// A required API key was not present in the environment.
    #[error("Missing API key: set {var}")]
    MissingApiKey {
        /// Environment variable that should hold the key.
        var: String,
    },
}

impl GeocodeError {
    /// Returns `true` if the error is likely transient and worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
            }
            Self::Timeout(_) | Self::RateLimited | Self::Unavailable { .. } => true,
            Self::Status { status } => *status >= 500,
            Self::Rejected { .. } | Self::Parse { .. } | Self::MissingApiKey { .. } => false,
        }
    }
}

/// A single-address geocoding provider.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Service identifier recorded as provenance (e.g., `"nominatim"`).
    fn id(&self) -> &str;

    /// Geocodes one address.
    ///
    /// Returns `Ok(None)` when the provider answered but found no match.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the request fails or the response cannot
    /// be parsed.
    async fn geocode(&self, address: &AddressKey) -> Result<Option<GeocodeHit>, GeocodeError>;
}

/// Maps 429 and non-success statuses to errors before the body is read.
pub(crate) fn check_status(resp: &reqwest::Response) -> Result<(), GeocodeError> {
    let status = resp.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(GeocodeError::RateLimited);
    }
    if !status.is_success() {
        return Err(GeocodeError::Status {
            status: status.as_u16(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_errors() {
        assert!(GeocodeError::Timeout(Duration::from_secs(10)).is_transient());
        assert!(GeocodeError::RateLimited.is_transient());
        assert!(GeocodeError::Status { status: 503 }.is_transient());
        assert!(
            GeocodeError::Unavailable {
                reason: "UNKNOWN_ERROR".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn classifies_permanent_errors() {
        assert!(!GeocodeError::Status { status: 400 }.is_transient());
        assert!(
            !GeocodeError::Parse {
                message: "bad".to_string()
            }
            .is_transient()
        );
        assert!(
            !GeocodeError::Rejected {
                reason: "REQUEST_DENIED".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn hit_with_nan_has_no_coordinates() {
        let hit = GeocodeHit {
            latitude: f64::NAN,
            longitude: -87.6,
            matched_address: None,
            match_quality: "x".to_string(),
        };
        assert!(hit.coordinates().is_none());
    }
}
