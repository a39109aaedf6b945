//! Google Geocoding API client.
//!
//! A paid fallback for addresses the free services cannot resolve. The
//! API key is read from the environment variable named in the service
//! TOML (`api_key_env`), never from configuration files.
//!
//! See <https://developers.google.com/maps/documentation/geocoding/requests-geocoding>

use async_trait::async_trait;
use hh_atlas_geocoder_models::AddressKey;

use crate::{GeocodeError, GeocodeHit, Geocoder, check_status};

/// Google Geocoding API client.
pub struct GoogleGeocoder {
    id: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GoogleGeocoder {
    /// Creates a client with an explicit API key.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Creates a client reading the API key from `var`.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::MissingApiKey`] if `var` is unset or empty.
    pub fn from_env(
        id: impl Into<String>,
        client: reqwest::Client,
        base_url: impl Into<String>,
        var: &str,
    ) -> Result<Self, GeocodeError> {
        let api_key = std::env::var(var)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| GeocodeError::MissingApiKey {
                var: var.to_string(),
            })?;
        Ok(Self::new(id, client, base_url, api_key))
    }
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    fn id(&self) -> &str {
        &self.id
    }

    async fn geocode(&self, address: &AddressKey) -> Result<Option<GeocodeHit>, GeocodeError> {
        let query = address.one_line();
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[("address", query.as_str()), ("key", self.api_key.as_str())])
            .send()
            .await?;

        check_status(&resp)?;

        let body: serde_json::Value = resp.json().await?;
        parse_response(&body)
    }
}

/// Parses a Geocoding API response.
///
/// Google reports failures in a `status` field of an HTTP 200 body, so
/// the status string decides between no-match, transient, and permanent
/// errors.
fn parse_response(body: &serde_json::Value) -> Result<Option<GeocodeHit>, GeocodeError> {
    let status = body["status"].as_str().unwrap_or("MISSING_STATUS");
    let reason = || {
        body["error_message"]
            .as_str()
            .map_or_else(|| status.to_string(), |m| format!("{status}: {m}"))
    };

    match status {
        "OK" => {}
        "ZERO_RESULTS" => return Ok(None),
        "OVER_QUERY_LIMIT" => return Err(GeocodeError::RateLimited),
        "UNKNOWN_ERROR" => return Err(GeocodeError::Unavailable { reason: reason() }),
        "OVER_DAILY_LIMIT" | "REQUEST_DENIED" | "INVALID_REQUEST" => {
            return Err(GeocodeError::Rejected { reason: reason() });
        }
        _ => {
            return Err(GeocodeError::Parse {
                message: format!("Unexpected Google status {status}"),
            });
        }
    }

    let Some(first) = body["results"].as_array().and_then(|r| r.first()) else {
        return Ok(None);
    };

    let location = &first["geometry"]["location"];
    let (Some(lat), Some(lng)) = (location["lat"].as_f64(), location["lng"].as_f64()) else {
        return Err(GeocodeError::Parse {
            message: "Missing geometry.location in Google response".to_string(),
        });
    };

    let match_quality = first["geometry"]["location_type"]
        .as_str()
        .unwrap_or("UNKNOWN")
        .to_string();

    Ok(Some(GeocodeHit {
        latitude: lat,
        longitude: lng,
        matched_address: first["formatted_address"].as_str().map(String::from),
        match_quality,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ok_result() {
        let body = serde_json::json!({
            "status": "OK",
            "results": [{
                "formatted_address": "1600 Amphitheatre Pkwy, Mountain View, CA 94043, USA",
                "geometry": {
                    "location": { "lat": 37.4224, "lng": -122.0842 },
                    "location_type": "ROOFTOP"
                }
            }]
        });
        let hit = parse_response(&body).unwrap().unwrap();
        assert!((hit.latitude - 37.4224).abs() < 1e-6);
        assert!((hit.longitude - -122.0842).abs() < 1e-6);
        assert_eq!(hit.match_quality, "ROOFTOP");
    }

    #[test]
    fn zero_results_is_no_match() {
        let body = serde_json::json!({ "status": "ZERO_RESULTS", "results": [] });
        assert!(parse_response(&body).unwrap().is_none());
    }

    #[test]
    fn over_query_limit_is_transient() {
        let body = serde_json::json!({ "status": "OVER_QUERY_LIMIT" });
        let err = parse_response(&body).unwrap_err();
        assert!(matches!(err, GeocodeError::RateLimited));
        assert!(err.is_transient());
    }

    #[test]
    fn request_denied_is_permanent() {
        let body = serde_json::json!({
            "status": "REQUEST_DENIED",
            "error_message": "The provided API key is invalid."
        });
        let err = parse_response(&body).unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("API key is invalid"));
    }

    #[test]
    fn missing_env_key_is_reported() {
        let client = reqwest::Client::new();
        let result = GoogleGeocoder::from_env(
            "google",
            client,
            "https://example.invalid",
            "HH_ATLAS_TEST_KEY_THAT_IS_NEVER_SET",
        );
        assert!(matches!(result, Err(GeocodeError::MissingApiKey { .. })));
    }
}
