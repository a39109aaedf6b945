//! Nominatim / OpenStreetMap geocoder client.
//!
//! The primary source for provider addresses. Nominatim has strict rate
//! limits: **1 request per second** maximum on the public instance, and
//! every request must carry an identifying user agent.
//!
//! See <https://nominatim.org/release-docs/develop/api/Search/>

use async_trait::async_trait;
use hh_atlas_geocoder_models::AddressKey;

use crate::{GeocodeError, GeocodeHit, Geocoder, check_status};

/// Nominatim client bound to one search endpoint.
pub struct NominatimGeocoder {
    id: String,
    client: reqwest::Client,
    base_url: String,
}

impl NominatimGeocoder {
    /// Creates a client for the given search endpoint.
    #[must_use]
    pub fn new(id: impl Into<String>, client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    fn id(&self) -> &str {
        &self.id
    }

    async fn geocode(&self, address: &AddressKey) -> Result<Option<GeocodeHit>, GeocodeError> {
        geocode_freeform(&self.client, &self.base_url, &address.one_line()).await
    }
}

/// Geocodes a free-form query (e.g., `"100 MAIN ST, MOBILE, AL 36602"`).
///
/// The caller is responsible for rate limiting (see `min_delay_ms` in the
/// service TOML configuration).
///
/// # Errors
///
/// Returns [`GeocodeError`] if the HTTP request or response parsing fails.
pub async fn geocode_freeform(
    client: &reqwest::Client,
    base_url: &str,
    query: &str,
) -> Result<Option<GeocodeHit>, GeocodeError> {
    let resp = client
        .get(base_url)
        .query(&[
            ("q", query),
            ("countrycodes", "us"),
            ("format", "jsonv2"),
            ("limit", "1"),
        ])
        .send()
        .await?;

    check_status(&resp)?;

    let body: serde_json::Value = resp.json().await?;
    parse_response(&body)
}

/// Parses Nominatim JSON response.
fn parse_response(body: &serde_json::Value) -> Result<Option<GeocodeHit>, GeocodeError> {
    let results = body.as_array().ok_or_else(|| GeocodeError::Parse {
        message: "Nominatim response is not an array".to_string(),
    })?;

    let Some(first) = results.first() else {
        return Ok(None);
    };

    let lat = first["lat"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| GeocodeError::Parse {
            message: "Missing lat in Nominatim response".to_string(),
        })?;

    let lon = first["lon"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| GeocodeError::Parse {
            message: "Missing lon in Nominatim response".to_string(),
        })?;

    let display_name = first["display_name"].as_str().map(String::from);

    // jsonv2 splits the OSM tag into category ("place", "building", ...)
    // and type ("house", "yes", ...).
    let match_quality = match (first["category"].as_str(), first["type"].as_str()) {
        (Some(category), Some(kind)) => format!("{category}:{kind}"),
        (None, Some(kind)) => kind.to_string(),
        _ => "unknown".to_string(),
    };

    Ok(Some(GeocodeHit {
        latitude: lat,
        longitude: lon,
        matched_address: display_name,
        match_quality,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nominatim_result() {
        let body = serde_json::json!([{
            "lat": "30.6944",
            "lon": "-88.0431",
            "category": "place",
            "type": "house",
            "display_name": "100, Government Street, Mobile, AL, USA"
        }]);
        let result = parse_response(&body).unwrap().unwrap();
        assert!((result.latitude - 30.6944).abs() < 1e-4);
        assert!((result.longitude - -88.0431).abs() < 1e-4);
        assert_eq!(result.match_quality, "place:house");
    }

    #[test]
    fn parses_nominatim_empty() {
        let body = serde_json::json!([]);
        assert!(parse_response(&body).unwrap().is_none());
    }

    #[test]
    fn rejects_non_array_body() {
        let body = serde_json::json!({ "error": "Unable to geocode" });
        assert!(matches!(
            parse_response(&body),
            Err(GeocodeError::Parse { .. })
        ));
    }

    #[test]
    fn rejects_missing_latitude() {
        let body = serde_json::json!([{ "lon": "-88.0431" }]);
        assert!(parse_response(&body).is_err());
    }
}
