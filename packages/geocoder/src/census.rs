//! US Census Bureau Geocoder client.
//!
//! Uses the free single-line address endpoint; no API key required.
//!
//! - Single: `GET /geocoder/locations/onelineaddress`
//!
//! See <https://geocoding.geo.census.gov/geocoder/Geocoding_Services_API.html>

use async_trait::async_trait;
use hh_atlas_geocoder_models::AddressKey;

use crate::{GeocodeError, GeocodeHit, Geocoder, check_status};

/// Census Bureau client bound to one endpoint and benchmark.
pub struct CensusGeocoder {
    id: String,
    client: reqwest::Client,
    base_url: String,
    benchmark: String,
}

impl CensusGeocoder {
    /// Creates a client for the given base URL and benchmark
    /// (e.g., `"Public_AR_Current"`).
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        client: reqwest::Client,
        base_url: impl Into<String>,
        benchmark: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            client,
            base_url: base_url.into(),
            benchmark: benchmark.into(),
        }
    }
}

#[async_trait]
impl Geocoder for CensusGeocoder {
    fn id(&self) -> &str {
        &self.id
    }

    async fn geocode(&self, address: &AddressKey) -> Result<Option<GeocodeHit>, GeocodeError> {
        geocode_one_line(
            &self.client,
            &self.base_url,
            &self.benchmark,
            &address.one_line(),
        )
        .await
    }
}

/// Geocodes a single-line address using the Census Bureau endpoint.
///
/// # Errors
///
/// Returns [`GeocodeError`] if the HTTP request or response parsing fails.
pub async fn geocode_one_line(
    client: &reqwest::Client,
    base_url: &str,
    benchmark: &str,
    address: &str,
) -> Result<Option<GeocodeHit>, GeocodeError> {
    let url = format!("{base_url}/locations/onelineaddress");
    let resp = client
        .get(&url)
        .query(&[
            ("address", address),
            ("benchmark", benchmark),
            ("format", "json"),
        ])
        .send()
        .await?;

    check_status(&resp)?;

    let body: serde_json::Value = resp.json().await?;
    parse_single_response(&body)
}

/// Parses the JSON response from the single-address endpoint.
///
/// The endpoint has no exact/non-exact flag; a single candidate is
/// reported as `"Exact"` and several as `"Ambiguous(n)"` (the first
/// candidate is used).
fn parse_single_response(body: &serde_json::Value) -> Result<Option<GeocodeHit>, GeocodeError> {
    let matches =
        body["result"]["addressMatches"]
            .as_array()
            .ok_or_else(|| GeocodeError::Parse {
                message: "Missing addressMatches array".to_string(),
            })?;

    let Some(first) = matches.first() else {
        return Ok(None);
    };

    let x = first["coordinates"]["x"]
        .as_f64()
        .ok_or_else(|| GeocodeError::Parse {
            message: "Missing x coordinate".to_string(),
        })?;
    let y = first["coordinates"]["y"]
        .as_f64()
        .ok_or_else(|| GeocodeError::Parse {
            message: "Missing y coordinate".to_string(),
        })?;

    let matched_address = first["matchedAddress"].as_str().map(String::from);

    let match_quality = if matches.len() == 1 {
        "Exact".to_string()
    } else {
        format!("Ambiguous({})", matches.len())
    };

    Ok(Some(GeocodeHit {
        latitude: y,
        longitude: x,
        matched_address,
        match_quality,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_match() {
        let body = serde_json::json!({
            "result": {
                "addressMatches": [{
                    "coordinates": { "x": -76.927_487, "y": 38.846_016 },
                    "matchedAddress": "4600 SILVER HILL RD, WASHINGTON, DC, 20233"
                }]
            }
        });
        let result = parse_single_response(&body).unwrap().unwrap();
        assert!((result.longitude - -76.927_487).abs() < 1e-6);
        assert!((result.latitude - 38.846_016).abs() < 1e-6);
        assert_eq!(result.match_quality, "Exact");
    }

    #[test]
    fn flags_ambiguous_matches() {
        let body = serde_json::json!({
            "result": {
                "addressMatches": [
                    { "coordinates": { "x": -87.6, "y": 41.8 } },
                    { "coordinates": { "x": -87.7, "y": 41.9 } }
                ]
            }
        });
        let result = parse_single_response(&body).unwrap().unwrap();
        assert_eq!(result.match_quality, "Ambiguous(2)");
        assert!((result.latitude - 41.8).abs() < 1e-6);
    }

    #[test]
    fn parses_single_no_match() {
        let body = serde_json::json!({
            "result": { "addressMatches": [] }
        });
        assert!(parse_single_response(&body).unwrap().is_none());
    }

    #[test]
    fn rejects_missing_result() {
        let body = serde_json::json!({ "errors": ["Address cannot be empty"] });
        assert!(parse_single_response(&body).is_err());
    }
}
