//! Compile-time registry of geocoding service configurations.
//!
//! Each geocoding provider is defined in a TOML file under `services/`.
//! The registry embeds these at compile time and exposes them via
//! [`all_services`] and [`enabled_services`]. [`build_geocoder`] turns a
//! configuration into a live client.

use hh_atlas_geocoder_models::RequestPolicy;
use serde::Deserialize;

use crate::census::CensusGeocoder;
use crate::google::GoogleGeocoder;
use crate::nominatim::NominatimGeocoder;
use crate::{GeocodeError, Geocoder};

/// User agent sent with every request. Nominatim rejects anonymous clients.
pub const USER_AGENT: &str = "hh-atlas/0.1 (home-health provider geocoding)";

/// A geocoding service configuration loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct GeocodingService {
    /// Unique identifier (e.g., `"nominatim"`, `"census"`, `"google"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Whether this service is active in the geocoding pipeline.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Execution order. Lower values run first. The first usable service
    /// is the primary source; the rest are fallbacks.
    pub priority: u32,
    /// Provider-specific configuration.
    pub provider: ProviderConfig,
    /// Rate limit, timeout, retry, and breaker settings.
    #[serde(default)]
    pub policy: RequestPolicy,
}

/// Provider-specific configuration, tagged by `type` in TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Nominatim / `OpenStreetMap` geocoder.
    Nominatim {
        /// Search endpoint (e.g., `"https://nominatim.openstreetmap.org/search"`).
        base_url: String,
    },
    /// US Census Bureau single-line geocoder.
    Census {
        /// API base URL (e.g., `"https://geocoding.geo.census.gov/geocoder"`).
        base_url: String,
        /// Benchmark name (e.g., `"Public_AR_Current"`).
        benchmark: String,
    },
    /// Google Geocoding API.
    Google {
        /// Endpoint URL.
        base_url: String,
        /// Environment variable holding the API key.
        api_key_env: String,
    },
}

const fn default_true() -> bool {
    true
}

impl GeocodingService {
    /// Returns the provider's base URL regardless of variant.
    #[must_use]
    pub fn base_url(&self) -> &str {
        match &self.provider {
            ProviderConfig::Nominatim { base_url }
            | ProviderConfig::Census { base_url, .. }
            | ProviderConfig::Google { base_url, .. } => base_url,
        }
    }
}

// ── Compile-time embedded TOML files ────────────────────────────────

const SERVICE_TOMLS: &[(&str, &str)] = &[
    ("nominatim", include_str!("../services/nominatim.toml")),
    ("census", include_str!("../services/census.toml")),
    ("google", include_str!("../services/google.toml")),
];

#[cfg(test)]
const EXPECTED_SERVICE_COUNT: usize = 3;

/// Returns all geocoding service configurations (enabled and disabled).
///
/// # Panics
///
/// Panics if any TOML config is malformed (this is a compile-time guarantee
/// since the configs are embedded).
#[must_use]
pub fn all_services() -> Vec<GeocodingService> {
    SERVICE_TOMLS
        .iter()
        .map(|(name, toml_str)| {
            toml::de::from_str(toml_str)
                .unwrap_or_else(|e| panic!("Failed to parse geocoding service '{name}': {e}"))
        })
        .collect()
}

/// Returns only enabled services, sorted by priority (ascending).
#[must_use]
pub fn enabled_services() -> Vec<GeocodingService> {
    let mut services: Vec<GeocodingService> =
        all_services().into_iter().filter(|s| s.enabled).collect();
    services.sort_by_key(|s| s.priority);
    services
}

/// Looks up a service by id, enabled or not.
#[must_use]
pub fn find_service(id: &str) -> Option<GeocodingService> {
    all_services().into_iter().find(|s| s.id == id)
}

/// Builds a live client for `service`.
///
/// # Errors
///
/// Returns [`GeocodeError`] if the HTTP client cannot be built or a
/// required API key is missing from the environment.
pub fn build_geocoder(service: &GeocodingService) -> Result<Box<dyn Geocoder>, GeocodeError> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(service.policy.timeout())
        .build()?;

    log::debug!(
        "Building {} client for {}",
        service.id,
        service.base_url()
    );

    Ok(match &service.provider {
        ProviderConfig::Nominatim { base_url } => Box::new(NominatimGeocoder::new(
            service.id.clone(),
            client,
            base_url.clone(),
        )),
        ProviderConfig::Census {
            base_url,
            benchmark,
        } => Box::new(CensusGeocoder::new(
            service.id.clone(),
            client,
            base_url.clone(),
            benchmark.clone(),
        )),
        ProviderConfig::Google {
            base_url,
            api_key_env,
        } => Box::new(GoogleGeocoder::from_env(
            service.id.clone(),
            client,
            base_url.clone(),
            api_key_env,
        )?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn embedded_services_parse_with_distinct_ids() {
        let services = all_services();
        assert_eq!(services.len(), EXPECTED_SERVICE_COUNT);

        let ids: BTreeSet<&str> = services.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids.len(), services.len(), "duplicate service id");

        for svc in &services {
            assert!(!svc.name.is_empty(), "{} has no name", svc.id);
            assert!(!svc.base_url().is_empty(), "{} has no base_url", svc.id);
        }
    }

    #[test]
    fn enabled_services_run_nominatim_first() {
        let services = enabled_services();
        let priorities: Vec<u32> = services.iter().map(|s| s.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort_unstable();
        assert_eq!(priorities, sorted);

        let primary = services.first().unwrap();
        assert_eq!(primary.id, "nominatim");
        assert!(primary.policy.min_delay_ms >= 1000);
        assert!(primary.policy.breaker_threshold > 0);
    }

    #[test]
    fn missing_policy_uses_defaults() {
        let svc: GeocodingService = toml::de::from_str(
            r#"
            id = "local"
            name = "Local Nominatim"
            priority = 9

            [provider]
            type = "nominatim"
            base_url = "http://localhost:8080/search"
            "#,
        )
        .unwrap();
        assert!(svc.enabled);
        assert_eq!(svc.policy, RequestPolicy::default());
        assert!(find_service("local").is_none());
    }

    #[test]
    fn builds_keyless_clients() {
        let census = find_service("census").unwrap();
        let geocoder = build_geocoder(&census).unwrap();
        assert_eq!(geocoder.id(), "census");
    }
}
