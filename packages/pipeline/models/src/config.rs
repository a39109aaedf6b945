//! Pipeline settings.
//!
//! Every field has a serde default, so an empty TOML file (or none at all)
//! yields the stock configuration for the CMS provider-of-services table.

use serde::{Deserialize, Serialize};

/// Column layout of the Provider Universe table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UniverseConfig {
    /// Provider identifier column.
    pub provider_id_column: String,
    /// Street line column.
    pub street_column: String,
    /// City column.
    pub city_column: String,
    /// State column.
    pub state_column: String,
    /// Postal code column.
    pub postal_code_column: String,
    /// Location type discriminator. `None` accepts every row.
    pub location_type_column: Option<String>,
    /// Location types eligible for geocoding, compared case-insensitively.
    /// Empty accepts every row.
    pub eligible_location_types: Vec<String>,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            provider_id_column: "CCN".to_string(),
            street_column: "ADDRESS LINE 1".to_string(),
            city_column: "CITY".to_string(),
            state_column: "STATE".to_string(),
            postal_code_column: "ZIP CODE".to_string(),
            location_type_column: Some("PRACTICE LOCATION TYPE".to_string()),
            eligible_location_types: vec!["HHA BRANCH".to_string()],
        }
    }
}

impl UniverseConfig {
    /// Whether a row with this location type should be geocoded.
    #[must_use]
    pub fn is_eligible(&self, location_type: &str) -> bool {
        let location_type = location_type.trim();
        self.eligible_location_types.is_empty()
            || self
                .eligible_location_types
                .iter()
                .any(|t| t.trim().eq_ignore_ascii_case(location_type))
    }
}

/// Top-level pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Addresses per Batch Artifact.
    pub batch_size: usize,
    /// Consolidate after this many batches within a round. `0` waits for
    /// the end of the round.
    pub consolidate_every: usize,
    /// Provider Universe layout.
    pub universe: UniverseConfig,
    /// Final table CSV export, relative to the exports directory.
    pub final_csv: String,
    /// Unresolved address export, relative to the exports directory.
    pub unresolved_csv: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            consolidate_every: 1,
            universe: UniverseConfig::default(),
            final_csv: "geocoded_addresses_fin.csv".to_string(),
            unresolved_csv: "addresses_not_geocoded.csv".to_string(),
        }
    }
}
