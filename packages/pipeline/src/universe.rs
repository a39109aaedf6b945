//! The Provider Universe: every address that must eventually be geocoded.
//!
//! Derived fresh on each run from the upstream provider table and never
//! written back. A missing required column is fatal; malformed values in
//! present columns are normalized, never rejected.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use hh_atlas_geocoder_models::{AddressKey, RawAddress};
use hh_atlas_pipeline_models::UniverseConfig;

use crate::PipelineError;

/// Distinct, normalized addresses eligible for geocoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderUniverse {
    keys: BTreeSet<AddressKey>,
}

impl ProviderUniverse {
    /// Wraps an existing key set.
    #[must_use]
    pub const fn from_keys(keys: BTreeSet<AddressKey>) -> Self {
        Self { keys }
    }

    /// The addresses, in key order.
    #[must_use]
    pub const fn keys(&self) -> &BTreeSet<AddressKey> {
        &self.keys
    }

    /// Number of distinct addresses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the universe is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Loads the universe from a CSV file.
///
/// # Errors
///
/// Returns [`PipelineError::MissingColumn`] if a configured column is
/// absent, or an I/O or CSV error if the file cannot be read.
pub fn load(path: &Path, config: &UniverseConfig) -> Result<ProviderUniverse, PipelineError> {
    let file = std::fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let universe = from_reader(file, config, &path.display().to_string())?;
    log::info!(
        "Provider Universe: {} eligible addresses from {}",
        universe.len(),
        path.display()
    );
    Ok(universe)
}

/// Loads the universe from any CSV reader. `table` names the input in
/// error messages.
///
/// # Errors
///
/// Returns [`PipelineError::MissingColumn`] if a configured column is
/// absent, or a CSV error if a row cannot be read.
pub fn from_reader<R: Read>(
    reader: R,
    config: &UniverseConfig,
    table: &str,
) -> Result<ProviderUniverse, PipelineError> {
    let mut csv = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = csv.byte_headers()?.clone();

    let column = |name: &str| -> Result<usize, PipelineError> {
        headers
            .iter()
            .position(|h| {
                String::from_utf8_lossy(h)
                    .trim()
                    .eq_ignore_ascii_case(name.trim())
            })
            .ok_or_else(|| PipelineError::MissingColumn {
                table: table.to_string(),
                column: name.to_string(),
            })
    };

    let provider_id = column(&config.provider_id_column)?;
    let street = column(&config.street_column)?;
    let city = column(&config.city_column)?;
    let state = column(&config.state_column)?;
    let postal_code = column(&config.postal_code_column)?;
    let location_type = config
        .location_type_column
        .as_deref()
        .map(column)
        .transpose()?;

    let mut keys = BTreeSet::new();
    let mut rows = 0usize;
    let mut ineligible = 0usize;

    for record in csv.byte_records() {
        let record = record?;
        rows += 1;

        let field = |idx: usize| {
            record
                .get(idx)
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_default()
        };

        if let Some(idx) = location_type
            && !config.is_eligible(&field(idx))
        {
            ineligible += 1;
            continue;
        }

        keys.insert(AddressKey::normalize(&RawAddress {
            provider_id: field(provider_id),
            street: field(street),
            city: field(city),
            state: field(state),
            postal_code: field(postal_code),
        }));
    }

    log::debug!(
        "{table}: {rows} rows, {ineligible} ineligible, {} distinct addresses",
        keys.len()
    );

    Ok(ProviderUniverse { keys })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
CCN,ADDRESS LINE 1,CITY,STATE,ZIP CODE,PRACTICE LOCATION TYPE
017001,100  Main St,Mobile,al,36602-1234,HHA BRANCH
017001,100 MAIN ST,MOBILE,AL,36602,HHA BRANCH
017002,9 Oak Ave,Boston,MA,2108,hha branch
017003,1 Elm St,Dayton,OH,45402,HHA MAIN
";

    #[test]
    fn loads_filters_and_dedups() {
        let universe =
            from_reader(TABLE.as_bytes(), &UniverseConfig::default(), "providers").unwrap();
        assert_eq!(universe.len(), 2);

        let keys: Vec<_> = universe.keys().iter().collect();
        assert_eq!(keys[0].provider_id, "017001");
        assert_eq!(keys[0].street, "100 MAIN ST");
        assert_eq!(keys[0].postal_code, "36602");
        assert_eq!(keys[1].postal_code, "02108");
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let table = "CCN,CITY,STATE,ZIP CODE,PRACTICE LOCATION TYPE\n1,A,B,12345,HHA BRANCH\n";
        let err = from_reader(table.as_bytes(), &UniverseConfig::default(), "providers")
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingColumn { ref column, .. } if column == "ADDRESS LINE 1"
        ));
    }

    #[test]
    fn missing_location_type_column_is_fatal_when_configured() {
        let table = "CCN,ADDRESS LINE 1,CITY,STATE,ZIP CODE\n1,2 Pine Rd,A,B,12345\n";
        assert!(
            from_reader(table.as_bytes(), &UniverseConfig::default(), "providers").is_err()
        );

        let config = UniverseConfig {
            location_type_column: None,
            ..UniverseConfig::default()
        };
        let universe = from_reader(table.as_bytes(), &config, "providers").unwrap();
        assert_eq!(universe.len(), 1);
    }

    #[test]
    fn non_utf8_rows_are_decoded_lossily() {
        let mut table = b"CCN,ADDRESS LINE 1,CITY,STATE,ZIP CODE\n".to_vec();
        table.extend_from_slice(b"1,2 Pine Rd,Taos,NM,87571\n");
        table.extend_from_slice(b"2,12 Pe\xf1asco Rd,Taos,NM,87571\n");
        let config = UniverseConfig {
            location_type_column: None,
            ..UniverseConfig::default()
        };

        let universe = from_reader(table.as_slice(), &config, "providers").unwrap();
        assert_eq!(universe.len(), 2);

        let second = universe.keys().iter().nth(1).unwrap();
        assert_eq!(second.provider_id, "2");
        assert!(second.street.starts_with("12 PE"));
        assert!(second.street.ends_with("ASCO RD"));
    }

    #[test]
    fn short_rows_normalize_instead_of_failing() {
        let table = "CCN,ADDRESS LINE 1,CITY,STATE,ZIP CODE\n5,3 Ash Ct\n";
        let config = UniverseConfig {
            location_type_column: None,
            ..UniverseConfig::default()
        };
        let universe = from_reader(table.as_bytes(), &config, "providers").unwrap();
        let key = universe.keys().iter().next().unwrap();
        assert_eq!(key.city, "");
        assert_eq!(key.postal_code, "00000");
    }
}
