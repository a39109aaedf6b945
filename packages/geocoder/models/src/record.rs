//! Geocode records and the canonical merged row.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::AddressKey;

/// A resolved WGS84 coordinate pair.
///
/// Records hold `Option<Coordinates>`, so a latitude can never exist
/// without its longitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Coordinates {
    /// Creates a coordinate pair.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether the pair is a valid WGS84 position.
    fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Pairs separately stored parts.
    ///
    /// Returns `None` unless both parts are present and within
    /// latitude `-90..=90` and longitude `-180..=180`. A lone latitude or
    /// longitude is treated as no coordinate at all.
    #[must_use]
    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        match (latitude, longitude) {
            (Some(lat), Some(lng)) if Self::new(lat, lng).is_valid() => Some(Self::new(lat, lng)),
            (None, None) => None,
            (lat, lng) => {
                log::warn!("Discarding partial or out-of-range coordinate ({lat:?}, {lng:?})");
                None
            }
        }
    }
}

/// Rank of the geocoding service that produced a record.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceRole {
    /// The most authoritative service, consulted first.
    Primary,
    /// Consulted only for addresses the primary could not resolve.
    Fallback,
}

/// One resolution attempt for an address.
///
/// Records are created once and never updated. A later attempt for the
/// same address is a new record.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeRecord {
    /// The address that was submitted.
    pub key: AddressKey,
    /// Coordinates, or `None` when the attempt failed or found no match.
    pub coordinates: Option<Coordinates>,
    /// Geocoding service identifier (e.g., `"nominatim"`).
    pub service_id: String,
    /// Whether the service is the primary or a fallback.
    pub source: SourceRole,
    /// Free-text match descriptor from the service, or the failure reason.
    pub match_quality: String,
    /// The canonical address the service matched, when it reports one.
    pub matched_address: Option<String>,
    /// When the attempt was made.
    pub geocoded_at: DateTime<Utc>,
}

impl GeocodeRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(
        key: AddressKey,
        service_id: impl Into<String>,
        source: SourceRole,
        coordinates: Option<Coordinates>,
        match_quality: impl Into<String>,
    ) -> Self {
        Self {
            key,
            coordinates,
            service_id: service_id.into(),
            source,
            match_quality: match_quality.into(),
            matched_address: None,
            geocoded_at: Utc::now(),
        }
    }

    /// Attaches the service's matched address.
    #[must_use]
    pub fn with_matched_address(mut self, matched_address: Option<String>) -> Self {
        self.matched_address = matched_address.filter(|a| !a.trim().is_empty());
        self
    }

    /// Whether the attempt produced coordinates.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.coordinates.is_some()
    }
}

/// Collapses records to one per [`AddressKey`], keeping the most complete.
///
/// A record with coordinates beats one without. Between equally complete
/// records the later one in iteration order wins. The result is sorted by
/// key.
#[must_use]
pub fn dedup_most_complete<I>(records: I) -> Vec<GeocodeRecord>
where
    I: IntoIterator<Item = GeocodeRecord>,
{
    let mut best: BTreeMap<AddressKey, GeocodeRecord> = BTreeMap::new();

    for record in records {
        match best.get(&record.key) {
            Some(existing) if existing.is_resolved() && !record.is_resolved() => {}
            _ => {
                best.insert(record.key.clone(), record);
            }
        }
    }

    best.into_values().collect()
}

/// One row of the canonical geocode table produced by the merge.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalGeocode {
    /// The address.
    pub key: AddressKey,
    /// Chosen coordinates, or `None` when no service resolved the address.
    pub coordinates: Option<Coordinates>,
    /// Rank of the service the coordinates came from.
    pub source: Option<SourceRole>,
    /// Service the coordinates (or the last failure) came from.
    pub service_id: Option<String>,
    /// Match descriptor of the chosen record.
    pub match_quality: Option<String>,
    /// Timestamp of the chosen record.
    pub geocoded_at: Option<DateTime<Utc>>,
}

impl FinalGeocode {
    /// Builds a canonical row from a chosen record, tagged with `source`.
    #[must_use]
    pub fn from_record(key: AddressKey, record: &GeocodeRecord, source: SourceRole) -> Self {
        Self {
            key,
            coordinates: record.coordinates,
            source: Some(source),
            service_id: Some(record.service_id.clone()),
            match_quality: Some(record.match_quality.clone()),
            geocoded_at: Some(record.geocoded_at),
        }
    }

    /// Builds an unresolved row, keeping the last attempt's provenance if any.
    #[must_use]
    pub fn unresolved(key: AddressKey, last_attempt: Option<&GeocodeRecord>) -> Self {
        Self {
            key,
            coordinates: None,
            source: None,
            service_id: last_attempt.map(|r| r.service_id.clone()),
            match_quality: last_attempt.map(|r| r.match_quality.clone()),
            geocoded_at: last_attempt.map(|r| r.geocoded_at),
        }
    }

    /// Whether the row has coordinates.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.coordinates.is_some()
    }

    /// Whether the coordinates came from a fallback service.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.is_resolved() && self.source == Some(SourceRole::Fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RawAddress;

    fn key(street: &str) -> AddressKey {
        AddressKey::normalize(&RawAddress {
            provider_id: "017001".to_string(),
            street: street.to_string(),
            city: "Mobile".to_string(),
            state: "AL".to_string(),
            postal_code: "36602".to_string(),
        })
    }

    fn record(street: &str, coords: Option<(f64, f64)>, quality: &str) -> GeocodeRecord {
        GeocodeRecord::new(
            key(street),
            "nominatim",
            SourceRole::Primary,
            coords.map(|(lat, lng)| Coordinates::new(lat, lng)),
            quality,
        )
    }

    #[test]
    fn pairs_complete_parts() {
        assert_eq!(
            Coordinates::from_parts(Some(30.69), Some(-88.04)),
            Some(Coordinates::new(30.69, -88.04))
        );
    }

    #[test]
    fn rejects_partial_coordinates() {
        assert_eq!(Coordinates::from_parts(Some(30.69), None), None);
        assert_eq!(Coordinates::from_parts(None, Some(-88.04)), None);
        assert_eq!(Coordinates::from_parts(Some(f64::NAN), Some(-88.04)), None);
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert_eq!(Coordinates::from_parts(Some(999.0), Some(-88.04)), None);
        assert_eq!(Coordinates::from_parts(Some(30.69), Some(-180.5)), None);
        assert_eq!(
            Coordinates::from_parts(Some(f64::INFINITY), Some(f64::INFINITY)),
            None
        );
        assert_eq!(
            Coordinates::from_parts(Some(-90.0), Some(180.0)),
            Some(Coordinates::new(-90.0, 180.0))
        );
    }

    #[test]
    fn dedup_prefers_resolved_record() {
        let records = vec![
            record("1 Main St", Some((1.0, 1.0)), "house"),
            record("1 Main St", None, "NO_MATCH"),
        ];
        let deduped = dedup_most_complete(records);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].coordinates, Some(Coordinates::new(1.0, 1.0)));
    }

    #[test]
    fn dedup_upgrades_failure_to_later_success() {
        let records = vec![
            record("1 Main St", None, "NO_MATCH"),
            record("1 Main St", Some((2.0, 2.0)), "house"),
        ];
        let deduped = dedup_most_complete(records);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].match_quality, "house");
    }

    #[test]
    fn dedup_keeps_later_of_equally_complete() {
        let records = vec![
            record("1 Main St", Some((1.0, 1.0)), "first"),
            record("1 Main St", Some((3.0, 3.0)), "second"),
        ];
        let deduped = dedup_most_complete(records);
        assert_eq!(deduped[0].match_quality, "second");
    }

    #[test]
    fn dedup_sorts_by_key() {
        let records = vec![
            record("9 Oak Ave", None, "NO_MATCH"),
            record("1 Main St", None, "NO_MATCH"),
        ];
        let deduped = dedup_most_complete(records);
        assert_eq!(deduped[0].key.street, "1 MAIN ST");
        assert_eq!(deduped[1].key.street, "9 OAK AVE");
    }

    #[test]
    fn parses_source_role_tags() {
        assert_eq!("fallback".parse::<SourceRole>().unwrap(), SourceRole::Fallback);
        assert_eq!(SourceRole::Primary.as_ref(), "primary");
    }
}
