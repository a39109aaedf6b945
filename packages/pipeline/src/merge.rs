//! The Multi-Source Merge Resolver.
//!
//! Results are stacked in layers, primary first, then each fallback
//! service in priority order. For every address the first layer with
//! coordinates wins. There is no scoring or averaging: a weaker source is
//! only used where every stronger one failed, and its provenance is kept.

use std::collections::{BTreeMap, BTreeSet};

use duckdb::Connection;
use hh_atlas_geocoder_models::{
    AddressKey, FinalGeocode, GeocodeRecord, Location, SourceRole, dedup_most_complete,
};
use hh_atlas_store::{final_table, geocode_store};

use crate::PipelineError;
use crate::universe::ProviderUniverse;

/// One source's results, deduplicated per address.
///
/// Records without a provider id (external imports that only carry an
/// address) also answer for any key at the same location.
#[derive(Debug, Clone, Default)]
pub struct Layer {
    by_key: BTreeMap<AddressKey, GeocodeRecord>,
    by_location: BTreeMap<Location, GeocodeRecord>,
}

impl Layer {
    /// Builds a layer, keeping the most complete record per address.
    #[must_use]
    pub fn new(records: impl IntoIterator<Item = GeocodeRecord>) -> Self {
        let mut layer = Self::default();
        for record in dedup_most_complete(records) {
            if record.key.provider_id.is_empty() {
                layer
                    .by_location
                    .insert(record.key.location(), record.clone());
            }
            layer.by_key.insert(record.key.clone(), record);
        }
        layer
    }

    /// Number of distinct addresses in the layer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Whether the layer holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    fn resolved_for(&self, key: &AddressKey) -> Option<&GeocodeRecord> {
        self.by_key
            .get(key)
            .filter(|r| r.is_resolved())
            .or_else(|| {
                self.by_location
                    .get(&key.location())
                    .filter(|r| r.is_resolved())
            })
    }

    fn attempt_for(&self, key: &AddressKey) -> Option<&GeocodeRecord> {
        self.by_key.get(key)
    }
}

/// Produces one canonical row per address.
///
/// Output keys are the universe plus every identified address any layer
/// attempted. Unidentified addresses are added only when no identified
/// key shares their location. Rows come out sorted by key.
#[must_use]
pub fn resolve(
    universe: &BTreeSet<AddressKey>,
    primary: &Layer,
    fallbacks: &[Layer],
) -> Vec<FinalGeocode> {
    let layers = || std::iter::once(primary).chain(fallbacks);

    let mut keys: BTreeSet<AddressKey> = universe.clone();
    keys.extend(
        layers()
            .flat_map(|l| l.by_key.keys())
            .filter(|k| !k.provider_id.is_empty())
            .cloned(),
    );

    let identified: BTreeSet<Location> = keys.iter().map(AddressKey::location).collect();
    let orphans: Vec<AddressKey> = layers()
        .flat_map(|l| l.by_location.values())
        .map(|r| r.key.clone())
        .filter(|k| !identified.contains(&k.location()))
        .collect();
    keys.extend(orphans);

    keys.into_iter()
        .map(|key| {
            if let Some(record) = primary.resolved_for(&key) {
                return FinalGeocode::from_record(key, record, SourceRole::Primary);
            }
            if let Some(record) = fallbacks.iter().find_map(|l| l.resolved_for(&key)) {
                return FinalGeocode::from_record(key, record, SourceRole::Fallback);
            }
            let last_attempt = layers().find_map(|l| l.attempt_for(&key)).cloned();
            FinalGeocode::unresolved(key, last_attempt.as_ref())
        })
        .collect()
}

/// Reads the Geocode Store into a primary layer and fallback layers.
///
/// Fallback services listed in `fallback_order` come first, in that
/// order; any other fallback service (such as an import) follows,
/// sorted by id.
///
/// # Errors
///
/// Returns [`PipelineError`] if the store cannot be read.
pub fn layers_from_store(
    conn: &Connection,
    fallback_order: &[&str],
) -> Result<(Layer, Vec<(String, Layer)>), PipelineError> {
    let mut primary = Vec::new();
    let mut by_service: BTreeMap<String, Vec<GeocodeRecord>> = BTreeMap::new();

    for record in geocode_store::scan(conn, None)? {
        match record.source {
            SourceRole::Primary => primary.push(record),
            SourceRole::Fallback => by_service
                .entry(record.service_id.clone())
                .or_default()
                .push(record),
        }
    }

    let mut fallbacks = Vec::new();
    for id in fallback_order {
        if let Some(records) = by_service.remove(*id) {
            fallbacks.push(((*id).to_string(), Layer::new(records)));
        }
    }
    fallbacks.extend(
        by_service
            .into_iter()
            .map(|(id, records)| (id, Layer::new(records))),
    );

    Ok((Layer::new(primary), fallbacks))
}

/// Merges the store and rewrites the final table.
///
/// # Errors
///
/// Returns [`PipelineError`] if the store cannot be read or the final
/// table cannot be replaced.
pub fn merge_store(
    conn: &mut Connection,
    universe: &ProviderUniverse,
    fallback_order: &[&str],
) -> Result<Vec<FinalGeocode>, PipelineError> {
    let (primary, fallbacks) = layers_from_store(conn, fallback_order)?;

    log::info!(
        "Merging {} primary address(es) with {} fallback layer(s): {}",
        primary.len(),
        fallbacks.len(),
        fallbacks
            .iter()
            .map(|(id, layer)| format!("{id} ({})", layer.len()))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let layers: Vec<Layer> = fallbacks.into_iter().map(|(_, layer)| layer).collect();
    let rows = resolve(universe.keys(), &primary, &layers);

    let filled = rows.iter().filter(|r| r.is_fallback()).count();
    log::info!(
        "Merged {} address(es); {filled} filled from fallback sources",
        rows.len()
    );

    final_table::replace(conn, &rows)?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hh_atlas_geocoder_models::{Coordinates, RawAddress};

    fn key_at(provider_id: &str, street: &str) -> AddressKey {
        AddressKey::normalize(&RawAddress {
            provider_id: provider_id.to_string(),
            street: street.to_string(),
            city: "Akron".to_string(),
            state: "OH".to_string(),
            postal_code: "44308".to_string(),
        })
    }

    fn key(provider_id: &str) -> AddressKey {
        key_at(provider_id, &format!("{provider_id} Main St"))
    }

    fn record(
        key: AddressKey,
        service: &str,
        source: SourceRole,
        coords: Option<(f64, f64)>,
    ) -> GeocodeRecord {
        GeocodeRecord::new(
            key,
            service,
            source,
            coords.map(|(lat, lng)| Coordinates::new(lat, lng)),
            if coords.is_some() { "match" } else { "NO_MATCH" },
        )
    }

    #[test]
    fn primary_wins_and_fallback_fills_gaps() {
        let primary = Layer::new([
            record(key("A"), "nominatim", SourceRole::Primary, Some((1.0, 1.0))),
            record(key("B"), "nominatim", SourceRole::Primary, None),
        ]);
        let fallback = Layer::new([
            record(key("A"), "google", SourceRole::Fallback, Some((2.0, 2.0))),
            record(key("B"), "google", SourceRole::Fallback, Some((3.0, 3.0))),
        ]);

        let rows = resolve(&BTreeSet::new(), &primary, &[fallback]);
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].key, key("A"));
        assert_eq!(rows[0].coordinates, Some(Coordinates::new(1.0, 1.0)));
        assert!(!rows[0].is_fallback());

        assert_eq!(rows[1].key, key("B"));
        assert_eq!(rows[1].coordinates, Some(Coordinates::new(3.0, 3.0)));
        assert!(rows[1].is_fallback());
        assert_eq!(rows[1].service_id.as_deref(), Some("google"));
    }

    #[test]
    fn earlier_fallback_beats_later() {
        let primary = Layer::default();
        let census = Layer::new([record(
            key("A"),
            "census",
            SourceRole::Fallback,
            Some((5.0, 5.0)),
        )]);
        let google = Layer::new([record(
            key("A"),
            "google",
            SourceRole::Fallback,
            Some((6.0, 6.0)),
        )]);

        let rows = resolve(&BTreeSet::new(), &primary, &[census, google]);
        assert_eq!(rows[0].service_id.as_deref(), Some("census"));
    }

    #[test]
    fn untouched_universe_keys_are_unresolved() {
        let universe: BTreeSet<_> = [key("A"), key("Z")].into_iter().collect();
        let primary = Layer::new([record(key("A"), "nominatim", SourceRole::Primary, None)]);

        let rows = resolve(&universe, &primary, &[]);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| !r.is_resolved()));
        assert_eq!(rows[0].match_quality.as_deref(), Some("NO_MATCH"));
        assert_eq!(rows[1].service_id, None);
    }

    #[test]
    fn one_row_per_key_despite_repeated_attempts() {
        let primary = Layer::new([
            record(key("A"), "nominatim", SourceRole::Primary, None),
            record(key("A"), "nominatim", SourceRole::Primary, Some((1.0, 1.0))),
            record(key("A"), "nominatim", SourceRole::Primary, None),
        ]);
        let rows = resolve(&BTreeSet::new(), &primary, &[]);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_resolved());
    }

    #[test]
    fn unidentified_fallback_matches_by_location() {
        let universe: BTreeSet<_> = [key("A")].into_iter().collect();
        let imported = Layer::new([
            record(
                key_at("", "A Main St"),
                "external",
                SourceRole::Fallback,
                Some((7.0, 7.0)),
            ),
            record(
                key_at("", "9 Far Rd"),
                "external",
                SourceRole::Fallback,
                Some((8.0, 8.0)),
            ),
        ]);

        let rows = resolve(&universe, &Layer::default(), &[imported]);
        assert_eq!(rows.len(), 2);

        let a = rows.iter().find(|r| r.key == key("A")).unwrap();
        assert_eq!(a.coordinates, Some(Coordinates::new(7.0, 7.0)));
        assert!(a.is_fallback());

        assert!(
            rows.iter()
                .any(|r| r.key.provider_id.is_empty() && r.key.street == "9 FAR RD")
        );
    }

    #[test]
    fn merge_store_orders_layers_and_writes_final_table() {
        let mut conn = hh_atlas_store::open_in_memory().unwrap();
        geocode_store::append(
            &conn,
            1,
            &[
                record(key("A"), "nominatim", SourceRole::Primary, None),
                record(key("A"), "external", SourceRole::Fallback, Some((9.0, 9.0))),
                record(key("A"), "google", SourceRole::Fallback, Some((6.0, 6.0))),
                record(key("A"), "census", SourceRole::Fallback, Some((5.0, 5.0))),
            ],
        )
        .unwrap();

        let universe = ProviderUniverse::from_keys([key("A")].into_iter().collect());
        let rows = merge_store(&mut conn, &universe, &["google", "census"]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].service_id.as_deref(), Some("google"));

        let stored = final_table::load(&conn).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].key, rows[0].key);
        assert_eq!(stored[0].coordinates, rows[0].coordinates);
        assert_eq!(stored[0].source, Some(SourceRole::Fallback));
        assert_eq!(stored[0].service_id, rows[0].service_id);
    }
}
