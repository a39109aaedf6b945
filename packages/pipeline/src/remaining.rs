//! Remaining-work resolution.
//!
//! `remaining = universe - resolved`, where only attempts with coordinates
//! count as resolved. A failed attempt leaves its address remaining, so
//! the computation is idempotent and safe to repeat after any interruption.

use std::collections::BTreeSet;

use duckdb::Connection;
use hh_atlas_geocoder_models::AddressKey;

use crate::PipelineError;
use crate::universe::ProviderUniverse;

/// Addresses in `universe` not in `resolved`, in key order.
#[must_use]
pub fn remaining(universe: &ProviderUniverse, resolved: &BTreeSet<AddressKey>) -> Vec<AddressKey> {
    universe.keys().difference(resolved).cloned().collect()
}

/// Addresses not yet resolved by any of `service_ids` in the store.
///
/// # Errors
///
/// Returns [`PipelineError`] if the store query fails.
pub fn remaining_for(
    conn: &Connection,
    universe: &ProviderUniverse,
    service_ids: &[&str],
) -> Result<Vec<AddressKey>, PipelineError> {
    let resolved = hh_atlas_store::geocode_store::resolved_keys(conn, service_ids)?;
    Ok(remaining(universe, &resolved))
}
