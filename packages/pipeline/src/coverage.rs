//! Coverage reporting. Read-only: nothing here writes to the store.

use std::collections::BTreeMap;

use duckdb::Connection;
use hh_atlas_geocoder_models::{AddressKey, FinalGeocode};
use hh_atlas_pipeline_models::{CoverageReport, SourceQuality};
use hh_atlas_store::geocode_store;

use crate::PipelineError;
use crate::universe::ProviderUniverse;

/// Measures how much of `universe` the canonical rows resolve.
#[must_use]
pub fn compute(universe: &ProviderUniverse, rows: &[FinalGeocode]) -> CoverageReport {
    let by_key: BTreeMap<&AddressKey, &FinalGeocode> = rows.iter().map(|r| (&r.key, r)).collect();

    let mut report = CoverageReport {
        total: universe.len(),
        ..CoverageReport::default()
    };

    for key in universe.keys() {
        match by_key.get(key) {
            Some(row) if row.is_resolved() => {
                report.resolved += 1;
                if row.is_fallback() {
                    report.fallback += 1;
                } else {
                    report.primary += 1;
                }
            }
            _ => report.unresolved.push(key.clone()),
        }
    }

    report
}

/// The universe implied by a final table, for reports run without the
/// upstream provider table.
#[must_use]
pub fn universe_of(rows: &[FinalGeocode]) -> ProviderUniverse {
    ProviderUniverse::from_keys(rows.iter().map(|r| r.key.clone()).collect())
}

/// Attempts versus successes per service in the Geocode Store.
///
/// # Errors
///
/// Returns [`PipelineError`] if the store query fails.
pub fn source_quality(conn: &Connection) -> Result<Vec<SourceQuality>, PipelineError> {
    Ok(geocode_store::service_counts(conn)?
        .into_iter()
        .map(|c| SourceQuality {
            service_id: c.service_id,
            source: c.source,
            attempted: c.distinct_keys,
            resolved: c.resolved_keys,
            records: c.records,
        })
        .collect())
}

/// Logs the coverage summary and per-source quality.
pub fn log_report(report: &CoverageReport, quality: &[SourceQuality]) {
    log::info!(
        "Coverage: {}/{} addresses resolved ({:.2}%), {} primary, {} fallback, {} unresolved",
        report.resolved,
        report.total,
        report.percentage(),
        report.primary,
        report.fallback,
        report.unresolved.len()
    );

    for q in quality {
        log::info!(
            "  {} ({}): {}/{} addresses resolved ({:.2}%), {} raw records",
            q.service_id,
            q.source,
            q.resolved,
            q.attempted,
            q.success_rate(),
            q.records
        );
    }
}
