//! Consolidation of finished Batch Artifacts into the Geocode Store.

use std::sync::Arc;

use duckdb::Connection;
use hh_atlas_pipeline_models::{ConsolidationSummary, ProgressCallback};
use hh_atlas_store::artifacts::{self, Consolidation};

use crate::PipelineError;

/// Recovers interrupted artifacts, then consolidates every pending one,
/// oldest first.
///
/// Each artifact commits on its own, so an interruption part way through
/// keeps the artifacts already done and leaves the rest pending for the
/// next call.
///
/// # Errors
///
/// Returns [`PipelineError`] on the first artifact that fails to
/// consolidate. Earlier artifacts stay consolidated.
pub fn consolidate_pending(
    conn: &mut Connection,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<ConsolidationSummary, PipelineError> {
    let mut summary = ConsolidationSummary {
        recovered: artifacts::recover_open(conn)?,
        ..ConsolidationSummary::default()
    };

    let pending = artifacts::pending(conn)?;
    if pending.is_empty() {
        log::debug!("No pending batch artifacts");
        return Ok(summary);
    }

    progress.set_total(pending.len() as u64);
    progress.set_message("Consolidating batch artifacts".to_string());

    for artifact in &pending {
        match artifacts::consolidate(conn, artifact.artifact_id)? {
            Consolidation::Appended(records) => {
                summary.artifacts += 1;
                summary.records += records;
            }
            Consolidation::AlreadyConsolidated => summary.skipped += 1,
        }
        progress.inc(1);
    }

    progress.finish(format!(
        "Consolidated {} artifact(s), {} record(s)",
        summary.artifacts, summary.records
    ));
    log::info!(
        "Consolidation: {} artifact(s), {} record(s) appended, {} recovered, {} already archived",
        summary.artifacts,
        summary.records,
        summary.recovered,
        summary.skipped
    );

    Ok(summary)
}
