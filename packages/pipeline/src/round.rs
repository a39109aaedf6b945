//! Provider rounds.
//!
//! A round runs every remaining address through one geocoding service in
//! Batch Artifacts of `batch_size`, consolidating as it goes. Services run
//! as separate sequential rounds in priority order: the primary first,
//! then each fallback over whatever is still unresolved.

use std::sync::Arc;

use duckdb::Connection;
use hh_atlas_geocoder::Geocoder;
use hh_atlas_geocoder::service_registry::{self, GeocodingService};
use hh_atlas_geocoder_models::{RequestPolicy, SourceRole};
use hh_atlas_pipeline_models::{PipelineConfig, ProgressCallback, RoundSummary, null_progress};
use hh_atlas_store::artifacts::{self, ArtifactWriter};

use crate::PipelineError;
use crate::consolidate::consolidate_pending;
use crate::executor::BatchExecutor;
use crate::remaining::remaining_for;
use crate::universe::ProviderUniverse;

/// A configured service with a live client and its role in the pipeline.
pub struct ActiveService {
    /// Registry entry.
    pub service: GeocodingService,
    /// Primary for the first usable service, fallback for the rest.
    pub role: SourceRole,
    /// Live client.
    pub geocoder: Box<dyn Geocoder>,
}

/// Builds clients for every enabled service, in priority order.
///
/// Services whose client cannot be built (a missing API key, say) are
/// skipped. The first service that builds is the primary source.
#[must_use]
pub fn active_services() -> Vec<ActiveService> {
    let mut active = Vec::new();

    for service in service_registry::enabled_services() {
        match service_registry::build_geocoder(&service) {
            Ok(geocoder) => {
                let role = if active.is_empty() {
                    SourceRole::Primary
                } else {
                    SourceRole::Fallback
                };
                log::info!(
                    "Geocoding service {} ({}) active as {role}",
                    service.id,
                    service.name
                );
                active.push(ActiveService {
                    service,
                    role,
                    geocoder,
                });
            }
            Err(e) => log::warn!("Skipping geocoding service {}: {e}", service.id),
        }
    }

    active
}

/// One planned round.
pub struct Round<'a> {
    /// Client to geocode with.
    pub geocoder: &'a dyn Geocoder,
    /// Rate limit, retry, and breaker settings.
    pub policy: RequestPolicy,
    /// Role recorded on every result.
    pub role: SourceRole,
    /// Services whose coordinates take an address out of this round: this
    /// one and every service ranked above it.
    pub resolved_by: Vec<&'a str>,
}

impl Round<'_> {
    /// Service identifier of the round.
    #[must_use]
    pub fn service_id(&self) -> &str {
        self.geocoder.id()
    }
}

/// Plans one round per active service, in order.
#[must_use]
pub fn plan(services: &[ActiveService]) -> Vec<Round<'_>> {
    services
        .iter()
        .enumerate()
        .map(|(i, active)| Round {
            geocoder: active.geocoder.as_ref(),
            policy: active.service.policy.clone(),
            role: active.role,
            resolved_by: services[..=i].iter().map(|s| s.service.id.as_str()).collect(),
        })
        .collect()
}

/// Runs one round.
///
/// Remaining work is computed once at the start, so an address that fails
/// in this round is not retried until the next run. A tripped circuit
/// breaker ends the round; the skipped addresses stay remaining.
///
/// # Errors
///
/// Returns [`PipelineError`] if the store fails. The batch being written
/// at that point stays open and is recovered by the next consolidation.
#[allow(clippy::future_not_send)]
pub async fn run_round(
    conn: &mut Connection,
    universe: &ProviderUniverse,
    round: &Round<'_>,
    config: &PipelineConfig,
    limit: Option<usize>,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<RoundSummary, PipelineError> {
    let service_id = round.service_id();
    let mut remaining = remaining_for(conn, universe, &round.resolved_by)?;
    let total_remaining = remaining.len();
    if let Some(limit) = limit {
        remaining.truncate(limit);
    }

    let mut summary = RoundSummary::new(service_id, total_remaining);
    if remaining.is_empty() {
        log::info!("{service_id}: nothing remaining");
        return Ok(summary);
    }

    log::info!(
        "{service_id}: {} of {total_remaining} remaining address(es) in batches of {}",
        remaining.len(),
        config.batch_size
    );
    progress.set_total(remaining.len() as u64);
    progress.set_message(format!("Geocoding with {service_id}"));

    let mut executor = BatchExecutor::new(round.geocoder, round.policy.clone(), round.role);

    for batch in remaining.chunks(config.batch_size.max(1)) {
        let artifact = artifacts::create(conn, service_id, round.role)?;
        let outcome = {
            let mut writer = ArtifactWriter::new(conn, &artifact);
            executor.run_batch(batch, &mut writer, progress).await?
        };
        artifacts::seal(conn, artifact.artifact_id)?;
        summary.add(&outcome);

        log::info!(
            "{service_id} batch {}: {}/{} resolved{}",
            artifact.batch_number,
            outcome.resolved,
            outcome.attempted,
            if outcome.breaker_tripped {
                format!(", {} aborted", outcome.aborted)
            } else {
                String::new()
            }
        );

        if outcome.breaker_tripped {
            log::error!("{service_id}: circuit breaker open, ending round early");
            break;
        }

        if config.consolidate_every > 0 && summary.batches % config.consolidate_every == 0 {
            consolidate_pending(conn, &null_progress())?;
        }
    }

    consolidate_pending(conn, &null_progress())?;

    progress.finish(format!(
        "{service_id}: {}/{} resolved",
        summary.resolved, summary.attempted
    ));
    log::info!(
        "{service_id} round: {} batch(es), {}/{} resolved, {} failed, {} aborted",
        summary.batches,
        summary.resolved,
        summary.attempted,
        summary.failed,
        summary.aborted
    );

    Ok(summary)
}

/// Runs `rounds` in order. Each round sees the results of the ones before
/// it, since every round ends consolidated. `progress_for` supplies a
/// reporter per round, given the service id.
///
/// # Errors
///
/// Returns [`PipelineError`] on the first round that fails.
#[allow(clippy::future_not_send)]
pub async fn run_all(
    conn: &mut Connection,
    universe: &ProviderUniverse,
    rounds: &[Round<'_>],
    config: &PipelineConfig,
    limit: Option<usize>,
    progress_for: impl Fn(&str) -> Arc<dyn ProgressCallback>,
) -> Result<Vec<RoundSummary>, PipelineError> {
    let mut summaries = Vec::with_capacity(rounds.len());
    for round in rounds {
        let progress = progress_for(round.service_id());
        summaries.push(run_round(conn, universe, round, config, limit, &progress).await?);
    }
    Ok(summaries)
}
