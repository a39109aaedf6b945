//! The rate-limited batch executor.
//!
//! Drives one Batch Artifact through one geocoding service, strictly one
//! request at a time:
//!
//! - every attempt, retries and failures included, waits for the
//!   service's minimum inter-request delay;
//! - each request is cut off after the policy timeout;
//! - transient errors are retried a bounded number of times with
//!   exponential backoff, permanent errors are not retried;
//! - after `breaker_threshold` consecutive failed requests, retries
//!   included, no further request is issued and the rest of the batch is
//!   skipped.
//!
//! Every address in the batch yields exactly one record in the sink,
//! including skipped ones, which are recorded without coordinates so they
//! stay remaining.

use std::sync::Arc;
use std::time::Duration;

use hh_atlas_geocoder::{GeocodeError, GeocodeHit, Geocoder};
use hh_atlas_geocoder_models::{AddressKey, GeocodeRecord, RequestPolicy, SourceRole};
use hh_atlas_pipeline_models::{BatchOutcome, ProgressCallback};
use hh_atlas_store::artifacts::ArtifactWriter;
use tokio::time::Instant;

use crate::PipelineError;

/// Match quality recorded when the service found nothing.
pub const NO_MATCH: &str = "NO_MATCH";

/// Match quality recorded for addresses skipped by a tripped breaker.
pub const ABORTED_CIRCUIT_OPEN: &str = "ABORTED_CIRCUIT_OPEN";

/// Match quality recorded when a hit carried unusable coordinates.
pub const INVALID_COORDINATES: &str = "INVALID_COORDINATES";

/// Destination for the records a batch produces.
pub trait RecordSink {
    /// Durably stores one record.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the record cannot be stored. This is
    /// fatal for the batch.
    fn write(&mut self, record: GeocodeRecord) -> Result<(), PipelineError>;
}

impl RecordSink for ArtifactWriter<'_> {
    fn write(&mut self, record: GeocodeRecord) -> Result<(), PipelineError> {
        self.append(&record)?;
        Ok(())
    }
}

impl RecordSink for Vec<GeocodeRecord> {
    fn write(&mut self, record: GeocodeRecord) -> Result<(), PipelineError> {
        self.push(record);
        Ok(())
    }
}

/// Spaces request starts at least `min_delay` apart.
#[derive(Debug)]
pub struct RateLimiter {
    min_delay: Duration,
    next_slot: Option<Instant>,
}

impl RateLimiter {
    /// Creates a limiter whose first request goes out immediately.
    #[must_use]
    pub const fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            next_slot: None,
        }
    }

    /// Waits for the next slot and reserves the one after it.
    pub async fn wait(&mut self) {
        if let Some(slot) = self.next_slot {
            tokio::time::sleep_until(slot).await;
        }
        self.next_slot = Some(Instant::now() + self.min_delay);
    }
}

/// Runs batches against one service.
///
/// The rate limiter lives as long as the executor, so the delay also holds
/// across batch boundaries within a round.
pub struct BatchExecutor<'a> {
    geocoder: &'a dyn Geocoder,
    policy: RequestPolicy,
    source: SourceRole,
    limiter: RateLimiter,
    consecutive_failures: u32,
}

impl<'a> BatchExecutor<'a> {
    /// Creates an executor for `geocoder` under `policy`. Records are
    /// tagged with `source`.
    #[must_use]
    pub fn new(geocoder: &'a dyn Geocoder, policy: RequestPolicy, source: SourceRole) -> Self {
        let limiter = RateLimiter::new(policy.min_delay());
        Self {
            geocoder,
            policy,
            source,
            limiter,
            consecutive_failures: 0,
        }
    }

    /// Whether enough consecutive requests have failed to stop sending.
    const fn breaker_open(&self) -> bool {
        self.policy.breaker_threshold > 0
            && self.consecutive_failures >= self.policy.breaker_threshold
    }

    const fn note_request(&mut self, succeeded: bool) {
        if succeeded {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
    }

    /// Geocodes `keys` in order, writing one record per key to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] only if the sink fails. Provider errors
    /// are recorded, not returned.
    #[allow(clippy::future_not_send)]
    pub async fn run_batch(
        &mut self,
        keys: &[AddressKey],
        sink: &mut dyn RecordSink,
        progress: &Arc<dyn ProgressCallback>,
    ) -> Result<BatchOutcome, PipelineError> {
        let mut outcome = BatchOutcome::default();

        for (i, key) in keys.iter().enumerate() {
            if self.breaker_open() {
                let skipped = &keys[i..];
                log::error!(
                    "{}: {} consecutive failed requests, circuit open; skipping {} remaining address(es) in batch",
                    self.geocoder.id(),
                    self.consecutive_failures,
                    skipped.len()
                );
                for key in skipped {
                    sink.write(GeocodeRecord::new(
                        key.clone(),
                        self.geocoder.id(),
                        self.source,
                        None,
                        ABORTED_CIRCUIT_OPEN,
                    ))?;
                }
                outcome.aborted = skipped.len();
                progress.inc(skipped.len() as u64);
                break;
            }

            let record = self.resolve(key).await;

            outcome.attempted += 1;
            if record.is_resolved() {
                outcome.resolved += 1;
            } else {
                outcome.failed += 1;
            }
            sink.write(record)?;
            progress.inc(1);
        }

        outcome.breaker_tripped = self.breaker_open();
        Ok(outcome)
    }

    /// Turns the final attempt for `key` into a record.
    async fn resolve(&mut self, key: &AddressKey) -> GeocodeRecord {
        let service_id = self.geocoder.id();

        let (coordinates, quality, matched_address) = match self.attempt(key).await {
            Ok(Some(hit)) => match hit.coordinates() {
                Some(coordinates) => {
                    log::debug!(
                        "{service_id}: {key} -> {coordinates:?} ({}, matched {:?})",
                        hit.match_quality,
                        hit.matched_address
                    );
                    (Some(coordinates), hit.match_quality, hit.matched_address)
                }
                None => {
                    log::warn!("{service_id}: unusable coordinates for '{key}'");
                    (None, INVALID_COORDINATES.to_string(), hit.matched_address)
                }
            },
            Ok(None) => {
                log::debug!("{service_id}: no match for '{key}'");
                (None, NO_MATCH.to_string(), None)
            }
            Err(e) => {
                log::warn!("{service_id}: giving up on '{key}': {e}");
                (None, format!("ERROR: {e}"), None)
            }
        };

        GeocodeRecord::new(key.clone(), service_id, self.source, coordinates, quality)
            .with_matched_address(matched_address)
    }

    /// Issues the request, retrying transient errors within the policy.
    ///
    /// Every request counts toward the breaker. A hit without usable
    /// coordinates and a no-match both count as failures.
    async fn attempt(&mut self, key: &AddressKey) -> Result<Option<GeocodeHit>, GeocodeError> {
        let timeout = self.policy.timeout();
        let mut retry = 0u32;

        loop {
            self.limiter.wait().await;

            let result = tokio::time::timeout(timeout, self.geocoder.geocode(key))
                .await
                .unwrap_or(Err(GeocodeError::Timeout(timeout)));

            let succeeded = matches!(&result, Ok(Some(hit)) if hit.coordinates().is_some());
            self.note_request(succeeded);

            match result {
                Err(e)
                    if e.is_transient()
                        && retry < self.policy.max_retries
                        && !self.breaker_open() =>
                {
                    retry += 1;
                    let backoff = self.policy.backoff(retry);
                    log::warn!(
                        "{}: {e} for '{key}', retry {retry}/{} in {backoff:?}",
                        self.geocoder.id(),
                        self.policy.max_retries
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
    }
}
