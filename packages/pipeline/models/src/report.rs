//! Summaries produced by pipeline steps, for logging and reporting.

use hh_atlas_geocoder_models::AddressKey;
use serde::Serialize;

/// Result of running one Batch Artifact through the executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    /// Addresses submitted to the provider.
    pub attempted: usize,
    /// Attempts that produced coordinates.
    pub resolved: usize,
    /// Attempts that ended in an error or no match.
    pub failed: usize,
    /// Addresses skipped after the breaker tripped.
    pub aborted: usize,
    /// Whether the circuit breaker was open when the batch ended.
    pub breaker_tripped: bool,
}

/// Totals for one provider round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoundSummary {
    /// Geocoding service identifier.
    pub service_id: String,
    /// Addresses remaining when the round started.
    pub remaining: usize,
    /// Batches executed.
    pub batches: usize,
    /// Addresses submitted.
    pub attempted: usize,
    /// Addresses resolved.
    pub resolved: usize,
    /// Addresses that failed.
    pub failed: usize,
    /// Addresses skipped by the breaker.
    pub aborted: usize,
    /// Whether the round ended early on a tripped breaker.
    pub breaker_tripped: bool,
}

impl RoundSummary {
    /// Starts an empty summary.
    #[must_use]
    pub fn new(service_id: impl Into<String>, remaining: usize) -> Self {
        Self {
            service_id: service_id.into(),
            remaining,
            ..Self::default()
        }
    }

    /// Folds a batch outcome into the totals.
    pub const fn add(&mut self, batch: &BatchOutcome) {
        self.batches += 1;
        self.attempted += batch.attempted;
        self.resolved += batch.resolved;
        self.failed += batch.failed;
        self.aborted += batch.aborted;
        self.breaker_tripped |= batch.breaker_tripped;
    }
}

/// Result of consolidating the pending queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsolidationSummary {
    /// Interrupted artifacts promoted to pending first.
    pub recovered: usize,
    /// Artifacts archived in this pass.
    pub artifacts: usize,
    /// Records appended to the Geocode Store.
    pub records: usize,
    /// Artifacts that turned out to be archived already.
    pub skipped: usize,
}

/// Coverage of the Provider Universe by the canonical table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoverageReport {
    /// Unique addresses needing resolution.
    pub total: usize,
    /// Addresses with coordinates.
    pub resolved: usize,
    /// Resolved by the primary source.
    pub primary: usize,
    /// Resolved by a fallback source.
    pub fallback: usize,
    /// Addresses still without coordinates, sorted.
    pub unresolved: Vec<AddressKey>,
}

impl CoverageReport {
    /// `resolved / total * 100`, or `0.0` for an empty universe.
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let pct = self.resolved as f64 / self.total as f64 * 100.0;
        pct
    }
}

/// Attempts versus successes for one service in the Geocode Store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceQuality {
    /// Geocoding service identifier.
    pub service_id: String,
    /// Source role tag.
    pub source: String,
    /// Distinct addresses attempted.
    pub attempted: usize,
    /// Distinct addresses resolved at least once.
    pub resolved: usize,
    /// Raw rows, duplicates included.
    pub records: usize,
}

impl SourceQuality {
    /// Share of attempted addresses that resolved, in percent.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.resolved as f64 / self.attempted as f64 * 100.0;
        rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_universe_has_zero_coverage() {
        assert!(CoverageReport::default().percentage().abs() < f64::EPSILON);
    }

    #[test]
    fn coverage_percentage() {
        let report = CoverageReport {
            total: 8,
            resolved: 6,
            ..CoverageReport::default()
        };
        assert!((report.percentage() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn round_summary_accumulates_batches() {
        let mut summary = RoundSummary::new("nominatim", 25);
        summary.add(&BatchOutcome {
            attempted: 10,
            resolved: 7,
            failed: 3,
            ..BatchOutcome::default()
        });
        summary.add(&BatchOutcome {
            attempted: 5,
            resolved: 0,
            failed: 5,
            aborted: 5,
            breaker_tripped: true,
        });
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.attempted, 15);
        assert_eq!(summary.aborted, 5);
        assert!(summary.breaker_tripped);
    }
}
