//! Progress reporting for geocoding rounds and consolidation.
//!
//! The pipeline reports through [`ProgressCallback`] and never renders
//! anything itself. The CLI plugs in `indicatif` bars; tests and library
//! callers use [`NullProgress`].

use std::sync::Arc;

/// Receives progress updates from a long-running pipeline step.
pub trait ProgressCallback: Send + Sync {
    /// Sets the number of addresses (or artifacts) the step will process.
    fn set_total(&self, total: u64);

    /// Advances by `delta` processed units.
    fn inc(&self, delta: u64);

    /// Replaces the status text (e.g., `"nominatim batch 12"`).
    fn set_message(&self, msg: String);

    /// Marks the step finished with a closing message.
    fn finish(&self, msg: String);
}

/// Discards every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
