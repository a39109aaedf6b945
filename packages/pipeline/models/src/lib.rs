#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Configuration and summary types shared by the geocoding pipeline and
//! its front ends.

pub mod config;
pub mod progress;
pub mod report;

pub use config::{PipelineConfig, UniverseConfig};
pub use progress::{NullProgress, ProgressCallback, null_progress};
pub use report::{BatchOutcome, ConsolidationSummary, CoverageReport, RoundSummary, SourceQuality};
