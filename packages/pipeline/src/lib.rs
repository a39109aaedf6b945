#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Resumable, multi-source geocoding of home-health provider addresses.
//!
//! A run moves through these steps, each safe to interrupt:
//!
//! 1. [`universe`] loads the Provider Universe from the upstream table.
//! 2. [`remaining`] subtracts every address that already has coordinates.
//! 3. [`round`] splits the remainder into Batch Artifacts and drives each
//!    through the rate-limited [`executor`], one provider at a time.
//! 4. [`consolidate`] appends finished artifacts to the Geocode Store
//!    exactly once.
//! 5. [`merge`] layers primary and fallback results into the canonical
//!    table, and [`coverage`] reports what is still unresolved.
//!
//! [`import`] and [`export`] move results in and out as CSV.

pub mod consolidate;
pub mod coverage;
pub mod executor;
pub mod export;
pub mod import;
pub mod merge;
pub mod remaining;
pub mod round;
pub mod universe;

use std::path::{Path, PathBuf};

use hh_atlas_geocoder::GeocodeError;
use hh_atlas_pipeline_models::PipelineConfig;
use hh_atlas_store::StoreError;
use thiserror::Error;

/// Errors that stop a pipeline step.
///
/// Provider failures are not here: the executor records them as
/// unresolved attempts and carries on.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Geocode Store or artifact queue failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A geocoding service could not be set up.
    #[error("Geocoder error: {0}")]
    Geocode(#[from] GeocodeError),

    /// CSV read or write failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Filesystem failure on a specific path.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The file involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A required column is missing from an input table.
    #[error("Table '{table}' has no column '{column}'")]
    MissingColumn {
        /// Which input table.
        table: String,
        /// The missing column name.
        column: String,
    },

    /// Invalid configuration or arguments.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },
}

impl PipelineError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Loads pipeline settings from an optional TOML file.
///
/// Without a file, every setting takes its default.
///
/// # Errors
///
/// Returns [`PipelineError`] if the file cannot be read or parsed.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig, PipelineError> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };

    let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    let config: PipelineConfig = toml::from_str(&text).map_err(|e| PipelineError::Config {
        message: format!("{}: {e}", path.display()),
    })?;

    if config.batch_size == 0 {
        return Err(PipelineError::Config {
            message: "batch_size must be at least 1".to_string(),
        });
    }

    log::info!("Loaded pipeline config from {}", path.display());
    Ok(config)
}
