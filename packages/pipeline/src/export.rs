//! CSV exports of the final table and the unresolved address list.

use std::io::Write;
use std::path::Path;

use chrono::SecondsFormat;
use hh_atlas_geocoder_models::{AddressKey, FinalGeocode};
use serde::Serialize;

use crate::PipelineError;

#[derive(Serialize)]
struct AddressColumns<'a> {
    #[serde(rename = "CCN")]
    provider_id: &'a str,
    #[serde(rename = "ADDRESS LINE 1")]
    street: &'a str,
    #[serde(rename = "CITY")]
    city: &'a str,
    #[serde(rename = "STATE")]
    state: &'a str,
    #[serde(rename = "ZIP CODE")]
    postal_code: &'a str,
}

impl<'a> From<&'a AddressKey> for AddressColumns<'a> {
    fn from(key: &'a AddressKey) -> Self {
        Self {
            provider_id: &key.provider_id,
            street: &key.street,
            city: &key.city,
            state: &key.state,
            postal_code: &key.postal_code,
        }
    }
}

#[derive(Serialize)]
struct FinalRow<'a> {
    #[serde(rename = "CCN")]
    provider_id: &'a str,
    #[serde(rename = "ADDRESS LINE 1")]
    street: &'a str,
    #[serde(rename = "CITY")]
    city: &'a str,
    #[serde(rename = "STATE")]
    state: &'a str,
    #[serde(rename = "ZIP CODE")]
    postal_code: &'a str,
    lat: Option<f64>,
    lon: Option<f64>,
    source: Option<String>,
    provider: Option<&'a str>,
    match_quality: Option<&'a str>,
    updated_by_fallback: bool,
    geocoded_at: Option<String>,
}

impl<'a> From<&'a FinalGeocode> for FinalRow<'a> {
    fn from(row: &'a FinalGeocode) -> Self {
        Self {
            provider_id: &row.key.provider_id,
            street: &row.key.street,
            city: &row.key.city,
            state: &row.key.state,
            postal_code: &row.key.postal_code,
            lat: row.coordinates.map(|c| c.latitude),
            lon: row.coordinates.map(|c| c.longitude),
            source: row.source.map(|s| s.to_string()),
            provider: row.service_id.as_deref(),
            match_quality: row.match_quality.as_deref(),
            updated_by_fallback: row.is_fallback(),
            geocoded_at: row
                .geocoded_at
                .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }
}

fn create(path: &Path) -> Result<std::fs::File, PipelineError> {
    if let Some(parent) = path.parent() {
        hh_atlas_store::paths::ensure_dir(parent).map_err(|e| PipelineError::io(parent, e))?;
    }
    std::fs::File::create(path).map_err(|e| PipelineError::io(path, e))
}

/// Writes the final table as CSV.
///
/// # Errors
///
/// Returns [`PipelineError`] if a row cannot be written.
pub fn write_final<W: Write>(writer: W, rows: &[FinalGeocode]) -> Result<(), PipelineError> {
    let mut csv = csv::Writer::from_writer(writer);
    for row in rows {
        csv.serialize(FinalRow::from(row))?;
    }
    csv.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Writes the unresolved address list as CSV: the key columns, no
/// coordinates.
///
/// # Errors
///
/// Returns [`PipelineError`] if a row cannot be written.
pub fn write_unresolved<W: Write>(writer: W, keys: &[AddressKey]) -> Result<(), PipelineError> {
    let mut csv = csv::Writer::from_writer(writer);
    if keys.is_empty() {
        csv.write_record(["CCN", "ADDRESS LINE 1", "CITY", "STATE", "ZIP CODE"])?;
    }
    for key in keys {
        csv.serialize(AddressColumns::from(key))?;
    }
    csv.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Writes the final table to `path`, creating parent directories.
///
/// # Errors
///
/// Returns [`PipelineError`] if the file cannot be written.
pub fn export_final(path: &Path, rows: &[FinalGeocode]) -> Result<(), PipelineError> {
    write_final(create(path)?, rows)?;
    log::info!("Wrote {} final row(s) to {}", rows.len(), path.display());
    Ok(())
}

/// Writes the unresolved list to `path`, creating parent directories.
///
/// # Errors
///
/// Returns [`PipelineError`] if the file cannot be written.
pub fn export_unresolved(path: &Path, keys: &[AddressKey]) -> Result<(), PipelineError> {
    write_unresolved(create(path)?, keys)?;
    log::info!(
        "Wrote {} unresolved address(es) to {}",
        keys.len(),
        path.display()
    );
    Ok(())
}
