#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Durable storage for geocoding results, backed by a single `DuckDB` file.
//!
//! These tables make up the pipeline's persistent state:
//!
//! - `geocode_records`: the append-only log of every consolidated attempt.
//!   Rows are never updated or deleted.
//! - `geocode_best`: the Geocode Store proper, one row per service and
//!   address holding the most complete attempt. It is refreshed in the
//!   same transaction that appends to the log.
//! - `batch_artifacts` + `batch_artifact_records`: the batch work queue.
//!   Each artifact moves `open` → `pending` → `archived`, and its status is
//!   the token that decides whether its records have been consolidated.
//! - `final_geocodes`: the canonical merged table, replaced wholesale by
//!   each merge.
//!
//! See [`artifacts::consolidate`] for the at-most-once guarantee.

pub mod artifacts;
pub mod final_table;
pub mod geocode_store;
pub mod paths;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use duckdb::Connection;
use hh_atlas_geocoder_models::{AddressKey, Coordinates, GeocodeRecord, SourceRole};

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `DuckDB` query error.
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No artifact with this id exists.
    #[error("Unknown batch artifact {artifact_id}")]
    UnknownArtifact {
        /// The requested artifact id.
        artifact_id: i64,
    },

    /// An artifact was not in the status an operation requires.
    #[error("Batch artifact {artifact_id} is {actual}, expected {expected}")]
    InvalidState {
        /// The artifact id.
        artifact_id: i64,
        /// Status the operation requires.
        expected: String,
        /// Status found in the store.
        actual: String,
    },

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// Opens (or creates) the store at `path` and ensures the schema exists.
///
/// # Errors
///
/// Returns [`StoreError`] if the connection or schema creation fails.
pub fn open(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent() {
        paths::ensure_dir(parent)?;
    }

    let conn = Connection::open(path)?;
    create_schema(&conn)?;
    geocode_store::backfill_best(&conn)?;
    Ok(conn)
}

/// Opens a throwaway in-memory store. Used by tests and dry runs.
///
/// # Errors
///
/// Returns [`StoreError`] if the connection or schema creation fails.
pub fn open_in_memory() -> Result<Connection, StoreError> {
    let conn = Connection::open_in_memory()?;
    create_schema(&conn)?;
    Ok(conn)
}

fn create_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE SEQUENCE IF NOT EXISTS batch_artifact_ids START 1;
        CREATE SEQUENCE IF NOT EXISTS geocode_record_ids START 1;

        CREATE TABLE IF NOT EXISTS batch_artifacts (
            artifact_id BIGINT PRIMARY KEY DEFAULT nextval('batch_artifact_ids'),
            service_id TEXT NOT NULL,
            source TEXT NOT NULL,
            batch_number BIGINT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            consolidated_at TEXT
        );

        CREATE TABLE IF NOT EXISTS batch_artifact_records (
            artifact_id BIGINT NOT NULL,
            record_index BIGINT NOT NULL,
            provider_id TEXT NOT NULL,
            street TEXT NOT NULL,
            city TEXT NOT NULL,
            state TEXT NOT NULL,
            postal_code TEXT NOT NULL,
            latitude DOUBLE,
            longitude DOUBLE,
            service_id TEXT NOT NULL,
            source TEXT NOT NULL,
            match_quality TEXT NOT NULL,
            geocoded_at TEXT NOT NULL,
            PRIMARY KEY (artifact_id, record_index)
        );

        CREATE TABLE IF NOT EXISTS geocode_records (
            record_id BIGINT PRIMARY KEY DEFAULT nextval('geocode_record_ids'),
            artifact_id BIGINT NOT NULL,
            provider_id TEXT NOT NULL,
            street TEXT NOT NULL,
            city TEXT NOT NULL,
            state TEXT NOT NULL,
            postal_code TEXT NOT NULL,
            latitude DOUBLE,
            longitude DOUBLE,
            service_id TEXT NOT NULL,
            source TEXT NOT NULL,
            match_quality TEXT NOT NULL,
            geocoded_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS geocode_best (
            record_id BIGINT NOT NULL,
            artifact_id BIGINT NOT NULL,
            provider_id TEXT NOT NULL,
            street TEXT NOT NULL,
            city TEXT NOT NULL,
            state TEXT NOT NULL,
            postal_code TEXT NOT NULL,
            latitude DOUBLE,
            longitude DOUBLE,
            service_id TEXT NOT NULL,
            source TEXT NOT NULL,
            match_quality TEXT NOT NULL,
            geocoded_at TEXT NOT NULL,
            matched_address TEXT
        );

        ALTER TABLE batch_artifact_records ADD COLUMN IF NOT EXISTS matched_address TEXT;
        ALTER TABLE geocode_records ADD COLUMN IF NOT EXISTS matched_address TEXT;",
    )?;
    Ok(())
}

/// Column list shared by every query that reads a [`GeocodeRecord`].
pub(crate) const RECORD_COLUMNS: &str = "provider_id, street, city, state, postal_code, \
     latitude, longitude, service_id, source, match_quality, geocoded_at, matched_address";

/// A record row as stored, before string columns are parsed.
pub(crate) struct RecordRow {
    key: AddressKey,
    latitude: Option<f64>,
    longitude: Option<f64>,
    service_id: String,
    source: String,
    match_quality: String,
    geocoded_at: String,
    matched_address: Option<String>,
}

impl RecordRow {
    /// Reads the [`RECORD_COLUMNS`] starting at column `offset`.
    pub(crate) fn read(row: &duckdb::Row<'_>, offset: usize) -> duckdb::Result<Self> {
        Ok(Self {
            key: AddressKey {
                provider_id: row.get(offset)?,
                street: row.get(offset + 1)?,
                city: row.get(offset + 2)?,
                state: row.get(offset + 3)?,
                postal_code: row.get(offset + 4)?,
            },
            latitude: row.get(offset + 5)?,
            longitude: row.get(offset + 6)?,
            service_id: row.get(offset + 7)?,
            source: row.get(offset + 8)?,
            match_quality: row.get(offset + 9)?,
            geocoded_at: row.get(offset + 10)?,
            matched_address: row.get(offset + 11)?,
        })
    }

    pub(crate) fn into_record(self) -> Result<GeocodeRecord, StoreError> {
        Ok(GeocodeRecord {
            coordinates: Coordinates::from_parts(self.latitude, self.longitude),
            source: parse_source(&self.source)?,
            geocoded_at: parse_timestamp(&self.geocoded_at)?,
            key: self.key,
            service_id: self.service_id,
            match_quality: self.match_quality,
            matched_address: self.matched_address,
        })
    }
}

pub(crate) fn parse_source(raw: &str) -> Result<SourceRole, StoreError> {
    raw.parse().map_err(|_| StoreError::Conversion {
        message: format!("unknown source role '{raw}'"),
    })
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Conversion {
            message: format!("invalid timestamp '{raw}': {e}"),
        })
}
