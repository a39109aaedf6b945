//! Batch artifacts: the durable work queue between geocoding and the
//! Geocode Store.
//!
//! An artifact is created `open` when a batch starts. Each processed
//! address is written to it immediately, so a crash loses at most the
//! request in flight. Sealing moves it to `pending`, and consolidation
//! moves it to `archived` in the same transaction that appends its
//! records to the store.
//!
//! The status column is the consolidation token: a `pending` artifact
//! has never been appended, an `archived` one has been appended exactly
//! once. A consolidation that fails midway rolls back both changes, so
//! re-running it can neither lose nor duplicate records.

use chrono::Utc;
use duckdb::Connection;
use hh_atlas_geocoder_models::{GeocodeRecord, SourceRole};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::geocode_store::{self, to_count};
use crate::{RECORD_COLUMNS, RecordRow, StoreError, format_timestamp, parse_source};

/// Lifecycle state of a batch artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ArtifactStatus {
    /// The batch is still running (or was interrupted).
    Open,
    /// Complete and waiting for consolidation.
    Pending,
    /// Appended to the Geocode Store.
    Archived,
}

/// A batch artifact as listed from the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchArtifact {
    /// Queue identifier.
    pub artifact_id: i64,
    /// Geocoding service that produced the batch.
    pub service_id: String,
    /// Source role of the service.
    pub source: SourceRole,
    /// Per-service sequence number, starting at 1.
    pub batch_number: i64,
    /// Lifecycle state.
    pub status: ArtifactStatus,
    /// Records written so far.
    pub record_count: usize,
}

/// Outcome of consolidating one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consolidation {
    /// Records were appended to the store.
    Appended(usize),
    /// The artifact was already archived; nothing was appended.
    AlreadyConsolidated,
}

const ARTIFACT_SELECT: &str = "SELECT a.artifact_id, a.service_id, a.source, a.batch_number, a.status,
        (SELECT COUNT(*) FROM batch_artifact_records r WHERE r.artifact_id = a.artifact_id)
     FROM batch_artifacts a";

type ArtifactRow = (i64, String, String, i64, String, i64);

fn read_artifact_row(row: &duckdb::Row<'_>) -> duckdb::Result<ArtifactRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_artifact(row: ArtifactRow) -> Result<BatchArtifact, StoreError> {
    let (artifact_id, service_id, source, batch_number, status, record_count) = row;
    Ok(BatchArtifact {
        artifact_id,
        service_id,
        source: parse_source(&source)?,
        batch_number,
        status: parse_status(&status)?,
        record_count: to_count(record_count)?,
    })
}

fn parse_status(raw: &str) -> Result<ArtifactStatus, StoreError> {
    raw.parse().map_err(|_| StoreError::Conversion {
        message: format!("unknown artifact status '{raw}'"),
    })
}

fn query_artifacts(
    conn: &Connection,
    filter: &str,
    status: Option<ArtifactStatus>,
) -> Result<Vec<BatchArtifact>, StoreError> {
    let sql = format!("{ARTIFACT_SELECT} {filter} ORDER BY a.artifact_id");
    let mut stmt = conn.prepare(&sql)?;
    if let Some(status) = status {
        stmt.raw_bind_parameter(1, status.as_ref())?;
    }
    stmt.raw_execute()?;

    let mut artifacts = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        artifacts.push(into_artifact(read_artifact_row(row)?)?);
    }
    Ok(artifacts)
}

/// Returns the next batch number for `service_id`.
///
/// # Errors
///
/// Returns [`StoreError`] if the query fails.
pub fn next_batch_number(conn: &Connection, service_id: &str) -> Result<i64, StoreError> {
    let max: i64 = conn.query_row(
        "SELECT COALESCE(MAX(batch_number), 0) FROM batch_artifacts WHERE service_id = ?",
        duckdb::params![service_id],
        |row| row.get(0),
    )?;
    Ok(max + 1)
}

/// Creates an `open` artifact with the next batch number for the service.
///
/// # Errors
///
/// Returns [`StoreError`] if the insert fails.
pub fn create(
    conn: &Connection,
    service_id: &str,
    source: SourceRole,
) -> Result<BatchArtifact, StoreError> {
    let batch_number = next_batch_number(conn, service_id)?;
    let artifact_id: i64 = conn.query_row(
        "INSERT INTO batch_artifacts (service_id, source, batch_number, status, created_at)
         VALUES (?, ?, ?, ?, ?)
         RETURNING artifact_id",
        duckdb::params![
            service_id,
            source.as_ref(),
            batch_number,
            ArtifactStatus::Open.as_ref(),
            format_timestamp(&Utc::now()),
        ],
        |row| row.get(0),
    )?;

    log::debug!("Opened batch artifact {artifact_id} ({service_id} batch {batch_number})");

    Ok(BatchArtifact {
        artifact_id,
        service_id: service_id.to_string(),
        source,
        batch_number,
        status: ArtifactStatus::Open,
        record_count: 0,
    })
}

/// Writes records into an open artifact one at a time.
pub struct ArtifactWriter<'a> {
    conn: &'a Connection,
    artifact_id: i64,
    next_index: i64,
}

impl<'a> ArtifactWriter<'a> {
    /// Starts writing at the end of `artifact`'s existing records.
    #[must_use]
    pub const fn new(conn: &'a Connection, artifact: &BatchArtifact) -> Self {
        #[allow(clippy::cast_possible_wrap)]
        let next_index = artifact.record_count as i64;
        Self {
            conn,
            artifact_id: artifact.artifact_id,
            next_index,
        }
    }

    /// Identifier of the artifact being written.
    #[must_use]
    pub const fn artifact_id(&self) -> i64 {
        self.artifact_id
    }

    /// Durably writes one record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insert fails.
    pub fn append(&mut self, record: &GeocodeRecord) -> Result<(), StoreError> {
        let (lat, lng) = record
            .coordinates
            .map_or((None, None), |c| (Some(c.latitude), Some(c.longitude)));
        self.conn.execute(
            &format!(
                "INSERT INTO batch_artifact_records (artifact_id, record_index, {RECORD_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            duckdb::params![
                self.artifact_id,
                self.next_index,
                record.key.provider_id,
                record.key.street,
                record.key.city,
                record.key.state,
                record.key.postal_code,
                lat,
                lng,
                record.service_id,
                record.source.as_ref(),
                record.match_quality,
                format_timestamp(&record.geocoded_at),
                record.matched_address,
            ],
        )?;
        self.next_index += 1;
        Ok(())
    }
}

/// Looks up one artifact.
///
/// # Errors
///
/// Returns [`StoreError::UnknownArtifact`] if no such artifact exists.
pub fn get(conn: &Connection, artifact_id: i64) -> Result<BatchArtifact, StoreError> {
    let sql = format!("{ARTIFACT_SELECT} WHERE a.artifact_id = ?");
    match conn.query_row(&sql, duckdb::params![artifact_id], read_artifact_row) {
        Ok(row) => into_artifact(row),
        Err(duckdb::Error::QueryReturnedNoRows) => Err(StoreError::UnknownArtifact { artifact_id }),
        Err(e) => Err(e.into()),
    }
}

/// Lists every artifact in creation order.
///
/// # Errors
///
/// Returns [`StoreError`] if the query fails.
pub fn list(conn: &Connection) -> Result<Vec<BatchArtifact>, StoreError> {
    query_artifacts(conn, "", None)
}

/// Lists artifacts awaiting consolidation, oldest first.
///
/// # Errors
///
/// Returns [`StoreError`] if the query fails.
pub fn pending(conn: &Connection) -> Result<Vec<BatchArtifact>, StoreError> {
    query_artifacts(conn, "WHERE a.status = ?", Some(ArtifactStatus::Pending))
}

/// Moves an open artifact to `pending`.
///
/// # Errors
///
/// Returns [`StoreError::InvalidState`] if the artifact is not open.
pub fn seal(conn: &Connection, artifact_id: i64) -> Result<(), StoreError> {
    let updated = conn.execute(
        "UPDATE batch_artifacts SET status = ? WHERE artifact_id = ? AND status = ?",
        duckdb::params![
            ArtifactStatus::Pending.as_ref(),
            artifact_id,
            ArtifactStatus::Open.as_ref(),
        ],
    )?;

    if updated == 0 {
        let artifact = get(conn, artifact_id)?;
        return Err(StoreError::InvalidState {
            artifact_id,
            expected: ArtifactStatus::Open.to_string(),
            actual: artifact.status.to_string(),
        });
    }

    Ok(())
}

/// Promotes artifacts left `open` by an interrupted run to `pending`.
///
/// Their records were written one by one, so everything they hold is a
/// complete attempt and safe to consolidate.
///
/// # Errors
///
/// Returns [`StoreError`] if the update fails.
pub fn recover_open(conn: &Connection) -> Result<usize, StoreError> {
    let recovered = conn.execute(
        "UPDATE batch_artifacts SET status = ? WHERE status = ?",
        duckdb::params![
            ArtifactStatus::Pending.as_ref(),
            ArtifactStatus::Open.as_ref()
        ],
    )?;
    if recovered > 0 {
        log::warn!("Recovered {recovered} interrupted batch artifact(s)");
    }
    Ok(recovered)
}

/// Reads an artifact's records in write order.
///
/// # Errors
///
/// Returns [`StoreError`] if the query fails or a row cannot be decoded.
pub fn read_records(conn: &Connection, artifact_id: i64) -> Result<Vec<GeocodeRecord>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM batch_artifact_records
         WHERE artifact_id = ?
         ORDER BY record_index"
    ))?;
    stmt.raw_bind_parameter(1, artifact_id)?;
    stmt.raw_execute()?;

    let mut records = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        records.push(RecordRow::read(row, 0)?.into_record()?);
    }
    Ok(records)
}

/// Appends a pending artifact's records to the Geocode Store and archives
/// it, atomically. The store's best-record table is refreshed in the same
/// transaction.
///
/// Calling this again for an archived artifact is a no-op that reports
/// [`Consolidation::AlreadyConsolidated`].
///
/// # Errors
///
/// Returns [`StoreError::InvalidState`] for an artifact that is still
/// open, or any error from the underlying statements (in which case
/// nothing was changed).
pub fn consolidate(conn: &mut Connection, artifact_id: i64) -> Result<Consolidation, StoreError> {
    let tx = conn.transaction()?;

    let artifact = get(&tx, artifact_id)?;
    match artifact.status {
        ArtifactStatus::Archived => return Ok(Consolidation::AlreadyConsolidated),
        ArtifactStatus::Open => {
            return Err(StoreError::InvalidState {
                artifact_id,
                expected: ArtifactStatus::Pending.to_string(),
                actual: artifact.status.to_string(),
            });
        }
        ArtifactStatus::Pending => {}
    }

    let records = read_records(&tx, artifact_id)?;
    let appended = geocode_store::append(&tx, artifact_id, &records)?;

    tx.execute(
        "UPDATE batch_artifacts SET status = ?, consolidated_at = ? WHERE artifact_id = ?",
        duckdb::params![
            ArtifactStatus::Archived.as_ref(),
            format_timestamp(&Utc::now()),
            artifact_id,
        ],
    )?;

    tx.commit()?;

    log::info!(
        "Consolidated artifact {artifact_id} ({} batch {}): {appended} records",
        artifact.service_id,
        artifact.batch_number,
    );

    Ok(Consolidation::Appended(appended))
}

/// Stores externally produced records as a new `pending` artifact.
///
/// The artifact is created, filled, and sealed in one transaction, so a
/// failed import leaves no partial artifact behind.
///
/// # Errors
///
/// Returns [`StoreError`] if any insert fails.
pub fn import(
    conn: &mut Connection,
    service_id: &str,
    source: SourceRole,
    records: &[GeocodeRecord],
) -> Result<BatchArtifact, StoreError> {
    let tx = conn.transaction()?;

    let artifact = create(&tx, service_id, source)?;
    let mut writer = ArtifactWriter::new(&tx, &artifact);
    for record in records {
        writer.append(record)?;
    }
    seal(&tx, artifact.artifact_id)?;

    let artifact = get(&tx, artifact.artifact_id)?;
    tx.commit()?;

    Ok(artifact)
}
