//! The Geocode Store.
//!
//! Every consolidated attempt is appended to the `geocode_records` log,
//! successes and failures alike, and the log is never rewritten. Readers
//! see `geocode_best` instead: one row per service and address holding
//! the most complete attempt, refreshed by [`append`] in the caller's
//! transaction. A record with coordinates beats one without; between
//! equally complete records the later one wins.

use std::collections::BTreeSet;

use duckdb::Connection;
use hh_atlas_geocoder_models::{AddressKey, GeocodeRecord};

use crate::{RECORD_COLUMNS, RecordRow, StoreError, format_timestamp};

/// Per-service totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCounts {
    /// Geocoding service identifier.
    pub service_id: String,
    /// Source role recorded for the service.
    pub source: String,
    /// Attempts in the log, including repeats for the same address.
    pub records: usize,
    /// Attempts in the log with coordinates.
    pub resolved_records: usize,
    /// Distinct addresses attempted.
    pub distinct_keys: usize,
    /// Distinct addresses with at least one successful attempt.
    pub resolved_keys: usize,
}

/// Appends records attributed to `artifact_id` to the log and refreshes
/// the best record of every service they mention.
///
/// Callers that need atomicity pass a transaction; it derefs to a
/// [`Connection`].
///
/// # Errors
///
/// Returns [`StoreError`] if an insert fails.
pub fn append(
    conn: &Connection,
    artifact_id: i64,
    records: &[GeocodeRecord],
) -> Result<usize, StoreError> {
    if records.is_empty() {
        return Ok(0);
    }

    let mut stmt = conn.prepare(&format!(
        "INSERT INTO geocode_records (artifact_id, {RECORD_COLUMNS})
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))?;

    for record in records {
        let (lat, lng) = record
            .coordinates
            .map_or((None, None), |c| (Some(c.latitude), Some(c.longitude)));
        stmt.execute(duckdb::params![
            artifact_id,
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
        ])?;
    }

    let services: BTreeSet<&str> = records.iter().map(|r| r.service_id.as_str()).collect();
    for service_id in services {
        refresh_best(conn, Some(service_id))?;
    }

    Ok(records.len())
}

/// Rebuilds `geocode_best` from the log for one service, or for all.
fn refresh_best(conn: &Connection, service_id: Option<&str>) -> Result<(), StoreError> {
    let filter = if service_id.is_some() {
        "WHERE service_id = ?"
    } else {
        ""
    };

    let mut delete = conn.prepare(&format!("DELETE FROM geocode_best {filter}"))?;
    let mut insert = conn.prepare(&format!(
        "INSERT INTO geocode_best (record_id, artifact_id, {RECORD_COLUMNS})
         SELECT record_id, artifact_id, {RECORD_COLUMNS}
         FROM (
             SELECT *, row_number() OVER (
                 PARTITION BY service_id, provider_id, street, city, state, postal_code
                 ORDER BY (latitude IS NOT NULL AND longitude IS NOT NULL) DESC, record_id DESC
             ) AS attempt_rank
             FROM geocode_records {filter}
         )
         WHERE attempt_rank = 1"
    ))?;

    if let Some(id) = service_id {
        delete.raw_bind_parameter(1, id)?;
        insert.raw_bind_parameter(1, id)?;
    }
    delete.raw_execute()?;
    insert.raw_execute()?;

    Ok(())
}

/// Fills `geocode_best` from the log when the table is empty, for stores
/// created before it existed.
///
/// # Errors
///
/// Returns [`StoreError`] if a query fails.
pub(crate) fn backfill_best(conn: &Connection) -> Result<(), StoreError> {
    let best: i64 = conn.query_row("SELECT COUNT(*) FROM geocode_best", [], |row| row.get(0))?;
    if best == 0 && record_count(conn)? > 0 {
        log::info!("Building best-record table from the attempt log");
        refresh_best(conn, None)?;
    }
    Ok(())
}

/// Reads the best record per service and address, in log order,
/// optionally limited to one service.
///
/// # Errors
///
/// Returns [`StoreError`] if the query fails or a row cannot be decoded.
pub fn scan(conn: &Connection, service_id: Option<&str>) -> Result<Vec<GeocodeRecord>, StoreError> {
    let filter = if service_id.is_some() {
        "WHERE service_id = ?"
    } else {
        ""
    };
    let sql = format!("SELECT {RECORD_COLUMNS} FROM geocode_best {filter} ORDER BY record_id");

    let mut stmt = conn.prepare(&sql)?;
    if let Some(id) = service_id {
        stmt.raw_bind_parameter(1, id)?;
    }
    stmt.raw_execute()?;

    let mut records = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        records.push(RecordRow::read(row, 0)?.into_record()?);
    }

    Ok(records)
}

/// Returns every address that has coordinates from any of `service_ids`.
///
/// # Errors
///
/// Returns [`StoreError`] if the query fails.
pub fn resolved_keys(
    conn: &Connection,
    service_ids: &[&str],
) -> Result<BTreeSet<AddressKey>, StoreError> {
    let mut keys = BTreeSet::new();

    if service_ids.is_empty() {
        return Ok(keys);
    }

    let placeholders = service_ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let sql = format!(
        "SELECT DISTINCT provider_id, street, city, state, postal_code
         FROM geocode_best
         WHERE latitude IS NOT NULL AND longitude IS NOT NULL
           AND service_id IN ({placeholders})"
    );

    let mut stmt = conn.prepare(&sql)?;
    for (i, id) in service_ids.iter().enumerate() {
        stmt.raw_bind_parameter(i + 1, *id)?;
    }
    stmt.raw_execute()?;

    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        keys.insert(AddressKey {
            provider_id: row.get(0)?,
            street: row.get(1)?,
            city: row.get(2)?,
            state: row.get(3)?,
            postal_code: row.get(4)?,
        });
    }

    Ok(keys)
}

/// Summarizes the store per service: attempt totals from the log, address
/// totals from the best records.
///
/// # Errors
///
/// Returns [`StoreError`] if the query fails.
pub fn service_counts(conn: &Connection) -> Result<Vec<ServiceCounts>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT b.service_id, b.source, l.records, l.resolved_records, b.addresses, b.resolved
         FROM (
             SELECT service_id, source,
                    COUNT(*) AS addresses,
                    COUNT(*) FILTER (WHERE latitude IS NOT NULL AND longitude IS NOT NULL)
                        AS resolved
             FROM geocode_best
             GROUP BY service_id, source
         ) b
         JOIN (
             SELECT service_id, source,
                    COUNT(*) AS records,
                    COUNT(*) FILTER (WHERE latitude IS NOT NULL AND longitude IS NOT NULL)
                        AS resolved_records
             FROM geocode_records
             GROUP BY service_id, source
         ) l ON l.service_id = b.service_id AND l.source = b.source
         ORDER BY b.service_id, b.source",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, i64>(5)?,
        ))
    })?;

    let mut counts = Vec::new();
    for row in rows {
        let (service_id, source, records, resolved_records, distinct_keys, resolved_keys) = row?;
        counts.push(ServiceCounts {
            service_id,
            source,
            records: to_count(records)?,
            resolved_records: to_count(resolved_records)?,
            distinct_keys: to_count(distinct_keys)?,
            resolved_keys: to_count(resolved_keys)?,
        });
    }

    Ok(counts)
}

/// Total number of attempts in the log.
///
/// # Errors
///
/// Returns [`StoreError`] if the query fails.
pub fn record_count(conn: &Connection) -> Result<usize, StoreError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM geocode_records", [], |row| {
        row.get(0)
    })?;
    to_count(count)
}

pub(crate) fn to_count(value: i64) -> Result<usize, StoreError> {
    usize::try_from(value).map_err(|e| StoreError::Conversion {
        message: format!("invalid count {value}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hh_atlas_geocoder_models::{Coordinates, RawAddress, SourceRole};

    fn key(provider_id: &str) -> AddressKey {
        AddressKey::normalize(&RawAddress {
            provider_id: provider_id.to_string(),
            street: "100 Main St".to_string(),
            city: "Springfield".to_string(),
            state: "IL".to_string(),
            postal_code: "62701".to_string(),
        })
    }

    fn record(provider_id: &str, service: &str, coords: Option<(f64, f64)>) -> GeocodeRecord {
        GeocodeRecord::new(
            key(provider_id),
            service,
            SourceRole::Primary,
            coords.map(|(lat, lng)| Coordinates::new(lat, lng)),
            if coords.is_some() { "house" } else { "NO_MATCH" },
        )
    }

    #[test]
    fn append_and_scan_preserve_order_and_nulls() {
        let conn = crate::open_in_memory().unwrap();
        let records = vec![
            record("A", "nominatim", Some((39.8, -89.6))),
            record("B", "nominatim", None),
        ];
        assert_eq!(append(&conn, 1, &records).unwrap(), 2);

        let scanned = scan(&conn, None).unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].key, key("A"));
        assert_eq!(scanned[0].coordinates, Some(Coordinates::new(39.8, -89.6)));
        assert_eq!(scanned[1].coordinates, None);
        assert_eq!(scanned[1].match_quality, "NO_MATCH");
    }

    #[test]
    fn best_table_holds_one_row_per_service_and_address() {
        let conn = crate::open_in_memory().unwrap();
        append(&conn, 1, &[record("A", "nominatim", None)]).unwrap();
        append(&conn, 2, &[record("A", "nominatim", Some((1.0, 2.0)))]).unwrap();
        append(&conn, 3, &[record("A", "nominatim", None)]).unwrap();
        append(&conn, 4, &[record("A", "census", None)]).unwrap();

        assert_eq!(record_count(&conn).unwrap(), 4);

        let nominatim = scan(&conn, Some("nominatim")).unwrap();
        assert_eq!(nominatim.len(), 1);
        assert_eq!(nominatim[0].coordinates, Some(Coordinates::new(1.0, 2.0)));
        assert_eq!(scan(&conn, None).unwrap().len(), 2);
    }

    #[test]
    fn later_failure_replaces_earlier_failure() {
        let conn = crate::open_in_memory().unwrap();
        append(&conn, 1, &[record("A", "nominatim", None)]).unwrap();
        let mut timed_out = record("A", "nominatim", None);
        timed_out.match_quality = "ERROR: timed out".to_string();
        append(&conn, 2, &[timed_out]).unwrap();

        let best = scan(&conn, None).unwrap();
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].match_quality, "ERROR: timed out");
    }

    #[test]
    fn matched_address_is_kept_as_provenance() {
        let conn = crate::open_in_memory().unwrap();
        let hit = record("A", "census", Some((39.8, -89.6)))
            .with_matched_address(Some("100 MAIN ST, SPRINGFIELD, IL, 62701".to_string()));
        append(&conn, 1, &[hit, record("B", "census", None)]).unwrap();

        let best = scan(&conn, None).unwrap();
        assert_eq!(
            best[0].matched_address.as_deref(),
            Some("100 MAIN ST, SPRINGFIELD, IL, 62701")
        );
        assert_eq!(best[1].matched_address, None);
    }

    #[test]
    fn backfill_builds_best_rows_from_the_log() {
        let conn = crate::open_in_memory().unwrap();
        append(
            &conn,
            1,
            &[
                record("A", "nominatim", Some((1.0, 1.0))),
                record("A", "nominatim", None),
            ],
        )
        .unwrap();
        conn.execute("DELETE FROM geocode_best", []).unwrap();

        backfill_best(&conn).unwrap();
        let best = scan(&conn, None).unwrap();
        assert_eq!(best.len(), 1);
        assert!(best[0].is_resolved());
    }

    #[test]
    fn resolved_keys_filters_by_service() {
        let conn = crate::open_in_memory().unwrap();
        append(
            &conn,
            1,
            &[
                record("A", "nominatim", Some((1.0, 1.0))),
                record("B", "nominatim", None),
                record("C", "census", Some((3.0, 3.0))),
            ],
        )
        .unwrap();

        let primary = resolved_keys(&conn, &["nominatim"]).unwrap();
        assert_eq!(primary.into_iter().collect::<Vec<_>>(), vec![key("A")]);

        let both = resolved_keys(&conn, &["nominatim", "census"]).unwrap();
        assert_eq!(both.len(), 2);

        assert!(resolved_keys(&conn, &[]).unwrap().is_empty());
    }

    #[test]
    fn counts_per_service() {
        let conn = crate::open_in_memory().unwrap();
        append(
            &conn,
            1,
            &[
                record("A", "nominatim", None),
                record("A", "nominatim", Some((1.0, 1.0))),
                record("B", "nominatim", None),
            ],
        )
        .unwrap();

        let counts = service_counts(&conn).unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(
            counts[0],
            ServiceCounts {
                service_id: "nominatim".to_string(),
                source: "primary".to_string(),
                records: 3,
                resolved_records: 1,
                distinct_keys: 2,
                resolved_keys: 1,
            }
        );
    }
}
