//! The canonical `final_geocodes` table, rebuilt by every merge.

use duckdb::Connection;
use hh_atlas_geocoder_models::{AddressKey, Coordinates, FinalGeocode};

use crate::{StoreError, format_timestamp, parse_source, parse_timestamp};

/// Replaces the final table with `rows` in one transaction.
///
/// Readers see either the previous merge or this one, never a mix.
///
/// # Errors
///
/// Returns [`StoreError`] if the table cannot be rebuilt.
pub fn replace(conn: &mut Connection, rows: &[FinalGeocode]) -> Result<usize, StoreError> {
    let tx = conn.transaction()?;

    tx.execute_batch(
        "CREATE OR REPLACE TABLE final_geocodes (
            provider_id TEXT NOT NULL,
            street TEXT NOT NULL,
            city TEXT NOT NULL,
            state TEXT NOT NULL,
            postal_code TEXT NOT NULL,
            latitude DOUBLE,
            longitude DOUBLE,
            source TEXT,
            service_id TEXT,
            match_quality TEXT,
            geocoded_at TEXT
        );",
    )?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO final_geocodes
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;

        for row in rows {
            let (lat, lng) = row
                .coordinates
                .map_or((None, None), |c| (Some(c.latitude), Some(c.longitude)));
            stmt.execute(duckdb::params![
                row.key.provider_id,
                row.key.street,
                row.key.city,
                row.key.state,
                row.key.postal_code,
                lat,
                lng,
                row.source.map(|s| s.to_string()),
                row.service_id.as_deref(),
                row.match_quality.as_deref(),
                row.geocoded_at.as_ref().map(format_timestamp),
            ])?;
        }
    }

    tx.commit()?;
    log::info!("Final table rebuilt with {} rows", rows.len());

    Ok(rows.len())
}

/// Loads the final table sorted by key. Empty if no merge has run yet.
///
/// # Errors
///
/// Returns [`StoreError`] if the query fails or a row cannot be decoded.
pub fn load(conn: &Connection) -> Result<Vec<FinalGeocode>, StoreError> {
    let exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = 'final_geocodes'",
        [],
        |row| row.get(0),
    )?;
    if exists == 0 {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT provider_id, street, city, state, postal_code, latitude, longitude,
                source, service_id, match_quality, geocoded_at
         FROM final_geocodes
         ORDER BY provider_id, street, city, state, postal_code",
    )?;
    stmt.raw_execute()?;

    let mut out = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        let key = AddressKey {
            provider_id: row.get(0)?,
            street: row.get(1)?,
            city: row.get(2)?,
            state: row.get(3)?,
            postal_code: row.get(4)?,
        };
        let source: Option<String> = row.get(7)?;
        let geocoded_at: Option<String> = row.get(10)?;

        out.push(FinalGeocode {
            key,
            coordinates: Coordinates::from_parts(row.get(5)?, row.get(6)?),
            source: source.as_deref().map(parse_source).transpose()?,
            service_id: row.get(8)?,
            match_quality: row.get(9)?,
            geocoded_at: geocoded_at.as_deref().map(parse_timestamp).transpose()?,
        });
    }

    Ok(out)
}
