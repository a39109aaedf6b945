//! Import of geocoding results produced outside the pipeline.
//!
//! The file is stored as a pending fallback Batch Artifact and then goes
//! through ordinary consolidation, so re-running an import never touches
//! the store twice for the same artifact.

use std::io::Read;
use std::path::Path;

use duckdb::Connection;
use hh_atlas_geocoder_models::{AddressKey, Coordinates, GeocodeRecord, RawAddress, SourceRole};
use hh_atlas_pipeline_models::UniverseConfig;
use hh_atlas_store::artifacts::{self, BatchArtifact};

use crate::PipelineError;

/// Latitude column of an external results file.
pub const LATITUDE_COLUMN: &str = "lat";

/// Longitude column of an external results file.
pub const LONGITUDE_COLUMN: &str = "lon";

/// Optional match descriptor column.
pub const QUALITY_COLUMN: &str = "match_quality";

/// Match quality used when the file has none.
pub const IMPORTED: &str = "IMPORTED";

/// Parses external results into fallback records for `service_id`.
///
/// Address columns follow `columns`; the provider id column is optional
/// and rows without one match by location at merge time. Unparseable or
/// partial coordinates become an unresolved record.
///
/// # Errors
///
/// Returns [`PipelineError::MissingColumn`] if an address or coordinate
/// column is absent, or a CSV error if a row cannot be read.
pub fn read_records<R: Read>(
    reader: R,
    service_id: &str,
    columns: &UniverseConfig,
    table: &str,
) -> Result<Vec<GeocodeRecord>, PipelineError> {
    let mut csv = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = csv.byte_headers()?.clone();

    let find = |name: &str| {
        headers.iter().position(|h| {
            String::from_utf8_lossy(h)
                .trim()
                .eq_ignore_ascii_case(name.trim())
        })
    };
    let require = |name: &str| {
        find(name).ok_or_else(|| PipelineError::MissingColumn {
            table: table.to_string(),
            column: name.to_string(),
        })
    };

    let street = require(&columns.street_column)?;
    let city = require(&columns.city_column)?;
    let state = require(&columns.state_column)?;
    let postal_code = require(&columns.postal_code_column)?;
    let latitude = require(LATITUDE_COLUMN)?;
    let longitude = require(LONGITUDE_COLUMN)?;
    let provider_id = find(&columns.provider_id_column);
    let quality = find(QUALITY_COLUMN);

    let mut records = Vec::new();
    for row in csv.byte_records() {
        let row = row?;
        let field = |idx: usize| {
            row.get(idx)
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_default()
        };
        let number = |idx: usize| field(idx).trim().parse::<f64>().ok();

        let key = AddressKey::normalize(&RawAddress {
            provider_id: provider_id.map(&field).unwrap_or_default(),
            street: field(street),
            city: field(city),
            state: field(state),
            postal_code: field(postal_code),
        });

        let coordinates = Coordinates::from_parts(number(latitude), number(longitude));
        let match_quality = quality
            .map(&field)
            .filter(|q| !q.trim().is_empty())
            .unwrap_or_else(|| IMPORTED.to_string());

        records.push(GeocodeRecord::new(
            key,
            service_id,
            SourceRole::Fallback,
            coordinates,
            match_quality,
        ));
    }

    Ok(records)
}

/// Imports an external results file as a pending fallback artifact.
///
/// # Errors
///
/// Returns [`PipelineError`] if the file cannot be read or parsed, or the
/// artifact cannot be stored.
pub fn import_file(
    conn: &mut Connection,
    path: &Path,
    service_id: &str,
    columns: &UniverseConfig,
) -> Result<BatchArtifact, PipelineError> {
    if service_id.trim().is_empty() {
        return Err(PipelineError::Config {
            message: "import needs a non-empty provider id".to_string(),
        });
    }

    let file = std::fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let records = read_records(file, service_id, columns, &path.display().to_string())?;
    let resolved = records.iter().filter(|r| r.is_resolved()).count();

    let artifact = artifacts::import(conn, service_id, SourceRole::Fallback, &records)?;
    log::info!(
        "Imported {} record(s) ({resolved} with coordinates) from {} as {service_id} batch {}",
        records.len(),
        path.display(),
        artifact.batch_number
    );

    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hh_atlas_store::artifacts::ArtifactStatus;

    const GOOGLE_RESULTS: &str = "\
ADDRESS LINE 1,CITY,STATE,ZIP CODE,lat,lon
12 Pier Rd,Portland,ME,4101,43.65,-70.25
13 Pier Rd,Portland,ME,04101,,
14 Pier Rd,Portland,ME,04101,43.66,
";

    #[test]
    fn reads_records_without_provider_ids() {
        let records = read_records(
            GOOGLE_RESULTS.as_bytes(),
            "google_csv",
            &UniverseConfig::default(),
            "google",
        )
        .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].key.provider_id, "");
        assert_eq!(records[0].key.postal_code, "04101");
        assert_eq!(records[0].coordinates, Some(Coordinates::new(43.65, -70.25)));
        assert_eq!(records[0].match_quality, IMPORTED);
        assert_eq!(records[0].source, SourceRole::Fallback);
        assert!(records[1].coordinates.is_none());
        assert!(records[2].coordinates.is_none());
    }

    #[test]
    fn keeps_provider_id_and_quality_when_present() {
        let table = "CCN,ADDRESS LINE 1,CITY,STATE,ZIP CODE,lat,lon,match_quality\n\
                     207001,1 Dock St,Bangor,ME,04401,44.8,-68.8,ROOFTOP\n";
        let records =
            read_records(table.as_bytes(), "google_csv", &UniverseConfig::default(), "t").unwrap();
        assert_eq!(records[0].key.provider_id, "207001");
        assert_eq!(records[0].match_quality, "ROOFTOP");
    }

    #[test]
    fn non_utf8_and_out_of_range_rows_stay_unresolved_records() {
        let mut table = b"ADDRESS LINE 1,CITY,STATE,ZIP CODE,lat,lon\n".to_vec();
        table.extend_from_slice(b"12 Pe\xf1asco Rd,Taos,NM,87571,36.4,-105.6\n");
        table.extend_from_slice(b"9 Mesa Dr,Taos,NM,87571,999,-105.6\n");

        let records =
            read_records(table.as_slice(), "google_csv", &UniverseConfig::default(), "t").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key.city, "TAOS");
        assert_eq!(records[0].coordinates, Some(Coordinates::new(36.4, -105.6)));
        assert!(records[1].coordinates.is_none());
        assert!(!records[1].is_resolved());
    }

    #[test]
    fn missing_coordinate_column_is_fatal() {
        let table = "ADDRESS LINE 1,CITY,STATE,ZIP CODE,lat\n1 Dock St,Bangor,ME,04401,44.8\n";
        assert!(matches!(
            read_records(table.as_bytes(), "x", &UniverseConfig::default(), "t"),
            Err(PipelineError::MissingColumn { ref column, .. }) if column == "lon"
        ));
    }

    #[test]
    fn import_file_queues_pending_artifact() {
        let dir = std::env::temp_dir().join("hh_atlas_import_test");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("addresses_geocoded_google.csv");
        std::fs::write(&path, GOOGLE_RESULTS).unwrap();

        let mut conn = hh_atlas_store::open_in_memory().unwrap();
        let artifact =
            import_file(&mut conn, &path, "google_csv", &UniverseConfig::default()).unwrap();
        assert_eq!(artifact.status, ArtifactStatus::Pending);
        assert_eq!(artifact.record_count, 3);

        assert!(matches!(
            import_file(&mut conn, &path, " ", &UniverseConfig::default()),
            Err(PipelineError::Config { .. })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
