//! CSV export and import of the translation store.
//!
//! The layout is `group,key,<locale>...` with one row per record. Exports are
//! prefixed with a UTF-8 BOM so spreadsheet tools detect the encoding.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use futures::{Stream, TryStreamExt};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::{is_valid_group_name, Database, Translation, GENERAL_GROUP};

/// Records fetched per export chunk
pub const EXPORT_CHUNK_SIZE: i64 = 500;

const BOM: &str = "\u{feff}";

#[derive(Debug, Error)]
pub enum CsvImportError {
    #[error("unable to read CSV {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid CSV format: header needs group, key and at least one locale column")]
    InvalidHeader,
    #[error("invalid group {group:?} on line {line}: group names cannot contain path separators or `..`")]
    InvalidGroup { group: String, line: u64 },
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Download name for an export taken at `at`.
pub fn export_file_name(at: NaiveDateTime) -> String {
    format!("translations-{}.csv", at.format("%Y_%m_%d-%H%M%S"))
}

struct ExportState {
    db: Database,
    locales: Vec<String>,
    offset: i64,
    header_sent: bool,
    done: bool,
}

/// Stream the whole store as CSV byte chunks.
///
/// The first chunk holds the BOM and header; each following chunk encodes at
/// most [`EXPORT_CHUNK_SIZE`] records.
pub fn export_stream(db: Database, locales: Vec<String>) -> impl Stream<Item = Result<Vec<u8>>> + Send {
    let state = ExportState {
        db,
        locales,
        offset: 0,
        header_sent: false,
        done: false,
    };

    futures::stream::try_unfold(state, |mut state| async move {
        if !state.header_sent {
            state.header_sent = true;
            let mut header = vec!["group".to_string(), "key".to_string()];
            header.extend(state.locales.iter().cloned());

            let mut chunk = BOM.as_bytes().to_vec();
            chunk.extend(encode_rows(std::iter::once(header))?);
            return Ok(Some((chunk, state)));
        }

        if state.done {
            return Ok(None);
        }

        let records = state.db.chunk(state.offset, EXPORT_CHUNK_SIZE).await?;
        if records.is_empty() {
            return Ok(None);
        }
        state.offset += records.len() as i64;
        state.done = (records.len() as i64) < EXPORT_CHUNK_SIZE;
        debug!(offset = state.offset, "Exported translation chunk");

        let rows = records.iter().map(|record| export_row(record, &state.locales));
        Ok(Some((encode_rows(rows)?, state)))
    })
}

fn export_row(record: &Translation, locales: &[String]) -> Vec<String> {
    let mut row = vec![record.group.clone().unwrap_or_default(), record.key.clone()];
    row.extend(
        locales
            .iter()
            .map(|locale| record.values.get(locale).cloned().unwrap_or_default()),
    );
    row
}

fn encode_rows(rows: impl IntoIterator<Item = Vec<String>>) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.write_record(&row).context("Failed to encode CSV row")?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow!("Failed to flush CSV buffer: {}", e.error()))
}

/// Write the full export to `writer`.
pub async fn export_to_writer<W: Write>(db: &Database, locales: &[String], mut writer: W) -> Result<()> {
    let stream = export_stream(db.clone(), locales.to_vec());
    futures::pin_mut!(stream);

    while let Some(chunk) = stream.try_next().await? {
        writer.write_all(&chunk).context("Failed to write CSV export")?;
    }
    writer.flush().context("Failed to write CSV export")
}

/// Import CSV rows into the store in one transaction.
///
/// Non-empty cells are merged; empty cells never clear a stored value. With
/// `overwrite` off, only locales missing from a record are filled in. Returns
/// the number of rows processed.
pub async fn import_csv<R: Read + Send>(db: &Database, reader: R, overwrite: bool) -> Result<usize, CsvImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let mut records = reader.records();

    let header = match records.next() {
        Some(record) => record?,
        None => return Err(CsvImportError::InvalidHeader),
    };
    if header.len() < 3 {
        return Err(CsvImportError::InvalidHeader);
    }
    // A BOM can only prefix the group column, whose name is not used
    let locales: Vec<String> = header.iter().skip(2).map(str::to_string).collect();

    let mut tx = db.begin().await?;
    let mut rows = 0;

    for record in records {
        let record = record?;
        let key = record.get(1).unwrap_or_default();
        if key.is_empty() {
            warn!(line = ?record.position().map(|p| p.line()), "Skipping CSV row without a key");
            continue;
        }
        let group = match record.get(0).unwrap_or_default() {
            "" => GENERAL_GROUP,
            group => group,
        };
        if !is_valid_group_name(group) {
            return Err(CsvImportError::InvalidGroup {
                group: group.to_string(),
                line: record.position().map(|p| p.line()).unwrap_or_default(),
            });
        }

        let values: BTreeMap<String, String> = locales
            .iter()
            .enumerate()
            .filter_map(|(i, locale)| {
                let cell = record.get(i + 2).unwrap_or_default();
                (!cell.is_empty()).then(|| (locale.clone(), cell.to_string()))
            })
            .collect();

        tx.merge_values(key, Some(group), &values, overwrite).await?;
        rows += 1;
    }

    tx.commit().await?;
    info!("Processed {} CSV rows", rows);
    Ok(rows)
}

/// Import an uploaded CSV file, deleting it afterwards whatever the outcome.
pub async fn import_csv_file(db: &Database, path: &Path, overwrite: bool) -> Result<usize, CsvImportError> {
    let file = std::fs::File::open(path).map_err(|source| CsvImportError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let result = import_csv(db, std::io::BufReader::new(file), overwrite).await;

    if let Err(e) = std::fs::remove_file(path) {
        warn!(file = %path.display(), "Failed to delete uploaded CSV: {}", e);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let url = format!("sqlite://{}", temp_dir.path().join("test.db").display());
        let db = Database::new(&url).await.expect("Failed to create database");
        (db, temp_dir)
    }

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn locales() -> Vec<String> {
        vec!["en".to_string(), "uk".to_string(), "pl".to_string()]
    }

    async fn export_string(db: &Database) -> String {
        let mut out = Vec::new();
        export_to_writer(db, &locales(), &mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    // ==================== Export Tests ====================

    #[tokio::test]
    async fn test_export_layout() {
        let (db, _temp_dir) = create_test_db().await;
        db.merge_values("failed", Some("auth"), &values(&[("en", "Failed, \"really\"")]), false)
            .await
            .unwrap();
        db.merge_values("Hello", Some(GENERAL_GROUP), &values(&[("en", "Hello"), ("pl", "Cześć")]), false)
            .await
            .unwrap();

        let csv = export_string(&db).await;

        assert_eq!(
            csv,
            "\u{feff}group,key,en,uk,pl\n\
             auth,failed,\"Failed, \"\"really\"\"\",,\n\
             general,Hello,Hello,,Cześć\n"
        );
    }

    #[tokio::test]
    async fn test_export_streams_in_chunks() {
        let (db, _temp_dir) = create_test_db().await;
        for i in 0..(EXPORT_CHUNK_SIZE + 1) {
            db.merge_values(&format!("key{i:04}"), Some(GENERAL_GROUP), &values(&[("en", "x")]), false)
                .await
                .unwrap();
        }

        let chunks: Vec<Vec<u8>> = export_stream(db, locales()).try_collect().await.unwrap();

        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].starts_with(BOM.as_bytes()));
        let first_rows = String::from_utf8(chunks[1].clone()).unwrap();
        assert_eq!(first_rows.lines().count(), EXPORT_CHUNK_SIZE as usize);
        assert!(String::from_utf8(chunks[2].clone()).unwrap().starts_with("general,key0500,"));
    }

    #[test]
    fn test_export_file_name() {
        let at = chrono::NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(7, 5, 1)
            .unwrap();

        assert_eq!(export_file_name(at), "translations-2024_03_09-070501.csv");
    }

    // ==================== Import Tests ====================

    #[tokio::test]
    async fn test_import_empty_group_defaults_to_general() {
        let (db, _temp_dir) = create_test_db().await;
        let csv = "group,key,en,uk,pl\n,checkout.title,Checkout,,\n";

        let rows = import_csv(&db, csv.as_bytes(), true).await.unwrap();

        assert_eq!(rows, 1);
        let record = db.find("checkout.title", Some(GENERAL_GROUP)).await.unwrap().unwrap();
        assert_eq!(record.values, values(&[("en", "Checkout")]));
    }

    #[tokio::test]
    async fn test_import_strips_bom_and_handles_short_rows() {
        let (db, _temp_dir) = create_test_db().await;
        let csv = "\u{feff}group,key,en,uk\nauth,failed,Failed\nauth,,ignored,\n";

        let rows = import_csv(&db, csv.as_bytes(), true).await.unwrap();

        assert_eq!(rows, 1);
        let record = db.find("failed", Some("auth")).await.unwrap().unwrap();
        assert_eq!(record.values, values(&[("en", "Failed")]));
    }

    #[tokio::test]
    async fn test_import_overwrite_and_empty_cells() {
        let (db, _temp_dir) = create_test_db().await;
        db.merge_values("Hello", Some(GENERAL_GROUP), &values(&[("en", "Hello"), ("uk", "Привіт")]), false)
            .await
            .unwrap();

        import_csv(&db, "group,key,en,uk,pl\ngeneral,Hello,Hi,,Cześć\n".as_bytes(), false)
            .await
            .unwrap();
        let record = db.find("Hello", Some(GENERAL_GROUP)).await.unwrap().unwrap();
        assert_eq!(record.values, values(&[("en", "Hello"), ("uk", "Привіт"), ("pl", "Cześć")]));

        import_csv(&db, "group,key,en,uk,pl\ngeneral,Hello,Hi,,\n".as_bytes(), true)
            .await
            .unwrap();
        let record = db.find("Hello", Some(GENERAL_GROUP)).await.unwrap().unwrap();
        assert_eq!(record.values, values(&[("en", "Hi"), ("uk", "Привіт"), ("pl", "Cześć")]));
    }

    #[tokio::test]
    async fn test_import_rejects_short_header() {
        let (db, _temp_dir) = create_test_db().await;

        let err = import_csv(&db, "group,key\n,a\n".as_bytes(), true).await.unwrap_err();
        assert!(matches!(err, CsvImportError::InvalidHeader));

        let err = import_csv(&db, "".as_bytes(), true).await.unwrap_err();
        assert!(matches!(err, CsvImportError::InvalidHeader));

        assert_eq!(db.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_import_rejects_path_like_group() {
        let (db, _temp_dir) = create_test_db().await;
        let csv = "group,key,en\nauth,failed,Failed\n../../escaped,k,v\n";

        let err = import_csv(&db, csv.as_bytes(), true).await.unwrap_err();

        match err {
            CsvImportError::InvalidGroup { group, line } => {
                assert_eq!(group, "../../escaped");
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(db.count().await.unwrap(), 0, "the whole file is rolled back");
    }

    #[tokio::test]
    async fn test_round_trip_through_csv() {
        let (db, temp_dir) = create_test_db().await;
        db.merge_values("failed", Some("auth"), &values(&[("en", "Failed"), ("uk", "Помилка")]), false)
            .await
            .unwrap();
        db.merge_values("Line\nbreak", Some(GENERAL_GROUP), &values(&[("pl", "a,b")]), false)
            .await
            .unwrap();
        let csv = export_string(&db).await;

        let url = format!("sqlite://{}", temp_dir.path().join("fresh.db").display());
        let fresh = Database::new(&url).await.unwrap();
        let rows = import_csv(&fresh, csv.as_bytes(), true).await.unwrap();

        assert_eq!(rows, 2);
        let original: Vec<_> = db.chunk(0, 10).await.unwrap().into_iter().map(|t| (t.key, t.group, t.values)).collect();
        let restored: Vec<_> = fresh.chunk(0, 10).await.unwrap().into_iter().map(|t| (t.key, t.group, t.values)).collect();
        assert_eq!(original, restored);
    }

    #[tokio::test]
    async fn test_import_file_deletes_upload() {
        let (db, temp_dir) = create_test_db().await;
        let path = temp_dir.path().join("upload.csv");
        std::fs::write(&path, "group,key\n").unwrap();

        let err = import_csv_file(&db, &path, true).await.unwrap_err();

        assert!(matches!(err, CsvImportError::InvalidHeader));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_import_missing_file_is_unreadable() {
        let (db, temp_dir) = create_test_db().await;

        let err = import_csv_file(&db, &temp_dir.path().join("missing.csv"), true)
            .await
            .unwrap_err();

        assert!(matches!(err, CsvImportError::Unreadable { .. }));
    }
}
