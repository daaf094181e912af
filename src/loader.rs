//! Load stage: normalize → dedup in batch → dedup against the store → bulk insert.

use std::collections::HashSet;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::config::Settings;
use crate::db::{self, InsertMode};
use crate::dedup;
use crate::error::PersistenceError;
use crate::normalize;
use crate::record::RawRecord;

/// Counts for one load, from records read to rows written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub read: usize,
    pub rejected: usize,
    pub batch_duplicates: usize,
    pub already_persisted: usize,
    /// Link already used by an earlier record of the same batch.
    pub link_duplicates: usize,
    pub inserted: usize,
}

/// Where the orchestrator hands a non-empty artifact.
pub trait Loader {
    fn load(&self, records: Vec<RawRecord>) -> Result<LoadReport, PersistenceError>;
}

pub struct SqliteLoader {
    db_url: String,
    table: String,
    mode: InsertMode,
}

impl SqliteLoader {
    pub fn new(db_url: impl Into<String>, table: impl Into<String>, mode: InsertMode) -> Self {
        Self {
            db_url: db_url.into(),
            table: table.into(),
            mode,
        }
    }

    pub fn from_settings(settings: &Settings, mode: InsertMode) -> Self {
        Self::new(&settings.db_url, &settings.db_table, mode)
    }
}

impl Loader for SqliteLoader {
    fn load(&self, records: Vec<RawRecord>) -> Result<LoadReport, PersistenceError> {
        let mut report = LoadReport {
            read: records.len(),
            ..Default::default()
        };

        let normalized = normalize::normalize_batch(&records);
        report.rejected = normalized.rejected.len();

        let valid = normalized.records.len();
        let batch = dedup::dedup_batch(normalized.records);
        report.batch_duplicates = valid - batch.len();

        if batch.is_empty() {
            info!(read = report.read, rejected = report.rejected, "No valid records to insert");
            return Ok(report);
        }

        // Held only for this load.
        let conn = db::connect(&self.db_url)?;
        db::init_schema(&conn, &self.table)?;

        // Replacing the table makes what is stored now irrelevant, but links
        // must still be unique within the batch.
        let filtered = match self.mode {
            InsertMode::Append => dedup::drop_persisted(&conn, &self.table, batch)?,
            InsertMode::Replace => dedup::filter_known_links(batch, &HashSet::new()),
        };
        report.already_persisted = filtered.persisted;
        report.link_duplicates = filtered.repeated;
        let fresh = filtered.records;

        if fresh.is_empty() {
            info!("No new records to insert (all links already seen)");
            return Ok(report);
        }

        let rows = db::prepare_rows(fresh);
        let pb = ProgressBar::new(rows.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} rows")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        let inserted = db::insert_chunked(&conn, &self.table, &rows, self.mode, |n| {
            pb.inc(n as u64)
        });
        pb.finish_and_clear();
        report.inserted = inserted?;

        info!(
            inserted = report.inserted,
            table = %self.table,
            mode = ?self.mode,
            "Loaded unique rows"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact;
    use std::path::Path;

    fn fixture() -> Vec<RawRecord> {
        artifact::read_records(Path::new("tests/fixtures/properties_output.json")).unwrap()
    }

    fn loader(dir: &tempfile::TempDir, mode: InsertMode) -> SqliteLoader {
        let url = format!("sqlite://{}", dir.path().join("store.sqlite").display());
        SqliteLoader::new(url, "properties", mode)
    }

    fn row_count(dir: &tempfile::TempDir) -> usize {
        let conn = db::connect(&dir.path().join("store.sqlite").display().to_string()).unwrap();
        db::table_stats(&conn, "properties").unwrap().rows
    }

    #[test]
    fn loads_fixture_with_expected_counts() {
        let dir = tempfile::tempdir().unwrap();
        let report = loader(&dir, InsertMode::Append).load(fixture()).unwrap();
        assert_eq!(
            report,
            LoadReport {
                read: 6,
                rejected: 2,
                batch_duplicates: 1,
                already_persisted: 0,
                link_duplicates: 0,
                inserted: 3,
            }
        );
        assert_eq!(row_count(&dir), 3);
    }

    #[test]
    fn second_load_of_same_batch_inserts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let l = loader(&dir, InsertMode::Append);
        assert_eq!(l.load(fixture()).unwrap().inserted, 3);

        let again = l.load(fixture()).unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(again.already_persisted, 3);
        assert_eq!(row_count(&dir), 3);
    }

    #[test]
    fn empty_batch_is_a_noop_without_touching_store() {
        let dir = tempfile::tempdir().unwrap();
        let report = loader(&dir, InsertMode::Append).load(Vec::new()).unwrap();
        assert_eq!(report, LoadReport::default());
        assert!(!dir.path().join("store.sqlite").exists());
    }

    #[test]
    fn replace_mode_reseeds_table() {
        let dir = tempfile::tempdir().unwrap();
        loader(&dir, InsertMode::Append).load(fixture()).unwrap();
        let report = loader(&dir, InsertMode::Replace).load(fixture()).unwrap();
        assert_eq!(report.inserted, 3);
        assert_eq!(report.already_persisted, 0);
        assert_eq!(row_count(&dir), 3);
    }

    fn shared_link_batch() -> Vec<RawRecord> {
        let value = serde_json::json!([
            {"titulo": "Lote A", "precio": "USD 1", "enlace": "https://example.com/l1"},
            {"titulo": "Lote B", "precio": "USD 2", "enlace": "https://example.com/l1"},
        ]);
        serde_json::from_value::<Vec<serde_json::Map<String, serde_json::Value>>>(value)
            .unwrap()
            .into_iter()
            .map(RawRecord)
            .collect()
    }

    #[test]
    fn replace_mode_keeps_links_unique_within_batch() {
        let dir = tempfile::tempdir().unwrap();
        loader(&dir, InsertMode::Append).load(fixture()).unwrap();

        let report = loader(&dir, InsertMode::Replace)
            .load(shared_link_batch())
            .unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.link_duplicates, 1);
        assert_eq!(report.already_persisted, 0);
        assert_eq!(row_count(&dir), 1);
    }

    #[test]
    fn append_mode_counts_link_repeats_apart_from_stored() {
        let dir = tempfile::tempdir().unwrap();
        let report = loader(&dir, InsertMode::Append)
            .load(shared_link_batch())
            .unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.link_duplicates, 1);
        assert_eq!(report.already_persisted, 0);
    }

    #[test]
    fn unreachable_store_fails_the_load() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "").unwrap();
        let url = format!("sqlite://{}", blocker.join("store.sqlite").display());
        let l = SqliteLoader::new(url, "properties", InsertMode::Append);
        assert!(l.load(fixture()).is_err());
    }
}
