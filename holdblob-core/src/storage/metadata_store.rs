use crate::error::Result;
use crate::storage::content_records::ContentRecordStore;
use crate::storage::references::ReferenceStore;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use rusqlite::types::Type;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite database holding the content record and holder reference tables.
///
/// A fresh connection is opened per operation; WAL mode lets readers proceed
/// while a writer holds the lock.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    db_path: Arc<PathBuf>,
}

impl MetadataStore {
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self {
            db_path: Arc::new(db_path),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn content_records(&self) -> ContentRecordStore {
        ContentRecordStore::new(self.clone())
    }

    pub fn references(&self) -> ReferenceStore {
        ReferenceStore::new(self.clone())
    }

    pub(crate) fn get_conn(&self) -> Result<Connection> {
        let conn = Connection::open(self.db_path.as_ref())?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.get_conn()?;

        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;

        // One row per verified payload
        conn.execute(
            "CREATE TABLE IF NOT EXISTS content_records (
                content_hash TEXT PRIMARY KEY,
                location TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                removal_candidate INTEGER NOT NULL DEFAULT 0,
                marked_at TEXT
            )",
            [],
        )?;

        // One row per holder; many holders may share a content hash
        conn.execute(
            "CREATE TABLE IF NOT EXISTS holder_references (
                holder TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_holder_references_content_hash
             ON holder_references(content_hash)",
            [],
        )?;

        Ok(())
    }
}

/// Fixed-width UTC timestamps, so stored values order lexicographically.
pub(crate) fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(error)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_schema_and_parent_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("meta.db");

        let store = MetadataStore::open(&db_path).unwrap();
        assert!(db_path.exists());

        // Reopening an initialised database is a no-op
        MetadataStore::open(&db_path).unwrap();

        let conn = store.get_conn().unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name IN ('content_records', 'holder_references')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn test_timestamps_sort_lexicographically() {
        let earlier = DateTime::parse_from_rfc3339("2024-01-01T00:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = DateTime::parse_from_rfc3339("2024-01-01T00:00:01Z")
            .unwrap()
            .with_timezone(&Utc);

        let (a, b) = (format_timestamp(earlier), format_timestamp(later));
        assert!(a < b);
        assert_eq!(parse_timestamp(0, &a).unwrap(), earlier);
    }
}
