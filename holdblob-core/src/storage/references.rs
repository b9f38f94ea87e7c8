use crate::error::{HoldError, Result};
use crate::storage::metadata_store::{MetadataStore, format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};

/// One holder's claim on a content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub holder: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Reference {
    pub fn new(holder: &str, content_hash: &str) -> Self {
        Self {
            holder: holder.to_string(),
            content_hash: content_hash.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Access to the `holder_references` table.
#[derive(Debug, Clone)]
pub struct ReferenceStore {
    db: MetadataStore,
}

impl ReferenceStore {
    pub fn new(db: MetadataStore) -> Self {
        Self { db }
    }

    pub fn get(&self, holder: &str) -> Result<Option<Reference>> {
        let conn = self.db.get_conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT content_hash, created_at FROM holder_references WHERE holder = ?1",
                [holder],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((content_hash, created_at)) => Ok(Some(Reference {
                holder: holder.to_string(),
                content_hash,
                created_at: parse_timestamp(1, &created_at)?,
            })),
            None => Ok(None),
        }
    }

    /// Fails with `AlreadyExists` when the holder already has a reference.
    pub fn insert(&self, reference: &Reference) -> Result<()> {
        let conn = self.db.get_conn()?;
        let inserted = conn.execute(
            "INSERT INTO holder_references (holder, content_hash, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(holder) DO NOTHING",
            params![
                reference.holder,
                reference.content_hash,
                format_timestamp(reference.created_at),
            ],
        )?;

        if inserted == 0 {
            return Err(HoldError::AlreadyExists(reference.holder.clone()));
        }
        Ok(())
    }

    /// Delete the holder's reference, returning the hash it pointed at.
    pub fn delete(&self, holder: &str) -> Result<Option<String>> {
        let conn = self.db.get_conn()?;
        let content_hash = conn
            .query_row(
                "DELETE FROM holder_references WHERE holder = ?1 RETURNING content_hash",
                [holder],
                |row| row.get(0),
            )
            .optional()?;
        Ok(content_hash)
    }

    pub fn holders_for(&self, content_hash: &str) -> Result<Vec<String>> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT holder FROM holder_references WHERE content_hash = ?1 ORDER BY holder",
        )?;
        let holders = stmt
            .query_map([content_hash], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(holders)
    }

    pub fn has_references(&self, content_hash: &str) -> Result<bool> {
        let conn = self.db.get_conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM holder_references WHERE content_hash = ?1)",
            [content_hash],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}
