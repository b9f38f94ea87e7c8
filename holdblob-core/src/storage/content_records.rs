use crate::error::Result;
use crate::storage::metadata_store::{MetadataStore, format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const RECORD_COLUMNS: &str =
    "content_hash, location, size_bytes, created_at, removal_candidate, marked_at";

/// A fully written, hash-verified payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub content_hash: String,
    pub location: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub removal_candidate: bool,
    pub marked_at: Option<DateTime<Utc>>,
}

impl ContentRecord {
    pub fn new(content_hash: &str, location: &str, size_bytes: u64) -> Self {
        Self {
            content_hash: content_hash.to_string(),
            location: location.to_string(),
            size_bytes,
            created_at: Utc::now(),
            removal_candidate: false,
            marked_at: None,
        }
    }

    /// A candidate whose grace period ended at or before `cutoff`.
    pub fn is_reclaimable(&self, cutoff: DateTime<Utc>) -> bool {
        self.removal_candidate && self.marked_at.is_none_or(|marked_at| marked_at <= cutoff)
    }
}

/// Result of committing a freshly uploaded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// No record existed; ours is now the record of the hash.
    Inserted,
    /// A reclaimable record was taken over; its object is now unreferenced.
    Replaced { previous_location: String },
    /// Another upload won. Its record is kept and no longer a candidate.
    Existing(ContentRecord),
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ContentRecord> {
    let created_at: String = row.get(3)?;
    let marked_at: Option<String> = row.get(5)?;
    Ok(ContentRecord {
        content_hash: row.get(0)?,
        location: row.get(1)?,
        size_bytes: row.get::<_, i64>(2)? as u64,
        created_at: parse_timestamp(3, &created_at)?,
        removal_candidate: row.get(4)?,
        marked_at: marked_at
            .map(|value| parse_timestamp(5, &value))
            .transpose()?,
    })
}

fn query_record(conn: &Connection, content_hash: &str) -> Result<Option<ContentRecord>> {
    let record = conn
        .query_row(
            &format!(
                "SELECT {} FROM content_records WHERE content_hash = ?1",
                RECORD_COLUMNS
            ),
            [content_hash],
            record_from_row,
        )
        .optional()?;
    Ok(record)
}

/// Access to the `content_records` table.
#[derive(Debug, Clone)]
pub struct ContentRecordStore {
    db: MetadataStore,
}

impl ContentRecordStore {
    pub fn new(db: MetadataStore) -> Self {
        Self { db }
    }

    pub fn get(&self, content_hash: &str) -> Result<Option<ContentRecord>> {
        let conn = self.db.get_conn()?;
        query_record(&conn, content_hash)
    }

    /// Dedup-hit path: clear the candidate flag of a live record and return it.
    ///
    /// Returns `None` when the record is missing or is a candidate whose grace
    /// period ended at or before `cutoff`; such a record may already be under
    /// reclamation and must not be handed out.
    pub fn revive(&self, content_hash: &str, cutoff: DateTime<Utc>) -> Result<Option<ContentRecord>> {
        let conn = self.db.get_conn()?;
        let record = conn
            .query_row(
                &format!(
                    "UPDATE content_records
                     SET removal_candidate = 0, marked_at = NULL
                     WHERE content_hash = ?1
                       AND (removal_candidate = 0 OR marked_at > ?2)
                     RETURNING {}",
                    RECORD_COLUMNS
                ),
                params![content_hash, format_timestamp(cutoff)],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Upload path: make `record` the record of its hash unless a live record
    /// already exists.
    pub fn commit(&self, record: &ContentRecord, cutoff: DateTime<Utc>) -> Result<CommitOutcome> {
        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let outcome = match query_record(&tx, &record.content_hash)? {
            None => {
                tx.execute(
                    "INSERT INTO content_records (
                        content_hash, location, size_bytes, created_at, removal_candidate, marked_at
                    ) VALUES (?1, ?2, ?3, ?4, 0, NULL)",
                    params![
                        record.content_hash,
                        record.location,
                        record.size_bytes as i64,
                        format_timestamp(record.created_at),
                    ],
                )?;
                CommitOutcome::Inserted
            }
            Some(existing) if existing.is_reclaimable(cutoff) => {
                tx.execute(
                    "UPDATE content_records
                     SET location = ?2, size_bytes = ?3, created_at = ?4,
                         removal_candidate = 0, marked_at = NULL
                     WHERE content_hash = ?1",
                    params![
                        record.content_hash,
                        record.location,
                        record.size_bytes as i64,
                        format_timestamp(record.created_at),
                    ],
                )?;
                CommitOutcome::Replaced {
                    previous_location: existing.location,
                }
            }
            Some(mut existing) => {
                if existing.removal_candidate {
                    tx.execute(
                        "UPDATE content_records
                         SET removal_candidate = 0, marked_at = NULL
                         WHERE content_hash = ?1",
                        [&record.content_hash],
                    )?;
                    existing.removal_candidate = false;
                    existing.marked_at = None;
                }
                CommitOutcome::Existing(existing)
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// First strike. Only flips a non-candidate with no references.
    pub fn mark_removal_candidate(&self, content_hash: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.db.get_conn()?;
        let changed = conn.execute(
            "UPDATE content_records
             SET removal_candidate = 1, marked_at = ?2
             WHERE content_hash = ?1
               AND removal_candidate = 0
               AND NOT EXISTS (
                   SELECT 1 FROM holder_references WHERE content_hash = ?1
               )",
            params![content_hash, format_timestamp(now)],
        )?;
        Ok(changed > 0)
    }

    pub fn clear_removal_candidate(&self, content_hash: &str) -> Result<bool> {
        let conn = self.db.get_conn()?;
        let changed = conn.execute(
            "UPDATE content_records
             SET removal_candidate = 0, marked_at = NULL
             WHERE content_hash = ?1 AND removal_candidate = 1",
            [content_hash],
        )?;
        Ok(changed > 0)
    }

    /// Second strike. Deletes the record only while it still points at
    /// `location`, is a candidate past `cutoff` and has no references.
    pub fn delete_if_reclaimable(
        &self,
        content_hash: &str,
        location: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.db.get_conn()?;
        let deleted = conn.execute(
            "DELETE FROM content_records
             WHERE content_hash = ?1
               AND location = ?2
               AND removal_candidate = 1
               AND (marked_at IS NULL OR marked_at <= ?3)
               AND NOT EXISTS (
                   SELECT 1 FROM holder_references WHERE content_hash = ?1
               )",
            params![content_hash, location, format_timestamp(cutoff)],
        )?;
        Ok(deleted > 0)
    }

    /// Subset of `content_hashes` with a live record: not a candidate, or
    /// marked after `cutoff`.
    pub fn existing_hashes(
        &self,
        content_hashes: &[String],
        cutoff: DateTime<Utc>,
    ) -> Result<HashSet<String>> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT 1 FROM content_records
             WHERE content_hash = ?1
               AND (removal_candidate = 0 OR marked_at > ?2)",
        )?;

        let cutoff = format_timestamp(cutoff);
        let mut existing = HashSet::new();
        for content_hash in content_hashes {
            if stmt.exists(params![content_hash, cutoff])? {
                existing.insert(content_hash.clone());
            }
        }
        Ok(existing)
    }

    pub fn list_content_hashes(&self) -> Result<Vec<String>> {
        let conn = self.db.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT content_hash FROM content_records ORDER BY content_hash")?;
        let hashes = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(hashes)
    }

    pub fn list_locations(&self) -> Result<Vec<String>> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare("SELECT location FROM content_records ORDER BY location")?;
        let locations = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(locations)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.db.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM content_records", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::references::Reference;
    use chrono::Duration;

    fn new_store() -> (tempfile::TempDir, MetadataStore) {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = MetadataStore::open(temp_dir.path().join("meta.db")).unwrap();
        (temp_dir, db)
    }

    #[test]
    fn test_commit_inserts_then_keeps_existing() {
        let (_temp_dir, db) = new_store();
        let records = db.content_records();
        let now = Utc::now();

        let first = ContentRecord::new("aaaa", "aaaa/01", 3);
        assert_eq!(records.commit(&first, now).unwrap(), CommitOutcome::Inserted);

        let second = ContentRecord::new("aaaa", "aaaa/02", 3);
        match records.commit(&second, now).unwrap() {
            CommitOutcome::Existing(existing) => assert_eq!(existing.location, "aaaa/01"),
            other => panic!("unexpected outcome: {:?}", other),
        }

        let stored = records.get("aaaa").unwrap().unwrap();
        assert_eq!(stored.location, "aaaa/01");
        assert_eq!(stored.size_bytes, 3);
        assert!(!stored.removal_candidate);
        assert_eq!(records.count().unwrap(), 1);
    }

    #[test]
    fn test_mark_revive_and_reclaim() {
        let (_temp_dir, db) = new_store();
        let records = db.content_records();
        let now = Utc::now();
        let grace = Duration::hours(1);

        records
            .commit(&ContentRecord::new("bbbb", "bbbb/01", 10), now - grace)
            .unwrap();

        assert!(records.mark_removal_candidate("bbbb", now).unwrap());
        // Already a candidate
        assert!(!records.mark_removal_candidate("bbbb", now).unwrap());

        let marked = records.get("bbbb").unwrap().unwrap();
        assert!(marked.removal_candidate);
        assert!(!marked.is_reclaimable(now - grace));
        assert!(marked.is_reclaimable(now + grace));

        // Within the grace period the dedup path can still revive it
        let revived = records.revive("bbbb", now - grace).unwrap().unwrap();
        assert!(!revived.removal_candidate);
        assert!(revived.marked_at.is_none());

        records.mark_removal_candidate("bbbb", now).unwrap();
        // Past the grace period it cannot
        assert!(records.revive("bbbb", now + grace).unwrap().is_none());

        assert!(!records
            .delete_if_reclaimable("bbbb", "bbbb/other", now + grace)
            .unwrap());
        assert!(!records
            .delete_if_reclaimable("bbbb", "bbbb/01", now - grace)
            .unwrap());
        assert!(records
            .delete_if_reclaimable("bbbb", "bbbb/01", now + grace)
            .unwrap());
        assert!(records.get("bbbb").unwrap().is_none());
        assert!(records.revive("bbbb", now).unwrap().is_none());
    }

    #[test]
    fn test_commit_takes_over_reclaimable_record() {
        let (_temp_dir, db) = new_store();
        let records = db.content_records();
        let now = Utc::now();

        records
            .commit(&ContentRecord::new("cccc", "cccc/01", 4), now)
            .unwrap();
        records.mark_removal_candidate("cccc", now).unwrap();

        let fresh = ContentRecord::new("cccc", "cccc/02", 4);
        assert_eq!(
            records.commit(&fresh, now + Duration::seconds(1)).unwrap(),
            CommitOutcome::Replaced {
                previous_location: "cccc/01".to_string()
            }
        );

        let stored = records.get("cccc").unwrap().unwrap();
        assert_eq!(stored.location, "cccc/02");
        assert!(!stored.removal_candidate);
    }

    #[test]
    fn test_existing_hashes_skips_expired_candidates() {
        let (_temp_dir, db) = new_store();
        let records = db.content_records();
        let now = Utc::now();

        for hash in ["eeee", "ffff", "gggg"] {
            records
                .commit(&ContentRecord::new(hash, &format!("{}/01", hash), 1), now)
                .unwrap();
        }
        records.mark_removal_candidate("ffff", now).unwrap();
        records
            .mark_removal_candidate("gggg", now - Duration::hours(2))
            .unwrap();

        let query: Vec<String> = ["eeee", "ffff", "gggg", "hhhh"]
            .iter()
            .map(|hash| hash.to_string())
            .collect();
        let existing = records.existing_hashes(&query, now - Duration::hours(1)).unwrap();
        assert_eq!(
            existing,
            HashSet::from(["eeee".to_string(), "ffff".to_string()])
        );
    }

    #[test]
    fn test_referenced_records_are_never_marked() {
        let (_temp_dir, db) = new_store();
        let records = db.content_records();
        let now = Utc::now();

        records
            .commit(&ContentRecord::new("dddd", "dddd/01", 1), now)
            .unwrap();
        db.references()
            .insert(&Reference::new("holder-1", "dddd"))
            .unwrap();

        assert!(!records.mark_removal_candidate("dddd", now).unwrap());
        assert_eq!(records.list_content_hashes().unwrap(), vec!["dddd".to_string()]);
        assert_eq!(records.list_locations().unwrap(), vec!["dddd/01".to_string()]);
    }
}
