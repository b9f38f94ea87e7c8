//! Two-phase garbage collection of unreferenced content.
//!
//! A sweep marks every unreferenced record as a removal candidate. A later
//! sweep reclaims a candidate only when it is still unreferenced and its grace
//! period has elapsed; anything that references the hash in between revives
//! it. The object is deleted before its record, so a crash in between leaves
//! an orphaned object that `find_orphaned_objects` reports.

use crate::Result;
use crate::context::ServiceContext;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub referenced: usize,
    pub marked: usize,
    pub reclaimed: usize,
    /// Candidates still inside their grace period.
    pub pending: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Referenced,
    Marked,
    Reclaimed,
    Pending,
    Vanished,
}

pub struct GarbageCollector {
    context: ServiceContext,
    interval: Duration,
}

impl GarbageCollector {
    pub fn new(context: ServiceContext, interval: Duration) -> Self {
        Self { context, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// One full pass over every content record, as of `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let cutoff = self.context.reclaim_cutoff(now);
        let hashes = self.context.content_records.list_content_hashes()?;
        let mut report = SweepReport::default();

        for content_hash in hashes {
            report.scanned += 1;
            match self.sweep_hash(&content_hash, now, cutoff).await {
                Ok(Verdict::Referenced) => report.referenced += 1,
                Ok(Verdict::Marked) => report.marked += 1,
                Ok(Verdict::Reclaimed) => report.reclaimed += 1,
                Ok(Verdict::Pending) => report.pending += 1,
                Ok(Verdict::Vanished) => {}
                Err(error) => {
                    tracing::warn!("GC failed for content_hash={}: {}", content_hash, error);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "GC sweep done. scanned={} referenced={} marked={} reclaimed={} pending={} failed={}",
            report.scanned,
            report.referenced,
            report.marked,
            report.reclaimed,
            report.pending,
            report.failed
        );
        Ok(report)
    }

    async fn sweep_hash(
        &self,
        content_hash: &str,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> Result<Verdict> {
        let records = &self.context.content_records;
        let Some(record) = records.get(content_hash)? else {
            return Ok(Verdict::Vanished);
        };

        if self.context.references.has_references(content_hash)? {
            if record.removal_candidate && records.clear_removal_candidate(content_hash)? {
                tracing::debug!("Revived removal candidate {}", content_hash);
            }
            return Ok(Verdict::Referenced);
        }

        if !record.removal_candidate {
            if records.mark_removal_candidate(content_hash, now)? {
                tracing::debug!("Marked {} as removal candidate", content_hash);
                return Ok(Verdict::Marked);
            }
            // A reference arrived between the check and the mark
            return Ok(Verdict::Referenced);
        }

        if !record.is_reclaimable(cutoff) {
            return Ok(Verdict::Pending);
        }

        // A failed delete leaves the record as is; the next sweep retries.
        self.context.objects.delete(&record.location).await?;

        if records.delete_if_reclaimable(content_hash, &record.location, cutoff)? {
            tracing::debug!("Reclaimed {} at {}", content_hash, record.location);
            Ok(Verdict::Reclaimed)
        } else {
            tracing::debug!(
                "Record of {} changed during reclamation; kept",
                content_hash
            );
            Ok(Verdict::Pending)
        }
    }

    /// Objects that no content record points at. Report-only; objects of
    /// uploads still in flight show up here too.
    pub async fn find_orphaned_objects(&self) -> Result<Vec<String>> {
        let locations: HashSet<String> = self
            .context
            .content_records
            .list_locations()?
            .into_iter()
            .collect();

        let orphans = self
            .context
            .objects
            .list_objects()
            .await?
            .into_iter()
            .filter(|name| !locations.contains(name))
            .collect();
        Ok(orphans)
    }

    /// Sweep every interval until `shutdown` flips to true or its sender is
    /// dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        tracing::info!("GC started. interval={:?}", self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.sweep().await {
                        tracing::error!("GC sweep failed: {}", error);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("GC stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ContentRecord, MemoryObjectStore, MetadataStore, ObjectStore, Reference};
    use bytes::Bytes;
    use chrono::TimeDelta;
    use std::sync::Arc;

    const GRACE: Duration = Duration::from_secs(60);

    struct Fixture {
        _temp_dir: tempfile::TempDir,
        objects: MemoryObjectStore,
        context: ServiceContext,
        gc: GarbageCollector,
    }

    async fn fixture_with_record(content_hash: &str, location: &str) -> Fixture {
        let temp_dir = tempfile::tempdir().unwrap();
        let metadata = MetadataStore::open(temp_dir.path().join("meta.db")).unwrap();
        let objects = MemoryObjectStore::new();
        let context = ServiceContext::new(&metadata, Arc::new(objects.clone()))
            .with_grace_period(GRACE);

        objects
            .write_whole(location, Bytes::from("payload"))
            .await
            .unwrap();
        context
            .content_records
            .commit(&ContentRecord::new(content_hash, location, 7), Utc::now())
            .unwrap();

        let gc = GarbageCollector::new(context.clone(), Duration::from_secs(1));
        Fixture {
            _temp_dir: temp_dir,
            objects,
            context,
            gc,
        }
    }

    fn after_grace(now: DateTime<Utc>) -> DateTime<Utc> {
        now + TimeDelta::from_std(GRACE).unwrap() + TimeDelta::seconds(1)
    }

    #[tokio::test]
    async fn test_unreferenced_content_takes_two_sweeps() {
        let f = fixture_with_record("aaaa", "aaaa/01").await;
        let now = Utc::now();

        let first = f.gc.sweep_at(now).await.unwrap();
        assert_eq!(first.marked, 1);
        assert!(f.objects.contains("aaaa/01"));

        // Still inside the grace period
        let early = f.gc.sweep_at(now + TimeDelta::seconds(1)).await.unwrap();
        assert_eq!(early.pending, 1);
        assert!(f.objects.contains("aaaa/01"));

        let second = f.gc.sweep_at(after_grace(now)).await.unwrap();
        assert_eq!(second.reclaimed, 1);
        assert!(!f.objects.contains("aaaa/01"));
        assert!(f.context.content_records.get("aaaa").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reference_revives_candidate() {
        let f = fixture_with_record("bbbb", "bbbb/01").await;
        let now = Utc::now();

        f.gc.sweep_at(now).await.unwrap();
        f.context
            .references
            .insert(&Reference::new("alice", "bbbb"))
            .unwrap();

        let report = f.gc.sweep_at(after_grace(now)).await.unwrap();
        assert_eq!(report.referenced, 1);
        assert_eq!(report.reclaimed, 0);

        let record = f.context.content_records.get("bbbb").unwrap().unwrap();
        assert!(!record.removal_candidate);
        assert!(f.objects.contains("bbbb/01"));
    }

    #[tokio::test]
    async fn test_failed_object_delete_is_retried() {
        let f = fixture_with_record("cccc", "cccc/01").await;
        let now = Utc::now();
        f.gc.sweep_at(now).await.unwrap();

        f.objects.set_fail_deletes(true);
        let failed = f.gc.sweep_at(after_grace(now)).await.unwrap();
        assert_eq!(failed.failed, 1);
        let record = f.context.content_records.get("cccc").unwrap().unwrap();
        assert!(record.removal_candidate);

        f.objects.set_fail_deletes(false);
        let retried = f.gc.sweep_at(after_grace(now)).await.unwrap();
        assert_eq!(retried.reclaimed, 1);
        assert_eq!(f.objects.object_count(), 0);
    }

    #[tokio::test]
    async fn test_find_orphaned_objects() {
        let f = fixture_with_record("dddd", "dddd/01").await;
        f.objects
            .write_whole("dddd/02", Bytes::from("stray"))
            .await
            .unwrap();

        assert_eq!(
            f.gc.find_orphaned_objects().await.unwrap(),
            vec!["dddd/02".to_string()]
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture_with_record("eeee", "eeee/01").await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { f.gc.run(shutdown_rx).await });
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
