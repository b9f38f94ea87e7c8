use crate::error::{HoldError, Result};
use crate::storage::backend::{MultipartWriter, ObjectStore, validate_object_name};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Operation counters of a [`MemoryObjectStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    pub whole_writes: usize,
    pub multipart_begun: usize,
    pub parts_written: usize,
    pub multipart_completed: usize,
    pub multipart_aborted: usize,
    pub deletes: usize,
}

impl MemoryStoreStats {
    /// Objects that reached the store, whichever write path produced them.
    pub fn physical_writes(&self) -> usize {
        self.whole_writes + self.multipart_completed
    }
}

#[derive(Default)]
struct Counters {
    whole_writes: AtomicUsize,
    multipart_begun: AtomicUsize,
    parts_written: AtomicUsize,
    multipart_completed: AtomicUsize,
    multipart_aborted: AtomicUsize,
    deletes: AtomicUsize,
}

/// Process-local object store. Used by tests and ephemeral dev runs.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, Bytes>>>,
    counters: Arc<Counters>,
    fail_deletes: Arc<AtomicBool>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> MemoryStoreStats {
        let c = &self.counters;
        MemoryStoreStats {
            whole_writes: c.whole_writes.load(Ordering::SeqCst),
            multipart_begun: c.multipart_begun.load(Ordering::SeqCst),
            parts_written: c.parts_written.load(Ordering::SeqCst),
            multipart_completed: c.multipart_completed.load(Ordering::SeqCst),
            multipart_aborted: c.multipart_aborted.load(Ordering::SeqCst),
            deletes: c.deletes.load(Ordering::SeqCst),
        }
    }

    /// Make every following `delete` fail until switched off again.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn object_count(&self) -> usize {
        self.lock().len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Bytes>> {
        // A poisoned map still holds consistent entries: every mutation is a
        // single insert or remove.
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn get(&self, name: &str) -> Result<Bytes> {
        self.lock()
            .get(name)
            .cloned()
            .ok_or_else(|| HoldError::ObjectNotFound(name.to_string()))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn is_available(&self) -> bool {
        true
    }

    async fn size(&self, name: &str) -> Result<u64> {
        Ok(self.get(name)?.len() as u64)
    }

    async fn read_range(&self, name: &str, offset: u64, length: u64) -> Result<Bytes> {
        let data = self.get(name)?;
        let start = (offset as usize).min(data.len());
        let end = (offset.saturating_add(length) as usize).min(data.len());
        Ok(data.slice(start..end))
    }

    async fn write_whole(&self, name: &str, data: Bytes) -> Result<()> {
        validate_object_name(name)?;
        self.counters.whole_writes.fetch_add(1, Ordering::SeqCst);
        self.lock().insert(name.to_string(), data);
        Ok(())
    }

    async fn begin_multipart(&self, name: &str) -> Result<Box<dyn MultipartWriter>> {
        validate_object_name(name)?;
        self.counters.multipart_begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryMultipartWriter {
            store: self.clone(),
            name: name.to_string(),
            buffer: BytesMut::new(),
        }))
    }

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        validate_object_name(new_name)?;
        let mut objects = self.lock();
        let data = objects
            .remove(old_name)
            .ok_or_else(|| HoldError::ObjectNotFound(old_name.to_string()))?;
        objects.insert(new_name.to_string(), data);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(HoldError::Internal(format!(
                "injected delete failure for {}",
                name
            )));
        }
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        self.lock().remove(name);
        Ok(())
    }

    async fn list_objects(&self) -> Result<Vec<String>> {
        Ok(self.lock().keys().cloned().collect())
    }
}

struct MemoryMultipartWriter {
    store: MemoryObjectStore,
    name: String,
    buffer: BytesMut,
}

#[async_trait]
impl MultipartWriter for MemoryMultipartWriter {
    async fn add_part(&mut self, data: Bytes) -> Result<()> {
        self.store
            .counters
            .parts_written
            .fetch_add(1, Ordering::SeqCst);
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<()> {
        let MemoryMultipartWriter {
            store,
            name,
            buffer,
        } = *self;
        store
            .counters
            .multipart_completed
            .fetch_add(1, Ordering::SeqCst);
        store.lock().insert(name, buffer.freeze());
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        self.store
            .counters
            .multipart_aborted
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_counts_writes() {
        let store = MemoryObjectStore::new();
        store.write_whole("a/1", Bytes::from("abc")).await.unwrap();

        let mut writer = store.begin_multipart("b/1").await.unwrap();
        writer.add_part(Bytes::from("de")).await.unwrap();
        writer.add_part(Bytes::from("f")).await.unwrap();
        writer.finish().await.unwrap();

        let stats = store.stats();
        assert_eq!(stats.whole_writes, 1);
        assert_eq!(stats.parts_written, 2);
        assert_eq!(stats.physical_writes(), 2);
        assert_eq!(store.read_range("b/1", 1, 10).await.unwrap(), "ef");
    }

    #[tokio::test]
    async fn test_memory_store_delete_failure_injection() {
        let store = MemoryObjectStore::new();
        store.write_whole("a/1", Bytes::from("abc")).await.unwrap();

        store.set_fail_deletes(true);
        tokio_test::assert_err!(store.delete("a/1").await);
        assert!(store.contains("a/1"));

        store.set_fail_deletes(false);
        tokio_test::assert_ok!(store.delete("a/1").await);
        tokio_test::assert_ok!(store.delete("a/1").await);
        assert_eq!(store.object_count(), 0);
    }
}
