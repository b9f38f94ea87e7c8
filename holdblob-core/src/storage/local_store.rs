use crate::error::{HoldError, Result};
use crate::storage::backend::{MultipartWriter, ObjectStore, validate_object_name};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use ulid::Ulid;

/// Filesystem-backed object store for development.
///
/// Committed objects live under `{base}/objects/{name}`; whole writes and
/// multipart uploads are staged in `{base}/staging` and renamed into place.
pub struct LocalObjectStore {
    base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(base_path.join("objects"))?;
        std::fs::create_dir_all(base_path.join("staging"))?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn objects_dir(&self) -> PathBuf {
        self.base_path.join("objects")
    }

    fn object_path(&self, name: &str) -> Result<PathBuf> {
        validate_object_name(name)?;
        Ok(self.objects_dir().join(name))
    }

    fn staging_path(&self) -> PathBuf {
        self.base_path.join("staging").join(Ulid::new().to_string())
    }

    /// Remove directories left empty by a delete or rename, stopping at the
    /// objects root.
    async fn prune_empty_parents(&self, path: &Path) {
        let root = self.objects_dir();
        let mut current = path.parent().map(Path::to_path_buf);
        while let Some(dir) = current {
            if dir == root || !dir.starts_with(&root) {
                break;
            }
            if fs::remove_dir(&dir).await.is_err() {
                break;
            }
            current = dir.parent().map(Path::to_path_buf);
        }
    }
}

fn missing_as_not_found(name: &str) -> impl FnOnce(std::io::Error) -> HoldError + '_ {
    move |error| {
        if error.kind() == std::io::ErrorKind::NotFound {
            HoldError::ObjectNotFound(name.to_string())
        } else {
            HoldError::Io(error)
        }
    }
}

const COMMIT_ATTEMPTS: usize = 5;

/// Move `temp_path` to `dest_path`, creating parent directories.
///
/// A concurrent delete in the same directory may prune the parent between
/// its creation and the rename; that case is retried while the source still
/// exists.
async fn commit_staged(temp_path: &Path, dest_path: &Path) -> Result<()> {
    let mut attempt = 1;
    loop {
        match move_into_place(temp_path, dest_path).await {
            Ok(()) => return Ok(()),
            Err(error)
                if error.kind() == std::io::ErrorKind::NotFound
                    && attempt < COMMIT_ATTEMPTS
                    && fs::try_exists(temp_path).await.unwrap_or(false) =>
            {
                tracing::debug!(
                    "Parent of {} vanished during commit, retrying",
                    dest_path.display()
                );
                attempt += 1;
            }
            Err(error) => return Err(error.into()),
        }
    }
}

async fn move_into_place(temp_path: &Path, dest_path: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest_path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::rename(temp_path, dest_path).await
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn is_available(&self) -> bool {
        fs::metadata(self.objects_dir())
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }

    async fn size(&self, name: &str) -> Result<u64> {
        let path = self.object_path(name)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(missing_as_not_found(name))?;
        Ok(meta.len())
    }

    async fn read_range(&self, name: &str, offset: u64, length: u64) -> Result<Bytes> {
        let path = self.object_path(name)?;
        let mut file = fs::File::open(&path)
            .await
            .map_err(missing_as_not_found(name))?;

        if length == 0 {
            return Ok(Bytes::new());
        }

        file.seek(SeekFrom::Start(offset)).await?;
        let mut buffer = Vec::with_capacity(length as usize);
        file.take(length).read_to_end(&mut buffer).await?;

        Ok(Bytes::from(buffer))
    }

    async fn write_whole(&self, name: &str, data: Bytes) -> Result<()> {
        let dest_path = self.object_path(name)?;

        // Write to a staging file first, then rename for atomicity
        let temp_path = self.staging_path();
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        commit_staged(&temp_path, &dest_path).await?;

        tracing::debug!("Stored object {} ({} bytes)", name, data.len());
        Ok(())
    }

    async fn begin_multipart(&self, name: &str) -> Result<Box<dyn MultipartWriter>> {
        let dest_path = self.object_path(name)?;
        let temp_path = self.staging_path();
        let file = fs::File::create(&temp_path).await?;

        Ok(Box::new(LocalMultipartWriter {
            name: name.to_string(),
            file,
            temp_path,
            dest_path,
        }))
    }

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let old_path = self.object_path(old_name)?;
        let new_path = self.object_path(new_name)?;

        fs::metadata(&old_path)
            .await
            .map_err(missing_as_not_found(old_name))?;

        commit_staged(&old_path, &new_path).await?;
        self.prune_empty_parents(&old_path).await;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.object_path(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(error) => return Err(error.into()),
        }

        self.prune_empty_parents(&path).await;
        Ok(())
    }

    async fn list_objects(&self) -> Result<Vec<String>> {
        let root = self.objects_dir();
        let mut names = Vec::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let relative = path
                        .strip_prefix(&root)
                        .map_err(|error| HoldError::Internal(error.to_string()))?;
                    let name = relative
                        .components()
                        .map(|component| component.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    names.push(name);
                }
            }
        }

        names.sort();
        Ok(names)
    }
}

struct LocalMultipartWriter {
    name: String,
    file: fs::File,
    temp_path: PathBuf,
    dest_path: PathBuf,
}

#[async_trait]
impl MultipartWriter for LocalMultipartWriter {
    async fn add_part(&mut self, data: Bytes) -> Result<()> {
        self.file.write_all(&data).await?;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<()> {
        let LocalMultipartWriter {
            name,
            mut file,
            temp_path,
            dest_path,
        } = *self;

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        commit_staged(&temp_path, &dest_path).await?;
        tracing::debug!("Completed multipart object {}", name);
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let LocalMultipartWriter {
            file, temp_path, ..
        } = *self;
        drop(file);

        match fs::remove_file(&temp_path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn new_store() -> (tempfile::TempDir, LocalObjectStore) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(temp_dir.path().to_path_buf()).unwrap();
        (temp_dir, store)
    }

    #[tokio::test]
    async fn test_local_store_whole_object() {
        let (_temp_dir, store) = new_store();
        assert!(store.is_available().await);

        let data = Bytes::from("test data content");
        store.write_whole("abc/01", data.clone()).await.unwrap();

        assert_eq!(store.size("abc/01").await.unwrap(), data.len() as u64);
        assert_eq!(store.read_range("abc/01", 5, 4).await.unwrap(), "data");
        assert_eq!(store.read_range("abc/01", 0, 0).await.unwrap(), "");
        assert_eq!(store.list_objects().await.unwrap(), vec!["abc/01".to_string()]);

        store.delete("abc/01").await.unwrap();
        assert!(matches!(
            store.size("abc/01").await,
            Err(HoldError::ObjectNotFound(_))
        ));
        // Deleting again is fine
        store.delete("abc/01").await.unwrap();
        assert!(store.list_objects().await.unwrap().is_empty());
        assert!(!store.objects_dir().join("abc").exists());
    }

    #[tokio::test]
    async fn test_local_store_multipart_is_invisible_until_finished() {
        let (_temp_dir, store) = new_store();

        let mut writer = store.begin_multipart("big/01").await.unwrap();
        writer.add_part(Bytes::from("hello ")).await.unwrap();
        writer.add_part(Bytes::from("world")).await.unwrap();
        assert!(store.list_objects().await.unwrap().is_empty());

        writer.finish().await.unwrap();
        assert_eq!(store.read_range("big/01", 0, 11).await.unwrap(), "hello world");

        let mut aborted = store.begin_multipart("big/02").await.unwrap();
        aborted.add_part(Bytes::from("partial")).await.unwrap();
        aborted.abort().await.unwrap();
        assert_eq!(store.list_objects().await.unwrap(), vec!["big/01".to_string()]);
    }

    #[tokio::test]
    async fn test_local_store_rename() {
        let (_temp_dir, store) = new_store();

        store.write_whole("a/1", Bytes::from("x")).await.unwrap();
        store.rename("a/1", "b/2").await.unwrap();

        assert_eq!(store.list_objects().await.unwrap(), vec!["b/2".to_string()]);
        assert!(matches!(
            store.rename("a/1", "c/3").await,
            Err(HoldError::ObjectNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_local_store_write_survives_concurrent_delete_in_same_dir() {
        let (_temp_dir, store) = new_store();
        let store = Arc::new(store);

        for round in 0..300 {
            let old = format!("h/old{}", round);
            let new = format!("h/new{}", round);
            store.write_whole(&old, Bytes::from("old")).await.unwrap();

            let deleter = {
                let store = store.clone();
                tokio::spawn(async move { store.delete(&old).await })
            };
            let writer = {
                let store = store.clone();
                let new = new.clone();
                tokio::spawn(async move { store.write_whole(&new, Bytes::from("new")).await })
            };
            deleter.await.unwrap().unwrap();
            writer.await.unwrap().unwrap();

            assert_eq!(store.read_range(&new, 0, 3).await.unwrap(), "new");
            // Leave `h/` empty so the next round's delete prunes it again
            store.delete(&new).await.unwrap();
        }

        assert!(store.list_objects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_store_rejects_traversal() {
        let (_temp_dir, store) = new_store();
        assert!(matches!(
            store.write_whole("../escape", Bytes::from("x")).await,
            Err(HoldError::InvalidArgument(_))
        ));
    }
}
