use crate::error::{HoldError, Result};
use crate::storage::{MultipartWriter, ObjectStore};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;

/// Provider limit on parts per multipart upload.
pub const MAX_PART_COUNT: usize = 10_000;

/// A provider multipart upload that tracks part sizes so `finish` can
/// enforce the minimum part size before completing.
pub struct MultipartUpload {
    name: String,
    writer: Box<dyn MultipartWriter>,
    part_sizes: Vec<usize>,
    min_part_size: usize,
}

impl MultipartUpload {
    pub async fn begin(store: &dyn ObjectStore, name: &str, min_part_size: usize) -> Result<Self> {
        let writer = store.begin_multipart(name).await?;
        tracing::debug!("Began multipart upload {}", name);
        Ok(Self {
            name: name.to_string(),
            writer,
            part_sizes: Vec::new(),
            min_part_size,
        })
    }

    pub fn part_count(&self) -> usize {
        self.part_sizes.len()
    }

    pub fn part_sizes(&self) -> &[usize] {
        &self.part_sizes
    }

    pub async fn add_part(&mut self, data: Bytes) -> Result<()> {
        if self.part_sizes.len() >= MAX_PART_COUNT {
            return Err(HoldError::InvalidArgument(format!(
                "payload exceeds {} multipart parts",
                MAX_PART_COUNT
            )));
        }

        let size = data.len();
        self.writer.add_part(data).await?;
        self.part_sizes.push(size);
        tracing::trace!(
            "Uploaded part {} of {} ({} bytes)",
            self.part_sizes.len(),
            self.name,
            size
        );
        Ok(())
    }

    /// Complete the upload. Every part except the last must meet the minimum
    /// part size; otherwise the provider upload is aborted.
    pub async fn finish(self) -> Result<()> {
        let Some((_, leading)) = self.part_sizes.split_last() else {
            let name = self.name.clone();
            self.abort().await?;
            return Err(HoldError::Internal(format!(
                "multipart upload {} has no parts",
                name
            )));
        };

        let too_small = leading
            .iter()
            .enumerate()
            .find(|(_, size)| **size < self.min_part_size)
            .map(|(index, size)| (index + 1, *size));

        if let Some((part_number, size)) = too_small {
            let minimum = self.min_part_size;
            self.abort().await?;
            return Err(HoldError::PartTooSmall {
                part_number,
                size,
                minimum,
            });
        }

        let MultipartUpload {
            name,
            writer,
            part_sizes,
            ..
        } = self;
        writer.finish().await?;
        tracing::debug!(
            "Completed multipart upload {} with {} parts",
            name,
            part_sizes.len()
        );
        Ok(())
    }

    pub async fn abort(self) -> Result<()> {
        tracing::debug!("Aborting multipart upload {}", self.name);
        self.writer.abort().await
    }
}

/// What a finished upload wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSummary {
    pub size_bytes: u64,
    /// Zero for a single whole-object write.
    pub parts: usize,
}

enum UploadState {
    Buffering(BytesMut),
    Multipart {
        upload: MultipartUpload,
        pending: BytesMut,
    },
}

/// Streams transport-sized chunks into one object.
///
/// Payloads that end below the minimum part size are written whole. Larger
/// payloads switch to a multipart upload whose parts are coalesced up to the
/// minimum, because transport chunks are smaller than the provider allows.
pub struct ChunkedUploader {
    store: Arc<dyn ObjectStore>,
    name: String,
    min_part_size: usize,
    state: UploadState,
    size_bytes: u64,
}

impl ChunkedUploader {
    pub fn new(store: Arc<dyn ObjectStore>, name: &str, min_part_size: usize) -> Self {
        Self {
            store,
            name: name.to_string(),
            min_part_size: min_part_size.max(1),
            state: UploadState::Buffering(BytesMut::new()),
            size_bytes: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.state, UploadState::Multipart { .. })
    }

    pub async fn push(&mut self, chunk: Bytes) -> Result<()> {
        self.size_bytes += chunk.len() as u64;

        match &mut self.state {
            UploadState::Buffering(buffer) => {
                buffer.extend_from_slice(&chunk);
                if buffer.len() < self.min_part_size {
                    return Ok(());
                }

                let first_part = buffer.split().freeze();
                let mut upload =
                    MultipartUpload::begin(self.store.as_ref(), &self.name, self.min_part_size)
                        .await?;
                if let Err(error) = upload.add_part(first_part).await {
                    abort_quietly(upload).await;
                    return Err(error);
                }

                self.state = UploadState::Multipart {
                    upload,
                    pending: BytesMut::new(),
                };
            }
            UploadState::Multipart { upload, pending } => {
                if pending.is_empty() && chunk.len() >= self.min_part_size {
                    upload.add_part(chunk).await?;
                } else {
                    pending.extend_from_slice(&chunk);
                    if pending.len() >= self.min_part_size {
                        upload.add_part(pending.split().freeze()).await?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Commit everything pushed so far as the object.
    pub async fn finish(self) -> Result<UploadSummary> {
        let size_bytes = self.size_bytes;

        match self.state {
            UploadState::Buffering(buffer) => {
                self.store.write_whole(&self.name, buffer.freeze()).await?;
                Ok(UploadSummary {
                    size_bytes,
                    parts: 0,
                })
            }
            UploadState::Multipart {
                mut upload,
                pending,
            } => {
                if !pending.is_empty() {
                    if let Err(error) = upload.add_part(pending.freeze()).await {
                        abort_quietly(upload).await;
                        return Err(error);
                    }
                }
                let parts = upload.part_count();
                upload.finish().await?;
                Ok(UploadSummary { size_bytes, parts })
            }
        }
    }

    /// Cancel the upload. A buffering uploader has written nothing.
    pub async fn abort(self) -> Result<()> {
        match self.state {
            UploadState::Buffering(_) => Ok(()),
            UploadState::Multipart { upload, .. } => upload.abort().await,
        }
    }
}

async fn abort_quietly(upload: MultipartUpload) {
    if let Err(error) = upload.abort().await {
        tracing::warn!("Failed to abort multipart upload: {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;

    const MIN_PART: usize = 8;

    fn new_uploader(store: &MemoryObjectStore, name: &str) -> ChunkedUploader {
        ChunkedUploader::new(Arc::new(store.clone()), name, MIN_PART)
    }

    #[tokio::test]
    async fn test_small_payload_is_written_whole() {
        let store = MemoryObjectStore::new();
        let mut uploader = new_uploader(&store, "h/1");
        uploader.push(Bytes::from("abc")).await.unwrap();
        uploader.push(Bytes::from("de")).await.unwrap();

        let summary = uploader.finish().await.unwrap();
        assert_eq!(summary, UploadSummary { size_bytes: 5, parts: 0 });

        let stats = store.stats();
        assert_eq!(stats.whole_writes, 1);
        assert_eq!(stats.multipart_begun, 0);
        assert_eq!(store.read_range("h/1", 0, 5).await.unwrap(), "abcde");
    }

    #[tokio::test]
    async fn test_empty_payload_is_written_whole() {
        let store = MemoryObjectStore::new();
        let summary = new_uploader(&store, "h/empty").finish().await.unwrap();
        assert_eq!(summary.size_bytes, 0);
        assert_eq!(store.size("h/empty").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_small_chunks_are_coalesced_into_parts() {
        let store = MemoryObjectStore::new();
        let mut uploader = new_uploader(&store, "h/2");

        // 3-byte chunks, smaller than the 8-byte minimum
        let payload: Vec<u8> = (0..30u8).collect();
        for chunk in payload.chunks(3) {
            uploader.push(Bytes::copy_from_slice(chunk)).await.unwrap();
        }
        assert!(uploader.is_multipart());

        let summary = uploader.finish().await.unwrap();
        // 9 + 9 + 9 + 3
        assert_eq!(summary, UploadSummary { size_bytes: 30, parts: 4 });
        assert_eq!(store.stats().multipart_completed, 1);
        assert_eq!(store.read_range("h/2", 0, 30).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_large_chunks_become_their_own_parts() {
        let store = MemoryObjectStore::new();
        let mut uploader = new_uploader(&store, "h/3");
        for _ in 0..3 {
            uploader.push(Bytes::from(vec![7u8; 10])).await.unwrap();
        }

        let summary = uploader.finish().await.unwrap();
        assert_eq!(summary.parts, 3);
        assert_eq!(store.stats().parts_written, 3);
    }

    #[tokio::test]
    async fn test_finish_rejects_small_leading_part() {
        let store = MemoryObjectStore::new();
        let mut upload = MultipartUpload::begin(&store, "h/4", MIN_PART).await.unwrap();
        upload.add_part(Bytes::from("tiny")).await.unwrap();
        upload.add_part(Bytes::from(vec![1u8; MIN_PART])).await.unwrap();

        let result = upload.finish().await;
        assert!(matches!(
            result,
            Err(HoldError::PartTooSmall {
                part_number: 1,
                size: 4,
                minimum: MIN_PART
            })
        ));

        let stats = store.stats();
        assert_eq!(stats.multipart_aborted, 1);
        assert_eq!(stats.multipart_completed, 0);
        assert!(!store.contains("h/4"));
    }

    #[tokio::test]
    async fn test_finish_allows_small_last_part() {
        let store = MemoryObjectStore::new();
        let mut upload = MultipartUpload::begin(&store, "h/5", MIN_PART).await.unwrap();
        upload.add_part(Bytes::from(vec![1u8; MIN_PART])).await.unwrap();
        upload.add_part(Bytes::from("end")).await.unwrap();
        assert_eq!(upload.part_sizes(), &[MIN_PART, 3]);

        upload.finish().await.unwrap();
        assert_eq!(store.size("h/5").await.unwrap(), MIN_PART as u64 + 3);
    }

    #[tokio::test]
    async fn test_finish_rejects_empty_upload() {
        let store = MemoryObjectStore::new();
        let upload = MultipartUpload::begin(&store, "h/6", MIN_PART).await.unwrap();
        assert!(upload.finish().await.is_err());
        assert_eq!(store.stats().multipart_aborted, 1);
    }

    #[tokio::test]
    async fn test_abort_discards_multipart_upload() {
        let store = MemoryObjectStore::new();
        let mut uploader = new_uploader(&store, "h/7");
        uploader.push(Bytes::from(vec![0u8; 12])).await.unwrap();
        uploader.abort().await.unwrap();

        assert_eq!(store.stats().multipart_aborted, 1);
        assert_eq!(store.object_count(), 0);
    }
}
