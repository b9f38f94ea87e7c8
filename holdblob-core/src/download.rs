use crate::error::{HoldError, Result};
use crate::protocol::GetResponse;
use crate::storage::ObjectStore;
use bytes::Bytes;
use futures_util::Stream;
use std::sync::Arc;

/// Reads one stored object back as a sequence of bounded ranges.
pub struct ChunkedReader {
    store: Arc<dyn ObjectStore>,
    name: String,
    chunk_size: u64,
    size: u64,
    offset: u64,
    end: u64,
}

impl ChunkedReader {
    pub async fn open(store: Arc<dyn ObjectStore>, name: &str, chunk_size: usize) -> Result<Self> {
        let size = store.size(name).await?;
        Ok(Self {
            store,
            name: name.to_string(),
            chunk_size: chunk_size.max(1) as u64,
            size,
            offset: 0,
            end: size,
        })
    }

    /// Total size of the object, independent of any range.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Half-open byte range still to be read.
    pub fn range(&self) -> (u64, u64) {
        (self.offset, self.end)
    }

    pub fn remaining(&self) -> u64 {
        self.end - self.offset
    }

    /// Restrict reading to `start..end`. `end` is clamped to the object size.
    pub fn set_byte_range(&mut self, start: u64, end: u64) -> Result<()> {
        let end = end.min(self.size);
        if start > end {
            return Err(HoldError::InvalidArgument(format!(
                "byte range {}..{} outside object of {} bytes",
                start, end, self.size
            )));
        }
        self.offset = start;
        self.end = end;
        Ok(())
    }

    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.offset >= self.end {
            return Ok(None);
        }

        let length = self.chunk_size.min(self.end - self.offset);
        let chunk = self.store.read_range(&self.name, self.offset, length).await?;
        if chunk.is_empty() {
            return Err(HoldError::Internal(format!(
                "object {} ended at offset {}, expected {} bytes",
                self.name, self.offset, self.size
            )));
        }

        self.offset += chunk.len() as u64;
        tracing::trace!(
            "Read {} bytes of {} ({}/{})",
            chunk.len(),
            self.name,
            self.offset,
            self.end
        );
        Ok(Some(chunk))
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<GetResponse>> + Send {
        futures_util::stream::try_unfold(self, |mut reader| async move {
            let next = reader.next_chunk().await?;
            Ok(next.map(|chunk| (GetResponse { chunk }, reader)))
        })
    }
}
