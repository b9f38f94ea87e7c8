use crate::error::{HoldError, Result};
use async_trait::async_trait;
use bytes::Bytes;

/// Byte-oriented object storage used for blob payloads.
///
/// Every backend shares the same semantics: reads and renames of a missing
/// object fail with `ObjectNotFound`, deleting a missing object succeeds, and
/// writes replace the target atomically so readers never observe a partially
/// written object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn is_available(&self) -> bool;

    async fn size(&self, name: &str) -> Result<u64>;

    /// Read `length` bytes starting at `offset`. Callers keep the range within
    /// the object size.
    async fn read_range(&self, name: &str, offset: u64, length: u64) -> Result<Bytes>;

    async fn write_whole(&self, name: &str, data: Bytes) -> Result<()>;

    async fn begin_multipart(&self, name: &str) -> Result<Box<dyn MultipartWriter>>;

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<()>;

    async fn delete(&self, name: &str) -> Result<()>;

    /// Names of all committed objects.
    async fn list_objects(&self) -> Result<Vec<String>>;
}

/// Provider side of a multipart upload. Parts are appended in order.
#[async_trait]
pub trait MultipartWriter: Send {
    async fn add_part(&mut self, data: Bytes) -> Result<()>;

    async fn finish(self: Box<Self>) -> Result<()>;

    async fn abort(self: Box<Self>) -> Result<()>;
}

/// Object names are relative, `/`-separated paths without empty, `.` or `..`
/// segments.
pub fn validate_object_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(HoldError::InvalidArgument(
            "object name cannot be empty".to_string(),
        ));
    }

    for segment in name.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(HoldError::InvalidArgument(format!(
                "invalid object name: {}",
                name
            )));
        }
    }

    Ok(())
}
