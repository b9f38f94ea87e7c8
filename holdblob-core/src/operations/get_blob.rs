use crate::context::ServiceContext;
use crate::download::ChunkedReader;
use crate::storage::{ContentRecord, Reference};
use crate::validation::validate_holder;
use crate::{HoldError, Result};

#[derive(Clone)]
pub struct GetBlobOperation {
    context: ServiceContext,
}

#[derive(Debug, Clone)]
pub struct GetBlobOperationRequest {
    pub holder: String,
}

pub struct GetBlobOperationResult {
    pub reference: Reference,
    pub record: ContentRecord,
    pub reader: ChunkedReader,
}

pub enum GetBlobOperationOutcome {
    Found(GetBlobOperationResult),
    NotFound,
}

impl GetBlobOperation {
    pub fn new(context: ServiceContext) -> Self {
        Self { context }
    }

    pub async fn run(&self, request: GetBlobOperationRequest) -> Result<GetBlobOperationOutcome> {
        let GetBlobOperationRequest { holder } = request;
        validate_holder(&holder)?;

        tracing::info!("Get blob. holder={}", holder);

        let Some(reference) = self.context.references.get(&holder)? else {
            return Ok(GetBlobOperationOutcome::NotFound);
        };

        let record = self
            .context
            .content_records
            .get(&reference.content_hash)?
            .ok_or_else(|| {
                tracing::error!(
                    "Reference points at missing content record. holder={} content_hash={}",
                    holder,
                    reference.content_hash
                );
                HoldError::Internal(format!(
                    "content record {} missing for holder {}",
                    reference.content_hash, holder
                ))
            })?;

        let reader = ChunkedReader::open(
            self.context.objects.clone(),
            &record.location,
            self.context.limits.download_chunk_size(),
        )
        .await
        .map_err(|error| match error {
            HoldError::ObjectNotFound(location) => {
                tracing::error!(
                    "Content record points at missing object. content_hash={} location={}",
                    record.content_hash,
                    location
                );
                HoldError::Internal(format!("object {} missing", location))
            }
            other => other,
        })?;

        Ok(GetBlobOperationOutcome::Found(GetBlobOperationResult {
            reference,
            record,
            reader,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryObjectStore, MetadataStore, ObjectStore};
    use bytes::Bytes;
    use std::sync::Arc;

    fn new_context() -> (tempfile::TempDir, MemoryObjectStore, ServiceContext) {
        let temp_dir = tempfile::tempdir().unwrap();
        let metadata = MetadataStore::open(temp_dir.path().join("meta.db")).unwrap();
        let objects = MemoryObjectStore::new();
        let context = ServiceContext::new(&metadata, Arc::new(objects.clone()));
        (temp_dir, objects, context)
    }

    fn request(holder: &str) -> GetBlobOperationRequest {
        GetBlobOperationRequest {
            holder: holder.to_string(),
        }
    }

    #[tokio::test]
    async fn test_unknown_holder_is_not_found() {
        let (_temp_dir, _objects, context) = new_context();
        let outcome = GetBlobOperation::new(context)
            .run(request("nobody"))
            .await
            .unwrap();
        assert!(matches!(outcome, GetBlobOperationOutcome::NotFound));
    }

    #[tokio::test]
    async fn test_dangling_reference_is_internal() {
        let (_temp_dir, _objects, context) = new_context();
        context
            .references
            .insert(&Reference::new("alice", "abcd"))
            .unwrap();

        let result = GetBlobOperation::new(context).run(request("alice")).await;
        assert!(matches!(result, Err(HoldError::Internal(_))));
    }

    #[tokio::test]
    async fn test_found_opens_reader() {
        let (_temp_dir, objects, context) = new_context();
        objects
            .write_whole("abcd/01", Bytes::from("payload"))
            .await
            .unwrap();
        context
            .content_records
            .commit(&ContentRecord::new("abcd", "abcd/01", 7), chrono::Utc::now())
            .unwrap();
        context
            .references
            .insert(&Reference::new("alice", "abcd"))
            .unwrap();

        let outcome = GetBlobOperation::new(context)
            .run(request("alice"))
            .await
            .unwrap();
        let GetBlobOperationOutcome::Found(mut result) = outcome else {
            panic!("expected blob to be found");
        };
        assert_eq!(result.record.size_bytes, 7);
        assert_eq!(result.reader.next_chunk().await.unwrap().unwrap(), "payload");
        assert!(result.reader.next_chunk().await.unwrap().is_none());
    }
}
