use crate::Result;
use crate::context::ServiceContext;
use crate::validation::validate_holder;

#[derive(Clone)]
pub struct RemoveBlobOperation {
    context: ServiceContext,
}

#[derive(Debug, Clone)]
pub struct RemoveBlobOperationRequest {
    pub holder: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveBlobOperationOutcome {
    Removed { content_hash: String },
    /// The holder had no reference; nothing changed.
    Absent,
}

impl RemoveBlobOperation {
    pub fn new(context: ServiceContext) -> Self {
        Self { context }
    }

    /// Drops the holder's reference. The object itself is left for the
    /// garbage collector.
    pub async fn run(
        &self,
        request: RemoveBlobOperationRequest,
    ) -> Result<RemoveBlobOperationOutcome> {
        let RemoveBlobOperationRequest { holder } = request;
        validate_holder(&holder)?;

        tracing::info!("Remove blob. holder={}", holder);

        match self.context.references.delete(&holder)? {
            Some(content_hash) => {
                tracing::debug!(
                    "Removed reference. holder={} content_hash={}",
                    holder,
                    content_hash
                );
                Ok(RemoveBlobOperationOutcome::Removed { content_hash })
            }
            None => Ok(RemoveBlobOperationOutcome::Absent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryObjectStore, MetadataStore, Reference};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let metadata = MetadataStore::open(temp_dir.path().join("meta.db")).unwrap();
        let objects = Arc::new(MemoryObjectStore::new());
        let context = ServiceContext::new(&metadata, objects);
        context
            .references
            .insert(&Reference::new("alice", "abcd"))
            .unwrap();

        let operation = RemoveBlobOperation::new(context.clone());
        let request = RemoveBlobOperationRequest {
            holder: "alice".to_string(),
        };

        assert_eq!(
            operation.run(request.clone()).await.unwrap(),
            RemoveBlobOperationOutcome::Removed {
                content_hash: "abcd".to_string()
            }
        );
        assert_eq!(
            operation.run(request).await.unwrap(),
            RemoveBlobOperationOutcome::Absent
        );
        assert!(context.references.get("alice").unwrap().is_none());
    }
}
