use crate::context::ServiceContext;
use crate::gc::GarbageCollector;
use crate::operations::{
    AssignHolderOperation, AssignHolderOperationOutcome, AssignHolderOperationRequest,
    GetBlobOperation, GetBlobOperationOutcome, GetBlobOperationRequest, GetBlobOperationResult,
    PutBlobOperation, PutBlobOperationOutcome, RemoveBlobOperation, RemoveBlobOperationRequest,
};
use crate::protocol::{
    AssignHolderRequest, FindExistingRequest, GetRequest, MAX_EXISTENCE_QUERY, PutRequest,
    RemoveRequest,
};
use crate::validation::normalize_content_hash;
use crate::{HoldError, Result};
use chrono::Utc;
use futures_util::Stream;
use std::collections::HashSet;
use std::time::Duration;

/// The three blob calls over one shared [`ServiceContext`].
#[derive(Clone)]
pub struct BlobService {
    context: ServiceContext,
}

impl BlobService {
    pub fn new(context: ServiceContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.context
    }

    pub async fn put<S>(&self, messages: S) -> Result<PutBlobOperationOutcome>
    where
        S: Stream<Item = Result<PutRequest>> + Unpin,
    {
        PutBlobOperation::new(self.context.clone())
            .run_stream(messages)
            .await
    }

    pub async fn get(&self, request: GetRequest) -> Result<GetBlobOperationResult> {
        let holder = request.holder;
        let outcome = GetBlobOperation::new(self.context.clone())
            .run(GetBlobOperationRequest {
                holder: holder.clone(),
            })
            .await?;

        match outcome {
            GetBlobOperationOutcome::Found(result) => Ok(result),
            GetBlobOperationOutcome::NotFound => Err(HoldError::NotFound(holder)),
        }
    }

    pub async fn remove(&self, request: RemoveRequest) -> Result<()> {
        RemoveBlobOperation::new(self.context.clone())
            .run(RemoveBlobOperationRequest {
                holder: request.holder,
            })
            .await?;
        Ok(())
    }

    /// Returns whether the content exists. When it does not, no reference is
    /// created and the caller is expected to Put the payload.
    pub async fn assign_holder(&self, request: AssignHolderRequest) -> Result<bool> {
        let outcome = AssignHolderOperation::new(self.context.clone())
            .run(AssignHolderOperationRequest {
                holder: request.holder,
                content_hash: request.content_hash,
            })
            .await?;
        Ok(matches!(outcome, AssignHolderOperationOutcome::Assigned { .. }))
    }

    /// Which of the given hashes are stored and not about to be reclaimed.
    /// Hashes come back in lowercase form.
    pub async fn find_existing(&self, request: FindExistingRequest) -> Result<HashSet<String>> {
        if request.content_hashes.len() > MAX_EXISTENCE_QUERY {
            return Err(HoldError::InvalidArgument(format!(
                "at most {} hashes per query",
                MAX_EXISTENCE_QUERY
            )));
        }

        let content_hashes = request
            .content_hashes
            .iter()
            .map(|content_hash| normalize_content_hash(content_hash))
            .collect::<Result<Vec<_>>>()?;

        let cutoff = self.context.reclaim_cutoff(Utc::now());
        self.context
            .content_records
            .existing_hashes(&content_hashes, cutoff)
    }

    pub fn garbage_collector(&self, interval: Duration) -> GarbageCollector {
        GarbageCollector::new(self.context.clone(), interval)
    }
}
