use crate::context::ServiceContext;
use crate::storage::Reference;
use crate::validation::{normalize_content_hash, validate_holder};
use crate::{HoldError, Result};
use chrono::Utc;

#[derive(Clone)]
pub struct AssignHolderOperation {
    context: ServiceContext,
}

#[derive(Debug, Clone)]
pub struct AssignHolderOperationRequest {
    pub holder: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignHolderOperationOutcome {
    /// The holder now references the stored content.
    Assigned { location: String },
    /// No live record for the hash; the caller has to upload the payload.
    DataMissing,
}

impl AssignHolderOperation {
    pub fn new(context: ServiceContext) -> Self {
        Self { context }
    }

    /// Attach a holder to content that is already stored, without an upload.
    pub async fn run(
        &self,
        request: AssignHolderOperationRequest,
    ) -> Result<AssignHolderOperationOutcome> {
        let AssignHolderOperationRequest {
            holder,
            content_hash,
        } = request;
        validate_holder(&holder)?;
        let content_hash = normalize_content_hash(&content_hash)?;

        tracing::info!(
            "Assign holder. holder={} content_hash={}",
            holder,
            content_hash
        );

        if self.context.references.get(&holder)?.is_some() {
            return Err(HoldError::AlreadyExists(holder));
        }

        let cutoff = self.context.reclaim_cutoff(Utc::now());
        let Some(record) = self.context.content_records.revive(&content_hash, cutoff)? else {
            tracing::debug!("No live record for {}", content_hash);
            return Ok(AssignHolderOperationOutcome::DataMissing);
        };

        self.context
            .references
            .insert(&Reference::new(&holder, &content_hash))?;

        Ok(AssignHolderOperationOutcome::Assigned {
            location: record.location,
        })
    }
}
