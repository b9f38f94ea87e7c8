use crate::context::ServiceContext;
use crate::hash::ContentHasher;
use crate::protocol::PutRequest;
use crate::storage::{CommitOutcome, ContentRecord, Reference};
use crate::upload::ChunkedUploader;
use crate::validation::{normalize_content_hash, validate_holder};
use crate::{HoldError, Result};
use bytes::Bytes;
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use ulid::Ulid;

#[derive(Clone)]
pub struct PutBlobOperation {
    context: ServiceContext,
}

#[derive(Debug, Clone)]
pub struct PutBlobOperationRequest {
    pub holder: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutBlobOperationResult {
    pub location: String,
    pub size_bytes: u64,
    /// Zero for a single whole-object write.
    pub parts: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutBlobOperationOutcome {
    /// The payload was uploaded and verified.
    Stored(PutBlobOperationResult),
    /// The holder now shares an existing record.
    Deduplicated { location: String },
}

impl PutBlobOperationOutcome {
    pub fn is_deduplicated(&self) -> bool {
        matches!(self, PutBlobOperationOutcome::Deduplicated { .. })
    }
}

/// Bytes of a new hash on their way into the object store.
struct StreamingUpload {
    request: PutBlobOperationRequest,
    uploader: ChunkedUploader,
    hasher: ContentHasher,
}

impl StreamingUpload {
    async fn push(&mut self, chunk: Bytes) -> Result<()> {
        self.hasher.update(&chunk);
        self.uploader.push(chunk).await
    }

    async fn discard(self) {
        let location = self.uploader.name().to_string();
        if let Err(error) = self.uploader.abort().await {
            tracing::warn!("Failed to abort upload {}: {}", location, error);
        }
    }
}

/// Per-call state of a Put. Advanced one message at a time.
enum PutSession {
    AwaitParams,
    Streaming(StreamingUpload),
    Deduplicated {
        request: PutBlobOperationRequest,
        record: ContentRecord,
    },
    Finalizing(StreamingUpload),
    Done(PutBlobOperationOutcome),
}

impl PutBlobOperation {
    pub fn new(context: ServiceContext) -> Self {
        Self { context }
    }

    /// Drive one Put call: `Params` first, then payload chunks until the
    /// stream ends.
    ///
    /// A dedup hit stops reading; the rest of the stream is never consumed.
    pub async fn run_stream<S>(&self, mut messages: S) -> Result<PutBlobOperationOutcome>
    where
        S: Stream<Item = Result<PutRequest>> + Unpin,
    {
        let mut session = PutSession::AwaitParams;

        loop {
            session = match session {
                PutSession::AwaitParams => match messages.next().await {
                    Some(Ok(PutRequest::Params {
                        holder,
                        content_hash,
                    })) => {
                        self.start(PutBlobOperationRequest {
                            holder,
                            content_hash,
                        })
                        .await?
                    }
                    Some(Ok(PutRequest::Chunk(_))) => {
                        return Err(HoldError::InvalidArgument(
                            "chunk received before params".to_string(),
                        ));
                    }
                    Some(Err(error)) => return Err(error),
                    None => {
                        return Err(HoldError::InvalidArgument(
                            "stream ended before params".to_string(),
                        ));
                    }
                },
                PutSession::Streaming(mut upload) => match messages.next().await {
                    Some(Ok(PutRequest::Chunk(chunk))) => match upload.push(chunk).await {
                        Ok(()) => PutSession::Streaming(upload),
                        Err(error) => {
                            upload.discard().await;
                            return Err(error);
                        }
                    },
                    Some(Ok(PutRequest::Params { .. })) => {
                        upload.discard().await;
                        return Err(HoldError::InvalidArgument(
                            "params received twice".to_string(),
                        ));
                    }
                    Some(Err(error)) => {
                        tracing::warn!(
                            "Put stream aborted. holder={} error={}",
                            upload.request.holder,
                            error
                        );
                        upload.discard().await;
                        return Err(error);
                    }
                    None => PutSession::Finalizing(upload),
                },
                PutSession::Deduplicated { request, record } => {
                    PutSession::Done(self.commit_duplicate(request, record)?)
                }
                PutSession::Finalizing(upload) => PutSession::Done(self.finalize(upload).await?),
                PutSession::Done(outcome) => return Ok(outcome),
            };
        }
    }

    async fn start(&self, mut request: PutBlobOperationRequest) -> Result<PutSession> {
        validate_holder(&request.holder)?;
        request.content_hash = normalize_content_hash(&request.content_hash)?;

        tracing::info!(
            "Put blob. holder={} content_hash={}",
            request.holder,
            request.content_hash
        );

        if self.context.references.get(&request.holder)?.is_some() {
            return Err(HoldError::AlreadyExists(request.holder));
        }

        let cutoff = self.context.reclaim_cutoff(Utc::now());
        if let Some(record) = self
            .context
            .content_records
            .revive(&request.content_hash, cutoff)?
        {
            return Ok(PutSession::Deduplicated { request, record });
        }

        let location = format!("{}/{}", request.content_hash, Ulid::new());
        let uploader = ChunkedUploader::new(
            self.context.objects.clone(),
            &location,
            self.context.limits.min_part_size,
        );
        tracing::debug!("Streaming new content to {}", location);

        Ok(PutSession::Streaming(StreamingUpload {
            request,
            uploader,
            hasher: ContentHasher::new(),
        }))
    }

    fn commit_duplicate(
        &self,
        request: PutBlobOperationRequest,
        record: ContentRecord,
    ) -> Result<PutBlobOperationOutcome> {
        self.context
            .references
            .insert(&Reference::new(&request.holder, &request.content_hash))?;

        tracing::info!(
            "Deduplicated blob. holder={} content_hash={} location={}",
            request.holder,
            request.content_hash,
            record.location
        );
        Ok(PutBlobOperationOutcome::Deduplicated {
            location: record.location,
        })
    }

    async fn finalize(&self, upload: StreamingUpload) -> Result<PutBlobOperationOutcome> {
        let StreamingUpload {
            request,
            uploader,
            hasher,
        } = upload;
        let location = uploader.name().to_string();

        let summary = match uploader.finish().await {
            Ok(summary) => summary,
            Err(error) => {
                self.delete_quietly(&location).await;
                return Err(error);
            }
        };

        if let Err(error) = hasher.verify(&request.content_hash) {
            tracing::warn!("Rejected upload. holder={} {}", request.holder, error);
            self.delete_quietly(&location).await;
            return Err(error);
        }

        let record = ContentRecord::new(&request.content_hash, &location, summary.size_bytes);
        let cutoff = self.context.reclaim_cutoff(Utc::now());
        let committed = match self.context.content_records.commit(&record, cutoff) {
            Ok(committed) => committed,
            Err(error) => {
                self.delete_quietly(&location).await;
                return Err(error);
            }
        };

        let outcome = match committed {
            CommitOutcome::Inserted => PutBlobOperationOutcome::Stored(PutBlobOperationResult {
                location,
                size_bytes: summary.size_bytes,
                parts: summary.parts,
            }),
            CommitOutcome::Replaced { previous_location } => {
                tracing::debug!(
                    "Replaced reclaimable record of {} at {}",
                    request.content_hash,
                    previous_location
                );
                self.delete_quietly(&previous_location).await;
                PutBlobOperationOutcome::Stored(PutBlobOperationResult {
                    location,
                    size_bytes: summary.size_bytes,
                    parts: summary.parts,
                })
            }
            CommitOutcome::Existing(existing) => {
                tracing::debug!(
                    "Concurrent upload of {} committed first; dropping {}",
                    request.content_hash,
                    location
                );
                self.delete_quietly(&location).await;
                PutBlobOperationOutcome::Deduplicated {
                    location: existing.location,
                }
            }
        };

        self.context
            .references
            .insert(&Reference::new(&request.holder, &request.content_hash))?;

        tracing::info!(
            "Stored blob. holder={} content_hash={} size={}",
            request.holder,
            request.content_hash,
            summary.size_bytes
        );
        Ok(outcome)
    }

    async fn delete_quietly(&self, location: &str) {
        if let Err(error) = self.context.objects.delete(location).await {
            tracing::warn!("Failed to delete object {}: {}", location, error);
        }
    }
}
