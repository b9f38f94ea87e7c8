//! Call protocol types shared by every transport binding.
//!
//! A `Put` call is client-streaming (`Params` first, then `Chunk`s), `Get` is
//! server-streaming and `Remove` is unary.

use crate::HoldError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Per-message size limit of the RPC transport.
pub const TRANSPORT_CHUNK_SIZE_LIMIT: usize = 4 * 1024 * 1024;
/// Fixed framing bytes the transport adds to each message.
pub const TRANSPORT_FRAMING_OVERHEAD: usize = 5;
/// Most hashes accepted by one existence query.
pub const MAX_EXISTENCE_QUERY: usize = 1000;
/// Smallest non-final part the storage provider accepts in a multipart upload.
pub const MULTIPART_MIN_PART_SIZE: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub enum PutRequest {
    Params {
        holder: String,
        content_hash: String,
    },
    Chunk(Bytes),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequest {
    pub holder: String,
}

#[derive(Debug, Clone)]
pub struct GetResponse {
    pub chunk: Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveRequest {
    pub holder: String,
}

/// Attach `holder` to already stored content. Unary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignHolderRequest {
    pub holder: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignHolderResponse {
    pub data_exists: bool,
}

/// Batch existence query over content hashes. Unary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindExistingRequest {
    pub content_hashes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindExistingResponse {
    /// Sorted.
    pub existing: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    NotFound,
    AlreadyExists,
    HashMismatch,
    InvalidArgument,
    Internal,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::NotFound => "not_found",
            StatusCode::AlreadyExists => "already_exists",
            StatusCode::HashMismatch => "hash_mismatch",
            StatusCode::InvalidArgument => "invalid_argument",
            StatusCode::Internal => "internal",
        }
    }
}

/// Failure reported back to a caller. Internal details stay in the logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl From<&HoldError> for Status {
    fn from(error: &HoldError) -> Self {
        let code = error.status_code();
        let message = match code {
            StatusCode::Internal => "internal error".to_string(),
            _ => error.to_string(),
        };
        Self { code, message }
    }
}

impl From<HoldError> for Status {
    fn from(error: HoldError) -> Self {
        Status::from(&error)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TransportLimits {
    pub chunk_size_limit: usize,
    pub framing_overhead: usize,
    pub min_part_size: usize,
}

impl TransportLimits {
    /// Payload bytes that fit in one outbound message.
    pub fn download_chunk_size(&self) -> usize {
        self.chunk_size_limit
            .saturating_sub(self.framing_overhead)
            .max(1)
    }
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            chunk_size_limit: TRANSPORT_CHUNK_SIZE_LIMIT,
            framing_overhead: TRANSPORT_FRAMING_OVERHEAD,
            min_part_size: MULTIPART_MIN_PART_SIZE,
        }
    }
}
