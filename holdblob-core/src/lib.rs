//! Holdblob Core - deduplicating, content-addressed blob storage
//!
//! Independent holders store payloads under a claimed content hash:
//! - SHA-512 verification before any content becomes visible
//! - one stored object per distinct hash, shared through holder references
//! - multipart uploads sized for provider minimums over a small-chunk transport
//! - two-phase garbage collection that tolerates in-flight uploads

pub mod context;
pub mod download;
pub mod error;
pub mod gc;
pub mod hash;
pub mod operations;
pub mod protocol;
pub mod service;
pub mod storage;
pub mod upload;
pub mod validation;
pub mod worker;

pub use context::{DEFAULT_GRACE_PERIOD, ServiceContext};
pub use download::ChunkedReader;
pub use error::{HoldError, Result};
pub use gc::{GarbageCollector, SweepReport};
pub use hash::{ContentHasher, compute_hash};
pub use operations::*;
pub use protocol::{
    AssignHolderRequest, AssignHolderResponse, FindExistingRequest, FindExistingResponse,
    GetRequest, GetResponse, PutRequest, RemoveRequest, Status, StatusCode, TransportLimits,
};
pub use service::BlobService;
pub use storage::{
    CommitOutcome, ContentRecord, ContentRecordStore, LocalObjectStore, MemoryObjectStore,
    MemoryStoreStats, MetadataStore, MultipartWriter, ObjectStore, ObjectStoreBuilder, Reference,
    ReferenceStore, S3ObjectStore, S3StoreConfig,
};
pub use upload::{ChunkedUploader, MAX_PART_COUNT, MultipartUpload, UploadSummary};
pub use worker::WorkerPool;
