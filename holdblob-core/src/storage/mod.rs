//! Storage modules for Holdblob
//!
//! Object store backends hold blob payloads; SQLite tables hold the content
//! records and holder references that point at them.

pub mod backend;
pub mod content_records;
pub mod factory;
pub mod local_store;
pub mod memory_store;
pub mod metadata_store;
pub mod references;
pub mod s3_store;

pub use backend::{MultipartWriter, ObjectStore, validate_object_name};
pub use content_records::{CommitOutcome, ContentRecord, ContentRecordStore};
pub use factory::ObjectStoreBuilder;
pub use local_store::LocalObjectStore;
pub use memory_store::{MemoryObjectStore, MemoryStoreStats};
pub use metadata_store::MetadataStore;
pub use references::{Reference, ReferenceStore};
pub use s3_store::{S3ObjectStore, S3StoreConfig};
