pub mod assign_holder;
pub mod get_blob;
pub mod put_blob;
pub mod remove_blob;

pub use assign_holder::{
    AssignHolderOperation, AssignHolderOperationOutcome, AssignHolderOperationRequest,
};
pub use get_blob::{
    GetBlobOperation, GetBlobOperationOutcome, GetBlobOperationRequest, GetBlobOperationResult,
};
pub use put_blob::{
    PutBlobOperation, PutBlobOperationOutcome, PutBlobOperationRequest, PutBlobOperationResult,
};
pub use remove_blob::{
    RemoveBlobOperation, RemoveBlobOperationOutcome, RemoveBlobOperationRequest,
};
