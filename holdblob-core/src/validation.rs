use crate::error::{HoldError, Result};

pub const MAX_HOLDER_LEN: usize = 512;
pub const MAX_CONTENT_HASH_LEN: usize = 256;

pub fn validate_holder(holder: &str) -> Result<()> {
    if holder.is_empty() {
        return Err(HoldError::InvalidArgument("holder cannot be empty".to_string()));
    }
    if holder.len() > MAX_HOLDER_LEN {
        return Err(HoldError::InvalidArgument(format!(
            "holder exceeds {} bytes",
            MAX_HOLDER_LEN
        )));
    }
    if holder
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(HoldError::InvalidArgument(format!(
            "holder contains whitespace or control characters: {:?}",
            holder
        )));
    }
    Ok(())
}

/// The hash becomes the first path segment of the storage location.
pub fn validate_content_hash(content_hash: &str) -> Result<()> {
    if content_hash.is_empty() {
        return Err(HoldError::InvalidArgument(
            "content hash cannot be empty".to_string(),
        ));
    }
    if content_hash.len() > MAX_CONTENT_HASH_LEN {
        return Err(HoldError::InvalidArgument(format!(
            "content hash exceeds {} bytes",
            MAX_CONTENT_HASH_LEN
        )));
    }
    if !content_hash
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(HoldError::InvalidArgument(format!(
            "content hash has invalid characters: {:?}",
            content_hash
        )));
    }
    Ok(())
}

/// Validate a claimed hash and fold it to the lowercase form digests use.
pub fn normalize_content_hash(content_hash: &str) -> Result<String> {
    validate_content_hash(content_hash)?;
    Ok(content_hash.to_ascii_lowercase())
}
