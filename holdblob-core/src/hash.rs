use crate::error::{HoldError, Result};
use sha2::{Digest, Sha512};

/// Incremental SHA-512 over a byte stream. Chunk boundaries do not affect the
/// digest.
#[derive(Clone, Default)]
pub struct ContentHasher {
    hasher: Sha512,
    bytes_hashed: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes_hashed += data.len() as u64;
    }

    pub fn bytes_hashed(&self) -> u64 {
        self.bytes_hashed
    }

    /// Lowercase hex digest.
    pub fn finalize(self) -> String {
        hex::encode(self.hasher.finalize())
    }

    /// Finalize and compare against `expected`, returning the digest.
    pub fn verify(self, expected: &str) -> Result<String> {
        let actual = self.finalize();
        if actual != expected {
            return Err(HoldError::HashMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(actual)
    }
}

/// Compute the content hash of a complete payload
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = ContentHasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash() {
        let hash = compute_hash(b"hello world");
        assert_eq!(hash.len(), 128);
        assert!(hash.starts_with("309ecc489c12d6eb4cc40f50c902f2b4"));
    }

    #[test]
    fn test_chunk_boundaries_do_not_matter() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let mut hasher = ContentHasher::new();
        for piece in data.chunks(7) {
            hasher.update(piece);
        }
        assert_eq!(hasher.bytes_hashed(), data.len() as u64);
        assert_eq!(hasher.finalize(), compute_hash(&data));
    }

    #[test]
    fn test_verify_mismatch() {
        let mut hasher = ContentHasher::new();
        hasher.update(b"abc");
        let err = hasher.clone().verify("deadbeef").unwrap_err();
        assert!(matches!(
            err,
            HoldError::HashMismatch { ref expected, .. } if expected == "deadbeef"
        ));
        assert_eq!(hasher.verify(&compute_hash(b"abc")).unwrap(), compute_hash(b"abc"));
    }
}
