//! Content hashes for change detection.
//!
//! Uses BLAKE3 for all hashing operations. Row sets are hashed in canonical
//! order so the digest does not depend on storage iteration order.

use crate::error::PipelineResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A BLAKE3 hash (256 bits / 32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex prefix for log lines and change summaries
    #[must_use]
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Order-independent digest over a set of rows.
///
/// Each row is encoded with postcard, the encodings are sorted, and the
/// sorted sequence is fed to BLAKE3 with length prefixes.
#[derive(Debug, Clone)]
pub struct ContentHasher {
    domain: String,
    rows: Vec<Vec<u8>>,
}

impl ContentHasher {
    /// Create a hasher for a named input set
    #[must_use]
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            rows: Vec::new(),
        }
    }

    /// Add one row
    ///
    /// # Errors
    ///
    /// Returns error if the row cannot be encoded
    pub fn add<T: Serialize>(&mut self, row: &T) -> PipelineResult<()> {
        self.rows.push(postcard::to_stdvec(row)?);
        Ok(())
    }

    /// Finish and return the digest
    #[must_use]
    pub fn finish(mut self) -> Hash {
        self.rows.sort_unstable();
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(&(self.rows.len() as u64).to_le_bytes());
        for row in &self.rows {
            hasher.update(&(row.len() as u64).to_le_bytes());
            hasher.update(row);
        }
        Hash(*hasher.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_forms() {
        let hash = ContentHasher::new("sales").finish();
        assert_eq!(hash.to_hex().len(), 64);
        assert_eq!(hash.to_string(), hash.to_hex());
        assert!(hash.to_hex().starts_with(&hash.short()));
        assert_eq!(hash.short().len(), 8);
    }

    #[test]
    fn test_content_hash_order_independent() {
        let mut a = ContentHasher::new("sales");
        a.add(&("s1", 3u32)).unwrap();
        a.add(&("s2", 5u32)).unwrap();

        let mut b = ContentHasher::new("sales");
        b.add(&("s2", 5u32)).unwrap();
        b.add(&("s1", 3u32)).unwrap();

        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn test_content_hash_detects_change() {
        let mut a = ContentHasher::new("sales");
        a.add(&("s1", 3u32)).unwrap();
        let mut b = ContentHasher::new("sales");
        b.add(&("s1", 4u32)).unwrap();
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn test_content_hash_domain_separation() {
        let a = ContentHasher::new("sales").finish();
        let b = ContentHasher::new("inventory").finish();
        assert_ne!(a, b);
    }
}
