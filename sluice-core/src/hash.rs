//! Content hashing
//!
//! Stable content-addressable identifiers for text and bytes. Stage plugins use
//! these to recognise content they have already processed.
//!
//! Every call builds its own SHA-256 context, so a single `ContentHasher` can be
//! shared freely between concurrently running work items.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Write};

/// Number of digest bytes kept in a [`ContentHash`]
const HASH_BYTES: usize = 16;

/// 128-bit content digest, rendered as 32 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Returns the hex representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stateless content hasher
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher;

impl ContentHasher {
    /// Creates a new hasher
    pub fn new() -> Self {
        Self
    }

    /// Hashes a byte sequence
    pub fn hash(&self, bytes: impl AsRef<[u8]>) -> ContentHash {
        let mut hasher = Sha256::new();
        hasher.update(bytes.as_ref());
        let digest = hasher.finalize();

        let hex = digest[..HASH_BYTES]
            .iter()
            .fold(String::with_capacity(HASH_BYTES * 2), |mut out, byte| {
                let _ = write!(out, "{:02x}", byte);
                out
            });

        ContentHash(hex)
    }

    /// Hashes several parts as one sequence, with a separator between parts
    ///
    /// The separator keeps `["ab", "c"]` and `["a", "bc"]` distinct.
    pub fn hash_parts<I, P>(&self, parts: I) -> ContentHash
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let mut buffer = Vec::new();
        for part in parts {
            buffer.extend_from_slice(part.as_ref());
            buffer.push(0);
        }
        self.hash(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_same_bytes_same_digest() {
        let hasher = ContentHasher::new();
        let first = hasher.hash("the quick brown fox");
        let second = hasher.hash("the quick brown fox");

        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 32);
    }

    #[test]
    fn test_different_bytes_different_digest() {
        let hasher = ContentHasher::new();
        assert_ne!(hasher.hash("alpha"), hasher.hash("beta"));
        assert_ne!(hasher.hash(""), hasher.hash(" "));
    }

    #[test]
    fn test_previous_input_does_not_leak_into_next_call() {
        let hasher = ContentHasher::new();
        let before = hasher.hash("payload");
        let _ = hasher.hash("something else entirely");
        let after = hasher.hash("payload");

        assert_eq!(before, after);
    }

    #[test]
    fn test_hash_parts_is_boundary_sensitive() {
        let hasher = ContentHasher::new();
        assert_ne!(
            hasher.hash_parts(["ab", "c"]),
            hasher.hash_parts(["a", "bc"])
        );
        assert_eq!(
            hasher.hash_parts(["doc-1", "text"]),
            hasher.hash_parts(["doc-1", "text"])
        );
    }

    #[test]
    fn test_concurrent_hashing_is_deterministic() {
        let hasher = Arc::new(ContentHasher::new());
        let expected = hasher.hash("shared document body");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let hasher = Arc::clone(&hasher);
                std::thread::spawn(move || {
                    // Interleave unrelated input to catch any shared state
                    let _ = hasher.hash(format!("noise-{}", i));
                    hasher.hash("shared document body")
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }
}
