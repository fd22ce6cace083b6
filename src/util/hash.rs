//! Hashing utilities for target fingerprints.

use sha2::{Digest, Sha256};

/// Compute SHA256 hash of a string.
pub fn sha256_str(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

/// Incremental hasher for building fingerprints from multiple components.
#[derive(Default)]
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    /// Create a new hasher.
    pub fn new() -> Self {
        Hasher {
            inner: Sha256::new(),
        }
    }

    /// Add a string component.
    pub fn update_str(&mut self, s: &str) -> &mut Self {
        self.inner.update(s.as_bytes());
        self.inner.update(b"\0"); // Separator
        self
    }

    /// Add a raw byte component.
    pub fn update_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update(bytes);
        self
    }

    /// Add an integer component.
    pub fn update_u64(&mut self, v: u64) -> &mut Self {
        self.inner.update(v.to_le_bytes());
        self
    }

    /// Finalize and return the digest as a hex string.
    pub fn finish(self) -> String {
        hex::encode(self.inner.finalize())
    }
}
