//! Truncated content digests used for dedup and migration validation.

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the SHA-256 digest.
pub const CONTENT_HASH_LEN: usize = 16;

/// Hash `text` to a short, stable hex digest.
pub fn content_hash(text: &str) -> String {
    let mut hasher = ContentHasher::default();
    hasher.update(text);
    hasher.finish()
}

/// Incremental [`content_hash`]: feeding the parts of a text in order gives
/// the digest of their concatenation.
#[derive(Clone, Default)]
pub struct ContentHasher {
    digest: Sha256,
}

impl ContentHasher {
    pub fn update(&mut self, part: &str) {
        self.digest.update(part.as_bytes());
    }

    pub fn finish(self) -> String {
        let mut hex = hex::encode(self.digest.finalize());
        hex.truncate(CONTENT_HASH_LEN);
        hex
    }
}
