//! Incremental double-SHA-256

use sha2::{Digest, Sha256};

/// Digest size in bytes.
pub(crate) const OUTPUT_SIZE: usize = 32;

/// A running hash whose digest is `SHA256(SHA256(data))`, closing the
/// length-extension property of plain SHA-256. Pools and reseed inputs
/// are hashed with this construction.
#[derive(Clone)]
pub(crate) struct Sha256d {
    inner: Sha256,
}

impl Sha256d {
    pub(crate) fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Digest of everything written so far. The running state is left
    /// untouched.
    pub(crate) fn sum(&self) -> [u8; OUTPUT_SIZE] {
        let first = self.inner.clone().finalize();
        Sha256::digest(first).into()
    }

    /// Discard all absorbed data, returning to the empty state.
    pub(crate) fn reset(&mut self) {
        self.inner = Sha256::new();
    }
}
