//! Cryptographic primitives for Capone.
//!
//! Hashing (BLAKE3, 32-byte digests) and secure randomness. Signatures live
//! with the key types in [`crate::keys`], the AEAD layer with the channel in
//! [`crate::channel`].

use rand::rngs::OsRng;
use rand::RngCore;

/// Hash a byte slice, returning a 32-byte digest.
///
/// Used for the handshake key derivation and the capability chain.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Incremental hasher for preimages assembled in pieces.
///
/// # Example
/// ```
/// use capone_core::crypto::Hasher;
/// let mut h = Hasher::new();
/// h.update(b"hello ");
/// h.update(b"world");
/// assert_eq!(h.finalize(), capone_core::crypto::hash(b"hello world"));
/// ```
pub struct Hasher(blake3::Hasher);

impl Hasher {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> [u8; 32] {
        *self.0.finalize().as_bytes()
    }

    /// Finalize keeping the `blake3::Hash` wrapper, whose `PartialEq` runs
    /// in constant time. Capability verification compares through this.
    pub fn finalize_ct(self) -> blake3::Hash {
        self.0.finalize()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Fill `buf` from the operating system CSPRNG.
pub fn random_bytes(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

/// Draw a random `u32` from the operating system CSPRNG.
pub fn random_u32() -> u32 {
    OsRng.next_u32()
}
