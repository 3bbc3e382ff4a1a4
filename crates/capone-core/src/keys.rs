//! Key identities.
//!
//! A host or user is its long-term Ed25519 signature keypair. Ephemeral
//! X25519 keys exist only inside the handshake and are never stored; the
//! symmetric session key they produce lives here so the channel and tests
//! can construct one directly.
//!
//! Secret key material derives ZeroizeOnDrop — wiped from memory when
//! dropped. There is no unsafe code in this module.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto;
use crate::error::{Error, Result};

/// Length of a serialized public signature key.
pub const SIGN_PUBLIC_LEN: usize = 32;

/// Length of a serialized secret signature key (seed followed by the
/// public half, the usual Ed25519 keypair encoding).
pub const SIGN_SECRET_LEN: usize = 64;

/// Length of a detached Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// Length of a symmetric channel key.
pub const SYMMETRIC_KEY_LEN: usize = 32;

// ── Public identity ───────────────────────────────────────────────────────────

/// A long-term Ed25519 public key — the identity of a host or a user.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignPublic(pub [u8; SIGN_PUBLIC_LEN]);

impl SignPublic {
    pub fn from_bytes(bytes: [u8; SIGN_PUBLIC_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a hex-encoded public key, as found in config files and
    /// capability strings.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| Error::Config(format!("malformed public key hex: {e}")))?;
        let bytes: [u8; SIGN_PUBLIC_LEN] = bytes
            .try_into()
            .map_err(|_| Error::Config("public key must be 32 bytes".into()))?;
        Ok(Self(bytes))
    }

    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; SIGN_PUBLIC_LEN] {
        &self.0
    }

    /// Verify a detached signature over `message`.
    ///
    /// The key bytes are validated as a curve point here, on use — a peer
    /// can hand us arbitrary bytes in a handshake frame.
    pub fn verify(&self, message: &[u8], signature: &[u8; SIGNATURE_LEN]) -> Result<()> {
        let key = VerifyingKey::from_bytes(&self.0)
            .map_err(|_| Error::Crypto("malformed public signature key".into()))?;
        key.verify(message, &Signature::from_bytes(signature))
            .map_err(|_| Error::Crypto("signature verification failed".into()))
    }
}

impl std::fmt::Display for SignPublic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.hex())
    }
}

impl std::fmt::Debug for SignPublic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SignPublic({})", &self.hex()[..16])
    }
}

// ── Keypair ───────────────────────────────────────────────────────────────────

/// A long-term Ed25519 signature keypair.
///
/// Loaded once at startup and shared by reference; the secret half is
/// zeroized when the pair is dropped.
pub struct SignKeyPair {
    secret: SigningKey,
    pub public: SignPublic,
}

impl SignKeyPair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let secret = SigningKey::generate(&mut OsRng);
        let public = SignPublic(secret.verifying_key().to_bytes());
        Self { secret, public }
    }

    /// Load a keypair from its hex-encoded 64-byte secret form.
    pub fn from_secret_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| Error::Config(format!("malformed secret key hex: {e}")))?;
        let bytes: [u8; SIGN_SECRET_LEN] = bytes
            .try_into()
            .map_err(|_| Error::Config("secret key must be 64 bytes".into()))?;
        let secret = SigningKey::from_keypair_bytes(&bytes)
            .map_err(|_| Error::Config("inconsistent secret key".into()))?;
        let public = SignPublic(secret.verifying_key().to_bytes());
        Ok(Self { secret, public })
    }

    /// Serialize the secret half for a config file. 64 bytes of hex.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret.to_keypair_bytes())
    }

    /// Detached signature over `message`.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.secret.sign(message).to_bytes()
    }
}

// ── Symmetric key ─────────────────────────────────────────────────────────────

/// A 32-byte symmetric channel key, derived from a handshake or generated
/// directly for tests and benchmarks.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_LEN]);

impl SymmetricKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; SYMMETRIC_KEY_LEN];
        crypto::random_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_LEN] {
        &self.0
    }
}
