//! Capabilities — unforgeable session tokens with verifiable delegation.
//!
//! A root capability is a random 32-byte secret held only by the service.
//! Each delegation appends `(identity, rights)` to the chain and replaces
//! the secret with `hash(parent_secret ‖ be32(rights) ‖ identity)`, so a
//! verifier holding the root can replay the chain and compare secrets.
//! Rights only ever narrow along a chain — delegation cannot grant a right
//! the parent did not hold.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::crypto::{self, Hasher};
use crate::error::{Error, Result};
use crate::keys::{SignPublic, SIGN_PUBLIC_LEN};

/// Length of a capability secret.
pub const SECRET_LEN: usize = 32;

bitflags! {
    /// Rights bitmask. Future rights are additive; unknown bits received on
    /// the wire are preserved so a newer peer's chains still replay.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rights: u32 {
        /// Connect to the session and drive the service.
        const EXEC = 1 << 0;
        /// Terminate the session.
        const TERM = 1 << 1;
    }
}

impl Rights {
    /// String-form letters, `x` for EXEC and `t` for TERM.
    fn letters(&self) -> String {
        let mut s = String::new();
        if self.contains(Rights::EXEC) {
            s.push('x');
        }
        if self.contains(Rights::TERM) {
            s.push('t');
        }
        s
    }

    fn from_letters(letters: &str) -> Result<Rights> {
        let mut rights = Rights::empty();
        for c in letters.chars() {
            match c {
                'x' => rights |= Rights::EXEC,
                't' => rights |= Rights::TERM,
                other => return Err(Error::Invalid(format!("unknown right letter '{other}'"))),
            }
        }
        Ok(rights)
    }
}

/// One delegation step: who received the capability, with what rights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainEntry {
    pub identity: SignPublic,
    pub rights: Rights,
}

/// A capability: secret plus delegation chain.
///
/// Chain length zero is the *root* held by the service; it is never
/// transmitted and never accepted as a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    secret: [u8; SECRET_LEN],
    chain: Vec<ChainEntry>,
}

fn derive_secret(parent: &[u8; SECRET_LEN], rights: Rights, identity: &SignPublic) -> blake3::Hash {
    let mut h = Hasher::new();
    h.update(parent);
    h.update(&rights.bits().to_be_bytes());
    h.update(identity.as_bytes());
    h.finalize_ct()
}

impl Capability {
    /// Create a root capability with a fresh random secret.
    pub fn root() -> Self {
        let mut secret = [0u8; SECRET_LEN];
        crypto::random_bytes(&mut secret);
        Self {
            secret,
            chain: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_parts(secret: [u8; SECRET_LEN], chain: Vec<ChainEntry>) -> Self {
        Self { secret, chain }
    }

    /// Rights held at the tail of the chain. The root implicitly holds
    /// everything.
    pub fn tail_rights(&self) -> Rights {
        self.chain.last().map(|e| e.rights).unwrap_or(Rights::all())
    }

    /// Identity at the tail of the chain, if any delegation happened.
    pub fn tail_identity(&self) -> Option<&SignPublic> {
        self.chain.last().map(|e| &e.identity)
    }

    pub fn chain(&self) -> &[ChainEntry] {
        &self.chain
    }

    pub fn is_root(&self) -> bool {
        self.chain.is_empty()
    }

    /// Delegate this capability to `identity`, restricted to `rights`.
    ///
    /// Fails with Unauthorized if `rights` is not a subset of what the tail
    /// of this chain holds.
    pub fn delegate(&self, rights: Rights, identity: SignPublic) -> Result<Capability> {
        if !self.tail_rights().contains(rights) {
            return Err(Error::Unauthorized);
        }
        let secret = *derive_secret(&self.secret, rights, &identity).as_bytes();
        let mut chain = self.chain.clone();
        chain.push(ChainEntry { identity, rights });
        Ok(Capability { secret, chain })
    }

    /// Verify `reference` against this root for `invoker` holding
    /// `required`.
    ///
    /// Replays the chain from the root secret, narrowing rights at each
    /// step, and compares the reconstructed secret in constant time.
    pub fn verify(
        &self,
        reference: &Capability,
        invoker: &SignPublic,
        required: Rights,
    ) -> Result<()> {
        let tail = match reference.chain.last() {
            Some(tail) => tail,
            // A root is never presented as a reference.
            None => return Err(Error::Unauthorized),
        };
        if tail.identity != *invoker {
            return Err(Error::Unauthorized);
        }

        let mut secret = self.secret;
        let mut held = Rights::all();
        let mut reconstructed = None;
        for entry in &reference.chain {
            if !held.contains(entry.rights) {
                return Err(Error::Unauthorized);
            }
            let next = derive_secret(&secret, entry.rights, &entry.identity);
            secret = *next.as_bytes();
            held = entry.rights;
            reconstructed = Some(next);
        }

        // blake3::Hash compares in constant time.
        let matches = reconstructed
            .map(|h| h == reference.secret)
            .unwrap_or(false);
        if !matches || !held.contains(required) {
            return Err(Error::Unauthorized);
        }
        Ok(())
    }

    // ── Wire codec ───────────────────────────────────────────────────────────

    pub(crate) fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.secret);
        buf.put_u16(self.chain.len() as u16);
        for entry in &self.chain {
            buf.put_slice(entry.identity.as_bytes());
            buf.put_u32(entry.rights.bits());
        }
    }

    pub(crate) fn decode_body(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < SECRET_LEN + 2 {
            return Err(Error::Protocol("truncated capability".into()));
        }
        let mut secret = [0u8; SECRET_LEN];
        buf.copy_to_slice(&mut secret);
        let count = buf.get_u16() as usize;
        let mut chain = Vec::with_capacity(count);
        for _ in 0..count {
            if buf.remaining() < SIGN_PUBLIC_LEN + 4 {
                return Err(Error::Protocol("truncated capability chain".into()));
            }
            let mut identity = [0u8; SIGN_PUBLIC_LEN];
            buf.copy_to_slice(&mut identity);
            let rights = Rights::from_bits_retain(buf.get_u32());
            chain.push(ChainEntry {
                identity: SignPublic::from_bytes(identity),
                rights,
            });
        }
        Ok(Self { secret, chain })
    }
}

// ── String form ───────────────────────────────────────────────────────────────

impl fmt::Display for Capability {
    /// `hex(secret)("|" hex(identity) ":" letters)*` — the form the CLI
    /// passes between invocations.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.secret))?;
        for entry in &self.chain {
            write!(f, "|{}:{}", entry.identity.hex(), entry.rights.letters())?;
        }
        Ok(())
    }
}

impl FromStr for Capability {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('|');
        let secret_hex = parts.next().unwrap_or("");
        let secret_bytes = hex::decode(secret_hex)
            .map_err(|e| Error::Invalid(format!("malformed capability secret: {e}")))?;
        let secret: [u8; SECRET_LEN] = secret_bytes
            .try_into()
            .map_err(|_| Error::Invalid("capability secret must be 32 bytes".into()))?;

        let mut chain = Vec::new();
        let mut held = Rights::all();
        for part in parts {
            let (identity_hex, letters) = part
                .split_once(':')
                .ok_or_else(|| Error::Invalid("missing ':' after chain identity".into()))?;
            let identity = SignPublic::from_hex(identity_hex)
                .map_err(|_| Error::Invalid("malformed chain identity".into()))?;
            let rights = Rights::from_letters(letters)?;
            if !held.contains(rights) {
                return Err(Error::Invalid("rights expand along the chain".into()));
            }
            held = rights;
            chain.push(ChainEntry { identity, rights });
        }
        Ok(Self { secret, chain })
    }
}
