//! Mutual-identity handshake — ephemeral X25519 exchange, authenticated by
//! each side's long-term Ed25519 key.
//!
//! Each side generates an ephemeral keypair, signs the ephemeral public key
//! with its long-term key, and sends a constant-size [`SessionKey`] frame.
//! The initiator sends first and then reads; the responder reads first. Both
//! derive `K = hash(q ‖ epk_initiator ‖ epk_responder)` from the shared
//! point and switch the channel into symmetric mode with mirrored nonces.
//!
//! Every failure mode — truncated frame, signature failure, unexpected
//! remote key, degenerate shared point — is fatal: the caller drops the
//! channel. Ephemeral secrets are consumed by the Diffie-Hellman and cannot
//! outlive the exchange.

use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret};
use zerocopy::{AsBytes, FromBytes};

use crate::channel::{Channel, Role};
use crate::crypto::Hasher;
use crate::error::{Error, Result};
use crate::keys::{SignKeyPair, SignPublic, SymmetricKey};
use crate::proto::SessionKey;

const SESSION_KEY_LEN: usize = std::mem::size_of::<SessionKey>();

fn derive_key(
    shared: &SharedSecret,
    initiator_epk: &PublicKey,
    responder_epk: &PublicKey,
) -> SymmetricKey {
    let mut h = Hasher::new();
    h.update(shared.as_bytes());
    h.update(initiator_epk.as_bytes());
    h.update(responder_epk.as_bytes());
    SymmetricKey::from_bytes(h.finalize())
}

fn own_frame(keys: &SignKeyPair, epk: &PublicKey) -> SessionKey {
    SessionKey {
        sign_pk: *keys.public.as_bytes(),
        encrypt_pk: *epk.as_bytes(),
        signature: keys.sign(epk.as_bytes()),
    }
}

async fn read_frame(channel: &mut Channel) -> Result<SessionKey> {
    let raw = channel.read_bytes(SESSION_KEY_LEN).await?;
    SessionKey::read_from(raw.as_slice())
        .ok_or_else(|| Error::Protocol("truncated handshake frame".into()))
}

/// Verify the remote frame and compute the shared secret.
fn accept_frame(esk: EphemeralSecret, frame: &SessionKey) -> Result<(SignPublic, SharedSecret)> {
    let remote_sign = SignPublic::from_bytes(frame.sign_pk);
    remote_sign.verify(&frame.encrypt_pk, &frame.signature)?;

    let shared = esk.diffie_hellman(&PublicKey::from(frame.encrypt_pk));
    if !shared.was_contributory() {
        return Err(Error::Crypto("degenerate shared point".into()));
    }
    Ok((remote_sign, shared))
}

/// Run the handshake as the connecting side.
///
/// `expected_remote` is the server identity the caller believes it is
/// talking to; a mismatch with the presented key is fatal. On success the
/// channel is in symmetric mode.
pub async fn initiate(
    channel: &mut Channel,
    keys: &SignKeyPair,
    expected_remote: &SignPublic,
) -> Result<()> {
    let esk = EphemeralSecret::random_from_rng(OsRng);
    let epk = PublicKey::from(&esk);

    channel.write_bytes(own_frame(keys, &epk).as_bytes()).await?;
    let frame = read_frame(channel).await?;

    let (remote_sign, shared) = accept_frame(esk, &frame)?;
    if remote_sign != *expected_remote {
        return Err(Error::Crypto(format!(
            "remote presented sign key {remote_sign}, expected {expected_remote}"
        )));
    }

    let key = derive_key(&shared, &epk, &PublicKey::from(frame.encrypt_pk));
    channel.enable_encryption(&key, Role::Initiator);
    Ok(())
}

/// Run the handshake as the accepting side. Returns the authenticated
/// remote identity; the caller decides what that identity may do.
pub async fn respond(channel: &mut Channel, keys: &SignKeyPair) -> Result<SignPublic> {
    let esk = EphemeralSecret::random_from_rng(OsRng);
    let epk = PublicKey::from(&esk);

    let frame = read_frame(channel).await?;
    channel.write_bytes(own_frame(keys, &epk).as_bytes()).await?;

    let (remote_sign, shared) = accept_frame(esk, &frame)?;

    let key = derive_key(&shared, &PublicKey::from(frame.encrypt_pk), &epk);
    channel.enable_encryption(&key, Role::Responder);
    Ok(remote_sign)
}
