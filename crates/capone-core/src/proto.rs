//! Capone wire format — the messages both ends of a connection exchange.
//!
//! These types ARE the protocol. Every message is a tag byte followed by its
//! fields: integers big-endian, strings as u16 length + UTF-8, byte blobs as
//! u32 length, repeated groups as a u16 count. Decoding rejects truncation,
//! unknown tags, and trailing bytes.
//!
//! The one exception is [`SessionKey`]: the handshake frame is a fixed-layout
//! 128-byte struct so the exchange is constant-size on the wire, with
//! zerocopy derives for allocation-free serialization. There is no unsafe
//! code in this module.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::cap::Capability;
use crate::error::{Error, Result};
use crate::keys::SignPublic;

/// Protocol-level version string, advertised in discovery announcements.
pub const PROTOCOL_VERSION: &str = "0.0.1";

/// Upper bound on a structured message, enforced by `read_message`.
pub const MAX_MESSAGE_LEN: usize = 64 * 1024;

// ── Handshake frame ───────────────────────────────────────────────────────────

/// The key-exchange frame, sent once by each side before encryption starts.
///
/// `signature` covers `encrypt_pk` and is a fixed 64-byte field (right-padded
/// were a shorter signature scheme ever used) so the frame is constant-size.
///
/// Wire size: 128 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct SessionKey {
    /// Long-term Ed25519 public key of the sender.
    pub sign_pk: [u8; 32],
    /// Ephemeral X25519 public key for this handshake.
    pub encrypt_pk: [u8; 32],
    /// Ed25519 signature over `encrypt_pk` by `sign_pk`.
    pub signature: [u8; 64],
}

assert_eq_size!(SessionKey, [u8; 128]);

// ── Commands ──────────────────────────────────────────────────────────────────

/// Connection command, carried in a [`ConnectionInitiation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Query = 0,
    Request = 1,
    Connect = 2,
    Terminate = 3,
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Command::Query),
            1 => Ok(Command::Request),
            2 => Ok(Command::Connect),
            3 => Ok(Command::Terminate),
            other => Err(Error::Invalid(format!("unknown command {other}"))),
        }
    }
}

// ── Field codecs ──────────────────────────────────────────────────────────────

fn need(buf: &Bytes, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(Error::Protocol("truncated message".into()));
    }
    Ok(())
}

pub fn put_str(buf: &mut BytesMut, s: &str) {
    debug_assert!(s.len() <= u16::MAX as usize);
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

pub fn get_str(buf: &mut Bytes) -> Result<String> {
    need(buf, 2)?;
    let len = buf.get_u16() as usize;
    need(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| Error::Protocol("string is not UTF-8".into()))
}

pub fn put_bytes(buf: &mut BytesMut, b: &[u8]) {
    debug_assert!(b.len() <= u32::MAX as usize);
    buf.put_u32(b.len() as u32);
    buf.put_slice(b);
}

pub fn get_bytes(buf: &mut Bytes) -> Result<Vec<u8>> {
    need(buf, 4)?;
    let len = buf.get_u32() as usize;
    need(buf, len)?;
    Ok(buf.split_to(len).to_vec())
}

fn get_u32(buf: &mut Bytes) -> Result<u32> {
    need(buf, 4)?;
    Ok(buf.get_u32())
}

fn get_identity(buf: &mut Bytes) -> Result<SignPublic> {
    need(buf, 32)?;
    let mut raw = [0u8; 32];
    buf.copy_to_slice(&mut raw);
    Ok(SignPublic::from_bytes(raw))
}

// ── Message trait ─────────────────────────────────────────────────────────────

/// A structured wire message: tag byte plus field codecs.
pub trait Message: Sized {
    const TAG: u8;

    fn encode_body(&self, buf: &mut BytesMut);
    fn decode_body(buf: &mut Bytes) -> Result<Self>;

    fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(Self::TAG);
        self.encode_body(&mut buf);
        buf.to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut buf = Bytes::copy_from_slice(bytes);
        if !buf.has_remaining() {
            return Err(Error::Protocol("empty message".into()));
        }
        let tag = buf.get_u8();
        if tag != Self::TAG {
            return Err(Error::Protocol(format!(
                "unexpected message tag {tag}, wanted {}",
                Self::TAG
            )));
        }
        let msg = Self::decode_body(&mut buf)?;
        if buf.has_remaining() {
            return Err(Error::Protocol("trailing bytes after message".into()));
        }
        Ok(msg)
    }
}

// ── Connection messages ───────────────────────────────────────────────────────

/// First message after the handshake: which command this connection issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInitiation {
    pub command: Command,
}

impl Message for ConnectionInitiation {
    const TAG: u8 = 1;

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u8(self.command as u8);
    }

    fn decode_body(buf: &mut Bytes) -> Result<Self> {
        need(buf, 1)?;
        Ok(Self {
            command: Command::try_from(buf.get_u8())?,
        })
    }
}

/// Answer to a Query: what this host exposes on this port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescription {
    pub name: String,
    pub category: String,
    /// The service type, e.g. `exec`. Selects the plugin on both ends.
    pub kind: String,
    pub version: String,
    pub location: String,
    pub port: String,
}

impl Message for ServiceDescription {
    const TAG: u8 = 2;

    fn encode_body(&self, buf: &mut BytesMut) {
        put_str(buf, &self.name);
        put_str(buf, &self.category);
        put_str(buf, &self.kind);
        put_str(buf, &self.version);
        put_str(buf, &self.location);
        put_str(buf, &self.port);
    }

    fn decode_body(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            name: get_str(buf)?,
            category: get_str(buf)?,
            kind: get_str(buf)?,
            version: get_str(buf)?,
            location: get_str(buf)?,
            port: get_str(buf)?,
        })
    }
}

/// Body of a Request: service-specific session parameters, parsed by the
/// plugin on both ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub parameters: Vec<u8>,
}

impl Message for SessionRequest {
    const TAG: u8 = 3;

    fn encode_body(&self, buf: &mut BytesMut) {
        put_bytes(buf, &self.parameters);
    }

    fn decode_body(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            parameters: get_bytes(buf)?,
        })
    }
}

/// Answer to a Request: the new session and the capability delegated to the
/// requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMessage {
    pub identifier: u32,
    pub cap: Capability,
}

impl Message for SessionMessage {
    const TAG: u8 = 4;

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u32(self.identifier);
        self.cap.encode_body(buf);
    }

    fn decode_body(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            identifier: get_u32(buf)?,
            cap: Capability::decode_body(buf)?,
        })
    }
}

/// Body of a Connect: which session, proven by which capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInitiation {
    pub identifier: u32,
    pub cap: Capability,
}

impl Message for SessionInitiation {
    const TAG: u8 = 5;

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u32(self.identifier);
        self.cap.encode_body(buf);
    }

    fn decode_body(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            identifier: get_u32(buf)?,
            cap: Capability::decode_body(buf)?,
        })
    }
}

/// Framed return code. Zero is success; anything else is an error class
/// from [`Error::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionResult {
    pub result: i32,
}

impl SessionResult {
    pub fn ok() -> Self {
        Self { result: 0 }
    }

    pub fn from_error(err: &Error) -> Self {
        Self { result: err.code() }
    }

    /// Turn a received result back into `Ok(())` or the reported class.
    pub fn into_result(self) -> Result<()> {
        if self.result == 0 {
            Ok(())
        } else {
            Err(Error::from_code(self.result))
        }
    }
}

impl Message for SessionResult {
    const TAG: u8 = 6;

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_i32(self.result);
    }

    fn decode_body(buf: &mut Bytes) -> Result<Self> {
        need(buf, 4)?;
        Ok(Self {
            result: buf.get_i32(),
        })
    }
}

/// Body of a Terminate: which session, proven by which capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTermination {
    pub identifier: u32,
    pub cap: Capability,
}

impl Message for SessionTermination {
    const TAG: u8 = 7;

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u32(self.identifier);
        self.cap.encode_body(buf);
    }

    fn decode_body(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            identifier: get_u32(buf)?,
            cap: Capability::decode_body(buf)?,
        })
    }
}

// ── Discovery ─────────────────────────────────────────────────────────────────

/// Probe sent to the discovery port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiscoverMessage;

impl Message for DiscoverMessage {
    const TAG: u8 = 8;

    fn encode_body(&self, _buf: &mut BytesMut) {}

    fn decode_body(_buf: &mut Bytes) -> Result<Self> {
        Ok(Self)
    }
}

/// Answer to a probe: who this host is and what it exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceMessage {
    pub name: String,
    pub version: String,
    pub services: Vec<ServiceDescription>,
}

impl Message for AnnounceMessage {
    const TAG: u8 = 9;

    fn encode_body(&self, buf: &mut BytesMut) {
        put_str(buf, &self.name);
        put_str(buf, &self.version);
        buf.put_u16(self.services.len() as u16);
        for service in &self.services {
            service.encode_body(buf);
        }
    }

    fn decode_body(buf: &mut Bytes) -> Result<Self> {
        let name = get_str(buf)?;
        let version = get_str(buf)?;
        need(buf, 2)?;
        let count = buf.get_u16() as usize;
        let mut services = Vec::with_capacity(count);
        for _ in 0..count {
            services.push(ServiceDescription::decode_body(buf)?);
        }
        Ok(Self {
            name,
            version,
            services,
        })
    }
}

// ── Capability brokering ──────────────────────────────────────────────────────

/// Forwarded by the broker to a registrant: `requester` wants a session
/// with `parameters` on the service at `service_address:service_port`,
/// whose host identity is `service_identity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRequest {
    pub service_identity: SignPublic,
    pub service_address: String,
    pub service_port: String,
    pub parameters: Vec<u8>,
    pub requester: SignPublic,
}

impl Message for CapabilityRequest {
    const TAG: u8 = 10;

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_slice(self.service_identity.as_bytes());
        put_str(buf, &self.service_address);
        put_str(buf, &self.service_port);
        put_bytes(buf, &self.parameters);
        buf.put_slice(self.requester.as_bytes());
    }

    fn decode_body(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            service_identity: get_identity(buf)?,
            service_address: get_str(buf)?,
            service_port: get_str(buf)?,
            parameters: get_bytes(buf)?,
            requester: get_identity(buf)?,
        })
    }
}

/// A capability obtained on someone's behalf, relayed back through the
/// broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityMessage {
    pub identifier: u32,
    pub cap: Capability,
    pub service_address: String,
    pub service_port: String,
}

impl Message for CapabilityMessage {
    const TAG: u8 = 11;

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u32(self.identifier);
        self.cap.encode_body(buf);
        put_str(buf, &self.service_address);
        put_str(buf, &self.service_port);
    }

    fn decode_body(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            identifier: get_u32(buf)?,
            cap: Capability::decode_body(buf)?,
            service_address: get_str(buf)?,
            service_port: get_str(buf)?,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
