//! Framed channel — fixed-block byte transport with optional authenticated
//! encryption.
//!
//! Payloads are split into blocks of a fixed length `B` (40..=4096, default
//! 512). Block 0 starts with a 4-byte big-endian total length; the last block
//! is zero-padded. Under the stream transport blocks are concatenated; under
//! the datagram transport one block is one datagram.
//!
//! With encryption enabled each block is sealed under XSalsa20-Poly1305, so
//! the wire block stays `B` bytes and the plaintext capacity drops to
//! `B - 16`. Each direction owns a 24-byte nonce counter stepped by two per
//! block; the initiator starts at 0/1 and the responder mirrors, so the two
//! endpoints never produce the same nonce under the shared key. A failed
//! decryption is fatal to the channel.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use xsalsa20poly1305::aead::{Aead, KeyInit};
use xsalsa20poly1305::{Key, Nonce, XSalsa20Poly1305, NONCE_SIZE, TAG_SIZE};

use crate::error::{Error, Result};
use crate::keys::SymmetricKey;
use crate::proto::{Message, MAX_MESSAGE_LEN};

/// Smallest usable block length: room for the length prefix and the MAC.
pub const BLOCKLEN_MIN: usize = 40;
pub const BLOCKLEN_MAX: usize = 4096;
pub const BLOCKLEN_DEFAULT: usize = 512;

const LENGTH_PREFIX: usize = 4;

/// Which side of the handshake this endpoint played. Decides the nonce
/// assignment when encryption is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

// ── Nonce counter ─────────────────────────────────────────────────────────────

/// 24-byte little-endian block counter, stepped by two per block.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BlockNonce([u8; NONCE_SIZE]);

impl BlockNonce {
    fn zero() -> Self {
        Self([0u8; NONCE_SIZE])
    }

    fn one() -> Self {
        let mut n = [0u8; NONCE_SIZE];
        n[0] = 1;
        Self(n)
    }

    fn step(&mut self) {
        let mut carry = 2u16;
        for byte in self.0.iter_mut() {
            let sum = *byte as u16 + carry;
            *byte = sum as u8;
            carry = sum >> 8;
            if carry == 0 {
                break;
            }
        }
    }
}

// ── Per-direction crypto state ────────────────────────────────────────────────

/// One direction of an encrypted channel: cipher plus its nonce counter.
struct SecretState {
    cipher: XSalsa20Poly1305,
    nonce: BlockNonce,
}

impl SecretState {
    fn new(key: &SymmetricKey, nonce: BlockNonce) -> Self {
        Self {
            cipher: XSalsa20Poly1305::new(Key::from_slice(key.as_bytes())),
            nonce,
        }
    }

    /// Seal one plaintext block; steps the counter.
    fn seal(&mut self, block: &[u8]) -> Result<Vec<u8>> {
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&self.nonce.0), block)
            .map_err(|_| Error::Crypto("block encryption failed".into()))?;
        self.nonce.step();
        Ok(sealed)
    }

    /// Open one wire block; steps the counter.
    fn open(&mut self, block: &[u8]) -> Result<Vec<u8>> {
        let opened = self
            .cipher
            .decrypt(Nonce::from_slice(&self.nonce.0), block)
            .map_err(|_| Error::Crypto("block decryption failed".into()))?;
        self.nonce.step();
        Ok(opened)
    }
}

fn plaintext_block_len(crypto: &Option<SecretState>, blocklen: usize) -> usize {
    match crypto {
        Some(_) => blocklen - TAG_SIZE,
        None => blocklen,
    }
}

/// Build the plaintext blocks for a payload: length prefix, payload bytes,
/// zero padding to the block size.
fn encode_blocks(payload: &[u8], block_size: usize) -> Vec<Vec<u8>> {
    let mut blocks = Vec::new();
    let mut first = Vec::with_capacity(block_size);
    first.extend_from_slice(&(payload.len() as u32).to_be_bytes());

    let head = payload.len().min(block_size - LENGTH_PREFIX);
    first.extend_from_slice(&payload[..head]);
    first.resize(block_size, 0);
    blocks.push(first);

    let mut offset = head;
    while offset < payload.len() {
        let take = (payload.len() - offset).min(block_size);
        let mut block = payload[offset..offset + take].to_vec();
        block.resize(block_size, 0);
        blocks.push(block);
        offset += take;
    }
    blocks
}

/// Interpret the first plaintext block: announced total length, checked
/// against the caller's bound before any continuation block is consumed.
fn decode_first_block(first: &[u8], block_payload: usize, max: usize) -> Result<(usize, Vec<u8>)> {
    let total = u32::from_be_bytes(first[..LENGTH_PREFIX].try_into().unwrap()) as usize;
    if total > max {
        return Err(Error::Protocol(format!(
            "payload length {total} exceeds bound {max}"
        )));
    }
    let head = total.min(block_payload - LENGTH_PREFIX);
    let mut payload = Vec::with_capacity(total);
    payload.extend_from_slice(&first[LENGTH_PREFIX..LENGTH_PREFIX + head]);
    Ok((total, payload))
}

// ── Stream framing, shared by Channel and its split halves ────────────────────

async fn write_stream_frame<W: AsyncWrite + Unpin>(
    io: &mut W,
    crypto: &mut Option<SecretState>,
    blocklen: usize,
    payload: &[u8],
) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(Error::Invalid("payload exceeds u32 length".into()));
    }
    let blocks = encode_blocks(payload, plaintext_block_len(crypto, blocklen));
    let mut wire = Vec::with_capacity(blocks.len() * blocklen);
    for block in &blocks {
        match crypto {
            Some(state) => wire.extend_from_slice(&state.seal(block)?),
            None => wire.extend_from_slice(block),
        }
    }
    io.write_all(&wire).await?;
    Ok(())
}

async fn read_stream_block<R: AsyncRead + Unpin>(
    io: &mut R,
    crypto: &mut Option<SecretState>,
    blocklen: usize,
) -> Result<Vec<u8>> {
    let mut wire = vec![0u8; blocklen];
    io.read_exact(&mut wire).await?;
    match crypto {
        Some(state) => state.open(&wire),
        None => Ok(wire),
    }
}

async fn read_stream_frame<R: AsyncRead + Unpin>(
    io: &mut R,
    crypto: &mut Option<SecretState>,
    blocklen: usize,
    max: usize,
) -> Result<Vec<u8>> {
    let block_payload = plaintext_block_len(crypto, blocklen);
    let first = read_stream_block(io, crypto, blocklen).await?;
    let (total, mut payload) = decode_first_block(&first, block_payload, max)?;

    while payload.len() < total {
        let block = read_stream_block(io, crypto, blocklen).await?;
        let take = (total - payload.len()).min(block_payload);
        payload.extend_from_slice(&block[..take]);
    }
    Ok(payload)
}

// ── Channel ───────────────────────────────────────────────────────────────────

enum Transport {
    Stream(TcpStream),
    Datagram {
        socket: UdpSocket,
        /// Fixed peer for connected use; the answering side learns the
        /// sender of each frame instead.
        peer: Option<SocketAddr>,
        /// Sender of the frame currently being reassembled.
        last_from: Option<SocketAddr>,
    },
}

/// A connected socket, a transport kind, crypto state, and a block length.
///
/// Not `Sync` by construction — the nonce counters require exclusive access,
/// so at most one task holds a channel at a time.
pub struct Channel {
    transport: Transport,
    send_crypto: Option<SecretState>,
    recv_crypto: Option<SecretState>,
    blocklen: usize,
}

fn check_blocklen(blocklen: usize) -> Result<usize> {
    if !(BLOCKLEN_MIN..=BLOCKLEN_MAX).contains(&blocklen) {
        return Err(Error::Invalid(format!(
            "block length {blocklen} outside {BLOCKLEN_MIN}..={BLOCKLEN_MAX}"
        )));
    }
    Ok(blocklen)
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("blocklen", &self.blocklen)
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub fn new_stream(stream: TcpStream, blocklen: usize) -> Result<Self> {
        Ok(Self {
            transport: Transport::Stream(stream),
            send_crypto: None,
            recv_crypto: None,
            blocklen: check_blocklen(blocklen)?,
        })
    }

    /// Datagram channel. With `peer` set the channel only talks to that
    /// address; without, it answers whoever sent the last frame.
    pub fn new_datagram(
        socket: UdpSocket,
        peer: Option<SocketAddr>,
        blocklen: usize,
    ) -> Result<Self> {
        Ok(Self {
            transport: Transport::Datagram {
                socket,
                peer,
                last_from: None,
            },
            send_crypto: None,
            recv_crypto: None,
            blocklen: check_blocklen(blocklen)?,
        })
    }

    pub fn blocklen(&self) -> usize {
        self.blocklen
    }

    pub fn is_encrypted(&self) -> bool {
        self.send_crypto.is_some()
    }

    /// The remote address, where the transport knows one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.transport {
            Transport::Stream(stream) => stream.peer_addr().ok(),
            Transport::Datagram {
                peer, last_from, ..
            } => peer.or(*last_from),
        }
    }

    /// Switch the channel into symmetric-encryption mode.
    ///
    /// The initiator sends under nonce 0 and receives under 1; the
    /// responder mirrors. Must never be re-applied to a live channel: a key
    /// must not be reused against fresh counters.
    pub fn enable_encryption(&mut self, key: &SymmetricKey, role: Role) {
        let (local, remote) = match role {
            Role::Initiator => (BlockNonce::zero(), BlockNonce::one()),
            Role::Responder => (BlockNonce::one(), BlockNonce::zero()),
        };
        self.send_crypto = Some(SecretState::new(key, local));
        self.recv_crypto = Some(SecretState::new(key, remote));
    }

    // ── Byte transfer ────────────────────────────────────────────────────────

    pub async fn write_bytes(&mut self, payload: &[u8]) -> Result<()> {
        match &mut self.transport {
            Transport::Stream(stream) => {
                write_stream_frame(stream, &mut self.send_crypto, self.blocklen, payload).await
            }
            Transport::Datagram {
                socket,
                peer,
                last_from,
            } => {
                if payload.len() > u32::MAX as usize {
                    return Err(Error::Invalid("payload exceeds u32 length".into()));
                }
                let to = peer
                    .or(*last_from)
                    .ok_or_else(|| Error::Protocol("datagram channel has no peer".into()))?;
                let block_payload = plaintext_block_len(&self.send_crypto, self.blocklen);
                for block in encode_blocks(payload, block_payload) {
                    let wire = match &mut self.send_crypto {
                        Some(state) => state.seal(&block)?,
                        None => block,
                    };
                    socket.send_to(&wire, to).await?;
                }
                Ok(())
            }
        }
    }

    /// Read one payload of at most `max` bytes. A longer announced length
    /// is rejected before any continuation block is consumed.
    pub async fn read_bytes(&mut self, max: usize) -> Result<Vec<u8>> {
        match &mut self.transport {
            Transport::Stream(stream) => {
                read_stream_frame(stream, &mut self.recv_crypto, self.blocklen, max).await
            }
            Transport::Datagram {
                socket,
                peer,
                last_from,
            } => {
                let blocklen = self.blocklen;
                let block_payload = plaintext_block_len(&self.recv_crypto, blocklen);

                let first =
                    recv_datagram_block(socket, peer, last_from, &mut self.recv_crypto, blocklen, true)
                        .await?;
                let (total, mut payload) = decode_first_block(&first, block_payload, max)?;

                while payload.len() < total {
                    let block = recv_datagram_block(
                        socket,
                        peer,
                        last_from,
                        &mut self.recv_crypto,
                        blocklen,
                        false,
                    )
                    .await?;
                    let take = (total - payload.len()).min(block_payload);
                    payload.extend_from_slice(&block[..take]);
                }
                Ok(payload)
            }
        }
    }

    // ── Structured messages ──────────────────────────────────────────────────

    pub async fn write_message<T: Message>(&mut self, msg: &T) -> Result<()> {
        self.write_bytes(&msg.encode()).await
    }

    pub async fn read_message<T: Message>(&mut self) -> Result<T> {
        let raw = self.read_bytes(MAX_MESSAGE_LEN).await?;
        T::decode(&raw)
    }

    // ── Splitting ────────────────────────────────────────────────────────────

    /// Split a stream channel into independently-owned halves. Each half
    /// takes its direction's crypto state with it.
    pub fn split(self) -> Result<(ChannelReader, ChannelWriter)> {
        let Channel {
            transport,
            send_crypto,
            recv_crypto,
            blocklen,
        } = self;
        let stream = match transport {
            Transport::Stream(stream) => stream,
            Transport::Datagram { .. } => {
                return Err(Error::Protocol("cannot split a datagram channel".into()))
            }
        };
        let (read_half, write_half) = stream.into_split();
        Ok((
            ChannelReader {
                half: read_half,
                crypto: recv_crypto,
                blocklen,
            },
            ChannelWriter {
                half: write_half,
                crypto: send_crypto,
                blocklen,
            },
        ))
    }
}

/// Receive one block from the datagram socket, dropping datagrams from
/// unexpected senders. Continuation blocks must come from the frame's
/// sender.
async fn recv_datagram_block(
    socket: &mut UdpSocket,
    peer: &Option<SocketAddr>,
    last_from: &mut Option<SocketAddr>,
    crypto: &mut Option<SecretState>,
    blocklen: usize,
    first: bool,
) -> Result<Vec<u8>> {
    let mut wire = vec![0u8; blocklen + 1];
    loop {
        let (n, from) = socket.recv_from(&mut wire).await?;
        let expected = if first { *peer } else { peer.or(*last_from) };
        if let Some(expected) = expected {
            if from != expected {
                continue;
            }
        }
        if n != blocklen {
            return Err(Error::Protocol(format!(
                "datagram of {n} bytes is not one block of {blocklen}"
            )));
        }
        *last_from = Some(from);
        wire.truncate(n);
        break;
    }
    match crypto {
        Some(state) => state.open(&wire),
        None => Ok(wire),
    }
}

// ── Split halves ──────────────────────────────────────────────────────────────

pub struct ChannelReader {
    half: OwnedReadHalf,
    crypto: Option<SecretState>,
    blocklen: usize,
}

impl ChannelReader {
    pub async fn read_bytes(&mut self, max: usize) -> Result<Vec<u8>> {
        read_stream_frame(&mut self.half, &mut self.crypto, self.blocklen, max).await
    }
}

pub struct ChannelWriter {
    half: OwnedWriteHalf,
    crypto: Option<SecretState>,
    blocklen: usize,
}

impl ChannelWriter {
    pub async fn write_bytes(&mut self, payload: &[u8]) -> Result<()> {
        write_stream_frame(&mut self.half, &mut self.crypto, self.blocklen, payload).await
    }
}

// ── Relay ─────────────────────────────────────────────────────────────────────

/// Chunk size for pumping descriptor data onto the channel.
const RELAY_READ_LEN: usize = 4096;

enum RelayEvent {
    Data(Vec<u8>),
    Closed,
}

/// Bidirectional pump between a stream channel and local descriptors.
///
/// Payloads received from the channel are written to `first`; bytes read
/// from any source are framed and sent on the channel. Terminates when the
/// channel or any source closes. The pump owns the channel exclusively for
/// its lifetime.
pub async fn relay<W>(
    channel: Channel,
    mut first: W,
    sources: Vec<Box<dyn AsyncRead + Send + Unpin>>,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, mut writer) = channel.split()?;
    let (tx, mut rx) = mpsc::channel::<RelayEvent>(16);

    // Channel -> first descriptor, on its own task so a half-read block is
    // never abandoned by select.
    let mut inbound = tokio::spawn(async move {
        loop {
            match reader.read_bytes(MAX_MESSAGE_LEN).await {
                Ok(payload) => {
                    if first.write_all(&payload).await.is_err() {
                        return Ok(());
                    }
                    let _ = first.flush().await;
                }
                Err(e) => return close_result(e),
            }
        }
    });

    let mut pumps = Vec::new();
    for mut source in sources {
        let tx = tx.clone();
        pumps.push(tokio::spawn(async move {
            let mut buf = vec![0u8; RELAY_READ_LEN];
            loop {
                match source.read(&mut buf).await {
                    Ok(0) | Err(_) => {
                        let _ = tx.send(RelayEvent::Closed).await;
                        return;
                    }
                    Ok(n) => {
                        if tx.send(RelayEvent::Data(buf[..n].to_vec())).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }));
    }
    drop(tx);

    let outcome = loop {
        tokio::select! {
            inbound_result = &mut inbound => {
                break inbound_result.unwrap_or(Ok(()));
            }
            event = rx.recv() => match event {
                Some(RelayEvent::Data(data)) => {
                    if let Err(e) = writer.write_bytes(&data).await {
                        break close_result(e);
                    }
                }
                Some(RelayEvent::Closed) | None => break Ok(()),
            },
        }
    };

    inbound.abort();
    for pump in &pumps {
        pump.abort();
    }
    outcome
}

/// A peer hanging up mid-relay is termination, not failure; a crypto fault
/// is still surfaced.
fn close_result(err: Error) -> Result<()> {
    match err {
        Error::Io(_) => Ok(()),
        other => Err(other),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
