//! Client protocol — the connecting side of the server's command machine.
//!
//! Every command runs on a freshly handshaked channel: send the
//! `ConnectionInitiation`, then the command body, then read the framed ack.
//! The server acks every command with a `SessionResult` before any payload
//! reply, so failures always parse.

use tokio::net::TcpStream;

use crate::cap::Capability;
use crate::channel::Channel;
use crate::error::Result;
use crate::handshake;
use crate::keys::{SignKeyPair, SignPublic};
use crate::proto::{
    Command, ConnectionInitiation, ServiceDescription, SessionInitiation, SessionMessage,
    SessionRequest, SessionResult, SessionTermination,
};

/// Open a TCP connection to `host:port` and run the handshake against the
/// expected server identity. The returned channel is in symmetric mode.
pub async fn connect(
    host: &str,
    port: u16,
    keys: &SignKeyPair,
    remote: &SignPublic,
    blocklen: usize,
) -> Result<Channel> {
    let stream = TcpStream::connect((host, port)).await?;
    let mut channel = Channel::new_stream(stream, blocklen)?;
    handshake::initiate(&mut channel, keys, remote).await?;
    Ok(channel)
}

async fn read_ack(channel: &mut Channel) -> Result<()> {
    channel.read_message::<SessionResult>().await?.into_result()
}

/// Ask the server what it exposes on this port.
pub async fn query(channel: &mut Channel) -> Result<ServiceDescription> {
    channel
        .write_message(&ConnectionInitiation {
            command: Command::Query,
        })
        .await?;
    read_ack(channel).await?;
    channel.read_message().await
}

/// Request a session with service-specific parameters. Returns the session
/// identifier and the capability the server delegated to us.
pub async fn request_session(
    channel: &mut Channel,
    parameters: Vec<u8>,
) -> Result<(u32, Capability)> {
    channel
        .write_message(&ConnectionInitiation {
            command: Command::Request,
        })
        .await?;
    channel.write_message(&SessionRequest { parameters }).await?;
    read_ack(channel).await?;
    let msg: SessionMessage = channel.read_message().await?;
    Ok((msg.identifier, msg.cap))
}

/// Connect to a previously requested session. On success the session is
/// consumed server-side and the channel is ready for the service plugin's
/// client half.
pub async fn start_session(
    channel: &mut Channel,
    identifier: u32,
    cap: &Capability,
) -> Result<()> {
    channel
        .write_message(&ConnectionInitiation {
            command: Command::Connect,
        })
        .await?;
    channel
        .write_message(&SessionInitiation {
            identifier,
            cap: cap.clone(),
        })
        .await?;
    read_ack(channel).await
}

/// Terminate a session. Returns once the server acks the framed return
/// code; terminating an already-gone session is a success.
pub async fn terminate(channel: &mut Channel, identifier: u32, cap: &Capability) -> Result<()> {
    channel
        .write_message(&ConnectionInitiation {
            command: Command::Terminate,
        })
        .await?;
    channel
        .write_message(&SessionTermination {
            identifier,
            cap: cap.clone(),
        })
        .await?;
    read_ack(channel).await
}
