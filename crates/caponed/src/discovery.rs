//! LAN discovery responder.
//!
//! Answers `DiscoverMessage` probes with an `AnnounceMessage` naming this
//! host and its services, on UDP and TCP (default port 6667). Discovery is
//! pre-identity: probes and announces travel unencrypted. A malformed probe
//! is logged and skipped; the responder never dies over one peer.

use capone_core::channel::Channel;
use capone_core::proto::{AnnounceMessage, DiscoverMessage};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::broadcast;

pub async fn run_udp(
    socket: UdpSocket,
    announce: AnnounceMessage,
    blocklen: usize,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut channel = match Channel::new_datagram(socket, None, blocklen) {
        Ok(channel) => channel,
        Err(e) => {
            tracing::error!(error = %e, "discovery responder failed to start");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("udp discovery responder shutting down");
                return;
            }
            probe = channel.read_message::<DiscoverMessage>() => {
                match probe {
                    Ok(DiscoverMessage) => {
                        tracing::debug!(peer = ?channel.peer_addr(), "discovery probe");
                        if let Err(e) = channel.write_message(&announce).await {
                            tracing::warn!(error = %e, "failed to send announce");
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "malformed discovery probe, ignoring");
                    }
                }
            }
        }
    }
}

pub async fn run_tcp(
    listener: TcpListener,
    announce: AnnounceMessage,
    blocklen: usize,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("tcp discovery responder shutting down");
                return;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "discovery accept failed");
                        continue;
                    }
                };
                let announce = announce.clone();
                tokio::spawn(async move {
                    if let Err(e) = answer_tcp(stream, announce, blocklen).await {
                        tracing::debug!(peer = %peer, error = %e, "discovery probe failed");
                    }
                });
            }
        }
    }
}

async fn answer_tcp(
    stream: tokio::net::TcpStream,
    announce: AnnounceMessage,
    blocklen: usize,
) -> capone_core::Result<()> {
    let mut channel = Channel::new_stream(stream, blocklen)?;
    let DiscoverMessage = channel.read_message::<DiscoverMessage>().await?;
    channel.write_message(&announce).await
}
