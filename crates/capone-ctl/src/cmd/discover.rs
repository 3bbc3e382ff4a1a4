//! Probe a host (or broadcast address) for its services.

use capone_core::channel::Channel;
use capone_core::error::{Error, Result};
use capone_core::proto::{AnnounceMessage, DiscoverMessage};
use tokio::net::{lookup_host, UdpSocket};

pub async fn run(address: &str, port: u16, blocklen: usize) -> Result<()> {
    let peer = lookup_host((address, port))
        .await?
        .next()
        .ok_or_else(|| Error::Invalid(format!("cannot resolve '{address}'")))?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    // Allow probing a broadcast address; harmless otherwise.
    let _ = socket.set_broadcast(true);

    let mut channel = Channel::new_datagram(socket, Some(peer), blocklen)?;
    channel.write_message(&DiscoverMessage).await?;
    let announce: AnnounceMessage = channel.read_message().await?;

    println!("{} (version {})", announce.name, announce.version);
    for service in announce.services {
        println!(
            "  {:12} {:14} port {:5}  {} [{}]",
            service.kind, service.name, service.port, service.location, service.category
        );
    }
    Ok(())
}
