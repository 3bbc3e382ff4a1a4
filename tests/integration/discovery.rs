//! Discovery responder over UDP and TCP.

use crate::*;

use std::net::SocketAddr;

use capone_core::channel::Channel;
use capone_core::proto::{AnnounceMessage, DiscoverMessage, PROTOCOL_VERSION};
use tokio::net::{TcpStream, UdpSocket};

/// The server binds discovery on the wildcard address; probe via loopback.
fn loopback(addr: SocketAddr) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], addr.port()))
}

fn check_announce(announce: &AnnounceMessage, host: &TestHost) {
    assert_eq!(announce.name, "testhost");
    assert_eq!(announce.version, PROTOCOL_VERSION);
    assert_eq!(announce.services.len(), 2);
    let test = &announce.services[0];
    assert_eq!(test.name, "Foo");
    assert_eq!(test.kind, "test");
    assert_eq!(test.port, host.test_addr.port().to_string());
}

#[tokio::test]
async fn udp_probe_gets_an_announce() {
    let host = start_host().await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut channel =
        Channel::new_datagram(socket, Some(loopback(host.discovery_udp)), TEST_BLOCKLEN).unwrap();

    channel.write_message(&DiscoverMessage).await.unwrap();
    let announce: AnnounceMessage = channel.read_message().await.unwrap();
    check_announce(&announce, &host);

    host.stop();
}

#[tokio::test]
async fn tcp_probe_gets_an_announce() {
    let host = start_host().await;

    let stream = TcpStream::connect(loopback(host.discovery_tcp)).await.unwrap();
    let mut channel = Channel::new_stream(stream, TEST_BLOCKLEN).unwrap();

    channel.write_message(&DiscoverMessage).await.unwrap();
    let announce: AnnounceMessage = channel.read_message().await.unwrap();
    check_announce(&announce, &host);

    host.stop();
}

#[tokio::test]
async fn malformed_probe_does_not_kill_the_responder() {
    let host = start_host().await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut channel =
        Channel::new_datagram(socket, Some(loopback(host.discovery_udp)), TEST_BLOCKLEN).unwrap();

    // Not a DiscoverMessage.
    channel.write_bytes(&[0xff, 0xee, 0xdd]).await.unwrap();

    // The responder logged it and kept going.
    channel.write_message(&DiscoverMessage).await.unwrap();
    let announce: AnnounceMessage = channel.read_message().await.unwrap();
    check_announce(&announce, &host);

    host.stop();
}
