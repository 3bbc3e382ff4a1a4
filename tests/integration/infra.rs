//! Shared scaffolding: an in-process host bound to ephemeral ports, with
//! the recording test plugin and the broker plugin exposed for assertions.

use std::net::SocketAddr;
use std::sync::Arc;

use capone_core::channel::Channel;
use capone_core::client;
use capone_core::config::Config;
use capone_core::keys::{SignKeyPair, SignPublic};
use capone_services::plugin::plugin_for;
use capone_services::{CapabilitiesPlugin, ServicePlugin, SessionRegistry, TestPlugin};
use caponed::Server;
use tokio::sync::broadcast;

pub const TEST_BLOCKLEN: usize = 512;

pub struct TestHost {
    pub public: SignPublic,
    pub test_addr: SocketAddr,
    pub broker_addr: SocketAddr,
    pub discovery_udp: SocketAddr,
    pub discovery_tcp: SocketAddr,
    pub registry: Arc<SessionRegistry>,
    pub test_plugin: Arc<TestPlugin>,
    pub broker_plugin: Arc<CapabilitiesPlugin>,
    shutdown: broadcast::Sender<()>,
}

/// A host exposing a `test` and a `capabilities` service, everyone allowed
/// to Query and Request.
pub async fn start_host() -> TestHost {
    start_host_with_acls("[\"*\"]", "[\"*\"]").await
}

/// Same host, with explicit ACL lists (TOML array syntax).
pub async fn start_host_with_acls(query_acl: &str, request_acl: &str) -> TestHost {
    let keys = SignKeyPair::generate();
    let config_text = format!(
        r#"
        [core]
        name = "testhost"
        public_key = "{public}"
        secret_key = "{secret}"
        discovery_port = 0
        query_acl = {query_acl}
        request_acl = {request_acl}

        [[service]]
        name = "Foo"
        type = "test"
        location = "Dunno"
        port = 0

        [[service]]
        name = "Broker"
        type = "capabilities"
        location = "Dunno"
        port = 0
        "#,
        public = keys.public.hex(),
        secret = keys.secret_hex(),
    );
    let config = Config::parse(&config_text).expect("test config must parse");

    let test_plugin = TestPlugin::new();
    let broker_plugin = Arc::new(CapabilitiesPlugin::new());
    let server = {
        let test_plugin = test_plugin.clone();
        let broker_plugin = broker_plugin.clone();
        Server::bind_with_plugins(config, move |kind| match kind {
            "test" => Ok(test_plugin.clone() as Arc<dyn ServicePlugin>),
            "capabilities" => Ok(broker_plugin.clone() as Arc<dyn ServicePlugin>),
            other => plugin_for(other),
        })
        .await
        .expect("server must bind")
    };

    let addrs = server.service_addrs().expect("bound addrs");
    let (discovery_udp, discovery_tcp) = server.discovery_addrs().expect("discovery addrs");
    let host = TestHost {
        public: server.public_key(),
        test_addr: addrs[0].1,
        broker_addr: addrs[1].1,
        discovery_udp,
        discovery_tcp,
        registry: server.registry(),
        test_plugin,
        broker_plugin,
        shutdown: broadcast::channel(1).0,
    };

    let shutdown = host.shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(shutdown).await;
    });
    host
}

impl TestHost {
    pub async fn connect_test(&self, keys: &SignKeyPair) -> Channel {
        self.connect(keys, self.test_addr).await
    }

    pub async fn connect_broker(&self, keys: &SignKeyPair) -> Channel {
        self.connect(keys, self.broker_addr).await
    }

    async fn connect(&self, keys: &SignKeyPair, addr: SocketAddr) -> Channel {
        client::connect("127.0.0.1", addr.port(), keys, &self.public, TEST_BLOCKLEN)
            .await
            .expect("client connect + handshake")
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }
}

/// Encode argv-style plugin parameters the way the client does.
pub fn test_params(args: &[&str]) -> Vec<u8> {
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    plugin_for("test")
        .expect("test plugin exists")
        .parse_params(&args)
        .expect("params encode")
}
