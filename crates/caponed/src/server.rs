//! Connection supervisor — listeners, accept loops, and shutdown fan-out.
//!
//! One TCP listener per configured service plus the discovery pair. Every
//! accepted connection runs on its own task, so a blocking read on one
//! channel never stalls another connection. Transient accept failures are
//! logged and the loop continues; a broadcast on the shutdown channel winds
//! everything down.

use std::net::SocketAddr;
use std::sync::Arc;

use capone_core::config::Config;
use capone_core::error::{Error, Result};
use capone_core::keys::{SignKeyPair, SignPublic};
use capone_core::proto::{AnnounceMessage, PROTOCOL_VERSION};
use capone_services::plugin::{plugin_for, ServicePlugin};
use capone_services::{Acl, Service, SessionRegistry};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::discovery;
use crate::dispatch::{handle_connection, ConnectionContext};

pub struct Server {
    config: Arc<Config>,
    keys: Arc<SignKeyPair>,
    registry: Arc<SessionRegistry>,
    query_acl: Arc<Acl>,
    request_acl: Arc<Acl>,
    listeners: Vec<(Arc<Service>, TcpListener)>,
    discovery_udp: UdpSocket,
    discovery_tcp: TcpListener,
}

impl Server {
    /// Bind every configured service and the discovery pair. Configured
    /// port 0 means "any"; `service_addrs` reports what was bound.
    pub async fn bind(config: Config) -> Result<Self> {
        Self::bind_with_plugins(config, plugin_for).await
    }

    /// Like [`Server::bind`] but with a custom service-type resolver, so
    /// tests can inject recording plugins.
    pub async fn bind_with_plugins<F>(config: Config, resolver: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<Arc<dyn ServicePlugin>>,
    {
        if config.services.is_empty() {
            return Err(Error::Config("no services configured".into()));
        }
        let keys = Arc::new(config.sign_keypair()?);
        let query_acl = Arc::new(Acl::from_config(config.core.query_acl.as_ref())?);
        let request_acl = Arc::new(Acl::from_config(config.core.request_acl.as_ref())?);

        let mut listeners = Vec::new();
        for service_config in &config.services {
            let listener = TcpListener::bind(("0.0.0.0", service_config.port)).await?;
            let mut service = Service::with_plugin(service_config, resolver(&service_config.kind)?);
            service.port = listener.local_addr()?.port();
            tracing::info!(
                service = %service.kind,
                name = %service.name,
                port = service.port,
                "service bound"
            );
            listeners.push((Arc::new(service), listener));
        }

        let discovery_port = config.core.discovery_port;
        let discovery_udp = UdpSocket::bind(("0.0.0.0", discovery_port)).await?;
        let discovery_tcp = TcpListener::bind(("0.0.0.0", discovery_port)).await?;

        Ok(Self {
            config: Arc::new(config),
            keys,
            registry: Arc::new(SessionRegistry::new()),
            query_acl,
            request_acl,
            listeners,
            discovery_udp,
            discovery_tcp,
        })
    }

    pub fn public_key(&self) -> SignPublic {
        self.keys.public
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Bound address per service, in configuration order.
    pub fn service_addrs(&self) -> Result<Vec<(String, SocketAddr)>> {
        self.listeners
            .iter()
            .map(|(service, listener)| Ok((service.kind.clone(), listener.local_addr()?)))
            .collect()
    }

    pub fn discovery_addrs(&self) -> Result<(SocketAddr, SocketAddr)> {
        Ok((
            self.discovery_udp.local_addr()?,
            self.discovery_tcp.local_addr()?,
        ))
    }

    fn announce(&self) -> AnnounceMessage {
        AnnounceMessage {
            name: self.config.core.name.clone(),
            version: PROTOCOL_VERSION.to_string(),
            services: self
                .listeners
                .iter()
                .map(|(service, _)| service.describe())
                .collect(),
        }
    }

    /// Run until every task has wound down after a shutdown broadcast.
    pub async fn run(self, shutdown: broadcast::Sender<()>) -> Result<()> {
        let announce = self.announce();
        let blocklen = self.config.core.blocklen;
        let mut tasks = JoinSet::new();

        for (service, listener) in self.listeners {
            let ctx = ConnectionContext {
                config: self.config.clone(),
                keys: self.keys.clone(),
                registry: self.registry.clone(),
                query_acl: self.query_acl.clone(),
                request_acl: self.request_acl.clone(),
                service,
            };
            tasks.spawn(accept_loop(listener, ctx, shutdown.subscribe()));
        }

        tasks.spawn(discovery::run_udp(
            self.discovery_udp,
            announce.clone(),
            blocklen,
            shutdown.subscribe(),
        ));
        tasks.spawn(discovery::run_tcp(
            self.discovery_tcp,
            announce,
            blocklen,
            shutdown.subscribe(),
        ));

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "server task panicked");
            }
        }
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: ConnectionContext,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!(service = %ctx.service.kind, "acceptor shutting down");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, service = %ctx.service.kind, "accepted connection");
                        tokio::spawn(handle_connection(stream, ctx.clone()));
                    }
                    Err(e) => {
                        // Transient accept failures must not kill the service.
                        tracing::warn!(error = %e, service = %ctx.service.kind, "accept failed");
                    }
                }
            }
        }
    }
}
