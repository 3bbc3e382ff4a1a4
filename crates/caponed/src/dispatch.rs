//! Per-connection command dispatch — the server side of the state machine.
//!
//! After the handshake authenticates the peer, one `ConnectionInitiation`
//! selects the command. Query and Request are gated by their ACLs; Connect
//! and Terminate purely by capability. Every command is acked with a
//! `SessionResult` carrying the error class on failure; an authorized
//! Connect hands the channel to the service plugin afterwards.

use std::sync::Arc;

use capone_core::cap::Rights;
use capone_core::channel::Channel;
use capone_core::config::Config;
use capone_core::error::{Error, Result};
use capone_core::handshake;
use capone_core::keys::{SignKeyPair, SignPublic};
use capone_core::proto::{
    Command, ConnectionInitiation, SessionInitiation, SessionRequest, SessionResult,
    SessionTermination,
};
use capone_services::{Acl, Service, Session, SessionRegistry};
use tokio::net::TcpStream;

/// Everything a connection needs, shared by reference across tasks.
#[derive(Clone)]
pub struct ConnectionContext {
    pub config: Arc<Config>,
    pub keys: Arc<SignKeyPair>,
    pub registry: Arc<SessionRegistry>,
    pub query_acl: Arc<Acl>,
    pub request_acl: Arc<Acl>,
    pub service: Arc<Service>,
}

/// Entry point for one accepted connection. Never panics the acceptor:
/// failures are logged and the channel is dropped.
pub async fn handle_connection(stream: TcpStream, ctx: ConnectionContext) {
    let peer = stream.peer_addr().ok();
    if let Err(e) = run(stream, &ctx).await {
        tracing::warn!(peer = ?peer, service = %ctx.service.kind, error = %e, "connection closed with error");
    }
}

async fn run(stream: TcpStream, ctx: &ConnectionContext) -> Result<()> {
    let mut channel = Channel::new_stream(stream, ctx.config.core.blocklen)?;
    let remote = handshake::respond(&mut channel, &ctx.keys).await?;
    let init: ConnectionInitiation = match channel.read_message().await {
        Ok(init) => init,
        // An unknown or garbled command still gets its failure class.
        Err(e) => return refuse(&mut channel, e).await,
    };
    tracing::debug!(remote = %remote, command = ?init.command, service = %ctx.service.kind, "dispatching");

    match init.command {
        Command::Connect => match connect_guard(&mut channel, ctx, &remote).await {
            Ok(session) => {
                channel.write_message(&SessionResult::ok()).await?;
                tracing::info!(
                    remote = %remote,
                    session = session.identifier,
                    service = %ctx.service.kind,
                    "session connected"
                );
                ctx.service
                    .plugin
                    .serve(channel, &remote, &session, &ctx.config)
                    .await
            }
            Err(e) => refuse(&mut channel, e).await,
        },
        Command::Query => {
            let result = handle_query(&mut channel, ctx, &remote).await;
            report(&mut channel, result).await
        }
        Command::Request => {
            let result = handle_request(&mut channel, ctx, &remote).await;
            report(&mut channel, result).await
        }
        Command::Terminate => {
            let result = handle_terminate(&mut channel, ctx, &remote).await;
            report(&mut channel, result).await
        }
    }
}

/// Send the failure class before surfacing the error to the logger.
async fn refuse(channel: &mut Channel, err: Error) -> Result<()> {
    let _ = channel.write_message(&SessionResult::from_error(&err)).await;
    Err(err)
}

async fn report(channel: &mut Channel, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) => refuse(channel, e).await,
    }
}

async fn handle_query(
    channel: &mut Channel,
    ctx: &ConnectionContext,
    remote: &SignPublic,
) -> Result<()> {
    if !ctx.query_acl.is_allowed(remote) {
        return Err(Error::Unauthorized);
    }
    channel.write_message(&SessionResult::ok()).await?;
    channel.write_message(&ctx.service.describe()).await
}

async fn handle_request(
    channel: &mut Channel,
    ctx: &ConnectionContext,
    remote: &SignPublic,
) -> Result<()> {
    if !ctx.request_acl.is_allowed(remote) {
        return Err(Error::Unauthorized);
    }
    let request: SessionRequest = channel.read_message().await?;
    ctx.service.plugin.validate_params(&request.parameters)?;

    let session = ctx.registry.add(request.parameters, *remote);
    let cap = session.cap.delegate(Rights::EXEC | Rights::TERM, *remote)?;
    tracing::info!(
        remote = %remote,
        session = session.identifier,
        service = %ctx.service.kind,
        "session registered"
    );

    channel.write_message(&SessionResult::ok()).await?;
    channel
        .write_message(&capone_core::proto::SessionMessage {
            identifier: session.identifier,
            cap,
        })
        .await
}

/// Guards for Connect. The registry remove is the linearization point: of
/// two racing peers with valid capabilities, exactly one gets the session.
async fn connect_guard(
    channel: &mut Channel,
    ctx: &ConnectionContext,
    remote: &SignPublic,
) -> Result<Session> {
    let init: SessionInitiation = channel.read_message().await?;
    let session = ctx.registry.find(init.identifier)?;
    session.cap.verify(&init.cap, remote, Rights::EXEC)?;
    ctx.registry.remove(init.identifier)?;
    Ok(session)
}

async fn handle_terminate(
    channel: &mut Channel,
    ctx: &ConnectionContext,
    remote: &SignPublic,
) -> Result<()> {
    let term: SessionTermination = channel.read_message().await?;
    match ctx.registry.find(term.identifier) {
        // Already consumed or terminated: success, nothing to do.
        Err(Error::NotFound) => {}
        Err(e) => return Err(e),
        Ok(session) => {
            session.cap.verify(&term.cap, remote, Rights::TERM)?;
            // A lost race against a Connect means the session is gone,
            // which is what Terminate wanted.
            let _ = ctx.registry.remove(term.identifier);
            tracing::info!(remote = %remote, session = term.identifier, "session terminated");
        }
    }
    channel.write_message(&SessionResult::ok()).await
}
