//! Capability broker service.
//!
//! A party that holds rights registers with the broker and keeps its
//! channel open. A requester without direct rights asks the broker to have
//! a named registrant obtain a session capability on its behalf; the broker
//! forwards the request over the registrant's channel and relays the
//! resulting capability back.
//!
//! A registrant entry is torn down by guard when its serving task exits,
//! whichever way it exits, so a disconnected broker channel never leaves a
//! stale entry behind.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use capone_core::cap::Rights;
use capone_core::channel::Channel;
use capone_core::client;
use capone_core::config::Config;
use capone_core::error::{Error, Result};
use capone_core::keys::SignPublic;
use capone_core::proto::{CapabilityMessage, CapabilityRequest, MAX_MESSAGE_LEN};

use super::bytes_codec::{decode_argv, encode_argv};
use super::ServicePlugin;
use crate::registry::Session;

/// A request in flight from a requester to a registrant.
struct Forward {
    request: CapabilityRequest,
    answer: oneshot::Sender<CapabilityMessage>,
}

struct Registrant {
    /// Distinguishes re-registrations, so a guard only removes its own
    /// entry.
    token: u64,
    tx: mpsc::Sender<Forward>,
}

#[derive(Default)]
pub struct CapabilitiesPlugin {
    registrants: Mutex<HashMap<SignPublic, Registrant>>,
    next_token: AtomicU64,
}

impl CapabilitiesPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<SignPublic, Registrant>> {
        self.registrants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live registrants. Exposed for tests.
    pub fn registrant_count(&self) -> usize {
        self.table().len()
    }

    async fn serve_register(&self, mut channel: Channel, invoker: &SignPublic) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<Forward>(4);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.table().insert(*invoker, Registrant { token, tx });
        let _guard = RegistrantGuard {
            plugin: self,
            identity: *invoker,
            token,
        };
        tracing::info!(registrant = %invoker, "broker registrant online");

        loop {
            tokio::select! {
                forward = rx.recv() => {
                    let Some(forward) = forward else { break };
                    channel.write_message(&forward.request).await?;
                    let answer: CapabilityMessage = channel.read_message().await?;
                    // The requester may have hung up; nothing to relay then.
                    let _ = forward.answer.send(answer);
                }
                unexpected = channel.read_bytes(MAX_MESSAGE_LEN) => {
                    match unexpected {
                        Ok(_) => {
                            return Err(Error::Protocol(
                                "registrant sent data out of turn".into(),
                            ))
                        }
                        // Registrant hung up; the guard removes the entry.
                        Err(_) => break,
                    }
                }
            }
        }
        Ok(())
    }

    async fn serve_request(
        &self,
        mut channel: Channel,
        invoker: &SignPublic,
        argv: &[String],
    ) -> Result<()> {
        let spec = RequestSpec::parse(argv)?;
        let tx = self
            .table()
            .get(&spec.registrant)
            .map(|r| r.tx.clone())
            .ok_or(Error::NotFound)?;

        let (answer_tx, answer_rx) = oneshot::channel();
        tx.send(Forward {
            request: CapabilityRequest {
                service_identity: spec.service_identity,
                service_address: spec.service_address.clone(),
                service_port: spec.service_port.to_string(),
                parameters: spec.parameters.clone(),
                requester: *invoker,
            },
            answer: answer_tx,
        })
        .await
        .map_err(|_| Error::NotFound)?;

        let answer = answer_rx
            .await
            .map_err(|_| Error::Protocol("registrant went away mid-request".into()))?;
        channel.write_message(&answer).await
    }
}

/// Removes a registrant entry on scope exit, but only the registration it
/// belongs to — a newer registration under the same identity survives.
struct RegistrantGuard<'a> {
    plugin: &'a CapabilitiesPlugin,
    identity: SignPublic,
    token: u64,
}

impl Drop for RegistrantGuard<'_> {
    fn drop(&mut self) {
        let mut table = self.plugin.table();
        if table.get(&self.identity).map(|r| r.token) == Some(self.token) {
            table.remove(&self.identity);
            tracing::info!(registrant = %self.identity, "broker registrant offline");
        }
    }
}

/// Parsed `request` argv:
/// `request <registrant> <service identity> <address> <port> [args...]`.
struct RequestSpec {
    registrant: SignPublic,
    service_identity: SignPublic,
    service_address: String,
    service_port: u16,
    parameters: Vec<u8>,
}

impl RequestSpec {
    fn parse(argv: &[String]) -> Result<Self> {
        if argv.len() < 5 || argv[0] != "request" {
            return Err(Error::Invalid(
                "usage: request <registrant> <service identity> <address> <port> [args...]".into(),
            ));
        }
        Ok(Self {
            registrant: SignPublic::from_hex(&argv[1])
                .map_err(|_| Error::Invalid("malformed registrant identity".into()))?,
            service_identity: SignPublic::from_hex(&argv[2])
                .map_err(|_| Error::Invalid("malformed service identity".into()))?,
            service_address: argv[3].clone(),
            service_port: argv[4]
                .parse()
                .map_err(|_| Error::Invalid(format!("bad port '{}'", argv[4])))?,
            parameters: encode_argv(&argv[5..]),
        })
    }
}

fn checked_mode(argv: &[String]) -> Result<()> {
    match argv.first().map(String::as_str) {
        Some("register") if argv.len() == 1 => Ok(()),
        Some("request") => RequestSpec::parse(argv).map(|_| ()),
        _ => Err(Error::Invalid(
            "capabilities service takes 'register' or 'request ...'".into(),
        )),
    }
}

#[async_trait]
impl ServicePlugin for CapabilitiesPlugin {
    fn kind(&self) -> &'static str {
        "capabilities"
    }

    fn category(&self) -> &'static str {
        "Capabilities"
    }

    fn parse_params(&self, args: &[String]) -> Result<Vec<u8>> {
        checked_mode(args)?;
        Ok(encode_argv(args))
    }

    fn validate_params(&self, parameters: &[u8]) -> Result<()> {
        checked_mode(&decode_argv(parameters)?)
    }

    async fn serve(
        &self,
        channel: Channel,
        invoker: &SignPublic,
        session: &Session,
        _config: &Config,
    ) -> Result<()> {
        let argv = decode_argv(&session.parameters)?;
        match argv.first().map(String::as_str) {
            Some("register") => self.serve_register(channel, invoker).await,
            Some("request") => self.serve_request(channel, invoker, &argv).await,
            _ => Err(Error::Invalid("unknown capabilities mode".into())),
        }
    }

    async fn invoke(&self, mut channel: Channel, parameters: &[u8], config: &Config) -> Result<()> {
        let argv = decode_argv(parameters)?;
        match argv.first().map(String::as_str) {
            Some("register") => {
                // Serve forwarded requests until the broker goes away.
                let keys = config.sign_keypair()?;
                loop {
                    let request: CapabilityRequest = match channel.read_message().await {
                        Ok(request) => request,
                        Err(Error::Io(_)) => return Ok(()),
                        Err(e) => return Err(e),
                    };
                    let answer = fulfill(&request, &keys, config).await?;
                    channel.write_message(&answer).await?;
                }
            }
            Some("request") => {
                let answer: CapabilityMessage = channel.read_message().await?;
                println!(
                    "session {} on {}:{}\ncapability {}",
                    answer.identifier, answer.service_address, answer.service_port, answer.cap
                );
                Ok(())
            }
            _ => Err(Error::Invalid("unknown capabilities mode".into())),
        }
    }
}

/// Registrant side of one forwarded request: obtain a session on the named
/// service and delegate EXEC to the requester.
async fn fulfill(
    request: &CapabilityRequest,
    keys: &capone_core::keys::SignKeyPair,
    config: &Config,
) -> Result<CapabilityMessage> {
    let port: u16 = request
        .service_port
        .parse()
        .map_err(|_| Error::Invalid(format!("bad port '{}'", request.service_port)))?;

    let mut service_channel = client::connect(
        &request.service_address,
        port,
        keys,
        &request.service_identity,
        config.core.blocklen,
    )
    .await?;
    let (identifier, cap) =
        client::request_session(&mut service_channel, request.parameters.clone()).await?;

    let delegated = cap.delegate(Rights::EXEC, request.requester)?;
    tracing::info!(
        requester = %request.requester,
        service = %request.service_identity,
        session = identifier,
        "obtained capability on requester's behalf"
    );
    Ok(CapabilityMessage {
        identifier,
        cap: delegated,
        service_address: request.service_address.clone(),
        service_port: request.service_port.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use capone_core::keys::SignKeyPair;

    fn hexkey() -> String {
        SignKeyPair::generate().public.hex()
    }

    #[test]
    fn register_argv_is_accepted() {
        let plugin = CapabilitiesPlugin::new();
        let params = plugin.parse_params(&["register".to_string()]).unwrap();
        plugin.validate_params(&params).unwrap();
    }

    #[test]
    fn request_argv_is_accepted() {
        let plugin = CapabilitiesPlugin::new();
        let argv = vec![
            "request".to_string(),
            hexkey(),
            hexkey(),
            "192.0.2.7".to_string(),
            "1237".to_string(),
            "ls".to_string(),
        ];
        let params = plugin.parse_params(&argv).unwrap();
        plugin.validate_params(&params).unwrap();
    }

    #[test]
    fn malformed_modes_are_rejected() {
        let plugin = CapabilitiesPlugin::new();
        assert!(plugin.parse_params(&[]).is_err());
        assert!(plugin.parse_params(&["sideways".to_string()]).is_err());
        assert!(plugin
            .parse_params(&["register".to_string(), "extra".to_string()])
            .is_err());
        assert!(plugin
            .parse_params(&["request".to_string(), "nothex".to_string()])
            .is_err());
        let argv = vec![
            "request".to_string(),
            hexkey(),
            hexkey(),
            "host".to_string(),
            "notaport".to_string(),
        ];
        assert!(plugin.parse_params(&argv).is_err());
    }
}
