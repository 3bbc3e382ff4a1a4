//! Command implementations for capone-ctl.

use capone_core::channel::Channel;
use capone_core::client;
use capone_core::config::Config;
use capone_core::error::Result;
use capone_core::keys::SignPublic;

pub mod discover;
pub mod keygen;
pub mod query;
pub mod session;

/// A remote service endpoint: where it listens and who it must be.
pub struct Target {
    pub address: String,
    pub port: u16,
    pub remote: SignPublic,
}

/// Open a handshaked channel to the target using the identity from the
/// config file.
pub async fn open_channel(config: &Config, target: &Target) -> Result<Channel> {
    let keys = config.sign_keypair()?;
    client::connect(
        &target.address,
        target.port,
        &keys,
        &target.remote,
        config.core.blocklen,
    )
    .await
}
