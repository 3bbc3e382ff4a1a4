//! Session lifecycle commands: request, connect, terminate.

use capone_core::cap::Capability;
use capone_core::client;
use capone_core::config::Config;
use capone_core::error::Result;
use capone_services::plugin_for;

use super::{open_channel, Target};

/// Request a session; print the identifier and capability string for later
/// `connect`/`terminate` invocations.
pub async fn request(config: &Config, target: &Target, kind: &str, args: &[String]) -> Result<()> {
    let plugin = plugin_for(kind)?;
    let parameters = plugin.parse_params(args)?;

    let mut channel = open_channel(config, target).await?;
    let (identifier, cap) = client::request_session(&mut channel, parameters).await?;

    println!("session:    {identifier}");
    println!("capability: {cap}");
    Ok(())
}

/// Connect to a requested session and hand the channel to the plugin's
/// client half.
pub async fn connect(
    config: &Config,
    target: &Target,
    kind: &str,
    identifier: u32,
    cap: &Capability,
    args: &[String],
) -> Result<()> {
    let plugin = plugin_for(kind)?;
    let parameters = plugin.parse_params(args)?;

    let mut channel = open_channel(config, target).await?;
    client::start_session(&mut channel, identifier, cap).await?;
    plugin.invoke(channel, &parameters, config).await
}

/// Terminate a session. Succeeds quietly if it is already gone.
pub async fn terminate(
    config: &Config,
    target: &Target,
    identifier: u32,
    cap: &Capability,
) -> Result<()> {
    let mut channel = open_channel(config, target).await?;
    client::terminate(&mut channel, identifier, cap).await
}
