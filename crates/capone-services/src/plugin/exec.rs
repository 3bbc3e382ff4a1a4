//! Shell execution service.
//!
//! Parameters are the argv of the command to run. The server spawns the
//! command with piped stdio and relays channel ⇄ child: payloads from the
//! invoker feed stdin, stdout and stderr are framed back. The client half
//! relays its own stdio the same way.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::process::Command;

use capone_core::channel::{relay, Channel};
use capone_core::config::Config;
use capone_core::error::{Error, Result};
use capone_core::keys::SignPublic;

use super::bytes_codec::{decode_argv, encode_argv};
use super::ServicePlugin;
use crate::registry::Session;

pub struct ExecPlugin;

fn checked_argv(parameters: &[u8]) -> Result<Vec<String>> {
    let argv = decode_argv(parameters)?;
    if argv.is_empty() {
        return Err(Error::Invalid("exec needs a command to run".into()));
    }
    Ok(argv)
}

#[async_trait]
impl ServicePlugin for ExecPlugin {
    fn kind(&self) -> &'static str {
        "exec"
    }

    fn category(&self) -> &'static str {
        "Shell"
    }

    fn parse_params(&self, args: &[String]) -> Result<Vec<u8>> {
        if args.is_empty() {
            return Err(Error::Invalid("exec needs a command to run".into()));
        }
        Ok(encode_argv(args))
    }

    fn validate_params(&self, parameters: &[u8]) -> Result<()> {
        checked_argv(parameters).map(|_| ())
    }

    async fn serve(
        &self,
        channel: Channel,
        invoker: &SignPublic,
        session: &Session,
        _config: &Config,
    ) -> Result<()> {
        let argv = checked_argv(&session.parameters)?;
        tracing::debug!(invoker = %invoker, command = %argv[0], "spawning exec child");

        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Io(std::io::Error::other("child stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Io(std::io::Error::other("child stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Io(std::io::Error::other("child stderr not captured")))?;

        let sources: Vec<Box<dyn AsyncRead + Send + Unpin>> =
            vec![Box::new(stdout), Box::new(stderr)];
        let pumped = relay(channel, stdin, sources).await;

        // The invoker hanging up ends the relay with the child still alive.
        let _ = child.start_kill();
        let status = child.wait().await?;
        tracing::debug!(?status, "exec child finished");
        pumped
    }

    async fn invoke(&self, channel: Channel, _parameters: &[u8], _config: &Config) -> Result<()> {
        let sources: Vec<Box<dyn AsyncRead + Send + Unpin>> = vec![Box::new(tokio::io::stdin())];
        relay(channel, tokio::io::stdout(), sources).await
    }
}
