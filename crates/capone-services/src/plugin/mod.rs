//! Service plugins.
//!
//! A plugin is the behavior behind a service type. The server invokes
//! `serve` once a Connect is authorized, handing over the channel; the
//! client invokes `invoke` after a successful `start_session`. Parameters
//! travel as an argv-style string list encoded with the wire field codecs,
//! built by `parse_params` on the client and checked by `validate_params`
//! when the server registers the session.

use std::sync::Arc;

use async_trait::async_trait;
use capone_core::channel::Channel;
use capone_core::config::Config;
use capone_core::error::{Error, Result};
use capone_core::keys::SignPublic;

use crate::registry::Session;

mod capabilities;
mod exec;

pub use capabilities::CapabilitiesPlugin;
pub use exec::ExecPlugin;
pub use test::TestPlugin;

/// The capability surface every service type implements.
#[async_trait]
pub trait ServicePlugin: Send + Sync {
    /// Service type, matched against the `type` key of a service section.
    fn kind(&self) -> &'static str;

    /// Category advertised in the service description.
    fn category(&self) -> &'static str;

    fn version(&self) -> &'static str {
        "0.0.1"
    }

    /// Client side: turn command-line arguments into wire parameters.
    fn parse_params(&self, args: &[String]) -> Result<Vec<u8>>;

    /// Server side: reject malformed parameters at Request time, before a
    /// session is registered.
    fn validate_params(&self, parameters: &[u8]) -> Result<()>;

    /// Server side of a connected session. Runs on the service host once
    /// Connect is authorized; owns the channel for the session's lifetime.
    async fn serve(
        &self,
        channel: Channel,
        invoker: &SignPublic,
        session: &Session,
        config: &Config,
    ) -> Result<()>;

    /// Client side of a connected session, entered once the server acks
    /// the Connect.
    async fn invoke(&self, channel: Channel, parameters: &[u8], config: &Config) -> Result<()>;
}

/// Resolve a service type to a fresh plugin instance.
pub fn plugin_for(kind: &str) -> Result<Arc<dyn ServicePlugin>> {
    match kind {
        "test" => Ok(TestPlugin::new()),
        "exec" => Ok(Arc::new(ExecPlugin)),
        "capabilities" => Ok(Arc::new(CapabilitiesPlugin::new())),
        other => Err(Error::Invalid(format!("unknown service type '{other}'"))),
    }
}

/// Argv-shaped parameter codec shared by the plugins.
pub(crate) mod bytes_codec {
    use bytes::{Buf, BufMut, Bytes, BytesMut};
    use capone_core::error::{Error, Result};
    use capone_core::proto::{get_str, put_str};

    pub fn encode_argv(args: &[String]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u16(args.len() as u16);
        for arg in args {
            put_str(&mut buf, arg);
        }
        buf.to_vec()
    }

    pub fn decode_argv(parameters: &[u8]) -> Result<Vec<String>> {
        let mut buf = Bytes::copy_from_slice(parameters);
        if buf.remaining() < 2 {
            return Err(Error::Protocol("truncated parameter list".into()));
        }
        let count = buf.get_u16() as usize;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(get_str(&mut buf)?);
        }
        if buf.has_remaining() {
            return Err(Error::Protocol("trailing bytes after parameters".into()));
        }
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::bytes_codec::{decode_argv, encode_argv};
    use super::*;

    #[test]
    fn argv_codec_round_trip() {
        let args = vec!["ls".to_string(), "-l".to_string(), "/tmp".to_string()];
        assert_eq!(decode_argv(&encode_argv(&args)).unwrap(), args);
        assert_eq!(decode_argv(&encode_argv(&[])).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn argv_codec_rejects_garbage() {
        assert!(decode_argv(&[]).is_err());
        assert!(decode_argv(&[0, 2]).is_err()); // announces two args, has none
        let mut encoded = encode_argv(&["x".to_string()]);
        encoded.push(0);
        assert!(decode_argv(&encoded).is_err());
    }

    #[test]
    fn plugin_registry_knows_the_built_ins() {
        for kind in ["test", "exec", "capabilities"] {
            assert_eq!(plugin_for(kind).unwrap().kind(), kind);
        }
        assert!(matches!(plugin_for("xpra"), Err(Error::Invalid(_))));
    }
}
