//! Configuration for Capone hosts and clients.
//!
//! TOML, one `[core]` section for the identity plus optional ACLs, and one
//! `[[service]]` block per exposed service:
//!
//! ```toml
//! [core]
//! name       = "mainframe"
//! public_key = "<hex ed25519 public key>"
//! secret_key = "<hex ed25519 secret key>"   # required on the server
//! query_acl   = ["*"]
//! request_acl = ["<hex public key>"]
//!
//! [[service]]
//! name     = "Shell"
//! type     = "exec"
//! location = "office"
//! port     = 1237
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::channel::{BLOCKLEN_DEFAULT, BLOCKLEN_MAX, BLOCKLEN_MIN};
use crate::error::{Error, Result};
use crate::keys::{SignKeyPair, SignPublic};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub core: CoreConfig,
    #[serde(default, rename = "service")]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Human label advertised in discovery answers.
    #[serde(default)]
    pub name: String,

    /// Hex Ed25519 public key. Required.
    pub public_key: String,

    /// Hex Ed25519 secret key. Required on the server, absent for
    /// client-only configs.
    #[serde(default)]
    pub secret_key: Option<String>,

    /// Channel block length. Bounds re-checked on load.
    #[serde(default = "default_blocklen")]
    pub blocklen: usize,

    /// Port the discovery responder answers on, UDP and TCP.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,

    /// Identities allowed to Query. `"*"` means any; absent means none.
    #[serde(default)]
    pub query_acl: Option<Vec<String>>,

    /// Identities allowed to Request. Same convention.
    #[serde(default)]
    pub request_acl: Option<Vec<String>>,
}

fn default_blocklen() -> usize {
    BLOCKLEN_DEFAULT
}

fn default_discovery_port() -> u16 {
    6667
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    /// Service type — selects the plugin, e.g. `exec`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub location: String,
    pub port: u16,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| Error::Config(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        // Surface key and bound problems at load, not first use.
        self.public_key()?;
        if let Some(secret) = &self.core.secret_key {
            let keys = SignKeyPair::from_secret_hex(secret)?;
            if keys.public != self.public_key()? {
                return Err(Error::Config(
                    "public_key does not match secret_key".into(),
                ));
            }
        }
        if !(BLOCKLEN_MIN..=BLOCKLEN_MAX).contains(&self.core.blocklen) {
            return Err(Error::Config(format!(
                "blocklen {} outside {BLOCKLEN_MIN}..={BLOCKLEN_MAX}",
                self.core.blocklen
            )));
        }
        Ok(())
    }

    pub fn public_key(&self) -> Result<SignPublic> {
        SignPublic::from_hex(&self.core.public_key)
    }

    /// The host's signing identity. Requires `secret_key`.
    pub fn sign_keypair(&self) -> Result<SignKeyPair> {
        let secret = self
            .core
            .secret_key
            .as_ref()
            .ok_or_else(|| Error::Config("missing secret_key".into()))?;
        SignKeyPair::from_secret_hex(secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(keys: &SignKeyPair) -> String {
        format!(
            r#"
            [core]
            name = "testhost"
            public_key = "{}"
            secret_key = "{}"
            query_acl = ["*"]

            [[service]]
            name = "Foo"
            type = "test"
            location = "Dunno"
            port = 1234
            "#,
            keys.public.hex(),
            keys.secret_hex()
        )
    }

    #[test]
    fn parses_a_full_config() {
        let keys = SignKeyPair::generate();
        let config = Config::parse(&sample(&keys)).unwrap();
        assert_eq!(config.core.name, "testhost");
        assert_eq!(config.core.blocklen, BLOCKLEN_DEFAULT);
        assert_eq!(config.core.discovery_port, 6667);
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].kind, "test");
        assert_eq!(config.services[0].port, 1234);
        assert_eq!(config.sign_keypair().unwrap().public, keys.public);
    }

    #[test]
    fn missing_public_key_is_rejected() {
        assert!(matches!(
            Config::parse("[core]\nname = \"x\"\n"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn malformed_key_hex_is_rejected() {
        let err = Config::parse("[core]\npublic_key = \"zz\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn mismatched_keypair_is_rejected() {
        let keys = SignKeyPair::generate();
        let other = SignKeyPair::generate();
        let text = format!(
            "[core]\npublic_key = \"{}\"\nsecret_key = \"{}\"\n",
            other.public.hex(),
            keys.secret_hex()
        );
        assert!(matches!(Config::parse(&text), Err(Error::Config(_))));
    }

    #[test]
    fn out_of_range_blocklen_is_rejected() {
        let keys = SignKeyPair::generate();
        let text = format!(
            "[core]\npublic_key = \"{}\"\nblocklen = 39\n",
            keys.public.hex()
        );
        assert!(matches!(Config::parse(&text), Err(Error::Config(_))));
    }

    #[test]
    fn client_config_needs_no_secret() {
        let keys = SignKeyPair::generate();
        let text = format!("[core]\npublic_key = \"{}\"\n", keys.public.hex());
        let config = Config::parse(&text).unwrap();
        assert!(config.sign_keypair().is_err());
        assert_eq!(config.public_key().unwrap(), keys.public);
    }
}
