//! capone-core — trust and session substrate of the Capone platform:
//! key identities, the framed encrypted channel, the handshake, capabilities,
//! the wire protocol, and the client-side command operations.
//! Every other Capone crate depends on this one.

pub mod cap;
pub mod channel;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod keys;
pub mod proto;

pub use error::{Error, Result};
