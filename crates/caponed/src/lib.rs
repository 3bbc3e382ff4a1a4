//! caponed — the Capone service host: connection supervisor, command
//! dispatch, and the LAN discovery responder. The binary wraps [`Server`];
//! integration tests drive it in-process.

pub mod discovery;
pub mod dispatch;
pub mod server;

pub use server::Server;
