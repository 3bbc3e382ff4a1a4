//! End-to-end tests: a real server on loopback, driven by the client
//! protocol.

mod infra;

mod broker;
mod delegation;
mod discovery;
mod query;
mod sessions;

pub use infra::*;
