//! capone-services — the server-side service layer: the session registry,
//! access-control lists, service descriptors, and the built-in plugins.

pub mod acl;
pub mod plugin;
pub mod registry;
pub mod service;

pub use acl::Acl;
pub use plugin::{plugin_for, CapabilitiesPlugin, ExecPlugin, ServicePlugin, TestPlugin};
pub use registry::{Session, SessionRegistry};
pub use service::Service;
