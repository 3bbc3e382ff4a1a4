//! Service descriptors — a configured service bound to its plugin.

use std::sync::Arc;

use capone_core::config::ServiceConfig;
use capone_core::error::Result;
use capone_core::proto::ServiceDescription;

use crate::plugin::{plugin_for, ServicePlugin};

/// One exposed service: the configured description plus the plugin that
/// implements its type. Immutable once the server is up.
pub struct Service {
    pub name: String,
    pub kind: String,
    pub location: String,
    /// Listening port. A configured port of 0 is replaced with the bound
    /// port before the service goes live.
    pub port: u16,
    pub plugin: Arc<dyn ServicePlugin>,
}

impl Service {
    /// Build from config, resolving the plugin by service type.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        Ok(Self::with_plugin(config, plugin_for(&config.kind)?))
    }

    /// Build with an explicit plugin instance (tests inject recording
    /// plugins this way).
    pub fn with_plugin(config: &ServiceConfig, plugin: Arc<dyn ServicePlugin>) -> Self {
        Self {
            name: config.name.clone(),
            kind: config.kind.clone(),
            location: config.location.clone(),
            port: config.port,
            plugin,
        }
    }

    /// The answer to a Query on this service's port.
    pub fn describe(&self) -> ServiceDescription {
        ServiceDescription {
            name: self.name.clone(),
            category: self.plugin.category().to_string(),
            kind: self.kind.clone(),
            version: self.plugin.version().to_string(),
            location: self.location.clone(),
            port: self.port.to_string(),
        }
    }
}
