use std::{fs, sync::Arc};

use crate::connection::{Connection, ConnectionId};

const DEFAULT_COLLECTD_HOST: &str = "localhost";
const DEFAULT_COLLECTD_PORT: u16 = 25826;
const DEFAULT_PLUGIN_NAME: &str = "any";

/// Builder for resolving a [`Connection`].
///
/// Identical parameters always resolve to the same connection instance, so a builder can be
/// used freely wherever a handle is needed rather than stashing the connection somewhere
/// global.
pub struct ConnectionBuilder {
    source_host: Option<String>,
    collectd_host: String,
    collectd_port: u16,
    plugin_instance: String,
    plugin_name: String,
}

impl ConnectionBuilder {
    /// Set the host name reported as the origin of the stats.
    ///
    /// Defaults to the local host name.
    #[must_use]
    pub fn with_source_host<H>(mut self, host: H) -> Self
    where
        H: Into<String>,
    {
        self.source_host = Some(host.into());
        self
    }

    /// Set the destination collectd host.
    ///
    /// Defaults to `localhost`.
    #[must_use]
    pub fn with_collectd_host<H>(mut self, host: H) -> Self
    where
        H: Into<String>,
    {
        self.collectd_host = host.into();
        self
    }

    /// Set the destination collectd port.
    ///
    /// Defaults to 25826, the collectd network plugin's default.
    #[must_use]
    pub fn with_collectd_port(mut self, port: u16) -> Self {
        self.collectd_port = port;
        self
    }

    /// Set the plugin instance reported with the stats.
    ///
    /// Defaults to the empty string.
    #[must_use]
    pub fn with_plugin_instance<I>(mut self, instance: I) -> Self
    where
        I: Into<String>,
    {
        self.plugin_instance = instance.into();
        self
    }

    /// Set the plugin name reported with the stats.
    ///
    /// Defaults to `any`.
    #[must_use]
    pub fn with_plugin_name<N>(mut self, name: N) -> Self
    where
        N: Into<String>,
    {
        self.plugin_name = name.into();
        self
    }

    /// Resolves the connection through the process-wide registry, creating it on first use.
    pub fn get(self) -> Arc<Connection> {
        let id = ConnectionId {
            source_host: self.source_host.unwrap_or_else(local_hostname),
            collectd_host: self.collectd_host,
            collectd_port: self.collectd_port,
            plugin_instance: self.plugin_instance,
            plugin_name: self.plugin_name,
        };
        Connection::get_or_create(id)
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        ConnectionBuilder {
            source_host: None,
            collectd_host: DEFAULT_COLLECTD_HOST.to_string(),
            collectd_port: DEFAULT_COLLECTD_PORT,
            plugin_instance: String::new(),
            plugin_name: DEFAULT_PLUGIN_NAME.to_string(),
        }
    }
}

fn local_hostname() -> String {
    match fs::read_to_string("/etc/hostname") {
        Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => "localhost".to_string(),
    }
}
