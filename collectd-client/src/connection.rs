use std::{
    collections::{hash_map::Entry, HashMap},
    sync::{Arc, Mutex, PoisonError},
};

use once_cell::sync::Lazy;

use crate::{builder::ConnectionBuilder, storage::Counter};

/// The identity tuple a connection is registered under.
///
/// Two connections are the same instance if and only if every one of these fields is equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ConnectionId {
    pub source_host: String,
    pub collectd_host: String,
    pub collectd_port: u16,
    pub plugin_instance: String,
    pub plugin_name: String,
}

// Process-wide table of live connections. Entries are created on first lookup and live for the
// rest of the process; the table only grows. Guarded by a single lock so concurrent creation
// with identical parameters never yields two instances.
static REGISTRY: Lazy<Mutex<HashMap<ConnectionId, Arc<Connection>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// One (source host, destination, plugin identity) tuple worth of counters.
///
/// Connections are process-wide singletons keyed by their full identity: building a connection
/// with the same parameters twice returns the same instance, so any part of an application can
/// cheaply resolve "its" connection without threading a handle around. The counter set grows
/// on demand as new categories are referenced.
pub struct Connection {
    id: ConnectionId,
    counters: Mutex<HashMap<String, Arc<Counter>>>,
}

impl Connection {
    /// Returns a builder for resolving a connection.
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::default()
    }

    pub(crate) fn get_or_create(id: ConnectionId) -> Arc<Connection> {
        let mut registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
        match registry.entry(id) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let connection = Arc::new(Connection {
                    id: entry.key().clone(),
                    counters: Mutex::new(HashMap::new()),
                });
                Arc::clone(entry.insert(connection))
            }
        }
    }

    /// Returns the counter registered under `category`, creating it on first reference.
    pub fn counter(&self, category: &str) -> Arc<Counter> {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        match counters.get(category) {
            Some(counter) => Arc::clone(counter),
            None => {
                let counter = Arc::new(Counter::new(category));
                counters.insert(category.to_string(), Arc::clone(&counter));
                counter
            }
        }
    }

    /// Snapshots every counter on this connection, returning the non-empty results.
    ///
    /// Counters that have never been recorded to contribute nothing, but stay registered on
    /// the connection.
    pub fn snapshot_all(&self) -> Vec<HashMap<String, f64>> {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.values().map(|counter| counter.snapshot()).filter(|s| !s.is_empty()).collect()
    }

    /// Returns the host name reported as the origin of this connection's stats.
    pub fn source_host(&self) -> &str {
        &self.id.source_host
    }

    /// Returns the destination collectd host.
    pub fn collectd_host(&self) -> &str {
        &self.id.collectd_host
    }

    /// Returns the destination collectd port.
    pub fn collectd_port(&self) -> u16 {
        self.id.collectd_port
    }

    /// Returns the plugin instance reported with this connection's stats.
    pub fn plugin_instance(&self) -> &str {
        &self.id.plugin_instance
    }

    /// Returns the plugin name reported with this connection's stats.
    pub fn plugin_name(&self) -> &str {
        &self.id.plugin_name
    }

    pub(crate) fn collectd_addr(&self) -> (&str, u16) {
        (&self.id.collectd_host, self.id.collectd_port)
    }
}

/// Returns every connection currently in the registry.
pub(crate) fn iter_connections() -> Vec<Arc<Connection>> {
    let registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
    registry.values().cloned().collect()
}

/// Empties the process-wide connection registry.
///
/// Connections normally live for the whole process; this exists so tests can tear down shared
/// state between cases. Handles returned earlier keep working, but the collector will no
/// longer see them.
pub fn clear_registry() {
    let mut registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
    registry.clear();
}
