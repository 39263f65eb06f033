//! A client library for shipping application statistics to a [collectd][collectd] server over
//! UDP, speaking the binary protocol of collectd's network plugin.
//!
//! [collectd]: https://collectd.org/
//!
//! # Usage
//!
//! ```no_run
//! use collectd_client::Connection;
//!
//! // Spawn the background collector and sender once, early in process startup.
//! collectd_client::start().expect("failed to start collectd pipeline");
//!
//! // Resolve a connection; identical parameters always return the same instance, so this can
//! // be done wherever a handle is needed.
//! let conn = Connection::builder()
//!     .with_collectd_host("stats.internal")
//!     .with_plugin_name("webapp")
//!     .get();
//!
//! // Record away. Counters are created on first reference and aggregated in memory; every
//! // send interval the accumulated values are snapshotted, encoded, and shipped.
//! conn.counter("requests").record(&["api"], &[("hits", 1.0)]);
//! conn.counter("queue").set_exact(&[("depth", 42.0)]);
//! ```
//!
//! # Aggregation model
//!
//! Recording is cheap and never touches the network: values accumulate in memory under a
//! short per-counter critical section. Once per [`SEND_INTERVAL`] a background collector
//! snapshots and resets every counter, and a background sender encodes the snapshots into
//! size-bounded packets ([`MAX_PACKET_SIZE`]) and writes them out, one UDP datagram per
//! packet.
//!
//! Delivery is fire-and-forget, as the protocol intends: there is no acknowledgement, no
//! retransmission, and nothing is persisted across a process restart. Errors in a background
//! cycle are logged and the cycle is retried on the next pass; nothing this crate does will
//! propagate a failure into the calling application.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![deny(missing_docs)]

use std::time::Duration;

mod builder;
pub use self::builder::ConnectionBuilder;

mod connection;
pub use self::connection::{clear_registry, Connection};

mod forwarder;
pub use self::forwarder::{collect_once, drain_queue, send_once, start, SendError, StartError};

mod storage;
pub use self::storage::Counter;

mod writer;
pub use self::writer::{
    encode_header, encode_numeric, encode_string, encode_value, pack_messages, EncodeError,
    PLUGIN_TYPE, TYPE_HOST, TYPE_INTERVAL, TYPE_PLUGIN, TYPE_PLUGIN_INSTANCE, TYPE_TIME,
    TYPE_TYPE, TYPE_TYPE_INSTANCE, TYPE_VALUES,
};

/// How often the collector snapshots every registered connection.
///
/// Also the value encoded into each packet's interval field, which tells the server how stale
/// a stat may be before it is considered missing.
pub const SEND_INTERVAL: Duration = Duration::from_secs(10);

/// The maximum size of a single packet, in bytes.
///
/// This is the protocol's self-imposed cap, not a transport MTU: snapshots whose encoded form
/// exceeds it are split across multiple datagrams.
pub const MAX_PACKET_SIZE: usize = 1024;
