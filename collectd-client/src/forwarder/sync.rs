use std::{
    collections::HashMap,
    io, thread,
    time::{Duration, SystemTime},
};

use thiserror::Error;
use tracing::{error, trace};

use crate::{
    connection,
    writer::{pack_messages, EncodeError},
};

use super::{snapshot_receiver, snapshot_sender, socket, Snapshot};

// How long one sender cycle waits for queue data before giving up. Short enough that a single
// drain-and-return call is usable for test synchronization.
const QUEUE_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Errors that could occur while sending queued snapshots.
#[derive(Debug, Error)]
pub enum SendError {
    /// No snapshot was queued within the poll timeout.
    ///
    /// Only surfaced in the explicit raise-on-empty mode; the background sender treats an
    /// empty queue as an idle cycle.
    #[error("no snapshots queued")]
    Empty,

    /// A snapshot could not be encoded into packets.
    #[error("failed to encode packets: {0}")]
    Encode(#[from] EncodeError),

    /// A packet could not be written to the socket.
    #[error("failed to send packet: {0}")]
    Io(#[from] io::Error),
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Runs one collection cycle: snapshots every registered connection and queues the results.
///
/// Each connection's per-counter snapshots are merged into one flat mapping (later counters
/// win on a derived-name collision) and enqueued with the current timestamp. Connections that
/// yield no data are skipped entirely.
pub fn collect_once() {
    for conn in connection::iter_connections() {
        let snapshots = conn.snapshot_all();
        if snapshots.is_empty() {
            continue;
        }

        let mut stats = HashMap::new();
        for snapshot in snapshots {
            stats.extend(snapshot);
        }
        if stats.is_empty() {
            continue;
        }

        trace!(
            host = conn.collectd_host(),
            port = conn.collectd_port(),
            stats = stats.len(),
            "Queued snapshot."
        );
        let entry = Snapshot { timestamp: unix_now(), stats, connection: conn };
        let _ = snapshot_sender().send(entry);
    }
}

/// Runs one send cycle: dequeues a single snapshot, packs it, and writes each packet as one
/// UDP datagram to the owning connection's destination.
///
/// An empty queue is not an error; the call simply returns once the poll timeout passes.
/// Tests that need to synchronize on queue contents can pass `raise_on_empty` to have
/// emptiness surfaced as [`SendError::Empty`] instead.
///
/// # Errors
///
/// Returns an error if the snapshot cannot be encoded or a datagram cannot be sent, or
/// [`SendError::Empty`] in raise-on-empty mode when no snapshot arrives in time.
pub fn send_once(raise_on_empty: bool) -> Result<(), SendError> {
    let entry = match snapshot_receiver().recv_timeout(QUEUE_POLL_TIMEOUT) {
        Ok(entry) => entry,
        Err(_) => {
            return if raise_on_empty { Err(SendError::Empty) } else { Ok(()) };
        }
    };

    let conn = &entry.connection;
    let packets = pack_messages(
        entry.stats.iter().map(|(name, value)| (name.as_str(), *value)),
        entry.timestamp,
        conn.source_host(),
        conn.plugin_instance(),
        conn.plugin_name(),
    )?;

    let socket = socket()?;
    for packet in packets {
        socket.send_to(&packet, conn.collectd_addr())?;
        trace!(
            len = packet.len(),
            host = conn.collectd_host(),
            port = conn.collectd_port(),
            "Sent packet."
        );
    }

    Ok(())
}

/// Runs a cycle forever, logging any error and sleeping `sleep_for` between passes.
///
/// This is the supervisor both background threads run under: a failed cycle never takes the
/// thread down with it.
pub(super) fn supervise<F>(sleep_for: Duration, mut cycle: F)
where
    F: FnMut() -> Result<(), SendError>,
{
    loop {
        if let Err(e) = cycle() {
            error!(error = %e, "Unexpected error in background cycle.");
        }
        if !sleep_for.is_zero() {
            thread::sleep(sleep_for);
        }
    }
}
