use std::{
    collections::HashMap,
    io,
    net::{Ipv4Addr, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use once_cell::sync::{Lazy, OnceCell};
use thiserror::Error;

use crate::{connection::Connection, SEND_INTERVAL};

mod sync;
pub use self::sync::{collect_once, send_once, SendError};

/// One queued snapshot: the collection timestamp, the merged per-connection stats, and the
/// connection they came from. Immutable once enqueued.
pub(crate) struct Snapshot {
    pub timestamp: u64,
    pub stats: HashMap<String, f64>,
    pub connection: Arc<Connection>,
}

// The snapshot queue between the collector and the sender. Unbounded FIFO; entries are drained
// one per sender cycle.
static SNAPSHOTS: Lazy<(Sender<Snapshot>, Receiver<Snapshot>)> = Lazy::new(unbounded);

pub(crate) fn snapshot_sender() -> &'static Sender<Snapshot> {
    &SNAPSHOTS.0
}

pub(crate) fn snapshot_receiver() -> &'static Receiver<Snapshot> {
    &SNAPSHOTS.1
}

// The one outbound socket, bound on first use and shared by every connection. Only the sender
// path writes to it, so no synchronization is needed beyond the lazy initialization.
static SOCKET: OnceCell<UdpSocket> = OnceCell::new();

pub(crate) fn socket() -> io::Result<&'static UdpSocket> {
    SOCKET.get_or_try_init(|| UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)))
}

static STARTED: AtomicBool = AtomicBool::new(false);

/// Errors that could occur while starting the background pipeline.
#[derive(Debug, Error)]
pub enum StartError {
    /// The pipeline was already started by an earlier call.
    #[error("background pipeline already started")]
    AlreadyStarted,

    /// A background thread could not be spawned.
    #[error("failed to spawn background thread")]
    Backend,
}

/// Starts the background pipeline: a collector thread that snapshots every registered
/// connection once per [`SEND_INTERVAL`], and a sender thread that drains the snapshot queue
/// onto the network.
///
/// Both threads run for the life of the process. Errors inside a cycle are logged and the
/// cycle is retried on the next pass; they never terminate the threads.
///
/// # Errors
///
/// Returns an error if the pipeline has already been started, or if a background thread could
/// not be spawned.
pub fn start() -> Result<(), StartError> {
    if STARTED.swap(true, Ordering::SeqCst) {
        return Err(StartError::AlreadyStarted);
    }

    thread::Builder::new()
        .name("collectd-client-collector".to_string())
        .spawn(|| {
            sync::supervise(SEND_INTERVAL, || {
                collect_once();
                Ok(())
            })
        })
        .map_err(|_| StartError::Backend)?;

    thread::Builder::new()
        .name("collectd-client-sender".to_string())
        .spawn(|| sync::supervise(Duration::ZERO, || send_once(false)))
        .map_err(|_| StartError::Backend)?;

    Ok(())
}

/// Discards every queued snapshot.
///
/// Exists for the same reason as [`clear_registry`](crate::clear_registry): tests that drive
/// [`collect_once`] and [`send_once`] by hand need a way to reset the process-wide queue
/// between cases.
pub fn drain_queue() {
    while snapshot_receiver().try_recv().is_ok() {}
}
