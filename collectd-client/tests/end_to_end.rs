//! Socket-level tests driving the full pipeline by hand: record, run one collector cycle, run
//! one sender cycle, and inspect the datagrams that arrive on a loopback listener.
//!
//! The registry, snapshot queue, and outbound socket are process-wide by design, so these
//! tests serialize on a local mutex and reset the shared state before each case.

use std::{
    collections::HashMap,
    net::UdpSocket,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use collectd_client::{
    clear_registry, collect_once, drain_queue, send_once, Connection, SendError, MAX_PACKET_SIZE,
    TYPE_TYPE_INSTANCE, TYPE_VALUES,
};

static PIPELINE: Mutex<()> = Mutex::new(());

fn pipeline_guard() -> MutexGuard<'static, ()> {
    let guard = PIPELINE.lock().unwrap_or_else(|e| e.into_inner());
    clear_registry();
    drain_queue();
    guard
}

fn listener() -> (UdpSocket, u16) {
    let server = UdpSocket::bind("127.0.0.1:0").expect("failed to bind listener");
    server.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let port = server.local_addr().unwrap().port();
    (server, port)
}

fn recv_packet(server: &UdpSocket) -> Vec<u8> {
    let mut buf = vec![0u8; MAX_PACKET_SIZE * 2];
    let (len, _) = server.recv_from(&mut buf).expect("timed out waiting for datagram");
    assert!(len <= MAX_PACKET_SIZE, "datagram exceeds protocol packet bound");
    buf.truncate(len);
    buf
}

/// Extracts the stat names and values carried by a packet, pairing each type instance field
/// with the value list that follows it.
fn packet_stats(mut packet: &[u8]) -> HashMap<String, f64> {
    let mut stats = HashMap::new();
    let mut pending = None;
    while !packet.is_empty() {
        let type_code = u16::from_be_bytes([packet[0], packet[1]]);
        let len = usize::from(u16::from_be_bytes([packet[2], packet[3]]));
        assert!(len > 4 && len <= packet.len(), "malformed field length");
        match type_code {
            TYPE_TYPE_INSTANCE => {
                pending = Some(String::from_utf8(packet[4..len - 1].to_vec()).unwrap());
            }
            TYPE_VALUES => {
                let name = pending.take().expect("value list without preceding stat name");
                let raw: [u8; 8] = packet[7..15].try_into().unwrap();
                stats.insert(name, f64::from_le_bytes(raw));
            }
            _ => {}
        }
        packet = &packet[len..];
    }
    stats
}

fn stats_map(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs.iter().map(|(name, value)| ((*name).to_string(), *value)).collect()
}

#[test]
fn send_on_empty_queue() {
    let _guard = pipeline_guard();
    assert!(send_once(false).is_ok());
    assert!(matches!(send_once(true), Err(SendError::Empty)));
}

#[test]
fn single_stat_roundtrip() {
    let _guard = pipeline_guard();
    let (server, port) = listener();
    let conn = Connection::builder()
        .with_source_host("testhost")
        .with_collectd_host("127.0.0.1")
        .with_collectd_port(port)
        .get();

    conn.counter("test").record(&[], &[("foo", 5.0)]);
    collect_once();
    send_once(true).unwrap();

    let stats = packet_stats(&recv_packet(&server));
    assert_eq!(stats, stats_map(&[("test-foo", 5.0)]));

    // Snapshotted cells persist and report zero on the next interval.
    collect_once();
    send_once(true).unwrap();
    let stats = packet_stats(&recv_packet(&server));
    assert_eq!(stats, stats_map(&[("test-foo", 0.0)]));
}

#[test]
fn plugin_identity_on_wire() {
    let _guard = pipeline_guard();
    let (server, port) = listener();
    let conn = Connection::builder()
        .with_source_host("sourcebox")
        .with_collectd_host("127.0.0.1")
        .with_collectd_port(port)
        .with_plugin_name("dckx")
        .with_plugin_instance("xkcd")
        .get();

    conn.counter("test").record(&[], &[("foo", 5.0)]);
    collect_once();
    send_once(true).unwrap();

    let packet = recv_packet(&server);
    for needle in [&b"dckx\0"[..], b"xkcd\0", b"sourcebox\0", b"gauge\0"] {
        assert!(
            packet.windows(needle.len()).any(|window| window == needle),
            "packet is missing {needle:?}"
        );
    }
}

#[test]
fn collector_skips_connections_without_data() {
    let _guard = pipeline_guard();
    let (_server, port) = listener();
    let conn = Connection::builder()
        .with_source_host("testhost")
        .with_collectd_host("127.0.0.1")
        .with_collectd_port(port)
        .get();

    collect_once();
    assert!(matches!(send_once(true), Err(SendError::Empty)));

    // Merely referencing a counter generates no data either.
    conn.counter("test");
    collect_once();
    assert!(matches!(send_once(true), Err(SendError::Empty)));
}

#[test]
fn counters_merge_into_one_snapshot() {
    let _guard = pipeline_guard();
    let (server, port) = listener();
    let conn = Connection::builder()
        .with_source_host("testhost")
        .with_collectd_host("127.0.0.1")
        .with_collectd_port(port)
        .get();

    conn.counter("foo").record(&[], &[("baz", 5.0)]);
    conn.counter("bar").record(&[], &[("baz", 7.0)]);
    collect_once();
    send_once(true).unwrap();

    let stats = packet_stats(&recv_packet(&server));
    assert_eq!(stats, stats_map(&[("foo-baz", 5.0), ("bar-baz", 7.0)]));

    // One connection yields one queue entry no matter how many counters it carries.
    assert!(matches!(send_once(true), Err(SendError::Empty)));
}

#[test]
fn connections_send_to_their_own_destinations() {
    let _guard = pipeline_guard();
    let (server1, port1) = listener();
    let (server2, port2) = listener();

    let conn1 = Connection::builder()
        .with_source_host("testhost")
        .with_collectd_host("127.0.0.1")
        .with_collectd_port(port1)
        .get();
    let conn2 = Connection::builder()
        .with_source_host("testhost")
        .with_collectd_host("127.0.0.1")
        .with_collectd_port(port2)
        .get();

    conn1.counter("foo").record(&[], &[("baz", 5.0)]);
    conn2.counter("bar").record(&[], &[("baz", 7.0)]);
    collect_once();
    send_once(true).unwrap();
    send_once(true).unwrap();

    assert_eq!(packet_stats(&recv_packet(&server1)), stats_map(&[("foo-baz", 5.0)]));
    assert_eq!(packet_stats(&recv_packet(&server2)), stats_map(&[("bar-baz", 7.0)]));
}

#[test]
fn half_size_stats_sent_in_separate_datagrams() {
    let _guard = pipeline_guard();
    let (server, port) = listener();
    let conn = Connection::builder()
        .with_source_host("testhost")
        .with_collectd_host("127.0.0.1")
        .with_collectd_port(port)
        .get();

    let first = "X".repeat(MAX_PACKET_SIZE / 2);
    let second = "Y".repeat(MAX_PACKET_SIZE / 2);
    conn.counter("test").record(&[], &[(first.as_str(), 123.0), (second.as_str(), 321.0)]);
    collect_once();
    send_once(true).unwrap();

    let mut merged = HashMap::new();
    for _ in 0..2 {
        let stats = packet_stats(&recv_packet(&server));
        assert_eq!(stats.len(), 1, "each datagram carries exactly one oversize stat");
        merged.extend(stats);
    }
    assert_eq!(merged.get(&format!("test-{first}")), Some(&123.0));
    assert_eq!(merged.get(&format!("test-{second}")), Some(&321.0));
}

#[test]
fn fifty_stats_fill_exactly_two_datagrams() {
    let _guard = pipeline_guard();
    let (server, port) = listener();
    let conn = Connection::builder()
        .with_source_host("testhost")
        .with_collectd_host("127.0.0.1")
        .with_collectd_port(port)
        .get();

    let names: Vec<String> = (0..50).map(|i| format!("x{i:02}")).collect();
    let stats: Vec<(&str, f64)> =
        names.iter().enumerate().map(|(i, name)| (name.as_str(), i as f64)).collect();
    conn.counter("test").record(&[], &stats);
    collect_once();
    send_once(true).unwrap();

    let mut merged = HashMap::new();
    let mut received = 0;
    for _ in 0..2 {
        let stats = packet_stats(&recv_packet(&server));
        received += stats.len();
        merged.extend(stats);
    }
    // Every stat arrives exactly once across the two datagrams.
    assert_eq!(received, 50);
    for (i, name) in names.iter().enumerate() {
        assert_eq!(merged.get(&format!("test-{name}")), Some(&(i as f64)));
    }

    // And there is no third datagram.
    server.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
    let mut buf = [0u8; 64];
    assert!(server.recv_from(&mut buf).is_err());
}
