//! A toy producer/consumer pipeline that reports its behavior through collectd: how many
//! candidate numbers were produced, how long primality checks took, and how deep the work
//! queue is at any moment.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant, SystemTime},
};

use collectd_client::Connection;
use crossbeam_channel::unbounded;
use rand::Rng;

fn is_prime(n: u64) -> bool {
    (2..n).all(|i| n % i != 0)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

fn main() {
    tracing_subscriber::fmt::init();

    collectd_client::start().expect("failed to start collectd pipeline");

    let conn = Connection::builder().get();
    let (numbers_tx, numbers_rx) = unbounded::<u64>();

    let consumer_conn = Arc::clone(&conn);
    let consumer_rx = numbers_rx.clone();
    thread::spawn(move || {
        while let Ok(n) = consumer_rx.recv() {
            let started = Instant::now();
            let prime = is_prime(n);
            let elapsed = started.elapsed().as_secs_f64();
            let counter = consumer_conn.counter("consumer");
            if prime {
                println!("{n} is prime");
                counter.record(&["prime"], &[("count", 1.0), ("time", elapsed)]);
            } else {
                println!("{n} is not prime");
                counter.record(&["composite"], &[("count", 1.0), ("time", elapsed)]);
            }
        }
    });

    let producer_conn = Arc::clone(&conn);
    thread::spawn(move || {
        let mut rng = rand::rng();
        loop {
            let n = ((unix_now() % 30) as f64).powf(rng.random_range(3.0..7.0)) as u64;
            let counter = producer_conn.counter("producer");
            if n < 2 {
                counter.record(&[], &[("too_small", 1.0)]);
            } else if n > 1_000_000_000 {
                counter.record(&[], &[("too_big", 1.0)]);
            } else {
                counter.record(&[], &[("just_right", 1.0)]);
                let _ = numbers_tx.send(n);
            }
            thread::sleep(Duration::from_millis(330));
        }
    });

    loop {
        conn.counter("queue").set_exact(&[("size", numbers_rx.len() as f64)]);
        thread::sleep(Duration::from_secs(1));
    }
}
