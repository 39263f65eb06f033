use std::{thread, time::Duration};

use collectd_client::Connection;
use rand::Rng;

fn main() {
    tracing_subscriber::fmt::init();

    collectd_client::start().expect("failed to start collectd pipeline");

    let conn = Connection::builder().get();
    let mut rng = rand::rng();

    // Loop over and over, pretending to do some work.
    loop {
        conn.counter("some_category")
            .record(&[], &[("some_counter", 1.0), ("another_stat", rng.random())]);

        if rng.random_bool(0.5) {
            conn.counter("coin_stats").record(&["heads"], &[("flips", 1.0)]);
        } else {
            conn.counter("coin_stats").record(&["tails"], &[("flips", 1.0)]);
        }

        thread::sleep(Duration::from_secs(rng.random_range(1..=4)));
    }
}
