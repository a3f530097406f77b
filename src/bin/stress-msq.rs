//! Stress test for `LockFreeQueue`.
//!
//! Usage:
//!     cargo run --release --bin stress-msq
//!
//! Environment variables:
//!     MSQ_PRODUCERS=4   Producer threads per round (default: 4)
//!     MSQ_CONSUMERS=4   Consumer threads per round (default: 4)
//!     MSQ_COUNT=100000  Values enqueued by each producer (default: 100000)
//!     MSQ_ROUNDS=4      Number of rounds (default: 4)
//!
//! Build with `--features tracing` and set `RUST_LOG` to see the queue's own events.

use std::env;
use std::error;
use std::fmt;
use std::hint;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use crossbeam_msqueue::LockFreeQueue;
use crossbeam_utils::thread::scope;

/// An environment variable holding something other than a positive integer.
struct ConfigError {
    var: &'static str,
    value: String,
}

impl fmt::Debug for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:?} is not a positive integer", self.var, self.value)
    }
}

impl error::Error for ConfigError {}

struct Config {
    producers: usize,
    consumers: usize,
    count: usize,
    rounds: usize,
}

impl Config {
    fn from_env() -> Result<Config, ConfigError> {
        Ok(Config {
            producers: var("MSQ_PRODUCERS", 4)?,
            consumers: var("MSQ_CONSUMERS", 4)?,
            count: var("MSQ_COUNT", 100_000)?,
            rounds: var("MSQ_ROUNDS", 4)?,
        })
    }
}

fn var(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let value = match env::var(name) {
        Ok(value) => value,
        Err(env::VarError::NotPresent) => return Ok(default),
        Err(env::VarError::NotUnicode(value)) => {
            return Err(ConfigError {
                var: name,
                value: value.to_string_lossy().into_owned(),
            })
        }
    };

    match value.parse() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError { var: name, value }),
    }
}

/// A value tagged with the producer that sent it and its position in that producer's sequence.
type Tagged = (usize, usize);

/// Drains `queue` until every producer is done and the queue is observed empty afterwards.
///
/// Checks that each producer's values arrive in the order they were sent.
fn consume(
    queue: &LockFreeQueue<Tagged>,
    finished: &AtomicUsize,
    config: &Config,
) -> Result<Vec<Tagged>, String> {
    let mut last = vec![None; config.producers];
    let mut received = Vec::new();

    loop {
        let done = finished.load(Ordering::Acquire) == config.producers;

        match queue.dequeue() {
            Some((producer, seq)) => {
                if last[producer].map_or(false, |prev| prev >= seq) {
                    return Err(format!(
                        "producer {} out of order: {} after {:?}",
                        producer, seq, last[producer]
                    ));
                }
                last[producer] = Some(seq);
                received.push((producer, seq));
            }
            None if done => return Ok(received),
            None => hint::spin_loop(),
        }
    }
}

fn round(config: &Config) -> Result<(), Box<dyn error::Error>> {
    let queue = LockFreeQueue::new();
    let finished = AtomicUsize::new(0);

    let results = scope(|s| {
        let queue = &queue;
        let finished = &finished;

        for producer in 0..config.producers {
            s.spawn(move |_| {
                for seq in 0..config.count {
                    queue.enqueue((producer, seq));
                }
                finished.fetch_add(1, Ordering::Release);
            });
        }

        let consumers: Vec<_> = (0..config.consumers)
            .map(|_| s.spawn(move |_| consume(queue, finished, config)))
            .collect();

        consumers
            .into_iter()
            .map(|h| h.join())
            .collect::<Vec<_>>()
    })
    .map_err(|_| "a producer thread panicked")?;

    let mut seen = vec![vec![false; config.count]; config.producers];
    let mut total = 0;

    for result in results {
        let received = result.map_err(|_| "a consumer thread panicked")??;
        for (producer, seq) in received {
            if seen[producer][seq] {
                return Err(format!("value ({}, {}) dequeued twice", producer, seq).into());
            }
            seen[producer][seq] = true;
            total += 1;
        }
    }

    let expected = config.producers * config.count;
    if total != expected {
        return Err(format!("dequeued {} values, expected {}", total, expected).into());
    }
    if queue.dequeue().is_some() {
        return Err("queue not empty after all consumers finished".into());
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn error::Error>> {
    crossbeam_msqueue::init_tracing();

    let config = Config::from_env()?;

    for i in 0..config.rounds {
        let start = Instant::now();
        round(&config)?;
        let elapsed = start.elapsed();

        #[cfg(feature = "tracing")]
        tracing::info!(round = i, ?elapsed, "round finished");

        println!(
            "round {}: {} producers x {} values, {} consumers, {:?}",
            i, config.producers, config.count, config.consumers, elapsed
        );
    }

    Ok(())
}
