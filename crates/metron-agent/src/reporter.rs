//! Report fan-out: a ticker thread hands "report now" signals to a pool of
//! delivery workers over a rendezvous channel.
//!
//! The channel has capacity zero, so a tick blocks until some worker is free
//! to take it; with all workers busy the tick is effectively absorbed by the
//! next free worker, which is acceptable for a periodic (not event-driven)
//! signal. On shutdown the reporter returns and drops the sender; workers
//! observe the closed channel and exit.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::stats::Stats;
use crate::transport::HttpSender;

/// How often blocked loops wake up to check the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Run report ticks until `keep_running` goes false, then close the channel
/// by dropping `signals`.
pub fn run_reporter(interval: Duration, signals: Sender<()>, keep_running: &AtomicBool) {
    let ticker = crossbeam_channel::tick(interval);

    while keep_running.load(Relaxed) {
        match ticker.recv_timeout(SHUTDOWN_POLL) {
            Ok(_) => fan_out(&signals, keep_running),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("reporter stopped");
}

fn fan_out(signals: &Sender<()>, keep_running: &AtomicBool) {
    loop {
        if !keep_running.load(Relaxed) {
            return;
        }
        match signals.send_timeout((), SHUTDOWN_POLL) {
            Ok(()) => return,
            Err(SendTimeoutError::Timeout(())) => {} // all workers busy, keep offering
            Err(SendTimeoutError::Disconnected(())) => return,
        }
    }
}

/// One delivery worker: take a signal, snapshot the stats, deliver, and on
/// success reset the poll counter. Delivery failures never abort the pool.
pub fn run_worker(id: usize, signals: Receiver<()>, stats: Arc<Stats>, sender: Arc<HttpSender>) {
    info!("worker-{id} started");

    while signals.recv().is_ok() {
        let batch = stats.as_batch();
        if batch.is_empty() {
            warn!("worker-{id}: no metrics collected yet, nothing to send");
            continue;
        }

        match sender.send(&batch) {
            Ok(()) => {
                stats.reset_poll_count();
                debug!("worker-{id}: sent {} metrics", batch.len());
            }
            Err(e) => warn!("worker-{id}: delivery failed: {e}"),
        }
    }

    info!("worker-{id} shutting down");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering::Release;

    use crossbeam_channel::bounded;

    use super::*;

    #[test]
    fn fan_out_returns_once_a_worker_takes_the_signal() {
        let keep_running = AtomicBool::new(true);
        let (tx, rx) = bounded::<()>(0);

        let taker = std::thread::spawn(move || rx.recv().is_ok());
        fan_out(&tx, &keep_running);

        assert!(taker.join().unwrap());
    }

    #[test]
    fn fan_out_gives_up_on_shutdown() {
        let keep_running = AtomicBool::new(true);
        let (tx, _rx) = bounded::<()>(0);

        // nobody ever receives; flip the flag shortly after
        std::thread::scope(|scope| {
            scope.spawn(|| {
                std::thread::sleep(Duration::from_millis(50));
                keep_running.store(false, Release);
            });
            fan_out(&tx, &keep_running);
        });
    }

    #[test]
    fn workers_exit_when_the_channel_closes() {
        let (tx, rx) = bounded::<()>(0);
        let stats = Arc::new(Stats::new());
        let sender = Arc::new(HttpSender::new(
            "http://127.0.0.1:1".to_string(),
            None,
            None,
            crate::transport::RetryPolicy {
                attempts: 1,
                wait: Duration::from_millis(1),
                max_wait: Duration::from_millis(1),
            },
            false,
        ));

        let worker = std::thread::spawn(move || run_worker(1, rx, stats, sender));
        drop(tx);

        worker.join().unwrap();
    }
}
