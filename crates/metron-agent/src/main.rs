//!
//! # Agent Operating Model
//!
//! - **Sampler thread**: on every poll tick, harvests process and host
//!   statistics into the shared stats store under a write lock.
//!
//! - **Reporter thread**: on every report tick, offers one signal on a
//!   rendezvous channel; the first free delivery worker takes it.
//!
//! - **Worker pool**: N threads snapshot the store and POST it to the
//!   server (batched when the server supports it), gzipped, optionally
//!   encrypted and HMAC-signed, with bounded retries.
//!
//! - **Shutdown**: Ctrl-C / SIGTERM flips a global flag; tickers stop, the
//!   reporter closes the fan-out channel, workers drain and return, and
//!   main joins every thread.
//!

mod args;
mod reporter;
mod sampler;
mod stats;
mod transport;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Release;

use clap::Parser;
use crossbeam_channel::bounded;
use metron_core::crypto::Encryptor;
use metron_core::signing::Signer;
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, filter};

use crate::args::Args;
use crate::sampler::Sampler;
use crate::stats::Stats;
use crate::transport::{HttpSender, RetryPolicy};

/// Global flag that will be set to `false` when all threads should exit.
static KEEP_RUNNING: AtomicBool = AtomicBool::new(true);

fn main() {
    set_ctrlc_handler();

    let args = Args::parse();
    enable_logging(&args);
    debug!("{args:?}");

    let selection = stats::expand_selection(&args.metrics);
    info!("collecting {} metrics", selection.len());

    let stats = Arc::new(Stats::new());
    let sender = Arc::new(build_sender(&args));

    let (signal_tx, signal_rx) = bounded::<()>(0);

    let mut threads = Vec::new();

    {
        let stats = stats.clone();
        let interval = args.poll_interval();
        let thread = std::thread::Builder::new()
            .name("sampler".to_string())
            .spawn(move || Sampler::new(stats, selection).run(interval, &KEEP_RUNNING))
            .unwrap();
        threads.push(thread);
    }

    for i in 1..=args.rate_limit as usize {
        let signal_rx = signal_rx.clone();
        let stats = stats.clone();
        let sender = sender.clone();
        let thread = std::thread::Builder::new()
            .name(format!("worker-{i}"))
            .spawn(move || reporter::run_worker(i, signal_rx, stats, sender))
            .unwrap();
        threads.push(thread);
    }
    drop(signal_rx);

    {
        let interval = args.report_interval();
        let thread = std::thread::Builder::new()
            .name("reporter".to_string())
            .spawn(move || reporter::run_reporter(interval, signal_tx, &KEEP_RUNNING))
            .unwrap();
        threads.push(thread);
    }

    info!(
        "agent started: reporting to {} with {} workers",
        args.base_url(),
        args.rate_limit
    );

    for thread in threads {
        thread.join().unwrap();
    }

    info!("agent finished");
}

fn build_sender(args: &Args) -> HttpSender {
    let signer = Signer::new(&args.key);
    if signer.is_some() {
        info!("request signing enabled");
    }

    let encryptor = if args.crypto_key.is_empty() {
        None
    } else {
        let public_key = metron_keys::load_public_key(&args.crypto_key)
            .unwrap_or_else(|e| panic!("loading public key {:?}: {e}", args.crypto_key));
        let encryptor =
            Encryptor::new(public_key).unwrap_or_else(|e| panic!("initializing encryption: {e}"));
        info!("payload encryption enabled");
        Some(encryptor)
    };

    let retry = RetryPolicy {
        attempts: args.retry_count,
        wait: args.retry_wait_time(),
        max_wait: args.retry_max_wait_time(),
    };

    HttpSender::new(args.base_url(), signer, encryptor, retry, args.use_batching)
}

fn set_ctrlc_handler() {
    ctrlc::set_handler(|| {
        info!("Received shutdown signal, exiting...");
        KEEP_RUNNING.store(false, Release);
    })
    .expect("Error setting Ctrl-C handler");
}

fn enable_logging(args: &Args) {
    let verbosity = match (args.quiet, args.verbose) {
        (true, _) => tracing::Level::ERROR,
        (false, 0) => tracing::Level::INFO,
        (false, 1) => tracing::Level::DEBUG,
        (false, 2..) => tracing::Level::TRACE,
    };

    let filters = filter::Targets::new()
        .with_target("ureq", tracing::Level::WARN)
        .with_default(verbosity);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_filter(filters);

    tracing_subscriber::registry().with(fmt_layer).init();
}
