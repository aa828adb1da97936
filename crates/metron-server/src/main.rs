//!
//! # Server Operating Model
//!
//! - **One task per request** on the tokio runtime, behind the middleware
//!   chain (logging, subnet admission, signature verification, decryption,
//!   gzip codec).
//!
//! - **Storage selection at boot**: a configured `DATABASE_DSN` selects the
//!   Postgres store with retrying queries; otherwise the in-memory map with
//!   optional file snapshots serves.
//!
//! - **Graceful shutdown**: INT/TERM stops accepting, in-flight requests
//!   drain, the in-memory store writes its final snapshot (or the SQL pool
//!   closes), and the process exits.
//!

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use metron_core::crypto::Decryptor;
use metron_core::signing::Signer;
use metron_server::args::Args;
use metron_server::storage::{MemoryStorage, MetricStorage, SqlStorage};
use metron_server::{AppState, create_app};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, filter};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    enable_logging(&args);
    debug!("{args:?}");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let storage = build_storage(&args, shutdown_rx.clone()).await;
    let state = AppState::new(storage.clone())
        .with_signer(build_signer(&args))
        .with_decryptor(build_decryptor(&args))
        .with_trusted_subnet(
            args.trusted_subnet()
                .unwrap_or_else(|e| panic!("parsing trusted subnet {:?}: {e}", args.trusted_subnet)),
        );

    let health = state.health.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(&args.address)
        .await
        .unwrap_or_else(|e| panic!("binding {}: {e}", args.address));
    info!("listening on {}", args.address);

    health.set_liveness(true);
    health.set_readiness(true);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap_or_else(|e| panic!("server failed: {e}"));

    // in-flight requests have drained; stop background tasks and flush
    let _ = shutdown_tx.send(true);
    storage.shutdown().await;

    info!("server finished");
}

async fn build_storage(args: &Args, shutdown: watch::Receiver<bool>) -> Arc<dyn MetricStorage> {
    if !args.database_dsn.is_empty() {
        let storage = SqlStorage::connect(&args.database_dsn, args.database_max_conn)
            .await
            .unwrap_or_else(|e| panic!("connecting database: {e}"));
        spawn_pool_watchdog(
            storage.pool().clone(),
            args.database_ping_interval(),
            shutdown,
        );
        return Arc::new(storage);
    }

    let file_path = if args.file_storage_path.is_empty() {
        None
    } else {
        Some(args.file_storage_path.clone().into())
    };

    let storage = MemoryStorage::new(file_path, args.store_interval(), args.restore);
    storage.spawn_periodic_snapshots(args.store_interval(), shutdown);
    storage
}

/// Periodically ping the pool so dead connections surface in the log
/// before an agent hits them.
fn spawn_pool_watchdog(
    pool: sqlx::PgPool,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if interval.is_zero() {
        return;
    }
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    use sqlx::Connection;
                    match pool.acquire().await {
                        Ok(mut conn) => {
                            if let Err(e) = conn.ping().await {
                                warn!("database ping failed: {e}");
                            }
                        }
                        Err(e) => warn!("database unreachable: {e}"),
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    });
}

fn build_signer(args: &Args) -> Option<Signer> {
    let signer = Signer::new(&args.key);
    if signer.is_some() {
        info!("signature verification enabled");
    }
    signer
}

fn build_decryptor(args: &Args) -> Option<Decryptor> {
    if args.crypto_key.is_empty() {
        return None;
    }

    let private_key = metron_keys::load_private_key(&args.crypto_key)
        .unwrap_or_else(|e| panic!("loading private key {:?}: {e}", args.crypto_key));
    let decryptor =
        Decryptor::new(private_key).unwrap_or_else(|e| panic!("initializing decryption: {e}"));

    info!("payload decryption enabled");
    Some(decryptor)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Error setting Ctrl-C handler");
    };

    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Error setting SIGTERM handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal, draining...");
}

fn enable_logging(args: &Args) {
    let verbosity = match (args.quiet, args.verbose) {
        (true, _) => tracing::Level::ERROR,
        (false, 0) => tracing::Level::INFO,
        (false, 1) => tracing::Level::DEBUG,
        (false, 2..) => tracing::Level::TRACE,
    };

    let filters = filter::Targets::new()
        .with_target("sqlx", tracing::Level::WARN)
        .with_target("hyper_util", tracing::Level::WARN)
        .with_default(verbosity);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_filter(filters);

    tracing_subscriber::registry().with(fmt_layer).init();
}
