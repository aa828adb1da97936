//! Library surface of the metron server: application state, router
//! construction, handlers, ingest pipeline, middleware, and storage.

#![forbid(unsafe_code)]

pub mod args;
pub mod handlers;
pub mod ingest;
pub mod middleware;
pub mod storage;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::{Acquire, Release};

use axum::Router;
use axum::routing::{get, post};
use ipnet::IpNet;
use metron_core::crypto::Decryptor;
use metron_core::signing::Signer;

use crate::ingest::Ingestor;
use crate::storage::MetricStorage;

/// Liveness/readiness flags, flipped on by boot once the process can serve.
#[derive(Debug, Default)]
pub struct HealthFlags {
    liveness: AtomicBool,
    readiness: AtomicBool,
}

impl HealthFlags {
    pub fn set_liveness(&self, state: bool) {
        self.liveness.store(state, Release);
    }

    pub fn set_readiness(&self, state: bool) {
        self.readiness.store(state, Release);
    }

    pub fn liveness(&self) -> bool {
        self.liveness.load(Acquire)
    }

    pub fn readiness(&self) -> bool {
        self.readiness.load(Acquire)
    }
}

/// Process-wide server state. Keys and the trusted subnet are set once at
/// boot and immutable afterwards.
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Ingestor,
    pub signer: Option<Signer>,
    pub decryptor: Option<Arc<Decryptor>>,
    pub trusted_subnet: Option<IpNet>,
    pub health: Arc<HealthFlags>,
}

impl AppState {
    pub fn new(storage: Arc<dyn MetricStorage>) -> Self {
        AppState {
            ingestor: Ingestor::new(storage),
            signer: None,
            decryptor: None,
            trusted_subnet: None,
            health: Arc::new(HealthFlags::default()),
        }
    }

    pub fn with_signer(mut self, signer: Option<Signer>) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_decryptor(mut self, decryptor: Option<Decryptor>) -> Self {
        self.decryptor = decryptor.map(Arc::new);
        self
    }

    pub fn with_trusted_subnet(mut self, subnet: Option<IpNet>) -> Self {
        self.trusted_subnet = subnet;
        self
    }
}

/// Create the axum router with all routes and the middleware chain
/// configured.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/ping", get(handlers::ping))
        .route("/liveness", get(handlers::liveness))
        .route("/readiness", get(handlers::readiness))
        .route("/update/{kind}/{id}/{value}", post(handlers::update_from_path))
        .route("/value/{kind}/{id}", get(handlers::value_from_path))
        .route("/update/", post(handlers::update_json))
        .route("/value/", post(handlers::value_json))
        .route("/updates/", post(handlers::updates_json))
        // innermost to outermost: the request unwinds gzip after decryption
        // after signature checking, matching how agents build payloads
        .layer(axum::middleware::from_fn(middleware::gzip_codec))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::decrypt_body,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::verify_signature,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::admit_subnet,
        ))
        .layer(axum::middleware::from_fn(middleware::log_requests))
        .with_state(state)
}
