//! The storage seam: one contract, two interchangeable backends.
//!
//! `DATABASE_DSN` set at boot selects the Postgres-backed [`SqlStorage`];
//! otherwise the [`MemoryStorage`] map with optional file snapshots is used.
//! The two are observationally equivalent under [`MetricStorage`].

pub mod memory;
pub mod retry;
pub mod sql;

use async_trait::async_trait;
use metron_core::Metric;

pub use memory::MemoryStorage;
pub use sql::SqlStorage;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored row for {id:?} is malformed: {reason}")]
    CorruptRow { id: String, reason: String },
}

/// Context-aware storage contract shared by both backends. Returned metrics
/// are copies; the store exclusively owns its internal state.
#[async_trait]
pub trait MetricStorage: Send + Sync {
    async fn create(&self, metric: &Metric) -> Result<Metric, StorageError>;

    async fn read(&self, id: &str) -> Result<Option<Metric>, StorageError>;

    async fn read_many(&self, ids: &[String]) -> Result<Vec<Metric>, StorageError>;

    async fn read_all_ids(&self) -> Result<Vec<String>, StorageError>;

    async fn update(&self, metric: &Metric) -> Result<Metric, StorageError>;

    /// Install the whole set transactionally: all rows or none.
    async fn upsert_many(&self, metrics: &[Metric]) -> Result<(), StorageError>;

    async fn delete(&self, id: &str) -> Result<(), StorageError>;

    async fn ping(&self) -> bool;

    /// Flush state on process shutdown: final snapshot or pool close.
    async fn shutdown(&self);
}
