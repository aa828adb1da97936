//! Postgres-backed metric storage with transient-error retry.

use std::future::Future;

use async_trait::async_trait;
use metron_core::{Metric, MetricKind};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Connection, Row};
use tracing::{info, warn};

use super::retry::{RetryPolicy, is_recoverable};
use super::{MetricStorage, StorageError};

const CREATE_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS metron_metrics (
    id    TEXT PRIMARY KEY,
    kind  TEXT NOT NULL,
    delta BIGINT,
    value DOUBLE PRECISION
)";

const UPSERT: &str = "\
INSERT INTO metron_metrics (id, kind, delta, value) VALUES ($1, $2, $3, $4)
ON CONFLICT (id) DO UPDATE SET kind = EXCLUDED.kind, delta = EXCLUDED.delta, value = EXCLUDED.value";

pub struct SqlStorage {
    pool: PgPool,
    retry: RetryPolicy,
}

impl SqlStorage {
    /// Connect the pool and bootstrap the metrics table.
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(dsn)
            .await?;

        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        info!("database storage ready ({max_connections} connections max)");

        Ok(SqlStorage {
            pool,
            retry: RetryPolicy::default(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run `op`, retrying recoverable failures with backoff. Each retry is
    /// preceded by a pool ping so a dead connection is replaced before the
    /// next attempt.
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, sqlx::Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut last_err: Option<sqlx::Error> = None;

        for attempt in 0..self.retry.attempts.max(1) {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay(attempt - 1)).await;
                self.on_retry(attempt, last_err.as_ref()).await;
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if is_recoverable(&e) && attempt + 1 < self.retry.attempts.max(1) => {
                    warn!("database operation failed, will retry: {e}");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.expect("retry loop exits via return on first attempt"))
    }

    async fn on_retry(&self, attempt: u32, err: Option<&sqlx::Error>) {
        if let Some(err) = err {
            info!("reconnecting database (attempt {attempt}): {err}");
        }
        match self.pool.acquire().await {
            Ok(mut conn) => {
                if let Err(e) = conn.ping().await {
                    warn!("database ping failed: {e}");
                }
            }
            Err(e) => warn!("cannot acquire connection for ping: {e}"),
        }
    }
}

fn metric_from_row(row: &PgRow) -> Result<Metric, StorageError> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;

    let kind: MetricKind = kind.parse().map_err(|_| StorageError::CorruptRow {
        id: id.clone(),
        reason: format!("unknown kind {kind:?}"),
    })?;

    Ok(Metric {
        id,
        kind,
        delta: row.try_get("delta")?,
        value: row.try_get("value")?,
    })
}

#[async_trait]
impl MetricStorage for SqlStorage {
    async fn create(&self, metric: &Metric) -> Result<Metric, StorageError> {
        let pool = self.pool.clone();
        let metric = metric.clone();

        self.with_retry(|| {
            let pool = pool.clone();
            let metric = metric.clone();
            async move {
                sqlx::query(UPSERT)
                    .bind(&metric.id)
                    .bind(metric.kind.as_str())
                    .bind(metric.delta)
                    .bind(metric.value)
                    .execute(&pool)
                    .await
            }
        })
        .await?;

        Ok(metric)
    }

    async fn read(&self, id: &str) -> Result<Option<Metric>, StorageError> {
        let pool = self.pool.clone();
        let id = id.to_string();

        let row = self
            .with_retry(|| {
                let pool = pool.clone();
                let id = id.clone();
                async move {
                    sqlx::query("SELECT id, kind, delta, value FROM metron_metrics WHERE id = $1")
                        .bind(id)
                        .fetch_optional(&pool)
                        .await
                }
            })
            .await?;

        row.as_ref().map(metric_from_row).transpose()
    }

    async fn read_many(&self, ids: &[String]) -> Result<Vec<Metric>, StorageError> {
        let pool = self.pool.clone();
        let ids = ids.to_vec();

        let rows = self
            .with_retry(|| {
                let pool = pool.clone();
                let ids = ids.clone();
                async move {
                    sqlx::query(
                        "SELECT id, kind, delta, value FROM metron_metrics WHERE id = ANY($1)",
                    )
                    .bind(ids)
                    .fetch_all(&pool)
                    .await
                }
            })
            .await?;

        rows.iter().map(metric_from_row).collect()
    }

    async fn read_all_ids(&self) -> Result<Vec<String>, StorageError> {
        let pool = self.pool.clone();

        let rows = self
            .with_retry(|| {
                let pool = pool.clone();
                async move {
                    sqlx::query("SELECT id FROM metron_metrics")
                        .fetch_all(&pool)
                        .await
                }
            })
            .await?;

        rows.iter()
            .map(|row| row.try_get("id").map_err(StorageError::from))
            .collect()
    }

    async fn update(&self, metric: &Metric) -> Result<Metric, StorageError> {
        let pool = self.pool.clone();
        let metric = metric.clone();

        self.with_retry(|| {
            let pool = pool.clone();
            let metric = metric.clone();
            async move {
                sqlx::query(
                    "UPDATE metron_metrics SET kind = $2, delta = $3, value = $4 WHERE id = $1",
                )
                .bind(&metric.id)
                .bind(metric.kind.as_str())
                .bind(metric.delta)
                .bind(metric.value)
                .execute(&pool)
                .await
            }
        })
        .await?;

        Ok(metric)
    }

    async fn upsert_many(&self, metrics: &[Metric]) -> Result<(), StorageError> {
        if metrics.is_empty() {
            return Ok(());
        }

        let pool = self.pool.clone();
        let metrics = metrics.to_vec();

        self.with_retry(|| {
            let pool = pool.clone();
            let metrics = metrics.clone();
            async move {
                let mut tx = pool.begin().await?;
                for metric in &metrics {
                    sqlx::query(UPSERT)
                        .bind(&metric.id)
                        .bind(metric.kind.as_str())
                        .bind(metric.delta)
                        .bind(metric.value)
                        .execute(&mut *tx)
                        .await?;
                }
                tx.commit().await
            }
        })
        .await?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let pool = self.pool.clone();
        let id = id.to_string();

        self.with_retry(|| {
            let pool = pool.clone();
            let id = id.clone();
            async move {
                sqlx::query("DELETE FROM metron_metrics WHERE id = $1")
                    .bind(id)
                    .execute(&pool)
                    .await
            }
        })
        .await?;

        Ok(())
    }

    async fn ping(&self) -> bool {
        match self.pool.acquire().await {
            Ok(mut conn) => conn.ping().await.is_ok(),
            Err(e) => {
                warn!("database ping failed: {e}");
                false
            }
        }
    }

    async fn shutdown(&self) {
        self.pool.close().await;
        info!("database pool closed");
    }
}
