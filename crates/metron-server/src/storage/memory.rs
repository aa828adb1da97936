//! In-memory metric map with file snapshot durability.
//!
//! Two durability modes: with a store interval of zero every mutation
//! writes the snapshot synchronously under the write lock; otherwise a
//! background task snapshots periodically under the read lock and a final
//! snapshot runs at shutdown. Snapshot failures are logged, never surfaced
//! to callers.
//!
//! The snapshot is one JSON object mapping id to metric, the same shape as
//! a wire envelope element.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use metron_core::Metric;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{MetricStorage, StorageError};

pub struct MemoryStorage {
    map: RwLock<HashMap<String, Metric>>,
    file_path: Option<PathBuf>,
    save_sync: bool,
}

impl MemoryStorage {
    /// Build the store, restoring the snapshot when asked. An absent
    /// snapshot file is an empty store, not an error.
    pub fn new(file_path: Option<PathBuf>, store_interval: Duration, restore: bool) -> Arc<Self> {
        let storage = Arc::new(MemoryStorage {
            map: RwLock::new(HashMap::new()),
            save_sync: file_path.is_some() && store_interval.is_zero(),
            file_path,
        });

        if restore {
            storage.restore();
        }

        storage
    }

    /// Spawn the periodic snapshot task. Returns immediately when this
    /// store has no file path or snapshots synchronously.
    pub fn spawn_periodic_snapshots(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if self.file_path.is_none() || self.save_sync {
            return None;
        }

        let storage = self.clone();
        Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = storage.snapshot_shared() {
                            warn!("failed to snapshot store: {e}");
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("snapshot task stopping");
                        return;
                    }
                }
            }
        }))
    }

    fn restore(&self) {
        let Some(path) = &self.file_path else { return };

        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no snapshot at {}, starting empty", path.display());
                return;
            }
            Err(e) => {
                warn!("cannot read snapshot {}: {e}, starting empty", path.display());
                return;
            }
        };

        match serde_json::from_slice::<HashMap<String, Metric>>(&data) {
            Ok(restored) => {
                info!("restored {} metrics from {}", restored.len(), path.display());
                *self.map.write().unwrap() = restored;
            }
            Err(e) => warn!("cannot parse snapshot {}: {e}, starting empty", path.display()),
        }
    }

    /// Snapshot under the read lock (periodic/final path).
    fn snapshot_shared(&self) -> Result<(), StorageError> {
        let map = self.map.read().unwrap();
        self.write_snapshot(&map)
    }

    fn write_snapshot(&self, map: &HashMap<String, Metric>) -> Result<(), StorageError> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };

        let data = serde_json::to_vec(map)?;
        std::fs::write(path, data)?;
        debug!("snapshot of {} metrics written to {}", map.len(), path.display());
        Ok(())
    }

    /// Best-effort synchronous snapshot after a mutation, while the write
    /// lock is still held.
    fn snapshot_after_mutation(&self, map: &HashMap<String, Metric>) {
        if !self.save_sync {
            return;
        }
        if let Err(e) = self.write_snapshot(map) {
            warn!("failed to snapshot store after write: {e}");
        }
    }
}

#[async_trait]
impl MetricStorage for MemoryStorage {
    async fn create(&self, metric: &Metric) -> Result<Metric, StorageError> {
        let mut map = self.map.write().unwrap();
        map.insert(metric.id.clone(), metric.clone());
        self.snapshot_after_mutation(&map);
        Ok(metric.clone())
    }

    async fn read(&self, id: &str) -> Result<Option<Metric>, StorageError> {
        Ok(self.map.read().unwrap().get(id).cloned())
    }

    async fn read_many(&self, ids: &[String]) -> Result<Vec<Metric>, StorageError> {
        let map = self.map.read().unwrap();
        Ok(ids.iter().filter_map(|id| map.get(id).cloned()).collect())
    }

    async fn read_all_ids(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.map.read().unwrap().keys().cloned().collect())
    }

    async fn update(&self, metric: &Metric) -> Result<Metric, StorageError> {
        let mut map = self.map.write().unwrap();
        map.insert(metric.id.clone(), metric.clone());
        self.snapshot_after_mutation(&map);
        Ok(metric.clone())
    }

    async fn upsert_many(&self, metrics: &[Metric]) -> Result<(), StorageError> {
        let mut map = self.map.write().unwrap();
        for metric in metrics {
            map.insert(metric.id.clone(), metric.clone());
        }
        self.snapshot_after_mutation(&map);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let mut map = self.map.write().unwrap();
        map.remove(id);
        self.snapshot_after_mutation(&map);
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }

    async fn shutdown(&self) {
        if let Err(e) = self.snapshot_shared() {
            warn!("failed to write final snapshot: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volatile() -> Arc<MemoryStorage> {
        MemoryStorage::new(None, Duration::from_secs(300), false)
    }

    #[tokio::test]
    async fn create_then_read_returns_a_copy() {
        let storage = volatile();
        let metric = Metric::gauge("temp", 21.5);

        storage.create(&metric).await.unwrap();
        assert_eq!(storage.read("temp").await.unwrap(), Some(metric));
        assert_eq!(storage.read("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn upsert_many_installs_every_row() {
        let storage = volatile();
        let batch = vec![Metric::counter("a", 1), Metric::gauge("b", 2.0)];

        storage.upsert_many(&batch).await.unwrap();

        let mut ids = storage.read_all_ids().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn read_many_skips_unknown_ids() {
        let storage = volatile();
        storage.create(&Metric::counter("a", 1)).await.unwrap();

        let found = storage
            .read_many(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(found, vec![Metric::counter("a", 1)]);
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let storage = volatile();
        storage.create(&Metric::counter("a", 1)).await.unwrap();

        storage.delete("a").await.unwrap();
        assert_eq!(storage.read("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ping_is_always_healthy() {
        assert!(volatile().ping().await);
    }

    #[tokio::test]
    async fn sync_mode_snapshots_every_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let storage = MemoryStorage::new(Some(path.clone()), Duration::ZERO, false);

        storage.create(&Metric::counter("hits", 3)).await.unwrap();

        let data = std::fs::read(&path).unwrap();
        let on_disk: HashMap<String, Metric> = serde_json::from_slice(&data).unwrap();
        assert_eq!(on_disk.get("hits"), Some(&Metric::counter("hits", 3)));
    }

    #[tokio::test]
    async fn snapshot_restores_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        {
            let storage = MemoryStorage::new(Some(path.clone()), Duration::ZERO, false);
            storage
                .upsert_many(&[Metric::counter("a", 3), Metric::gauge("b", 7.0)])
                .await
                .unwrap();
        }

        let restored = MemoryStorage::new(Some(path), Duration::ZERO, true);
        assert_eq!(restored.read("a").await.unwrap(), Some(Metric::counter("a", 3)));
        assert_eq!(restored.read("b").await.unwrap(), Some(Metric::gauge("b", 7.0)));
    }

    #[tokio::test]
    async fn restore_with_absent_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MemoryStorage::new(Some(dir.path().join("absent.json")), Duration::ZERO, true);
        assert!(storage.read_all_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn restore_with_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, "{ not json").unwrap();

        let storage = MemoryStorage::new(Some(path), Duration::ZERO, true);
        assert!(storage.read_all_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_writes_a_final_snapshot_in_periodic_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let storage = MemoryStorage::new(Some(path.clone()), Duration::from_secs(300), false);

        storage.create(&Metric::gauge("temp", 19.0)).await.unwrap();
        assert!(!path.exists());

        storage.shutdown().await;

        let data = std::fs::read(&path).unwrap();
        let on_disk: HashMap<String, Metric> = serde_json::from_slice(&data).unwrap();
        assert_eq!(on_disk.len(), 1);
    }

    #[tokio::test]
    async fn snapshot_failure_does_not_fail_the_write() {
        let storage = MemoryStorage::new(
            Some(PathBuf::from("/nonexistent-dir/snapshot.json")),
            Duration::ZERO,
            false,
        );

        storage.create(&Metric::counter("a", 1)).await.unwrap();
        assert_eq!(storage.read("a").await.unwrap(), Some(Metric::counter("a", 1)));
    }
}
