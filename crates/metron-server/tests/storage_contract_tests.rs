//! Behavioural contract of the storage seam, exercised through the
//! in-memory backend. The SQL backend implements the same trait and must
//! satisfy the same observations; these tests pin the semantics callers
//! rely on.

use std::sync::Arc;
use std::time::Duration;

use metron_core::Metric;
use metron_server::ingest::Ingestor;
use metron_server::storage::{MemoryStorage, MetricStorage};

fn storage() -> Arc<MemoryStorage> {
    MemoryStorage::new(None, Duration::from_secs(300), false)
}

#[tokio::test]
async fn create_then_update_replaces_the_row() {
    let storage = storage();

    storage.create(&Metric::counter("hits", 1)).await.unwrap();
    storage.update(&Metric::counter("hits", 10)).await.unwrap();

    assert_eq!(
        storage.read("hits").await.unwrap(),
        Some(Metric::counter("hits", 10))
    );
}

#[tokio::test]
async fn returned_metrics_are_copies_not_views() {
    let storage = storage();
    storage.create(&Metric::gauge("temp", 1.0)).await.unwrap();

    let mut copy = storage.read("temp").await.unwrap().unwrap();
    copy.value = Some(99.0);

    // mutating the copy must not affect the stored row
    assert_eq!(
        storage.read("temp").await.unwrap(),
        Some(Metric::gauge("temp", 1.0))
    );
}

#[tokio::test]
async fn read_many_preserves_request_order() {
    let storage = storage();
    storage
        .upsert_many(&[
            Metric::counter("a", 1),
            Metric::counter("b", 2),
            Metric::counter("c", 3),
        ])
        .await
        .unwrap();

    let found = storage
        .read_many(&["c".to_string(), "a".to_string()])
        .await
        .unwrap();
    assert_eq!(found, vec![Metric::counter("c", 3), Metric::counter("a", 1)]);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let storage = storage();
    storage.create(&Metric::counter("a", 1)).await.unwrap();

    storage.delete("a").await.unwrap();
    storage.delete("a").await.unwrap();

    assert_eq!(storage.read("a").await.unwrap(), None);
    assert!(storage.read_all_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn upsert_overwrites_existing_rows_verbatim() {
    // upsert installs already-merged rows; no merge happens at this layer
    let storage = storage();
    storage.create(&Metric::counter("hits", 10)).await.unwrap();

    storage.upsert_many(&[Metric::counter("hits", 3)]).await.unwrap();

    assert_eq!(
        storage.read("hits").await.unwrap(),
        Some(Metric::counter("hits", 3))
    );
}

#[tokio::test]
async fn ingest_never_deletes_rows() {
    let ingestor = Ingestor::new(storage());

    ingestor.set(Metric::counter("keep", 1)).await.unwrap();
    ingestor
        .set_many(vec![Metric::gauge("other", 2.0)])
        .await
        .unwrap();
    ingestor.set_many(Vec::new()).await.unwrap();

    let mut ids = ingestor.ids().await.unwrap();
    ids.sort();
    assert_eq!(ids, vec!["keep", "other"]);
}

#[tokio::test]
async fn counter_sequences_sum_regardless_of_grouping() {
    // d1..dn applied one at a time equals the same deltas in one batch
    let one_at_a_time = Ingestor::new(storage());
    for delta in [5_i64, -2, 9, 1] {
        one_at_a_time.set(Metric::counter("c", delta)).await.unwrap();
    }

    let batched = Ingestor::new(storage());
    batched
        .set_many(vec![
            Metric::counter("c", 5),
            Metric::counter("c", -2),
            Metric::counter("c", 9),
            Metric::counter("c", 1),
        ])
        .await
        .unwrap();

    let a = one_at_a_time.get("c").await.unwrap().unwrap();
    let b = batched.get("c").await.unwrap().unwrap();
    assert_eq!(a.delta, Some(13));
    assert_eq!(a, b);
}
