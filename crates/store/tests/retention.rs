use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use equipment_contracts::{SummaryStats, TypeCount, TypeDistribution};
use equipment_store::{DEFAULT_RETENTION_LIMIT, StoreError, StoreOptions, SummaryStore};
use sqlx::{Connection, SqliteConnection};

async fn memory_store() -> SummaryStore {
    SummaryStore::connect_and_migrate(&StoreOptions::in_memory(DEFAULT_RETENTION_LIMIT))
        .await
        .expect("in-memory store should open")
}

/// A summary whose `total_equipment` doubles as a marker of which insert it came from.
fn stats(marker: u64) -> SummaryStats {
    let pumps = marker.div_ceil(2).max(1);
    let mut entries = vec![TypeCount::new("Pump", pumps)];
    if marker > pumps {
        entries.push(TypeCount::new("Valve", marker - pumps));
    }
    SummaryStats {
        total_equipment: pumps + marker.saturating_sub(pumps),
        average_flowrate: marker as f64 + 0.125,
        average_pressure: 2.5,
        average_temperature: -4.0,
        equipment_type_distribution: TypeDistribution::from_entries(entries).unwrap(),
    }
}

fn markers(summaries: &[equipment_contracts::UploadSummary]) -> Vec<u64> {
    summaries.iter().map(|s| s.stats.total_equipment).collect()
}

#[tokio::test]
async fn empty_store_reads_are_empty_not_errors() {
    let store = memory_store().await;
    assert!(store.list_recent(5).await.unwrap().is_empty());
    assert!(store.latest().await.unwrap().is_none());
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn sixth_insert_evicts_the_oldest() {
    let store = memory_store().await;

    let mut ids = Vec::new();
    for marker in 1..=6 {
        let stored = store.insert_and_prune(&stats(marker)).await.unwrap();
        assert_eq!(stored.stats, stats(marker));
        ids.push(stored.id);
    }

    assert_eq!(store.count().await.unwrap(), 5);
    let recent = store.list_recent(5).await.unwrap();
    assert_eq!(markers(&recent), vec![6, 5, 4, 3, 2]);
    assert!(recent.iter().all(|s| s.id != ids[0]));
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn list_recent_is_newest_first_and_capped() {
    let store = memory_store().await;
    for marker in 1..=3 {
        store.insert_and_prune(&stats(marker)).await.unwrap();
    }

    let two = store.list_recent(2).await.unwrap();
    assert_eq!(markers(&two), vec![3, 2]);
    assert!(two[0].created_at >= two[1].created_at);

    let capped = store.list_recent(50).await.unwrap();
    assert_eq!(capped.len(), 3);

    assert!(store.list_recent(0).await.unwrap().is_empty());

    let latest = store.latest().await.unwrap().expect("latest should exist");
    assert_eq!(latest.stats.total_equipment, 3);
}

#[tokio::test]
async fn reads_do_not_mutate() {
    let store = memory_store().await;
    store.insert_and_prune(&stats(1)).await.unwrap();
    for _ in 0..3 {
        let _ = store.list_recent(5).await.unwrap();
        let _ = store.latest().await.unwrap();
    }
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn distribution_order_survives_storage() {
    let store = memory_store().await;
    let summary = SummaryStats {
        total_equipment: 6,
        average_flowrate: 1.0,
        average_pressure: 1.0,
        average_temperature: 1.0,
        equipment_type_distribution: TypeDistribution::from_entries(vec![
            TypeCount::new("Zeta", 2),
            TypeCount::new("Alpha", 2),
            TypeCount::new("Mid", 1),
            TypeCount::new("Beta", 1),
        ])
        .unwrap(),
    };
    store.insert_and_prune(&summary).await.unwrap();

    for _ in 0..2 {
        let latest = store.latest().await.unwrap().unwrap();
        let labels = latest
            .stats
            .equipment_type_distribution
            .iter()
            .map(|(label, _)| label.to_string())
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["Zeta", "Alpha", "Mid", "Beta"]);
    }
}

#[tokio::test]
async fn inconsistent_summary_is_never_persisted() {
    let store = memory_store().await;
    let mut bad = stats(4);
    bad.total_equipment += 1;

    let err = store.insert_and_prune(&bad).await.unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn zero_retention_limit_is_refused() {
    let result = SummaryStore::connect(&StoreOptions::in_memory(0)).await;
    assert!(matches!(result, Err(StoreError::Invalid(_))));
}

#[tokio::test]
async fn custom_retention_limit_is_honoured() {
    let store = SummaryStore::connect_and_migrate(&StoreOptions::in_memory(2))
        .await
        .unwrap();
    for marker in 1..=4 {
        store.insert_and_prune(&stats(marker)).await.unwrap();
    }
    assert_eq!(markers(&store.list_recent(5).await.unwrap()), vec![4, 3]);
}

async fn assert_concurrent_inserts_keep_newest(store: SummaryStore, m: u64) {
    let mut tasks = Vec::new();
    for marker in 1..=m {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store.insert_and_prune(&stats(marker)).await
        }));
    }

    let mut stored = Vec::new();
    for task in tasks {
        stored.push(task.await.unwrap().unwrap());
    }

    let expected_len = (m as usize).min(DEFAULT_RETENTION_LIMIT);
    assert_eq!(store.count().await.unwrap(), expected_len);

    // Insertion order is id order; the survivors must be the highest ids.
    stored.sort_by_key(|s| std::cmp::Reverse(s.id));
    let expected_ids = stored
        .iter()
        .take(expected_len)
        .map(|s| s.id)
        .collect::<Vec<_>>();
    let retained_ids = store
        .list_recent(DEFAULT_RETENTION_LIMIT)
        .await
        .unwrap()
        .iter()
        .map(|s| s.id)
        .collect::<Vec<_>>();
    assert_eq!(retained_ids, expected_ids, "m = {m}");
}

async fn assert_readers_never_exceed_limit(store: SummaryStore) {
    let done = Arc::new(AtomicBool::new(false));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let mut readers = Vec::new();
    for _ in 0..2 {
        let store = store.clone();
        let done = done.clone();
        let max_seen = max_seen.clone();
        readers.push(tokio::spawn(async move {
            while !done.load(Ordering::Acquire) {
                let seen = store.list_recent(usize::MAX).await.unwrap().len();
                let counted = store.count().await.unwrap();
                max_seen.fetch_max(seen.max(counted), Ordering::AcqRel);
                tokio::task::yield_now().await;
            }
        }));
    }

    let mut writers = Vec::new();
    for marker in 1..=30 {
        let store = store.clone();
        writers.push(tokio::spawn(async move {
            store.insert_and_prune(&stats(marker)).await.unwrap();
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }
    done.store(true, Ordering::Release);
    for reader in readers {
        reader.await.unwrap();
    }

    assert!(max_seen.load(Ordering::Acquire) <= DEFAULT_RETENTION_LIMIT);
    assert_eq!(store.count().await.unwrap(), DEFAULT_RETENTION_LIMIT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_inserts_keep_exactly_the_newest_five() {
    for m in [1_u64, 3, 5, 6, 20] {
        assert_concurrent_inserts_keep_newest(memory_store().await, m).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_inserts_on_pooled_file_store_keep_exactly_the_newest_five() {
    for m in [6_u64, 20] {
        let db = TempDb::new("concurrent_inserts");
        let store = SummaryStore::connect_and_migrate(&db.options(4, Duration::from_secs(5)))
            .await
            .unwrap();
        assert_concurrent_inserts_keep_newest(store.clone(), m).await;
        store.close().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_observe_more_than_the_limit() {
    assert_readers_never_exceed_limit(memory_store().await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_on_pooled_file_store_never_observe_more_than_the_limit() {
    let db = TempDb::new("concurrent_readers");
    let store = SummaryStore::connect_and_migrate(&db.options(4, Duration::from_secs(5)))
        .await
        .unwrap();
    assert_readers_never_exceed_limit(store.clone()).await;
    store.close().await;
}

#[tokio::test]
async fn write_blocked_past_its_deadline_is_not_stored() {
    let db = TempDb::new("blocked_write");
    let options = db.options(2, Duration::from_millis(200));
    let store = SummaryStore::connect_and_migrate(&options).await.unwrap();

    let mut blocker = SqliteConnection::connect(&options.db_url).await.unwrap();
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut blocker)
        .await
        .unwrap();

    let err = store.insert_and_prune(&stats(1)).await.unwrap_err();
    assert!(
        matches!(err, StoreError::Timeout | StoreError::Sqlx(_)),
        "{err:?}"
    );

    sqlx::query("ROLLBACK").execute(&mut blocker).await.unwrap();
    blocker.close().await.unwrap();

    assert_eq!(store.count().await.unwrap(), 0);
    store.insert_and_prune(&stats(2)).await.unwrap();
    assert_eq!(markers(&store.list_recent(5).await.unwrap()), vec![2]);
    store.close().await;
}

#[tokio::test]
async fn wide_distribution_round_trips_promptly() {
    let store = memory_store().await;
    let entries = (0..100_000)
        .map(|i| TypeCount::new(format!("t{i}"), 1))
        .collect::<Vec<_>>();
    let summary = SummaryStats {
        total_equipment: 100_000,
        average_flowrate: 1.0,
        average_pressure: 2.0,
        average_temperature: 3.0,
        equipment_type_distribution: TypeDistribution::from_entries(entries).unwrap(),
    };
    let started = Instant::now();

    store.insert_and_prune(&summary).await.unwrap();
    let latest = store.latest().await.unwrap().expect("latest should exist");
    assert_eq!(latest.stats, summary);

    assert!(
        started.elapsed() < Duration::from_secs(20),
        "took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn file_backed_store_persists_across_reopen() {
    let db = TempDb::new("reopen");
    let options = db.options(4, Duration::from_secs(2));

    {
        let store = SummaryStore::connect_and_migrate(&options).await.unwrap();
        for marker in 1..=7 {
            store.insert_and_prune(&stats(marker)).await.unwrap();
        }
        store.close().await;
    }

    let reopened = SummaryStore::connect_and_migrate(&options).await.unwrap();
    assert_eq!(
        markers(&reopened.list_recent(5).await.unwrap()),
        vec![7, 6, 5, 4, 3]
    );
    reopened.close().await;
}

/// A scratch directory holding one SQLite file, removed on drop.
struct TempDb {
    dir: PathBuf,
}

impl TempDb {
    fn new(label: &str) -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let suffix = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "equipment_store_{}_{}_{}_{}",
            label,
            std::process::id(),
            suffix,
            unique_suffix()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir create should succeed");
        Self { dir }
    }

    fn options(&self, max_connections: u32, write_timeout: Duration) -> StoreOptions {
        StoreOptions {
            db_url: format!("sqlite://{}?mode=rwc", self.dir.join("summaries.db").display()),
            max_connections,
            write_timeout,
            retention_limit: DEFAULT_RETENTION_LIMIT,
        }
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn unique_suffix() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}
