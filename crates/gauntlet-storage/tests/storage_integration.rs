use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gauntlet_storage::{
    migrate_local_to_remote, HybridProvider, LocalProvider, MemoryEntry, MemoryQuery,
    MigrationOptions, PersistenceProvider, RemoteStore, StorageError, StorageErrorKind,
    StorageResult, SyncEngine, SyncEngineConfig, SyncOp,
};

/// In-process remote store recording every applied write, used in place of
/// the REST provider for sync and migration tests.
struct RecordingRemote {
    records: Mutex<HashMap<(String, String), serde_json::Value>>,
    writes: Mutex<Vec<(String, String, serde_json::Value)>>,
    unavailable: Mutex<bool>,
}

impl RecordingRemote {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            unavailable: Mutex::new(false),
        })
    }

    fn set_unavailable(&self, down: bool) {
        *self.unavailable.lock().unwrap() = down;
    }

    fn write_log(&self) -> Vec<(String, String, serde_json::Value)> {
        self.writes.lock().unwrap().clone()
    }

    fn gate(&self) -> StorageResult<()> {
        if *self.unavailable.lock().unwrap() {
            return Err(StorageError::remote(
                StorageErrorKind::Unavailable,
                "remote is down",
            ));
        }
        Ok(())
    }

    fn apply(&self, table: &str, record_id: &str, payload: &serde_json::Value) {
        self.records.lock().unwrap().insert(
            (table.to_string(), record_id.to_string()),
            payload.clone(),
        );
        self.writes.lock().unwrap().push((
            table.to_string(),
            record_id.to_string(),
            payload.clone(),
        ));
    }
}

#[async_trait]
impl RemoteStore for RecordingRemote {
    async fn insert(&self, table: &str, payload: &serde_json::Value) -> StorageResult<()> {
        self.gate()?;
        let record_id = payload
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        self.apply(table, &record_id, payload);
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        record_id: &str,
        payload: &serde_json::Value,
    ) -> StorageResult<()> {
        self.gate()?;
        self.apply(table, record_id, payload);
        Ok(())
    }

    async fn force_upsert(
        &self,
        table: &str,
        record_id: &str,
        payload: &serde_json::Value,
    ) -> StorageResult<()> {
        self.gate()?;
        self.apply(table, record_id, payload);
        Ok(())
    }

    async fn delete(&self, table: &str, record_id: &str) -> StorageResult<()> {
        self.gate()?;
        self.records
            .lock()
            .unwrap()
            .remove(&(table.to_string(), record_id.to_string()));
        Ok(())
    }

    async fn fetch(
        &self,
        table: &str,
        record_id: &str,
    ) -> StorageResult<Option<serde_json::Value>> {
        self.gate()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(table.to_string(), record_id.to_string()))
            .cloned())
    }

    async fn query(
        &self,
        table: &str,
        _filters: &[(String, String)],
        _limit: Option<usize>,
    ) -> StorageResult<Vec<serde_json::Value>> {
        self.gate()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|((t, _), _)| t == table)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.gate()
    }
}

fn fast_sync_config() -> SyncEngineConfig {
    SyncEngineConfig {
        debounce_ms: 30,
        retry_delay_ms: 5,
        ..Default::default()
    }
}

async fn hybrid_with(
    remote: Arc<RecordingRemote>,
) -> (HybridProvider, Arc<LocalProvider>, Arc<LocalProvider>) {
    let local = Arc::new(LocalProvider::open_in_memory().await.unwrap());
    // A second local store stands in for the remote's read surface.
    let remote_reads = Arc::new(LocalProvider::open_in_memory().await.unwrap());
    let provider = HybridProvider::new(
        local.clone(),
        remote_reads.clone(),
        remote,
        fast_sync_config(),
    )
    .await
    .unwrap();
    (provider, local, remote_reads)
}

#[tokio::test]
async fn read_your_writes_through_hybrid() {
    let remote = RecordingRemote::new();
    let (provider, _, _) = hybrid_with(remote).await;

    let entry = MemoryEntry::new("retry-policy", "agents", serde_json::json!({"max": 3}), "a1");
    provider.store_memory_entry(entry.clone()).await.unwrap();

    // Immediately visible, before any flush cycle runs.
    let read = provider
        .get_memory_entry("retry-policy", "agents")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read.value, entry.value);
}

#[tokio::test]
async fn rapid_writes_coalesce_to_one_remote_write() {
    // Two writes to the same (partition, key) inside the debounce window
    // must reach the remote as exactly one write carrying the last value.
    let remote = RecordingRemote::new();
    let (provider, _, _) = hybrid_with(remote.clone()).await;

    let mut entry = MemoryEntry::new("k", "p", serde_json::json!(1), "a1");
    provider.store_memory_entry(entry.clone()).await.unwrap();
    entry.value = serde_json::json!(2);
    provider.store_memory_entry(entry).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    let writes: Vec<_> = remote
        .write_log()
        .into_iter()
        .filter(|(_, record_id, _)| record_id == "p/k")
        .collect();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].2["value"], serde_json::json!(2));
}

#[tokio::test]
async fn offline_writes_flush_in_order_on_reconnect() {
    let remote = RecordingRemote::new();
    let (provider, _, _) = hybrid_with(remote.clone()).await;
    provider.set_online_status(false).await;

    for i in 0..5 {
        provider
            .store_memory_entry(MemoryEntry::new(
                format!("k{}", i),
                "p",
                serde_json::json!({"seq": i}),
                "a1",
            ))
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(remote.write_log().is_empty());
    assert_eq!(provider.sync_engine().pending_ops(), 5);

    provider.set_online_status(true).await;

    // All five are now queryable remote-side, in enqueue order.
    let rows = remote
        .query("memory_entries", &[], None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 5);
    let write_order: Vec<String> = remote
        .write_log()
        .into_iter()
        .map(|(_, record_id, _)| record_id)
        .collect();
    assert_eq!(write_order, vec!["p/k0", "p/k1", "p/k2", "p/k3", "p/k4"]);
}

#[tokio::test]
async fn local_miss_reads_from_remote_and_backfills() {
    let remote = RecordingRemote::new();
    let (provider, local, remote_reads) = hybrid_with(remote).await;

    let shared = MemoryEntry::new("playbook", "team", serde_json::json!({"v": 7}), "peer");
    remote_reads.store_memory_entry(shared.clone()).await.unwrap();

    // Local has no copy; the hybrid read reaches the remote surface.
    assert!(local.get_memory_entry("playbook", "team").await.unwrap().is_none());
    let read = provider
        .get_memory_entry("playbook", "team")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read.value, shared.value);

    // And the value is cached locally for the next (possibly offline) read.
    assert!(local.get_memory_entry("playbook", "team").await.unwrap().is_some());
}

#[tokio::test]
async fn remote_failure_degrades_to_local() {
    let remote = RecordingRemote::new();
    let (provider, _, _) = hybrid_with(remote.clone()).await;

    remote.set_unavailable(true);
    provider
        .store_memory_entry(MemoryEntry::new("k", "p", serde_json::json!(1), "a"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    // The flush hit the outage and flipped the engine offline; the write
    // stays queued and the local read still serves.
    assert!(!provider.sync_engine().is_online());
    assert_eq!(provider.sync_engine().pending_ops(), 1);
    assert!(provider.get_memory_entry("k", "p").await.unwrap().is_some());

    remote.set_unavailable(false);
    provider.set_online_status(true).await;
    assert_eq!(provider.sync_engine().pending_ops(), 0);
    assert_eq!(remote.write_log().len(), 1);
}

#[tokio::test]
async fn durable_queue_survives_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("fleet.db");
    let db_path = db_path.to_str().unwrap();

    let local = Arc::new(LocalProvider::open(db_path).await.unwrap());
    let remote = RecordingRemote::new();

    let engine = SyncEngine::new(remote.clone(), fast_sync_config(), Some(local.clone()));
    engine.set_online_status(false).await;
    engine
        .enqueue(SyncOp::insert("events", "e1", serde_json::json!({"id": "e1"})))
        .await
        .unwrap();
    engine
        .enqueue(SyncOp::insert("events", "e2", serde_json::json!({"id": "e2"})))
        .await
        .unwrap();

    // A fresh engine over the same local store recovers the pending ops.
    let restarted = SyncEngine::new(remote.clone(), fast_sync_config(), Some(local.clone()));
    restarted.start().await.unwrap();
    assert_eq!(restarted.pending_ops(), 2);

    let applied = restarted.force_sync_now().await.unwrap();
    assert_eq!(applied, 2);
    assert_eq!(remote.write_log().len(), 2);
}

#[tokio::test]
async fn migration_moves_all_entity_types() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("source.db");
    let db_path = db_path.to_str().unwrap();

    {
        let source = LocalProvider::open(db_path).await.unwrap();
        source
            .store_memory_entry(MemoryEntry::new(
                "policy",
                "agents",
                serde_json::json!({"retries": 3}),
                "a1",
            ))
            .await
            .unwrap();
        source
            .store_event(gauntlet_storage::EventRecord {
                id: uuid::Uuid::new_v4().to_string(),
                event_type: "plan_completed".to_string(),
                payload: serde_json::json!({}),
                source: "planner".to_string(),
                // Seconds-resolution timestamp from an older writer; the
                // migration must normalize it to milliseconds.
                timestamp_ms: 1_700_000_000,
                ttl_ms: None,
            })
            .await
            .unwrap();
        source.shutdown().await.unwrap();
    }

    let remote = RecordingRemote::new();
    let report = migrate_local_to_remote(
        db_path,
        remote.clone() as Arc<dyn RemoteStore>,
        &MigrationOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.total(), 2);
    assert_eq!(report.failed, 0);
    assert_eq!(report.migrated.get("memory_entries"), Some(&1));
    assert_eq!(report.migrated.get("events"), Some(&1));

    // The memory entry's composite id is not remote-valid; the original is
    // preserved in metadata.
    let migrated_memory = remote
        .write_log()
        .into_iter()
        .find(|(table, _, _)| table == "memory_entries")
        .unwrap();
    assert!(uuid::Uuid::parse_str(migrated_memory.2["id"].as_str().unwrap()).is_ok());
    assert_eq!(
        migrated_memory.2["metadata"]["original_id"],
        serde_json::json!("agents/policy")
    );

    // The event's seconds-resolution timestamp was scaled to milliseconds.
    let migrated_event = remote
        .write_log()
        .into_iter()
        .find(|(table, _, _)| table == "events")
        .unwrap();
    assert_eq!(
        migrated_event.2["timestamp_ms"],
        serde_json::json!(1_700_000_000_000i64)
    );
}

#[tokio::test]
async fn dry_run_migration_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("source.db");
    let db_path = db_path.to_str().unwrap();

    {
        let source = LocalProvider::open(db_path).await.unwrap();
        source
            .store_memory_entry(MemoryEntry::new("k", "p", serde_json::json!(1), "a"))
            .await
            .unwrap();
        source.shutdown().await.unwrap();
    }

    let remote = RecordingRemote::new();
    let report = migrate_local_to_remote(
        db_path,
        remote.clone() as Arc<dyn RemoteStore>,
        &MigrationOptions {
            dry_run: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(report.total(), 1);
    assert!(remote.write_log().is_empty());
}

#[tokio::test]
async fn hybrid_query_prefers_local_when_populated() {
    let remote = RecordingRemote::new();
    let (provider, _, remote_reads) = hybrid_with(remote).await;

    provider
        .store_memory_entry(MemoryEntry::new("local-k", "p", serde_json::json!(1), "a"))
        .await
        .unwrap();
    remote_reads
        .store_memory_entry(MemoryEntry::new("remote-k", "p", serde_json::json!(2), "b"))
        .await
        .unwrap();

    let results = provider
        .query_memory_entries(&MemoryQuery {
            partition: Some("p".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    // Local answers win outright when non-empty.
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].key, "local-k");
}
