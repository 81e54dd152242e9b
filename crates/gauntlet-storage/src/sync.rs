use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::records::now_ms;
use crate::remote::RemoteStore;

/// Mutation kinds mirrored to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOpType {
    Insert,
    Update,
    Delete,
}

impl SyncOpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOpType::Insert => "insert",
            SyncOpType::Update => "update",
            SyncOpType::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "insert" => Some(SyncOpType::Insert),
            "update" => Some(SyncOpType::Update),
            "delete" => Some(SyncOpType::Delete),
            _ => None,
        }
    }
}

/// A queued mutation awaiting remote application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOp {
    pub id: String,
    pub op_type: SyncOpType,
    pub table: String,
    pub record_id: String,
    pub payload: Option<serde_json::Value>,
    pub retries: u32,
    pub enqueued_at_ms: i64,
}

impl SyncOp {
    pub fn insert(table: impl Into<String>, record_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(SyncOpType::Insert, table, record_id, Some(payload))
    }

    pub fn update(table: impl Into<String>, record_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(SyncOpType::Update, table, record_id, Some(payload))
    }

    pub fn delete(table: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self::new(SyncOpType::Delete, table, record_id, None)
    }

    fn new(
        op_type: SyncOpType,
        table: impl Into<String>,
        record_id: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            op_type,
            table: table.into(),
            record_id: record_id.into(),
            payload,
            retries: 0,
            enqueued_at_ms: now_ms(),
        }
    }
}

/// How a remote-reported conflict or duplicate is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Force-resend the local value.
    #[default]
    Local,
    /// Discard the local op; the remote value wins on next read.
    Remote,
    /// Keep whichever side carries the later timestamp.
    Newest,
}

#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    pub debounce_ms: u64,
    pub max_queue_size: usize,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub sync_interval_ms: u64,
    pub conflict_strategy: ConflictStrategy,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1_000,
            max_queue_size: 100,
            retry_attempts: 3,
            retry_delay_ms: 500,
            sync_interval_ms: 30_000,
            conflict_strategy: ConflictStrategy::Local,
        }
    }
}

/// Durable backing for queued ops so offline mutations survive restarts.
/// Implemented by the local provider on its `sync_queue` table.
#[async_trait]
pub trait SyncQueueStore: Send + Sync {
    async fn persist_op(&self, op: &SyncOp) -> StorageResult<()>;
    async fn remove_op(&self, op_id: &str) -> StorageResult<()>;
    async fn load_ops(&self) -> StorageResult<Vec<SyncOp>>;
}

/// Background mirror of local mutations into the remote store.
///
/// Enqueue is non-blocking from any caller; the flush path is the single
/// point of remote I/O. Ops coalesce per `(table, record_id)` with
/// last-write-wins at the queue level, a debounce timer batches bursts, and
/// the `is_syncing` guard keeps at most one drain in flight. The queue mutex
/// guards only short critical sections; no lock is held across I/O.
pub struct SyncEngine {
    remote: Arc<dyn RemoteStore>,
    config: SyncEngineConfig,
    queue: Mutex<VecDeque<SyncOp>>,
    durable: Option<Arc<dyn SyncQueueStore>>,
    online: AtomicBool,
    is_syncing: AtomicBool,
    shut_down: AtomicBool,
    debounce_timer: Mutex<Option<JoinHandle<()>>>,
    interval_timer: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        config: SyncEngineConfig,
        durable: Option<Arc<dyn SyncQueueStore>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            remote,
            config,
            queue: Mutex::new(VecDeque::new()),
            durable,
            online: AtomicBool::new(true),
            is_syncing: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            debounce_timer: Mutex::new(None),
            interval_timer: Mutex::new(None),
        })
    }

    /// Reload durable ops left over from a previous run and start the
    /// periodic flush timer.
    pub async fn start(self: &Arc<Self>) -> StorageResult<()> {
        if let Some(durable) = &self.durable {
            let recovered = durable.load_ops().await?;
            if !recovered.is_empty() {
                info!("recovered {} pending sync ops", recovered.len());
                let mut queue = self.lock_queue();
                for op in recovered {
                    queue.push_back(op);
                }
            }
        }

        let engine = Arc::clone(self);
        let interval = Duration::from_millis(self.config.sync_interval_ms);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if engine.shut_down.load(Ordering::SeqCst) {
                    return;
                }
                if engine.is_online() && engine.pending_ops() > 0 {
                    let _ = engine.force_sync_now().await;
                }
            }
        });
        *self.lock_timer(&self.interval_timer) = Some(handle);
        Ok(())
    }

    pub fn pending_ops(&self) -> usize {
        self.lock_queue().len()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Queue a mutation for the remote store. Coalesces with any pending op
    /// for the same `(table, record_id)` and (re)arms the debounce timer; a
    /// full queue flushes immediately.
    pub async fn enqueue(self: &Arc<Self>, op: SyncOp) -> StorageResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(StorageError::ShutDown);
        }

        let queue_len = {
            let mut queue = self.lock_queue();
            queue.retain(|pending| {
                !(pending.table == op.table && pending.record_id == op.record_id)
            });
            queue.push_back(op.clone());
            queue.len()
        };

        if let Some(durable) = &self.durable {
            durable.persist_op(&op).await?;
        }

        if queue_len >= self.config.max_queue_size {
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                let _ = engine.force_sync_now().await;
            });
        } else {
            self.arm_debounce();
        }
        Ok(())
    }

    fn arm_debounce(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let delay = Duration::from_millis(self.config.debounce_ms);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = engine.force_sync_now().await;
        });

        let mut timer = self.lock_timer(&self.debounce_timer);
        if let Some(previous) = timer.replace(handle) {
            previous.abort();
        }
    }

    /// Toggle online/offline. Reconnecting with a non-empty queue triggers an
    /// immediate flush. Each transition is logged once.
    pub async fn set_online_status(self: &Arc<Self>, online: bool) {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if was_online == online {
            return;
        }
        if online {
            info!("remote store back online");
            if self.pending_ops() > 0 {
                let _ = self.force_sync_now().await;
            }
        } else {
            warn!("remote store unavailable, queueing writes locally");
        }
    }

    /// Drain the queue into the remote store in enqueue order. Returns the
    /// number of ops applied. At most one drain runs at a time.
    pub async fn force_sync_now(self: &Arc<Self>) -> StorageResult<usize> {
        if !self.is_online() {
            return Ok(0);
        }
        if self.is_syncing.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }

        let drained: Vec<SyncOp> = {
            let mut queue = self.lock_queue();
            queue.drain(..).collect()
        };

        let mut applied = 0;
        let mut remainder: VecDeque<SyncOp> = VecDeque::new();
        let mut offline = false;

        for (index, op) in drained.iter().enumerate() {
            if offline {
                remainder.push_back(op.clone());
                continue;
            }
            match self.apply_with_retry(op.clone()).await {
                OpOutcome::Applied => {
                    applied += 1;
                    if let Some(durable) = &self.durable {
                        let _ = durable.remove_op(&op.id).await;
                    }
                }
                OpOutcome::Dropped => {
                    if let Some(durable) = &self.durable {
                        let _ = durable.remove_op(&op.id).await;
                    }
                }
                OpOutcome::Offline(op) => {
                    // Remote went away mid-drain: keep this op and everything
                    // after it, in order.
                    offline = true;
                    remainder.push_back(op);
                    debug!("drain interrupted at op {} of {}", index + 1, drained.len());
                }
            }
        }

        if !remainder.is_empty() {
            let mut queue = self.lock_queue();
            for op in remainder.into_iter().rev() {
                queue.push_front(op);
            }
        }

        self.is_syncing.store(false, Ordering::SeqCst);

        if offline {
            // Flip offline directly: set_online_status itself awaits this
            // function on reconnect, so calling it here would make the
            // future cyclic.
            let was_online = self.online.swap(false, Ordering::SeqCst);
            if was_online {
                warn!("remote store unavailable, queueing writes locally");
            }
        }
        Ok(applied)
    }

    async fn apply_with_retry(self: &Arc<Self>, mut op: SyncOp) -> OpOutcome {
        loop {
            match self.apply(&op).await {
                Ok(()) => return OpOutcome::Applied,
                Err(err) if err.is_conflict() => return self.resolve_conflict(op, err).await,
                Err(err) if err.is_unavailable() => return OpOutcome::Offline(op),
                Err(err) => {
                    op.retries += 1;
                    if op.retries > self.config.retry_attempts {
                        warn!(
                            "dropping sync op {} for {}/{} after {} attempts: {}",
                            op.id, op.table, op.record_id, op.retries, err
                        );
                        return OpOutcome::Dropped;
                    }
                    let delay = self.config.retry_delay_ms * op.retries as u64;
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }

    async fn apply(&self, op: &SyncOp) -> StorageResult<()> {
        match op.op_type {
            SyncOpType::Insert => {
                let payload = op.payload.as_ref().ok_or_else(|| {
                    StorageError::Serialization("insert op without payload".to_string())
                })?;
                self.remote.insert(&op.table, payload).await
            }
            SyncOpType::Update => {
                let payload = op.payload.as_ref().ok_or_else(|| {
                    StorageError::Serialization("update op without payload".to_string())
                })?;
                self.remote.update(&op.table, &op.record_id, payload).await
            }
            SyncOpType::Delete => self.remote.delete(&op.table, &op.record_id).await,
        }
    }

    async fn resolve_conflict(self: &Arc<Self>, op: SyncOp, err: StorageError) -> OpOutcome {
        debug!(
            "conflict on {}/{} ({}), resolving via {:?}",
            op.table, op.record_id, err, self.config.conflict_strategy
        );
        match self.config.conflict_strategy {
            ConflictStrategy::Local => self.force_local(&op).await,
            ConflictStrategy::Remote => OpOutcome::Dropped,
            ConflictStrategy::Newest => {
                let remote_value = match self.remote.fetch(&op.table, &op.record_id).await {
                    Ok(value) => value,
                    Err(fetch_err) if fetch_err.is_unavailable() => return OpOutcome::Offline(op),
                    Err(_) => None,
                };
                let local_ts = op.payload.as_ref().and_then(record_timestamp);
                let remote_ts = remote_value.as_ref().and_then(record_timestamp);
                match (local_ts, remote_ts) {
                    (Some(local), Some(remote)) if remote >= local => OpOutcome::Dropped,
                    // Local is newer, or timestamps are unusable: keep ours.
                    _ => self.force_local(&op).await,
                }
            }
        }
    }

    async fn force_local(self: &Arc<Self>, op: &SyncOp) -> OpOutcome {
        let payload = match &op.payload {
            Some(payload) => payload,
            None => return OpOutcome::Dropped,
        };
        match self.remote.force_upsert(&op.table, &op.record_id, payload).await {
            Ok(()) => OpOutcome::Applied,
            Err(err) if err.is_unavailable() => OpOutcome::Offline(op.clone()),
            Err(err) => {
                warn!(
                    "dropping sync op {} for {}/{}: forced upsert failed: {}",
                    op.id, op.table, op.record_id, err
                );
                OpOutcome::Dropped
            }
        }
    }

    /// Stop both timers and drain the queue synchronously.
    pub async fn shutdown(self: &Arc<Self>) -> StorageResult<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        if let Some(handle) = self.lock_timer(&self.debounce_timer).take() {
            handle.abort();
        }
        if let Some(handle) = self.lock_timer(&self.interval_timer).take() {
            handle.abort();
        }
        self.force_sync_now().await?;
        Ok(())
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<SyncOp>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_timer<'a>(
        &self,
        timer: &'a Mutex<Option<JoinHandle<()>>>,
    ) -> std::sync::MutexGuard<'a, Option<JoinHandle<()>>> {
        timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

enum OpOutcome {
    Applied,
    Dropped,
    Offline(SyncOp),
}

/// Pull the freshest timestamp a record payload carries.
fn record_timestamp(value: &serde_json::Value) -> Option<i64> {
    for field in ["updated_at_ms", "updated_at", "created_at_ms", "created_at"] {
        if let Some(ts) = value.get(field).and_then(serde_json::Value::as_i64) {
            return Some(ts);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageErrorKind;
    use std::collections::HashMap;

    /// In-process remote with scriptable failures, used in place of the REST
    /// provider.
    struct FakeRemote {
        records: Mutex<HashMap<(String, String), serde_json::Value>>,
        writes: Mutex<Vec<(String, String, serde_json::Value)>>,
        fail_kind: Mutex<Option<StorageErrorKind>>,
    }

    impl FakeRemote {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(HashMap::new()),
                writes: Mutex::new(Vec::new()),
                fail_kind: Mutex::new(None),
            })
        }

        fn set_failure(&self, kind: Option<StorageErrorKind>) {
            *self.fail_kind.lock().unwrap() = kind;
        }

        fn write_log(&self) -> Vec<(String, String, serde_json::Value)> {
            self.writes.lock().unwrap().clone()
        }

        fn check_failure(&self) -> StorageResult<()> {
            if let Some(kind) = *self.fail_kind.lock().unwrap() {
                return Err(StorageError::remote(kind, "scripted failure"));
            }
            Ok(())
        }

        fn record(&self, table: &str, record_id: &str, payload: &serde_json::Value) {
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
    impl RemoteStore for FakeRemote {
        async fn insert(&self, table: &str, payload: &serde_json::Value) -> StorageResult<()> {
            self.check_failure()?;
            let record_id = payload
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            self.record(table, &record_id, payload);
            Ok(())
        }

        async fn update(
            &self,
            table: &str,
            record_id: &str,
            payload: &serde_json::Value,
        ) -> StorageResult<()> {
            self.check_failure()?;
            self.record(table, record_id, payload);
            Ok(())
        }

        async fn force_upsert(
            &self,
            table: &str,
            record_id: &str,
            payload: &serde_json::Value,
        ) -> StorageResult<()> {
            // Forced writes bypass scripted conflicts.
            self.record(table, record_id, payload);
            Ok(())
        }

        async fn delete(&self, table: &str, record_id: &str) -> StorageResult<()> {
            self.check_failure()?;
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
            self.check_failure()
        }
    }

    fn fast_config() -> SyncEngineConfig {
        SyncEngineConfig {
            debounce_ms: 20,
            retry_delay_ms: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_coalescing_keeps_last_write() {
        let remote = FakeRemote::new();
        let engine = SyncEngine::new(remote.clone(), fast_config(), None);

        engine
            .enqueue(SyncOp::insert("memory_entries", "p/k", serde_json::json!({"id": "p/k", "value": 1})))
            .await
            .unwrap();
        engine
            .enqueue(SyncOp::insert("memory_entries", "p/k", serde_json::json!({"id": "p/k", "value": 2})))
            .await
            .unwrap();

        assert_eq!(engine.pending_ops(), 1);
        let applied = engine.force_sync_now().await.unwrap();
        assert_eq!(applied, 1);

        let writes = remote.write_log();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].2["value"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn test_debounce_flushes_without_explicit_call() {
        let remote = FakeRemote::new();
        let engine = SyncEngine::new(remote.clone(), fast_config(), None);

        engine
            .enqueue(SyncOp::insert("events", "e1", serde_json::json!({"id": "e1"})))
            .await
            .unwrap();
        assert_eq!(engine.pending_ops(), 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(engine.pending_ops(), 0);
        assert_eq!(remote.write_log().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_queues_and_reconnect_flushes_in_order() {
        let remote = FakeRemote::new();
        let engine = SyncEngine::new(remote.clone(), fast_config(), None);
        engine.set_online_status(false).await;

        for i in 0..5 {
            engine
                .enqueue(SyncOp::insert(
                    "memory_entries",
                    format!("p/k{}", i),
                    serde_json::json!({"id": format!("p/k{}", i), "seq": i}),
                ))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        // Offline: nothing reached the remote.
        assert!(remote.write_log().is_empty());
        assert_eq!(engine.pending_ops(), 5);

        engine.set_online_status(true).await;
        assert_eq!(engine.pending_ops(), 0);

        let writes = remote.write_log();
        assert_eq!(writes.len(), 5);
        for (i, (_, record_id, _)) in writes.iter().enumerate() {
            assert_eq!(record_id, &format!("p/k{}", i));
        }
    }

    #[tokio::test]
    async fn test_retry_then_drop() {
        let remote = FakeRemote::new();
        let config = SyncEngineConfig {
            retry_attempts: 2,
            retry_delay_ms: 1,
            ..fast_config()
        };
        let engine = SyncEngine::new(remote.clone(), config, None);
        remote.set_failure(Some(StorageErrorKind::Other));

        engine
            .enqueue(SyncOp::insert("events", "e1", serde_json::json!({"id": "e1"})))
            .await
            .unwrap();
        let applied = engine.force_sync_now().await.unwrap();
        assert_eq!(applied, 0);
        // Exhausted ops are dropped, not re-queued.
        assert_eq!(engine.pending_ops(), 0);
    }

    #[tokio::test]
    async fn test_conflict_local_strategy_forces_write() {
        let remote = FakeRemote::new();
        let engine = SyncEngine::new(remote.clone(), fast_config(), None);
        remote.set_failure(Some(StorageErrorKind::Conflict));

        engine
            .enqueue(SyncOp::insert(
                "memory_entries",
                "p/k",
                serde_json::json!({"id": "p/k", "value": "local"}),
            ))
            .await
            .unwrap();
        let applied = engine.force_sync_now().await.unwrap();
        assert_eq!(applied, 1);

        // The forced upsert carried the local value through the conflict.
        let writes = remote.write_log();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].2["value"], serde_json::json!("local"));
    }

    #[tokio::test]
    async fn test_conflict_remote_strategy_discards() {
        let remote = FakeRemote::new();
        let config = SyncEngineConfig {
            conflict_strategy: ConflictStrategy::Remote,
            ..fast_config()
        };
        let engine = SyncEngine::new(remote.clone(), config, None);
        remote.set_failure(Some(StorageErrorKind::Duplicate));

        engine
            .enqueue(SyncOp::insert("memory_entries", "p/k", serde_json::json!({"id": "p/k"})))
            .await
            .unwrap();
        let applied = engine.force_sync_now().await.unwrap();
        assert_eq!(applied, 0);
        assert_eq!(engine.pending_ops(), 0);
        assert!(remote.write_log().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_newest_strategy_compares_timestamps() {
        let remote = FakeRemote::new();
        let config = SyncEngineConfig {
            conflict_strategy: ConflictStrategy::Newest,
            ..fast_config()
        };
        let engine = SyncEngine::new(remote.clone(), config, None);

        // Seed a remote record newer than the local one.
        remote.record(
            "memory_entries",
            "p/old",
            &serde_json::json!({"id": "p/old", "created_at_ms": 2_000}),
        );
        remote.set_failure(Some(StorageErrorKind::Conflict));

        engine
            .enqueue(SyncOp::insert(
                "memory_entries",
                "p/old",
                serde_json::json!({"id": "p/old", "created_at_ms": 1_000}),
            ))
            .await
            .unwrap();
        engine.force_sync_now().await.unwrap();

        // Only the seed write is in the log: the stale local op was dropped.
        assert_eq!(remote.write_log().len(), 1);

        // A local op newer than the remote record is forced through.
        engine
            .enqueue(SyncOp::insert(
                "memory_entries",
                "p/old",
                serde_json::json!({"id": "p/old", "created_at_ms": 3_000}),
            ))
            .await
            .unwrap();
        engine.force_sync_now().await.unwrap();
        let writes = remote.write_log();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].2["created_at_ms"], serde_json::json!(3_000));
    }

    #[tokio::test]
    async fn test_unavailable_mid_drain_preserves_order() {
        let remote = FakeRemote::new();
        let engine = SyncEngine::new(remote.clone(), fast_config(), None);

        engine
            .enqueue(SyncOp::insert("events", "e1", serde_json::json!({"id": "e1"})))
            .await
            .unwrap();
        engine
            .enqueue(SyncOp::insert("events", "e2", serde_json::json!({"id": "e2"})))
            .await
            .unwrap();

        remote.set_failure(Some(StorageErrorKind::Unavailable));
        let applied = engine.force_sync_now().await.unwrap();
        assert_eq!(applied, 0);
        assert!(!engine.is_online());
        assert_eq!(engine.pending_ops(), 2);

        remote.set_failure(None);
        engine.set_online_status(true).await;
        let writes = remote.write_log();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].1, "e1");
        assert_eq!(writes[1].1, "e2");
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_rejects_new_ops() {
        let remote = FakeRemote::new();
        let engine = SyncEngine::new(remote.clone(), fast_config(), None);

        engine
            .enqueue(SyncOp::insert("events", "e1", serde_json::json!({"id": "e1"})))
            .await
            .unwrap();
        engine.shutdown().await.unwrap();

        assert_eq!(remote.write_log().len(), 1);
        let err = engine
            .enqueue(SyncOp::insert("events", "e2", serde_json::json!({"id": "e2"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ShutDown));
    }
}
