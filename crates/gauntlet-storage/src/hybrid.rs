use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

use gauntlet_core::action::Action;
use gauntlet_core::config::{FleetConfig, ProviderKind};
use gauntlet_planner::{Plan, PlanStatus};

use crate::error::StorageResult;
use crate::local::LocalProvider;
use crate::provider::PersistenceProvider;
use crate::records::{
    tables, AgentState, AggregatedMetric, CodeChunk, CodeChunkQuery, EventQuery, EventRecord,
    ExperienceQuery, ExperienceRecord, MemoryEntry, MemoryQuery, MetricQuery, MetricRecord,
    PatternQuery, PatternRecord, ProviderInfo, SimilarCodeOptions,
};
use crate::remote::{with_id, RemoteProvider, RemoteStore};
use crate::sync::{SyncEngine, SyncEngineConfig, SyncOp, SyncQueueStore};

/// Local-first provider with background remote mirroring.
///
/// Every write lands in the local store first (read-your-writes holds
/// unconditionally), then a sync op is queued for the remote. Reads serve
/// from local when it has the record; on a local miss while online they
/// consult the remote, cache the result, and degrade to local-only on any
/// remote failure. Offline periods queue writes durably; reconnecting
/// flushes the queue in order.
pub struct HybridProvider {
    local: Arc<LocalProvider>,
    remote: Arc<dyn PersistenceProvider>,
    engine: Arc<SyncEngine>,
}

impl HybridProvider {
    pub async fn new(
        local: Arc<LocalProvider>,
        remote_reads: Arc<dyn PersistenceProvider>,
        remote_store: Arc<dyn RemoteStore>,
        sync_config: SyncEngineConfig,
    ) -> StorageResult<Self> {
        let durable: Arc<dyn SyncQueueStore> = local.clone();
        let engine = SyncEngine::new(remote_store, sync_config, Some(durable));
        engine.start().await?;
        Ok(Self {
            local,
            remote: remote_reads,
            engine,
        })
    }

    /// Wire the provider from environment configuration: local store at
    /// `local_path`, remote REST endpoint from the config's credentials.
    pub async fn from_config(config: &FleetConfig, local_path: &str) -> StorageResult<Self> {
        let local = Arc::new(LocalProvider::open(local_path).await?);
        let remote = Arc::new(RemoteProvider::from_config(config)?);
        let sync_config = SyncEngineConfig {
            sync_interval_ms: config.sync_interval_ms,
            ..Default::default()
        };
        Self::new(local, remote.clone(), remote, sync_config).await
    }

    pub fn sync_engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub async fn set_online_status(&self, online: bool) {
        self.engine.set_online_status(online).await;
    }

    async fn mirror(&self, op: SyncOp) -> StorageResult<()> {
        self.engine.enqueue(op).await
    }

    /// Run a remote read, degrading to a local-only answer on failure.
    async fn remote_read<T>(
        &self,
        fallback: T,
        read: impl std::future::Future<Output = StorageResult<T>>,
    ) -> T {
        match read.await {
            Ok(value) => value,
            Err(err) => {
                if err.is_unavailable() {
                    self.engine.set_online_status(false).await;
                } else {
                    debug!("remote read failed, serving local result: {}", err);
                }
                fallback
            }
        }
    }
}

/// Minimal `*`-wildcard matcher for mirroring pattern deletes per record.
fn glob_matches(pattern: &str, candidate: &str) -> bool {
    fn inner(pattern: &[u8], candidate: &[u8]) -> bool {
        match (pattern.first(), candidate.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&pattern[1..], candidate)
                    || (!candidate.is_empty() && inner(pattern, &candidate[1..]))
            }
            (Some(p), Some(c)) if p == c => inner(&pattern[1..], &candidate[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), candidate.as_bytes())
}

#[async_trait]
impl PersistenceProvider for HybridProvider {
    async fn initialize(&self) -> StorageResult<()> {
        self.local.initialize().await?;
        match self.remote.initialize().await {
            Ok(()) => self.engine.set_online_status(true).await,
            Err(err) => {
                debug!("remote unavailable at startup: {}", err);
                self.engine.set_online_status(false).await;
            }
        }
        Ok(())
    }

    async fn shutdown(&self) -> StorageResult<()> {
        self.engine.shutdown().await?;
        self.local.shutdown().await
    }

    fn provider_info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "hybrid".to_string(),
            kind: ProviderKind::Hybrid,
            supports_sync: true,
            description: "local-first store with background remote sync".to_string(),
        }
    }

    async fn store_memory_entry(&self, entry: MemoryEntry) -> StorageResult<()> {
        self.local.store_memory_entry(entry.clone()).await?;
        let payload = with_id(&entry, &entry.record_id())?;
        self.mirror(SyncOp::insert(tables::MEMORY_ENTRIES, entry.record_id(), payload))
            .await
    }

    async fn store_memory_entries(&self, entries: Vec<MemoryEntry>) -> StorageResult<()> {
        self.local.store_memory_entries(entries.clone()).await?;
        for entry in entries {
            let payload = with_id(&entry, &entry.record_id())?;
            self.mirror(SyncOp::insert(tables::MEMORY_ENTRIES, entry.record_id(), payload))
                .await?;
        }
        Ok(())
    }

    async fn get_memory_entry(
        &self,
        key: &str,
        partition: &str,
    ) -> StorageResult<Option<MemoryEntry>> {
        if let Some(entry) = self.local.get_memory_entry(key, partition).await? {
            return Ok(Some(entry));
        }
        if !self.engine.is_online() {
            return Ok(None);
        }
        let found = self
            .remote_read(None, self.remote.get_memory_entry(key, partition))
            .await;
        if let Some(entry) = &found {
            // Backfill the local cache for the next read.
            self.local.store_memory_entry(entry.clone()).await?;
        }
        Ok(found)
    }

    async fn query_memory_entries(&self, query: &MemoryQuery) -> StorageResult<Vec<MemoryEntry>> {
        let local = self.local.query_memory_entries(query).await?;
        if !local.is_empty() || !self.engine.is_online() {
            return Ok(local);
        }
        Ok(self
            .remote_read(local, self.remote.query_memory_entries(query))
            .await)
    }

    async fn delete_memory_entries(
        &self,
        key_pattern: &str,
        partition: Option<&str>,
    ) -> StorageResult<u64> {
        // Capture the matching record ids before the rows disappear so each
        // delete can be mirrored.
        let candidates = self
            .local
            .query_memory_entries(&MemoryQuery {
                partition: partition.map(str::to_string),
                ..Default::default()
            })
            .await?;
        let deleted = self.local.delete_memory_entries(key_pattern, partition).await?;
        for entry in candidates {
            if glob_matches(key_pattern, &entry.key) {
                self.mirror(SyncOp::delete(tables::MEMORY_ENTRIES, entry.record_id()))
                    .await?;
            }
        }
        Ok(deleted)
    }

    async fn store_event(&self, event: EventRecord) -> StorageResult<()> {
        self.local.store_event(event.clone()).await?;
        let payload = serde_json::to_value(&event)?;
        self.mirror(SyncOp::insert(tables::EVENTS, event.id, payload)).await
    }

    async fn store_events(&self, events: Vec<EventRecord>) -> StorageResult<()> {
        self.local.store_events(events.clone()).await?;
        for event in events {
            let payload = serde_json::to_value(&event)?;
            self.mirror(SyncOp::insert(tables::EVENTS, event.id, payload)).await?;
        }
        Ok(())
    }

    async fn query_events(&self, query: &EventQuery) -> StorageResult<Vec<EventRecord>> {
        let local = self.local.query_events(query).await?;
        if !local.is_empty() || !self.engine.is_online() {
            return Ok(local);
        }
        Ok(self.remote_read(local, self.remote.query_events(query)).await)
    }

    async fn delete_old_events(&self, cutoff_ms: i64) -> StorageResult<u64> {
        let deleted = self.local.delete_old_events(cutoff_ms).await?;
        if self.engine.is_online() {
            // Retention runs on both sides; remote failure is non-fatal.
            let _ = self.remote_read(0, self.remote.delete_old_events(cutoff_ms)).await;
        }
        Ok(deleted)
    }

    async fn store_code_chunk(&self, chunk: CodeChunk) -> StorageResult<()> {
        self.local.store_code_chunk(chunk.clone()).await?;
        let payload = serde_json::to_value(&chunk)?;
        self.mirror(SyncOp::insert(tables::CODE_CHUNKS, chunk.id, payload)).await
    }

    async fn store_code_chunks(&self, chunks: Vec<CodeChunk>) -> StorageResult<()> {
        self.local.store_code_chunks(chunks.clone()).await?;
        for chunk in chunks {
            let payload = serde_json::to_value(&chunk)?;
            self.mirror(SyncOp::insert(tables::CODE_CHUNKS, chunk.id, payload)).await?;
        }
        Ok(())
    }

    async fn query_code_chunks(&self, query: &CodeChunkQuery) -> StorageResult<Vec<CodeChunk>> {
        let local = self.local.query_code_chunks(query).await?;
        if !local.is_empty() || !self.engine.is_online() {
            return Ok(local);
        }
        Ok(self.remote_read(local, self.remote.query_code_chunks(query)).await)
    }

    async fn search_similar_code(
        &self,
        embedding: &[f32],
        options: &SimilarCodeOptions,
    ) -> StorageResult<Vec<CodeChunk>> {
        self.local.search_similar_code(embedding, options).await
    }

    async fn delete_code_chunks_for_file(
        &self,
        project_id: &str,
        file_path: &str,
    ) -> StorageResult<u64> {
        let chunks = self
            .local
            .query_code_chunks(&CodeChunkQuery {
                project_id: Some(project_id.to_string()),
                file_path: Some(file_path.to_string()),
                ..Default::default()
            })
            .await?;
        let deleted = self
            .local
            .delete_code_chunks_for_file(project_id, file_path)
            .await?;
        for chunk in chunks {
            self.mirror(SyncOp::delete(tables::CODE_CHUNKS, chunk.id)).await?;
        }
        Ok(deleted)
    }

    async fn delete_code_chunks_for_project(&self, project_id: &str) -> StorageResult<u64> {
        let chunks = self
            .local
            .query_code_chunks(&CodeChunkQuery {
                project_id: Some(project_id.to_string()),
                ..Default::default()
            })
            .await?;
        let deleted = self.local.delete_code_chunks_for_project(project_id).await?;
        for chunk in chunks {
            self.mirror(SyncOp::delete(tables::CODE_CHUNKS, chunk.id)).await?;
        }
        Ok(deleted)
    }

    async fn store_experience(&self, experience: ExperienceRecord) -> StorageResult<()> {
        self.local.store_experience(experience.clone()).await?;
        let payload = serde_json::to_value(&experience)?;
        self.mirror(SyncOp::insert(tables::EXPERIENCES, experience.id, payload))
            .await
    }

    async fn query_experiences(
        &self,
        query: &ExperienceQuery,
    ) -> StorageResult<Vec<ExperienceRecord>> {
        let local = self.local.query_experiences(query).await?;
        if !local.is_empty() || !self.engine.is_online() {
            return Ok(local);
        }
        Ok(self.remote_read(local, self.remote.query_experiences(query)).await)
    }

    async fn search_similar_experiences(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> StorageResult<Vec<ExperienceRecord>> {
        self.local.search_similar_experiences(embedding, limit).await
    }

    async fn store_pattern(&self, pattern: PatternRecord) -> StorageResult<()> {
        self.local.store_pattern(pattern.clone()).await?;
        let payload = serde_json::to_value(&pattern)?;
        self.mirror(SyncOp::insert(tables::PATTERNS, pattern.id, payload)).await
    }

    async fn query_patterns(&self, query: &PatternQuery) -> StorageResult<Vec<PatternRecord>> {
        let local = self.local.query_patterns(query).await?;
        if !local.is_empty() || !self.engine.is_online() {
            return Ok(local);
        }
        Ok(self.remote_read(local, self.remote.query_patterns(query)).await)
    }

    async fn search_similar_patterns(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> StorageResult<Vec<PatternRecord>> {
        self.local.search_similar_patterns(embedding, limit).await
    }

    async fn save_agent_state(&self, state: AgentState) -> StorageResult<()> {
        self.local.save_agent_state(state.clone()).await?;
        let payload = with_id(&state, &state.agent_id)?;
        self.mirror(SyncOp::insert(tables::AGENT_STATE, state.agent_id, payload))
            .await
    }

    async fn load_agent_state(&self, agent_id: &str) -> StorageResult<Option<AgentState>> {
        if let Some(state) = self.local.load_agent_state(agent_id).await? {
            return Ok(Some(state));
        }
        if !self.engine.is_online() {
            return Ok(None);
        }
        let found = self
            .remote_read(None, self.remote.load_agent_state(agent_id))
            .await;
        if let Some(state) = &found {
            self.local.save_agent_state(state.clone()).await?;
        }
        Ok(found)
    }

    async fn delete_agent_state(&self, agent_id: &str) -> StorageResult<()> {
        self.local.delete_agent_state(agent_id).await?;
        self.mirror(SyncOp::delete(tables::AGENT_STATE, agent_id)).await
    }

    async fn list_agents_with_state(&self) -> StorageResult<Vec<String>> {
        let local = self.local.list_agents_with_state().await?;
        if !local.is_empty() || !self.engine.is_online() {
            return Ok(local);
        }
        Ok(self.remote_read(local, self.remote.list_agents_with_state()).await)
    }

    async fn store_plan(&self, plan: &Plan) -> StorageResult<()> {
        self.local.store_plan(plan).await?;
        let payload = serde_json::to_value(plan)?;
        self.mirror(SyncOp::insert(tables::PLANS, plan.id.clone(), payload)).await
    }

    async fn get_plan(&self, plan_id: &str) -> StorageResult<Option<Plan>> {
        if let Some(plan) = self.local.get_plan(plan_id).await? {
            return Ok(Some(plan));
        }
        if !self.engine.is_online() {
            return Ok(None);
        }
        let found = self.remote_read(None, self.remote.get_plan(plan_id)).await;
        if let Some(plan) = &found {
            self.local.store_plan(plan).await?;
        }
        Ok(found)
    }

    async fn update_plan_status(
        &self,
        plan_id: &str,
        status: PlanStatus,
        failure_reason: Option<&str>,
    ) -> StorageResult<()> {
        self.local
            .update_plan_status(plan_id, status, failure_reason)
            .await?;
        // Mirror the full updated record so coalescing keeps the final state.
        if let Some(plan) = self.local.get_plan(plan_id).await? {
            let payload = serde_json::to_value(&plan)?;
            self.mirror(SyncOp::update(tables::PLANS, plan_id, payload)).await?;
        }
        Ok(())
    }

    async fn query_plans(
        &self,
        goal_id: Option<&str>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Plan>> {
        let local = self.local.query_plans(goal_id, limit).await?;
        if !local.is_empty() || !self.engine.is_online() {
            return Ok(local);
        }
        Ok(self.remote_read(local, self.remote.query_plans(goal_id, limit)).await)
    }

    async fn store_action(&self, action: &Action) -> StorageResult<()> {
        self.local.store_action(action).await?;
        let payload = serde_json::to_value(action)?;
        self.mirror(SyncOp::insert(tables::ACTIONS, action.id.clone(), payload))
            .await
    }

    async fn record_action_execution(&self, action_id: &str) -> StorageResult<()> {
        self.local.record_action_execution(action_id).await
    }

    async fn store_metric(&self, metric: MetricRecord) -> StorageResult<()> {
        self.local.store_metric(metric.clone()).await?;
        let payload = serde_json::to_value(&metric)?;
        self.mirror(SyncOp::insert(tables::QUALITY_METRICS, metric.id, payload))
            .await
    }

    async fn store_metrics(&self, metrics: Vec<MetricRecord>) -> StorageResult<()> {
        self.local.store_metrics(metrics.clone()).await?;
        for metric in metrics {
            let payload = serde_json::to_value(&metric)?;
            self.mirror(SyncOp::insert(tables::QUALITY_METRICS, metric.id, payload))
                .await?;
        }
        Ok(())
    }

    async fn query_metrics(&self, query: &MetricQuery) -> StorageResult<Vec<MetricRecord>> {
        let local = self.local.query_metrics(query).await?;
        if !local.is_empty() || !self.engine.is_online() {
            return Ok(local);
        }
        Ok(self.remote_read(local, self.remote.query_metrics(query)).await)
    }

    async fn aggregate_metrics(
        &self,
        agent_id: Option<&str>,
        metric_name: &str,
        period_start_ms: i64,
        period_end_ms: i64,
    ) -> StorageResult<Option<AggregatedMetric>> {
        self.local
            .aggregate_metrics(agent_id, metric_name, period_start_ms, period_end_ms)
            .await
    }

    async fn delete_old_metrics(&self, cutoff_ms: i64) -> StorageResult<u64> {
        let deleted = self.local.delete_old_metrics(cutoff_ms).await?;
        if self.engine.is_online() {
            let _ = self.remote_read(0, self.remote.delete_old_metrics(cutoff_ms)).await;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_matches() {
        assert!(glob_matches("task-*", "task-1"));
        assert!(glob_matches("task-*", "task-"));
        assert!(glob_matches("*", "anything"));
        assert!(glob_matches("a*c", "abc"));
        assert!(glob_matches("a*c", "ac"));
        assert!(!glob_matches("task-*", "note-1"));
        assert!(!glob_matches("a*c", "abd"));
    }
}
