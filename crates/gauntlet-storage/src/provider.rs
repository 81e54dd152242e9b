use async_trait::async_trait;

use gauntlet_core::action::Action;
use gauntlet_planner::{Plan, PlanStatus};

use crate::error::StorageResult;
use crate::records::{
    AgentState, AggregatedMetric, CodeChunk, CodeChunkQuery, EventQuery, EventRecord,
    ExperienceQuery, ExperienceRecord, MemoryEntry, MemoryQuery, MetricQuery, MetricRecord,
    PatternQuery, PatternRecord, ProviderInfo, SimilarCodeOptions,
};

/// Uniform persistence surface over the local embedded store and the
/// optional remote store.
///
/// Implementations: [`crate::local::LocalProvider`] (single-file SQLite),
/// [`crate::remote::RemoteProvider`] (REST), and
/// [`crate::hybrid::HybridProvider`] which composes them behind the sync
/// engine. All mutations are durable on return; reads after a successful
/// local write observe the new value immediately.
#[async_trait]
pub trait PersistenceProvider: Send + Sync {
    // Lifecycle.
    async fn initialize(&self) -> StorageResult<()>;
    async fn shutdown(&self) -> StorageResult<()>;
    fn provider_info(&self) -> ProviderInfo;

    // Shared fleet memory.
    async fn store_memory_entry(&self, entry: MemoryEntry) -> StorageResult<()>;
    async fn store_memory_entries(&self, entries: Vec<MemoryEntry>) -> StorageResult<()>;
    async fn get_memory_entry(
        &self,
        key: &str,
        partition: &str,
    ) -> StorageResult<Option<MemoryEntry>>;
    async fn query_memory_entries(&self, query: &MemoryQuery) -> StorageResult<Vec<MemoryEntry>>;
    /// Deletes entries whose key matches a glob-style pattern (`*` matches
    /// any run of characters), optionally narrowed to one partition.
    /// Returns the number of deleted entries.
    async fn delete_memory_entries(
        &self,
        key_pattern: &str,
        partition: Option<&str>,
    ) -> StorageResult<u64>;

    // Events.
    async fn store_event(&self, event: EventRecord) -> StorageResult<()>;
    async fn store_events(&self, events: Vec<EventRecord>) -> StorageResult<()>;
    async fn query_events(&self, query: &EventQuery) -> StorageResult<Vec<EventRecord>>;
    async fn delete_old_events(&self, cutoff_ms: i64) -> StorageResult<u64>;

    // Code chunks.
    async fn store_code_chunk(&self, chunk: CodeChunk) -> StorageResult<()>;
    async fn store_code_chunks(&self, chunks: Vec<CodeChunk>) -> StorageResult<()>;
    async fn query_code_chunks(&self, query: &CodeChunkQuery) -> StorageResult<Vec<CodeChunk>>;
    async fn search_similar_code(
        &self,
        embedding: &[f32],
        options: &SimilarCodeOptions,
    ) -> StorageResult<Vec<CodeChunk>>;
    async fn delete_code_chunks_for_file(
        &self,
        project_id: &str,
        file_path: &str,
    ) -> StorageResult<u64>;
    async fn delete_code_chunks_for_project(&self, project_id: &str) -> StorageResult<u64>;

    // Experiences and patterns for learning sidecars.
    async fn store_experience(&self, experience: ExperienceRecord) -> StorageResult<()>;
    async fn query_experiences(
        &self,
        query: &ExperienceQuery,
    ) -> StorageResult<Vec<ExperienceRecord>>;
    async fn search_similar_experiences(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> StorageResult<Vec<ExperienceRecord>>;
    async fn store_pattern(&self, pattern: PatternRecord) -> StorageResult<()>;
    async fn query_patterns(&self, query: &PatternQuery) -> StorageResult<Vec<PatternRecord>>;
    async fn search_similar_patterns(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> StorageResult<Vec<PatternRecord>>;

    // Opaque per-agent ("nervous system") state.
    async fn save_agent_state(&self, state: AgentState) -> StorageResult<()>;
    async fn load_agent_state(&self, agent_id: &str) -> StorageResult<Option<AgentState>>;
    async fn delete_agent_state(&self, agent_id: &str) -> StorageResult<()>;
    async fn list_agents_with_state(&self) -> StorageResult<Vec<String>>;

    // Plans and the action catalog.
    async fn store_plan(&self, plan: &Plan) -> StorageResult<()>;
    async fn get_plan(&self, plan_id: &str) -> StorageResult<Option<Plan>>;
    async fn update_plan_status(
        &self,
        plan_id: &str,
        status: PlanStatus,
        failure_reason: Option<&str>,
    ) -> StorageResult<()>;
    async fn query_plans(
        &self,
        goal_id: Option<&str>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Plan>>;
    async fn store_action(&self, action: &Action) -> StorageResult<()>;
    /// Bumps the action's execution counter after a dispatch.
    async fn record_action_execution(&self, action_id: &str) -> StorageResult<()>;

    // Quality metrics.
    async fn store_metric(&self, metric: MetricRecord) -> StorageResult<()>;
    async fn store_metrics(&self, metrics: Vec<MetricRecord>) -> StorageResult<()>;
    async fn query_metrics(&self, query: &MetricQuery) -> StorageResult<Vec<MetricRecord>>;
    /// Rolls samples of one metric up over a period window and records the
    /// aggregate; `None` when no samples fall inside the window.
    async fn aggregate_metrics(
        &self,
        agent_id: Option<&str>,
        metric_name: &str,
        period_start_ms: i64,
        period_end_ms: i64,
    ) -> StorageResult<Option<AggregatedMetric>>;
    async fn delete_old_metrics(&self, cutoff_ms: i64) -> StorageResult<u64>;
}
