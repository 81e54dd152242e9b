use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use gauntlet_core::config::ProviderKind;

/// Table names shared by the local schema, the remote REST paths, and the
/// sync queue.
pub mod tables {
    pub const MEMORY_ENTRIES: &str = "memory_entries";
    pub const EVENTS: &str = "events";
    pub const QUALITY_METRICS: &str = "quality_metrics";
    pub const AGGREGATED_METRICS: &str = "aggregated_metrics";
    pub const CODE_CHUNKS: &str = "code_chunks";
    pub const EXPERIENCES: &str = "experiences";
    pub const PATTERNS: &str = "patterns";
    pub const AGENT_STATE: &str = "agent_state";
    pub const PLANS: &str = "plans";
    pub const ACTIONS: &str = "actions";
    pub const SYNC_QUEUE: &str = "sync_queue";
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Visibility of a memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    #[default]
    Owner,
    Team,
    Public,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Owner => "owner",
            AccessLevel::Team => "team",
            AccessLevel::Public => "public",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "owner" => Some(AccessLevel::Owner),
            "team" => Some(AccessLevel::Team),
            "public" => Some(AccessLevel::Public),
            _ => None,
        }
    }
}

/// Partitioned key/value memory shared across the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub partition: String,
    pub value: serde_json::Value,
    pub owner: String,
    pub access_level: AccessLevel,
    pub team_id: Option<String>,
    pub created_at_ms: i64,
    pub expires_at_ms: Option<i64>,
}

impl MemoryEntry {
    pub fn new(
        key: impl Into<String>,
        partition: impl Into<String>,
        value: serde_json::Value,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            partition: partition.into(),
            value,
            owner: owner.into(),
            access_level: AccessLevel::Owner,
            team_id: None,
            created_at_ms: now_ms(),
            expires_at_ms: None,
        }
    }

    /// Composite identity used for sync-queue coalescing and remote rows.
    pub fn record_id(&self) -> String {
        format!("{}/{}", self.partition, self.key)
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.map_or(false, |expiry| expiry < now_ms)
    }
}

/// Filters for `query_memory_entries`; results are ordered by `created_at`
/// descending and expired entries are never returned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryQuery {
    pub partition: Option<String>,
    pub owner: Option<String>,
    pub access_level: Option<AccessLevel>,
    pub team_id: Option<String>,
    pub limit: Option<usize>,
}

/// Fleet event with a time-to-live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub source: String,
    pub timestamp_ms: i64,
    pub ttl_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventQuery {
    pub event_type: Option<String>,
    pub source: Option<String>,
    pub since_ms: Option<i64>,
    pub limit: Option<usize>,
}

/// One measured metric sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub id: String,
    pub timestamp_ms: i64,
    pub agent_id: String,
    pub metric_name: String,
    pub value: f64,
    /// Constrained extension map; dimension values are plain strings.
    pub dimensions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricQuery {
    pub agent_id: Option<String>,
    pub metric_name: Option<String>,
    pub since_ms: Option<i64>,
    pub until_ms: Option<i64>,
    pub limit: Option<usize>,
}

/// Rollup of metric samples over a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetric {
    pub period_start_ms: i64,
    pub period_end_ms: i64,
    pub agent_id: Option<String>,
    pub metric_name: String,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Indexed fragment of project source, optionally embedded for similarity
/// search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChunk {
    pub id: String,
    pub project_id: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
    pub language: String,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeChunkQuery {
    pub project_id: Option<String>,
    pub file_path: Option<String>,
    pub language: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarCodeOptions {
    pub project_id: Option<String>,
    pub limit: usize,
    pub min_similarity: f32,
}

impl Default for SimilarCodeOptions {
    fn default() -> Self {
        Self {
            project_id: None,
            limit: 10,
            min_similarity: 0.0,
        }
    }
}

/// Outcome record for learning sidecars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceRecord {
    pub id: String,
    pub agent_id: String,
    pub task_kind: String,
    pub outcome: serde_json::Value,
    pub success: bool,
    pub created_at_ms: i64,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperienceQuery {
    pub agent_id: Option<String>,
    pub task_kind: Option<String>,
    pub success: Option<bool>,
    pub limit: Option<usize>,
}

/// Recurring strategy surfaced from experiences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub confidence: f64,
    pub usage_count: u64,
    pub created_at_ms: i64,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternQuery {
    pub name_contains: Option<String>,
    pub min_confidence: Option<f64>,
    pub limit: Option<usize>,
}

/// Opaque per-agent state: raw bytes or a structured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AgentStateValue {
    Bytes(Vec<u8>),
    Structured(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: String,
    pub state: AgentStateValue,
    pub updated_at_ms: i64,
}

/// Identity card a provider reports through `provider_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub kind: ProviderKind,
    pub supports_sync: bool,
    pub description: String,
}

/// Cosine similarity of two embeddings; zero when lengths differ or either
/// vector is all zeros.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
