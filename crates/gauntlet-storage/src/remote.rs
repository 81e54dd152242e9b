use async_trait::async_trait;
use log::warn;
use reqwest::StatusCode;
use serde_json::Value;

use gauntlet_core::action::Action;
use gauntlet_core::config::{FleetConfig, ProviderKind};
use gauntlet_planner::{Plan, PlanStatus};

use crate::error::{StorageError, StorageErrorKind, StorageResult};
use crate::provider::PersistenceProvider;
use crate::records::{
    cosine_similarity, now_ms, tables, AgentState, AggregatedMetric, CodeChunk, CodeChunkQuery,
    EventQuery, EventRecord, ExperienceQuery, ExperienceRecord, MemoryEntry, MemoryQuery,
    MetricQuery, MetricRecord, PatternQuery, PatternRecord, ProviderInfo, SimilarCodeOptions,
};

/// Generic verbs the sync engine drives against a remote store.
///
/// The REST provider implements this against a PostgREST-style API; tests
/// substitute an in-process fake. Every error carries a structured
/// [`StorageErrorKind`], which is the whole conflict-detection contract.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn insert(&self, table: &str, payload: &Value) -> StorageResult<()>;
    async fn update(&self, table: &str, record_id: &str, payload: &Value) -> StorageResult<()>;
    /// Write that overrides conflict/duplicate rejection; used by the
    /// local-wins conflict strategy.
    async fn force_upsert(&self, table: &str, record_id: &str, payload: &Value)
        -> StorageResult<()>;
    async fn delete(&self, table: &str, record_id: &str) -> StorageResult<()>;
    async fn fetch(&self, table: &str, record_id: &str) -> StorageResult<Option<Value>>;
    /// Raw query-parameter pairs, PostgREST style (`("partition", "eq.p")`,
    /// `("order", "created_at.desc")`).
    async fn query(
        &self,
        table: &str,
        filters: &[(String, String)],
        limit: Option<usize>,
    ) -> StorageResult<Vec<Value>>;
    async fn health_check(&self) -> StorageResult<()>;
}

/// REST client for the remote half of the hybrid provider.
pub struct RemoteProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RemoteProvider {
    pub fn new(
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
        service_key: Option<String>,
    ) -> StorageResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        let base_url = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            // The service-role key bypasses row-level security for fleet
            // internals; fall back to the anon key otherwise.
            api_key: service_key.unwrap_or_else(|| anon_key.into()),
        })
    }

    pub fn from_config(config: &FleetConfig) -> StorageResult<Self> {
        let url = config.remote_url.clone().ok_or_else(|| {
            StorageError::remote(StorageErrorKind::Unauthorized, "remote URL not configured")
        })?;
        let anon = config.remote_anon_key.clone().ok_or_else(|| {
            StorageError::remote(StorageErrorKind::Unauthorized, "remote key not configured")
        })?;
        Self::new(url, anon, config.remote_service_key.clone())
    }

    fn endpoint(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
    }

    /// Map an HTTP outcome onto the structured error-kind contract.
    async fn check(response: reqwest::Response) -> StorageResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let kind = match status {
            StatusCode::CONFLICT => {
                // PostgREST reports unique violations with SQLSTATE 23505 in
                // the error body.
                let code = serde_json::from_str::<Value>(&body)
                    .ok()
                    .and_then(|v| v.get("code").and_then(|c| c.as_str().map(str::to_string)));
                if code.as_deref() == Some("23505") {
                    StorageErrorKind::Duplicate
                } else {
                    StorageErrorKind::Conflict
                }
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StorageErrorKind::Unauthorized,
            StatusCode::TOO_MANY_REQUESTS => StorageErrorKind::RateLimited,
            status if status.is_server_error() => StorageErrorKind::Unavailable,
            _ => StorageErrorKind::Other,
        };
        Err(StorageError::remote(kind, format!("{}: {}", status, body)))
    }

    /// DELETE with arbitrary PostgREST filters, returning the removed count.
    async fn delete_where(&self, table: &str, filters: &[(String, String)]) -> StorageResult<u64> {
        let response = self
            .request(self.client.delete(self.endpoint(table)))
            .query(filters)
            .header("Prefer", "return=representation")
            .send()
            .await?;
        let response = Self::check(response).await?;
        let removed: Vec<Value> = response.json().await.unwrap_or_default();
        Ok(removed.len() as u64)
    }

    fn decode<T: serde::de::DeserializeOwned>(&self, table: &str, value: Value) -> Option<T> {
        match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("skipping malformed remote record in {}: {}", table, e);
                None
            }
        }
    }

    fn decode_all<T: serde::de::DeserializeOwned>(&self, table: &str, values: Vec<Value>) -> Vec<T> {
        values
            .into_iter()
            .filter_map(|value| self.decode(table, value))
            .collect()
    }
}

/// Serialize a record and attach the remote row id.
pub(crate) fn with_id<T: serde::Serialize>(record: &T, id: &str) -> StorageResult<Value> {
    let mut value = serde_json::to_value(record)?;
    if let Value::Object(map) = &mut value {
        map.insert("id".to_string(), Value::String(id.to_string()));
    }
    Ok(value)
}

#[async_trait]
impl RemoteStore for RemoteProvider {
    async fn insert(&self, table: &str, payload: &Value) -> StorageResult<()> {
        let response = self
            .request(self.client.post(self.endpoint(table)))
            .header("Prefer", "return=minimal")
            .json(&vec![payload])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn update(&self, table: &str, record_id: &str, payload: &Value) -> StorageResult<()> {
        let response = self
            .request(self.client.patch(self.endpoint(table)))
            .query(&[("id", format!("eq.{}", record_id))])
            .header("Prefer", "return=minimal")
            .json(payload)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn force_upsert(
        &self,
        table: &str,
        _record_id: &str,
        payload: &Value,
    ) -> StorageResult<()> {
        let response = self
            .request(self.client.post(self.endpoint(table)))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&vec![payload])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, record_id: &str) -> StorageResult<()> {
        let response = self
            .request(self.client.delete(self.endpoint(table)))
            .query(&[("id", format!("eq.{}", record_id))])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn fetch(&self, table: &str, record_id: &str) -> StorageResult<Option<Value>> {
        let response = self
            .request(self.client.get(self.endpoint(table)))
            .query(&[("id", format!("eq.{}", record_id)), ("limit", "1".to_string())])
            .send()
            .await?;
        let response = Self::check(response).await?;
        let mut rows: Vec<Value> = response.json().await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.remove(0))
        })
    }

    async fn query(
        &self,
        table: &str,
        filters: &[(String, String)],
        limit: Option<usize>,
    ) -> StorageResult<Vec<Value>> {
        let mut builder = self
            .request(self.client.get(self.endpoint(table)))
            .query(filters);
        if let Some(limit) = limit {
            builder = builder.query(&[("limit", limit.to_string())]);
        }
        let response = builder.send().await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    async fn health_check(&self) -> StorageResult<()> {
        let response = self
            .request(self.client.get(format!("{}/rest/v1/", self.base_url)))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

fn eq(column: &str, value: impl std::fmt::Display) -> (String, String) {
    (column.to_string(), format!("eq.{}", value))
}

fn order_desc(column: &str) -> (String, String) {
    ("order".to_string(), format!("{}.desc", column))
}

#[async_trait]
impl PersistenceProvider for RemoteProvider {
    async fn initialize(&self) -> StorageResult<()> {
        self.health_check().await
    }

    async fn shutdown(&self) -> StorageResult<()> {
        Ok(())
    }

    fn provider_info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "remote-rest".to_string(),
            kind: ProviderKind::Remote,
            supports_sync: false,
            description: format!("REST store at {}", self.base_url),
        }
    }

    async fn store_memory_entry(&self, entry: MemoryEntry) -> StorageResult<()> {
        let payload = with_id(&entry, &entry.record_id())?;
        self.force_upsert(tables::MEMORY_ENTRIES, &entry.record_id(), &payload)
            .await
    }

    async fn store_memory_entries(&self, entries: Vec<MemoryEntry>) -> StorageResult<()> {
        for entry in entries {
            self.store_memory_entry(entry).await?;
        }
        Ok(())
    }

    async fn get_memory_entry(
        &self,
        key: &str,
        partition: &str,
    ) -> StorageResult<Option<MemoryEntry>> {
        let record_id = format!("{}/{}", partition, key);
        let Some(value) = self.fetch(tables::MEMORY_ENTRIES, &record_id).await? else {
            return Ok(None);
        };
        let entry: Option<MemoryEntry> = self.decode(tables::MEMORY_ENTRIES, value);
        Ok(entry.filter(|entry| !entry.is_expired(now_ms())))
    }

    async fn query_memory_entries(&self, query: &MemoryQuery) -> StorageResult<Vec<MemoryEntry>> {
        let mut filters = vec![order_desc("created_at_ms")];
        if let Some(partition) = &query.partition {
            filters.push(eq("partition", partition));
        }
        if let Some(owner) = &query.owner {
            filters.push(eq("owner", owner));
        }
        if let Some(access_level) = &query.access_level {
            filters.push(eq("access_level", access_level.as_str()));
        }
        if let Some(team_id) = &query.team_id {
            filters.push(eq("team_id", team_id));
        }

        let rows = self
            .query(tables::MEMORY_ENTRIES, &filters, query.limit)
            .await?;
        let now = now_ms();
        Ok(self
            .decode_all::<MemoryEntry>(tables::MEMORY_ENTRIES, rows)
            .into_iter()
            .filter(|entry| !entry.is_expired(now))
            .collect())
    }

    async fn delete_memory_entries(
        &self,
        key_pattern: &str,
        partition: Option<&str>,
    ) -> StorageResult<u64> {
        // PostgREST's `like` already uses `*` as its wildcard.
        let mut filters = vec![("key".to_string(), format!("like.{}", key_pattern))];
        if let Some(partition) = partition {
            filters.push(eq("partition", partition));
        }
        self.delete_where(tables::MEMORY_ENTRIES, &filters).await
    }

    async fn store_event(&self, event: EventRecord) -> StorageResult<()> {
        let payload = serde_json::to_value(&event)?;
        self.insert(tables::EVENTS, &payload).await
    }

    async fn store_events(&self, events: Vec<EventRecord>) -> StorageResult<()> {
        for event in events {
            self.store_event(event).await?;
        }
        Ok(())
    }

    async fn query_events(&self, query: &EventQuery) -> StorageResult<Vec<EventRecord>> {
        let mut filters = vec![order_desc("timestamp_ms")];
        if let Some(event_type) = &query.event_type {
            filters.push(eq("event_type", event_type));
        }
        if let Some(source) = &query.source {
            filters.push(eq("source", source));
        }
        if let Some(since) = query.since_ms {
            filters.push(("timestamp_ms".to_string(), format!("gte.{}", since)));
        }
        let rows = self.query(tables::EVENTS, &filters, query.limit).await?;
        Ok(self.decode_all(tables::EVENTS, rows))
    }

    async fn delete_old_events(&self, cutoff_ms: i64) -> StorageResult<u64> {
        self.delete_where(
            tables::EVENTS,
            &[("timestamp_ms".to_string(), format!("lt.{}", cutoff_ms))],
        )
        .await
    }

    async fn store_code_chunk(&self, chunk: CodeChunk) -> StorageResult<()> {
        let payload = serde_json::to_value(&chunk)?;
        self.force_upsert(tables::CODE_CHUNKS, &chunk.id, &payload).await
    }

    async fn store_code_chunks(&self, chunks: Vec<CodeChunk>) -> StorageResult<()> {
        for chunk in chunks {
            self.store_code_chunk(chunk).await?;
        }
        Ok(())
    }

    async fn query_code_chunks(&self, query: &CodeChunkQuery) -> StorageResult<Vec<CodeChunk>> {
        let mut filters = Vec::new();
        if let Some(project_id) = &query.project_id {
            filters.push(eq("project_id", project_id));
        }
        if let Some(file_path) = &query.file_path {
            filters.push(eq("file_path", file_path));
        }
        if let Some(language) = &query.language {
            filters.push(eq("language", language));
        }
        let rows = self.query(tables::CODE_CHUNKS, &filters, query.limit).await?;
        Ok(self.decode_all(tables::CODE_CHUNKS, rows))
    }

    async fn search_similar_code(
        &self,
        embedding: &[f32],
        options: &SimilarCodeOptions,
    ) -> StorageResult<Vec<CodeChunk>> {
        let candidates = self
            .query_code_chunks(&CodeChunkQuery {
                project_id: options.project_id.clone(),
                ..Default::default()
            })
            .await?;
        let mut scored: Vec<(f32, CodeChunk)> = candidates
            .into_iter()
            .filter_map(|chunk| {
                let score = chunk
                    .embedding
                    .as_ref()
                    .map(|candidate| cosine_similarity(embedding, candidate))?;
                (score >= options.min_similarity).then_some((score, chunk))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(options.limit);
        Ok(scored.into_iter().map(|(_, chunk)| chunk).collect())
    }

    async fn delete_code_chunks_for_file(
        &self,
        project_id: &str,
        file_path: &str,
    ) -> StorageResult<u64> {
        self.delete_where(
            tables::CODE_CHUNKS,
            &[eq("project_id", project_id), eq("file_path", file_path)],
        )
        .await
    }

    async fn delete_code_chunks_for_project(&self, project_id: &str) -> StorageResult<u64> {
        self.delete_where(tables::CODE_CHUNKS, &[eq("project_id", project_id)])
            .await
    }

    async fn store_experience(&self, experience: ExperienceRecord) -> StorageResult<()> {
        let payload = serde_json::to_value(&experience)?;
        self.force_upsert(tables::EXPERIENCES, &experience.id, &payload)
            .await
    }

    async fn query_experiences(
        &self,
        query: &ExperienceQuery,
    ) -> StorageResult<Vec<ExperienceRecord>> {
        let mut filters = vec![order_desc("created_at_ms")];
        if let Some(agent_id) = &query.agent_id {
            filters.push(eq("agent_id", agent_id));
        }
        if let Some(task_kind) = &query.task_kind {
            filters.push(eq("task_kind", task_kind));
        }
        if let Some(success) = query.success {
            filters.push(eq("success", success));
        }
        let rows = self.query(tables::EXPERIENCES, &filters, query.limit).await?;
        Ok(self.decode_all(tables::EXPERIENCES, rows))
    }

    async fn search_similar_experiences(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> StorageResult<Vec<ExperienceRecord>> {
        let candidates = self.query_experiences(&ExperienceQuery::default()).await?;
        let mut scored: Vec<(f32, ExperienceRecord)> = candidates
            .into_iter()
            .filter_map(|experience| {
                let score = experience
                    .embedding
                    .as_ref()
                    .map(|candidate| cosine_similarity(embedding, candidate))?;
                Some((score, experience))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(_, e)| e).collect())
    }

    async fn store_pattern(&self, pattern: PatternRecord) -> StorageResult<()> {
        let payload = serde_json::to_value(&pattern)?;
        self.force_upsert(tables::PATTERNS, &pattern.id, &payload).await
    }

    async fn query_patterns(&self, query: &PatternQuery) -> StorageResult<Vec<PatternRecord>> {
        let mut filters = vec![order_desc("confidence")];
        if let Some(fragment) = &query.name_contains {
            filters.push(("name".to_string(), format!("like.*{}*", fragment)));
        }
        if let Some(min_confidence) = query.min_confidence {
            filters.push(("confidence".to_string(), format!("gte.{}", min_confidence)));
        }
        let rows = self.query(tables::PATTERNS, &filters, query.limit).await?;
        Ok(self.decode_all(tables::PATTERNS, rows))
    }

    async fn search_similar_patterns(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> StorageResult<Vec<PatternRecord>> {
        let candidates = self.query_patterns(&PatternQuery::default()).await?;
        let mut scored: Vec<(f32, PatternRecord)> = candidates
            .into_iter()
            .filter_map(|pattern| {
                let score = pattern
                    .embedding
                    .as_ref()
                    .map(|candidate| cosine_similarity(embedding, candidate))?;
                Some((score, pattern))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(_, p)| p).collect())
    }

    async fn save_agent_state(&self, state: AgentState) -> StorageResult<()> {
        let payload = with_id(&state, &state.agent_id)?;
        self.force_upsert(tables::AGENT_STATE, &state.agent_id, &payload)
            .await
    }

    async fn load_agent_state(&self, agent_id: &str) -> StorageResult<Option<AgentState>> {
        let Some(value) = self.fetch(tables::AGENT_STATE, agent_id).await? else {
            return Ok(None);
        };
        Ok(self.decode(tables::AGENT_STATE, value))
    }

    async fn delete_agent_state(&self, agent_id: &str) -> StorageResult<()> {
        RemoteStore::delete(self, tables::AGENT_STATE, agent_id).await
    }

    async fn list_agents_with_state(&self) -> StorageResult<Vec<String>> {
        let rows = self
            .query(
                tables::AGENT_STATE,
                &[("select".to_string(), "agent_id".to_string())],
                None,
            )
            .await?;
        let mut agents: Vec<String> = rows
            .into_iter()
            .filter_map(|row| {
                row.get("agent_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .collect();
        agents.sort();
        Ok(agents)
    }

    async fn store_plan(&self, plan: &Plan) -> StorageResult<()> {
        let payload = serde_json::to_value(plan)?;
        self.force_upsert(tables::PLANS, &plan.id, &payload).await
    }

    async fn get_plan(&self, plan_id: &str) -> StorageResult<Option<Plan>> {
        let Some(value) = self.fetch(tables::PLANS, plan_id).await? else {
            return Ok(None);
        };
        Ok(self.decode(tables::PLANS, value))
    }

    async fn update_plan_status(
        &self,
        plan_id: &str,
        status: PlanStatus,
        failure_reason: Option<&str>,
    ) -> StorageResult<()> {
        let mut patch = serde_json::json!({ "status": status.as_str() });
        if let Some(reason) = failure_reason {
            patch["failure_reason"] = Value::String(reason.to_string());
        }
        match status {
            PlanStatus::Running => patch["started_at_ms"] = Value::from(now_ms()),
            PlanStatus::Succeeded | PlanStatus::Failed | PlanStatus::Replanned => {
                patch["completed_at_ms"] = Value::from(now_ms())
            }
            PlanStatus::Pending => {}
        }
        self.update(tables::PLANS, plan_id, &patch).await
    }

    async fn query_plans(
        &self,
        goal_id: Option<&str>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Plan>> {
        let mut filters = vec![order_desc("created_at_ms")];
        if let Some(goal_id) = goal_id {
            filters.push(eq("goal_id", goal_id));
        }
        let rows = self.query(tables::PLANS, &filters, limit).await?;
        Ok(self.decode_all(tables::PLANS, rows))
    }

    async fn store_action(&self, action: &Action) -> StorageResult<()> {
        let payload = serde_json::to_value(action)?;
        self.force_upsert(tables::ACTIONS, &action.id, &payload).await
    }

    async fn record_action_execution(&self, action_id: &str) -> StorageResult<()> {
        // PostgREST has no atomic increment; read-modify-write is acceptable
        // for a monotonic counter that tolerates rare lost updates.
        let current = self
            .fetch(tables::ACTIONS, action_id)
            .await?
            .and_then(|row| row.get("execution_count").and_then(Value::as_i64))
            .unwrap_or(0);
        let patch = serde_json::json!({ "execution_count": current + 1 });
        self.update(tables::ACTIONS, action_id, &patch).await
    }

    async fn store_metric(&self, metric: MetricRecord) -> StorageResult<()> {
        let payload = serde_json::to_value(&metric)?;
        self.insert(tables::QUALITY_METRICS, &payload).await
    }

    async fn store_metrics(&self, metrics: Vec<MetricRecord>) -> StorageResult<()> {
        for metric in metrics {
            self.store_metric(metric).await?;
        }
        Ok(())
    }

    async fn query_metrics(&self, query: &MetricQuery) -> StorageResult<Vec<MetricRecord>> {
        let mut filters = vec![order_desc("timestamp_ms")];
        if let Some(agent_id) = &query.agent_id {
            filters.push(eq("agent_id", agent_id));
        }
        if let Some(metric_name) = &query.metric_name {
            filters.push(eq("metric_name", metric_name));
        }
        if let Some(since) = query.since_ms {
            filters.push(("timestamp_ms".to_string(), format!("gte.{}", since)));
        }
        if let Some(until) = query.until_ms {
            filters.push(("timestamp_ms".to_string(), format!("lt.{}", until)));
        }
        let rows = self
            .query(tables::QUALITY_METRICS, &filters, query.limit)
            .await?;
        Ok(self.decode_all(tables::QUALITY_METRICS, rows))
    }

    async fn aggregate_metrics(
        &self,
        agent_id: Option<&str>,
        metric_name: &str,
        period_start_ms: i64,
        period_end_ms: i64,
    ) -> StorageResult<Option<AggregatedMetric>> {
        let samples = self
            .query_metrics(&MetricQuery {
                agent_id: agent_id.map(str::to_string),
                metric_name: Some(metric_name.to_string()),
                since_ms: Some(period_start_ms),
                until_ms: Some(period_end_ms),
                limit: None,
            })
            .await?;
        if samples.is_empty() {
            return Ok(None);
        }

        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        let sum: f64 = values.iter().sum();
        let aggregate = AggregatedMetric {
            period_start_ms,
            period_end_ms,
            agent_id: agent_id.map(str::to_string),
            metric_name: metric_name.to_string(),
            count: values.len() as u64,
            sum,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            avg: sum / values.len() as f64,
        };
        let payload = serde_json::to_value(&aggregate)?;
        self.insert(tables::AGGREGATED_METRICS, &payload).await?;
        Ok(Some(aggregate))
    }

    async fn delete_old_metrics(&self, cutoff_ms: i64) -> StorageResult<u64> {
        self.delete_where(
            tables::QUALITY_METRICS,
            &[("timestamp_ms".to_string(), format!("lt.{}", cutoff_ms))],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_and_key_selection() {
        let provider = RemoteProvider::new(
            "https://fleet.example.com/",
            "anon-key",
            Some("service-key".to_string()),
        )
        .unwrap();
        assert_eq!(
            provider.endpoint("memory_entries"),
            "https://fleet.example.com/rest/v1/memory_entries"
        );
        assert_eq!(provider.api_key, "service-key");

        let provider = RemoteProvider::new("https://fleet.example.com", "anon-key", None).unwrap();
        assert_eq!(provider.api_key, "anon-key");
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let config = FleetConfig::default();
        assert!(RemoteProvider::from_config(&config).is_err());

        let config = FleetConfig {
            remote_url: Some("https://fleet.example.com".to_string()),
            remote_anon_key: Some("anon".to_string()),
            ..Default::default()
        };
        assert!(RemoteProvider::from_config(&config).is_ok());
    }

    #[test]
    fn test_with_id_attaches_row_id() {
        let entry = MemoryEntry::new("k", "p", serde_json::json!(1), "owner");
        let payload = with_id(&entry, &entry.record_id()).unwrap();
        assert_eq!(payload["id"], serde_json::json!("p/k"));
        assert_eq!(payload["key"], serde_json::json!("k"));
    }

    #[test]
    fn test_filter_builders() {
        assert_eq!(eq("owner", "a1"), ("owner".to_string(), "eq.a1".to_string()));
        assert_eq!(
            order_desc("created_at_ms"),
            ("order".to_string(), "created_at_ms.desc".to_string())
        );
    }
}
