use async_trait::async_trait;
use log::warn;
use rusqlite::params;
use tokio_rusqlite::Connection as AsyncConnection;
use uuid::Uuid;

use gauntlet_core::action::Action;
use gauntlet_core::config::ProviderKind;
use gauntlet_planner::{Plan, PlanStatus};

use crate::error::StorageResult;
use crate::provider::PersistenceProvider;
use crate::records::{
    cosine_similarity, now_ms, tables, AccessLevel, AgentState, AgentStateValue, AggregatedMetric,
    CodeChunk, CodeChunkQuery, EventQuery, EventRecord, ExperienceQuery, ExperienceRecord,
    MemoryEntry, MemoryQuery, MetricQuery, MetricRecord, PatternQuery, PatternRecord, ProviderInfo,
    SimilarCodeOptions,
};
use crate::sync::{SyncOp, SyncOpType, SyncQueueStore};

/// Single-file embedded store backing the local half of the hybrid provider.
///
/// WAL journaling keeps readers unblocked by the writer; batch stores run
/// inside one transaction with a prepared statement. Records that fail
/// schema validation on load are quarantined in place (their id gains a
/// `_quarantine` suffix) and the caller sees a fresh default.
pub struct LocalProvider {
    conn: AsyncConnection,
    path: String,
}

impl LocalProvider {
    pub async fn open(path: &str) -> StorageResult<Self> {
        let conn = if path == ":memory:" {
            AsyncConnection::open_in_memory().await?
        } else {
            AsyncConnection::open(path).await?
        };
        let provider = Self {
            conn,
            path: path.to_string(),
        };
        provider.create_schema().await?;
        Ok(provider)
    }

    pub async fn open_in_memory() -> StorageResult<Self> {
        Self::open(":memory:").await
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    async fn create_schema(&self) -> StorageResult<()> {
        self.conn
            .call(|conn| {
                conn.pragma_update(None, "journal_mode", "WAL")?;
                conn.pragma_update(None, "synchronous", "NORMAL")?;
                conn.pragma_update(None, "foreign_keys", "ON")?;

                conn.execute_batch(
                    r#"
                    CREATE TABLE IF NOT EXISTS memory_entries (
                        key TEXT NOT NULL,
                        partition TEXT NOT NULL,
                        value TEXT NOT NULL,
                        owner TEXT NOT NULL,
                        access_level TEXT NOT NULL,
                        team_id TEXT,
                        created_at INTEGER NOT NULL,
                        expires_at INTEGER,
                        PRIMARY KEY (partition, key)
                    );
                    CREATE INDEX IF NOT EXISTS idx_memory_created_at
                        ON memory_entries(created_at DESC);
                    CREATE INDEX IF NOT EXISTS idx_memory_owner
                        ON memory_entries(owner);

                    CREATE TABLE IF NOT EXISTS events (
                        id TEXT PRIMARY KEY,
                        type TEXT NOT NULL,
                        payload TEXT NOT NULL,
                        source TEXT NOT NULL,
                        timestamp INTEGER NOT NULL,
                        ttl INTEGER
                    );
                    CREATE INDEX IF NOT EXISTS idx_events_timestamp
                        ON events(timestamp DESC);
                    CREATE INDEX IF NOT EXISTS idx_events_type
                        ON events(type);

                    CREATE TABLE IF NOT EXISTS quality_metrics (
                        id TEXT PRIMARY KEY,
                        timestamp INTEGER NOT NULL,
                        agent_id TEXT NOT NULL,
                        metric_name TEXT NOT NULL,
                        metric_value REAL NOT NULL,
                        dimensions TEXT NOT NULL DEFAULT '{}'
                    );
                    CREATE INDEX IF NOT EXISTS idx_metrics_name_time
                        ON quality_metrics(metric_name, timestamp DESC);

                    CREATE TABLE IF NOT EXISTS aggregated_metrics (
                        id TEXT PRIMARY KEY,
                        period_start INTEGER NOT NULL,
                        period_end INTEGER NOT NULL,
                        agent_id TEXT,
                        metric_name TEXT NOT NULL,
                        count INTEGER NOT NULL,
                        sum REAL NOT NULL,
                        min REAL NOT NULL,
                        max REAL NOT NULL,
                        avg REAL NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS code_chunks (
                        id TEXT PRIMARY KEY,
                        project_id TEXT NOT NULL,
                        file_path TEXT NOT NULL,
                        start_line INTEGER NOT NULL,
                        end_line INTEGER NOT NULL,
                        content TEXT NOT NULL,
                        language TEXT NOT NULL,
                        embedding BLOB
                    );
                    CREATE INDEX IF NOT EXISTS idx_chunks_project_file
                        ON code_chunks(project_id, file_path);

                    CREATE TABLE IF NOT EXISTS experiences (
                        id TEXT PRIMARY KEY,
                        agent_id TEXT NOT NULL,
                        task_kind TEXT NOT NULL,
                        outcome TEXT NOT NULL,
                        success INTEGER NOT NULL,
                        created_at INTEGER NOT NULL,
                        embedding BLOB
                    );
                    CREATE INDEX IF NOT EXISTS idx_experiences_agent
                        ON experiences(agent_id, created_at DESC);

                    CREATE TABLE IF NOT EXISTS patterns (
                        id TEXT PRIMARY KEY,
                        name TEXT NOT NULL,
                        description TEXT NOT NULL,
                        confidence REAL NOT NULL,
                        usage_count INTEGER NOT NULL,
                        created_at INTEGER NOT NULL,
                        embedding BLOB
                    );

                    CREATE TABLE IF NOT EXISTS agent_state (
                        agent_id TEXT PRIMARY KEY,
                        state TEXT NOT NULL,
                        updated_at INTEGER NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS plans (
                        id TEXT PRIMARY KEY,
                        goal_id TEXT NOT NULL,
                        sequence TEXT NOT NULL,
                        initial_state TEXT NOT NULL,
                        goal_state TEXT NOT NULL,
                        action_sequence TEXT NOT NULL,
                        total_cost REAL NOT NULL,
                        estimated_duration INTEGER NOT NULL,
                        actual_duration INTEGER,
                        status TEXT NOT NULL,
                        success INTEGER,
                        failure_reason TEXT,
                        execution_trace TEXT,
                        replanned_from TEXT,
                        created_at INTEGER NOT NULL,
                        started_at INTEGER,
                        completed_at INTEGER
                    );
                    CREATE INDEX IF NOT EXISTS idx_plans_goal
                        ON plans(goal_id, created_at DESC);

                    CREATE TABLE IF NOT EXISTS actions (
                        id TEXT PRIMARY KEY,
                        name TEXT NOT NULL,
                        description TEXT NOT NULL,
                        agent_type TEXT NOT NULL,
                        preconditions TEXT NOT NULL,
                        effects TEXT NOT NULL,
                        cost REAL NOT NULL,
                        duration_estimate INTEGER NOT NULL,
                        success_rate REAL NOT NULL,
                        execution_count INTEGER NOT NULL DEFAULT 0,
                        category TEXT NOT NULL,
                        created_at INTEGER NOT NULL,
                        updated_at INTEGER NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS sync_queue (
                        id TEXT PRIMARY KEY,
                        op_type TEXT NOT NULL,
                        table_name TEXT NOT NULL,
                        record_id TEXT NOT NULL,
                        data TEXT,
                        retry_count INTEGER NOT NULL DEFAULT 0,
                        created_at INTEGER NOT NULL
                    );
                    "#,
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Quarantine a corrupt row by suffixing its primary key, then log once.
    async fn quarantine(&self, table: &'static str, id_column: &'static str, record_id: String) {
        let quarantined = format!("{}_quarantine", record_id);
        let record = record_id.clone();
        let result = self
            .conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "UPDATE {} SET {} = ?1 WHERE {} = ?2",
                        table, id_column, id_column
                    ),
                    params![quarantined, record],
                )?;
                Ok(())
            })
            .await;
        match result {
            Ok(()) => warn!(
                "quarantined corrupt record '{}' in {}",
                record_id, table
            ),
            Err(e) => warn!(
                "failed to quarantine corrupt record '{}' in {}: {}",
                record_id, table, e
            ),
        }
    }
}

fn glob_to_like(pattern: &str) -> String {
    pattern.replace('%', "\\%").replace('_', "\\_").replace('*', "%")
}

fn encode_embedding(embedding: &Option<Vec<f32>>) -> Option<Vec<u8>> {
    embedding
        .as_ref()
        .and_then(|values| serde_json::to_vec(values).ok())
}

fn decode_embedding(blob: Option<Vec<u8>>) -> Option<Vec<f32>> {
    blob.and_then(|bytes| serde_json::from_slice(&bytes).ok())
}

fn memory_entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<MemoryEntry>> {
    let value_raw: String = row.get("value")?;
    let value = match serde_json::from_str(&value_raw) {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };
    let access_raw: String = row.get("access_level")?;
    Ok(Some(MemoryEntry {
        key: row.get("key")?,
        partition: row.get("partition")?,
        value,
        owner: row.get("owner")?,
        access_level: AccessLevel::parse(&access_raw).unwrap_or_default(),
        team_id: row.get("team_id")?,
        created_at_ms: row.get("created_at")?,
        expires_at_ms: row.get("expires_at")?,
    }))
}

fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRecord> {
    let payload_raw: String = row.get("payload")?;
    Ok(EventRecord {
        id: row.get("id")?,
        event_type: row.get("type")?,
        payload: serde_json::from_str(&payload_raw).unwrap_or(serde_json::Value::Null),
        source: row.get("source")?,
        timestamp_ms: row.get("timestamp")?,
        ttl_ms: row.get("ttl")?,
    })
}

fn metric_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetricRecord> {
    let dimensions_raw: String = row.get("dimensions")?;
    Ok(MetricRecord {
        id: row.get("id")?,
        timestamp_ms: row.get("timestamp")?,
        agent_id: row.get("agent_id")?,
        metric_name: row.get("metric_name")?,
        value: row.get("metric_value")?,
        dimensions: serde_json::from_str(&dimensions_raw).unwrap_or_default(),
    })
}

fn chunk_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CodeChunk> {
    Ok(CodeChunk {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        file_path: row.get("file_path")?,
        start_line: row.get::<_, i64>("start_line")? as u32,
        end_line: row.get::<_, i64>("end_line")? as u32,
        content: row.get("content")?,
        language: row.get("language")?,
        embedding: decode_embedding(row.get("embedding")?),
    })
}

fn experience_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExperienceRecord> {
    let outcome_raw: String = row.get("outcome")?;
    Ok(ExperienceRecord {
        id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        task_kind: row.get("task_kind")?,
        outcome: serde_json::from_str(&outcome_raw).unwrap_or(serde_json::Value::Null),
        success: row.get::<_, i64>("success")? != 0,
        created_at_ms: row.get("created_at")?,
        embedding: decode_embedding(row.get("embedding")?),
    })
}

fn pattern_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PatternRecord> {
    Ok(PatternRecord {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        confidence: row.get("confidence")?,
        usage_count: row.get::<_, i64>("usage_count")? as u64,
        created_at_ms: row.get("created_at")?,
        embedding: decode_embedding(row.get("embedding")?),
    })
}

/// Row → Plan; `None` marks a corrupt row the caller must quarantine.
fn plan_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<Plan>> {
    let actions_raw: String = row.get("action_sequence")?;
    let initial_raw: String = row.get("initial_state")?;
    let goal_raw: String = row.get("goal_state")?;
    let status_raw: String = row.get("status")?;

    let actions = serde_json::from_str(&actions_raw);
    let initial_state = serde_json::from_str(&initial_raw);
    let goal_state = serde_json::from_str(&goal_raw);
    let status = PlanStatus::parse(&status_raw);

    match (actions, initial_state, goal_state, status) {
        (Ok(actions), Ok(initial_state), Ok(goal_state), Some(status)) => Ok(Some(Plan {
            id: row.get("id")?,
            goal_id: row.get("goal_id")?,
            actions,
            total_cost: row.get("total_cost")?,
            estimated_duration_ms: row.get::<_, i64>("estimated_duration")? as u64,
            initial_state,
            goal_state,
            status,
            created_at_ms: row.get("created_at")?,
            started_at_ms: row.get("started_at")?,
            completed_at_ms: row.get("completed_at")?,
        })),
        _ => Ok(None),
    }
}

#[async_trait]
impl PersistenceProvider for LocalProvider {
    async fn initialize(&self) -> StorageResult<()> {
        self.create_schema().await
    }

    async fn shutdown(&self) -> StorageResult<()> {
        self.conn
            .call(|conn| {
                // wal_checkpoint returns a status row; ignore it (and the
                // whole pragma on non-WAL connections such as :memory:).
                let _ = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()));
                Ok(())
            })
            .await?;
        Ok(())
    }

    fn provider_info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "local-sqlite".to_string(),
            kind: ProviderKind::Local,
            supports_sync: false,
            description: format!("single-file SQLite store at {}", self.path),
        }
    }

    async fn store_memory_entry(&self, entry: MemoryEntry) -> StorageResult<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO memory_entries
                        (key, partition, value, owner, access_level, team_id, created_at, expires_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    params![
                        entry.key,
                        entry.partition,
                        serde_json::to_string(&entry.value).unwrap_or_default(),
                        entry.owner,
                        entry.access_level.as_str(),
                        entry.team_id,
                        entry.created_at_ms,
                        entry.expires_at_ms,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn store_memory_entries(&self, entries: Vec<MemoryEntry>) -> StorageResult<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        r#"
                        INSERT OR REPLACE INTO memory_entries
                            (key, partition, value, owner, access_level, team_id, created_at, expires_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                        "#,
                    )?;
                    for entry in &entries {
                        stmt.execute(params![
                            entry.key,
                            entry.partition,
                            serde_json::to_string(&entry.value).unwrap_or_default(),
                            entry.owner,
                            entry.access_level.as_str(),
                            entry.team_id,
                            entry.created_at_ms,
                            entry.expires_at_ms,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn get_memory_entry(
        &self,
        key: &str,
        partition: &str,
    ) -> StorageResult<Option<MemoryEntry>> {
        let key = key.to_string();
        let partition = partition.to_string();
        let now = now_ms();
        let lookup_key = key.clone();
        let lookup_partition = partition.clone();

        let entry = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT * FROM memory_entries WHERE key = ?1 AND partition = ?2",
                )?;
                let mut rows = stmt.query_map(params![lookup_key, lookup_partition], |row| {
                    memory_entry_from_row(row)
                })?;
                match rows.next() {
                    Some(entry) => Ok(Some(entry?)),
                    None => Ok(None),
                }
            })
            .await?;

        match entry {
            Some(Some(entry)) if entry.is_expired(now) => {
                // Lazy purge of expired entries.
                let purge_key = key;
                let purge_partition = partition;
                self.conn
                    .call(move |conn| {
                        conn.execute(
                            "DELETE FROM memory_entries WHERE key = ?1 AND partition = ?2",
                            params![purge_key, purge_partition],
                        )?;
                        Ok(())
                    })
                    .await?;
                Ok(None)
            }
            Some(Some(entry)) => Ok(Some(entry)),
            Some(None) => {
                // Unparsable value payload; quarantine under a rewritten key.
                self.quarantine(tables::MEMORY_ENTRIES, "key", key).await;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn query_memory_entries(&self, query: &MemoryQuery) -> StorageResult<Vec<MemoryEntry>> {
        let query = query.clone();
        let now = now_ms();
        let entries = self
            .conn
            .call(move |conn| {
                let mut sql = String::from(
                    "SELECT * FROM memory_entries WHERE (expires_at IS NULL OR expires_at >= ?1)",
                );
                let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];

                if let Some(partition) = &query.partition {
                    sql.push_str(" AND partition = ?");
                    params_vec.push(Box::new(partition.clone()));
                }
                if let Some(owner) = &query.owner {
                    sql.push_str(" AND owner = ?");
                    params_vec.push(Box::new(owner.clone()));
                }
                if let Some(access_level) = &query.access_level {
                    sql.push_str(" AND access_level = ?");
                    params_vec.push(Box::new(access_level.as_str().to_string()));
                }
                if let Some(team_id) = &query.team_id {
                    sql.push_str(" AND team_id = ?");
                    params_vec.push(Box::new(team_id.clone()));
                }
                sql.push_str(" ORDER BY created_at DESC");
                if let Some(limit) = query.limit {
                    sql.push_str(" LIMIT ?");
                    params_vec.push(Box::new(limit as i64));
                }

                let mut stmt = conn.prepare(&sql)?;
                let param_refs: Vec<&dyn rusqlite::ToSql> =
                    params_vec.iter().map(|p| p.as_ref()).collect();
                let rows = stmt.query_map(&param_refs[..], memory_entry_from_row)?;
                let mut entries = Vec::new();
                for row in rows {
                    if let Some(entry) = row? {
                        entries.push(entry);
                    }
                }
                Ok(entries)
            })
            .await?;
        Ok(entries)
    }

    async fn delete_memory_entries(
        &self,
        key_pattern: &str,
        partition: Option<&str>,
    ) -> StorageResult<u64> {
        let like = glob_to_like(key_pattern);
        let partition = partition.map(str::to_string);
        let deleted = self
            .conn
            .call(move |conn| {
                let count = match partition {
                    Some(partition) => conn.execute(
                        "DELETE FROM memory_entries WHERE key LIKE ?1 ESCAPE '\\' AND partition = ?2",
                        params![like, partition],
                    )?,
                    None => conn.execute(
                        "DELETE FROM memory_entries WHERE key LIKE ?1 ESCAPE '\\'",
                        params![like],
                    )?,
                };
                Ok(count as u64)
            })
            .await?;
        Ok(deleted)
    }

    async fn store_event(&self, event: EventRecord) -> StorageResult<()> {
        self.store_events(vec![event]).await
    }

    async fn store_events(&self, events: Vec<EventRecord>) -> StorageResult<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        r#"
                        INSERT OR REPLACE INTO events (id, type, payload, source, timestamp, ttl)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                        "#,
                    )?;
                    for event in &events {
                        stmt.execute(params![
                            event.id,
                            event.event_type,
                            serde_json::to_string(&event.payload).unwrap_or_default(),
                            event.source,
                            event.timestamp_ms,
                            event.ttl_ms,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn query_events(&self, query: &EventQuery) -> StorageResult<Vec<EventRecord>> {
        let query = query.clone();
        let events = self
            .conn
            .call(move |conn| {
                let mut sql = String::from("SELECT * FROM events WHERE 1=1");
                let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

                if let Some(event_type) = &query.event_type {
                    sql.push_str(" AND type = ?");
                    params_vec.push(Box::new(event_type.clone()));
                }
                if let Some(source) = &query.source {
                    sql.push_str(" AND source = ?");
                    params_vec.push(Box::new(source.clone()));
                }
                if let Some(since) = query.since_ms {
                    sql.push_str(" AND timestamp >= ?");
                    params_vec.push(Box::new(since));
                }
                sql.push_str(" ORDER BY timestamp DESC");
                if let Some(limit) = query.limit {
                    sql.push_str(" LIMIT ?");
                    params_vec.push(Box::new(limit as i64));
                }

                let mut stmt = conn.prepare(&sql)?;
                let param_refs: Vec<&dyn rusqlite::ToSql> =
                    params_vec.iter().map(|p| p.as_ref()).collect();
                let rows = stmt.query_map(&param_refs[..], event_from_row)?;
                let mut events = Vec::new();
                for row in rows {
                    events.push(row?);
                }
                Ok(events)
            })
            .await?;
        Ok(events)
    }

    async fn delete_old_events(&self, cutoff_ms: i64) -> StorageResult<u64> {
        let deleted = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    "DELETE FROM events WHERE timestamp < ?1",
                    params![cutoff_ms],
                )?;
                Ok(count as u64)
            })
            .await?;
        Ok(deleted)
    }

    async fn store_code_chunk(&self, chunk: CodeChunk) -> StorageResult<()> {
        self.store_code_chunks(vec![chunk]).await
    }

    async fn store_code_chunks(&self, chunks: Vec<CodeChunk>) -> StorageResult<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        r#"
                        INSERT OR REPLACE INTO code_chunks
                            (id, project_id, file_path, start_line, end_line, content, language, embedding)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                        "#,
                    )?;
                    for chunk in &chunks {
                        stmt.execute(params![
                            chunk.id,
                            chunk.project_id,
                            chunk.file_path,
                            chunk.start_line as i64,
                            chunk.end_line as i64,
                            chunk.content,
                            chunk.language,
                            encode_embedding(&chunk.embedding),
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn query_code_chunks(&self, query: &CodeChunkQuery) -> StorageResult<Vec<CodeChunk>> {
        let query = query.clone();
        let chunks = self
            .conn
            .call(move |conn| {
                let mut sql = String::from("SELECT * FROM code_chunks WHERE 1=1");
                let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

                if let Some(project_id) = &query.project_id {
                    sql.push_str(" AND project_id = ?");
                    params_vec.push(Box::new(project_id.clone()));
                }
                if let Some(file_path) = &query.file_path {
                    sql.push_str(" AND file_path = ?");
                    params_vec.push(Box::new(file_path.clone()));
                }
                if let Some(language) = &query.language {
                    sql.push_str(" AND language = ?");
                    params_vec.push(Box::new(language.clone()));
                }
                sql.push_str(" ORDER BY file_path, start_line");
                if let Some(limit) = query.limit {
                    sql.push_str(" LIMIT ?");
                    params_vec.push(Box::new(limit as i64));
                }

                let mut stmt = conn.prepare(&sql)?;
                let param_refs: Vec<&dyn rusqlite::ToSql> =
                    params_vec.iter().map(|p| p.as_ref()).collect();
                let rows = stmt.query_map(&param_refs[..], chunk_from_row)?;
                let mut chunks = Vec::new();
                for row in rows {
                    chunks.push(row?);
                }
                Ok(chunks)
            })
            .await?;
        Ok(chunks)
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
        let project_id = project_id.to_string();
        let file_path = file_path.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    "DELETE FROM code_chunks WHERE project_id = ?1 AND file_path = ?2",
                    params![project_id, file_path],
                )?;
                Ok(count as u64)
            })
            .await?;
        Ok(deleted)
    }

    async fn delete_code_chunks_for_project(&self, project_id: &str) -> StorageResult<u64> {
        let project_id = project_id.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    "DELETE FROM code_chunks WHERE project_id = ?1",
                    params![project_id],
                )?;
                Ok(count as u64)
            })
            .await?;
        Ok(deleted)
    }

    async fn store_experience(&self, experience: ExperienceRecord) -> StorageResult<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO experiences
                        (id, agent_id, task_kind, outcome, success, created_at, embedding)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                    params![
                        experience.id,
                        experience.agent_id,
                        experience.task_kind,
                        serde_json::to_string(&experience.outcome).unwrap_or_default(),
                        experience.success as i64,
                        experience.created_at_ms,
                        encode_embedding(&experience.embedding),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn query_experiences(
        &self,
        query: &ExperienceQuery,
    ) -> StorageResult<Vec<ExperienceRecord>> {
        let query = query.clone();
        let experiences = self
            .conn
            .call(move |conn| {
                let mut sql = String::from("SELECT * FROM experiences WHERE 1=1");
                let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

                if let Some(agent_id) = &query.agent_id {
                    sql.push_str(" AND agent_id = ?");
                    params_vec.push(Box::new(agent_id.clone()));
                }
                if let Some(task_kind) = &query.task_kind {
                    sql.push_str(" AND task_kind = ?");
                    params_vec.push(Box::new(task_kind.clone()));
                }
                if let Some(success) = query.success {
                    sql.push_str(" AND success = ?");
                    params_vec.push(Box::new(success as i64));
                }
                sql.push_str(" ORDER BY created_at DESC");
                if let Some(limit) = query.limit {
                    sql.push_str(" LIMIT ?");
                    params_vec.push(Box::new(limit as i64));
                }

                let mut stmt = conn.prepare(&sql)?;
                let param_refs: Vec<&dyn rusqlite::ToSql> =
                    params_vec.iter().map(|p| p.as_ref()).collect();
                let rows = stmt.query_map(&param_refs[..], experience_from_row)?;
                let mut experiences = Vec::new();
                for row in rows {
                    experiences.push(row?);
                }
                Ok(experiences)
            })
            .await?;
        Ok(experiences)
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
        Ok(scored.into_iter().map(|(_, experience)| experience).collect())
    }

    async fn store_pattern(&self, pattern: PatternRecord) -> StorageResult<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO patterns
                        (id, name, description, confidence, usage_count, created_at, embedding)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                    params![
                        pattern.id,
                        pattern.name,
                        pattern.description,
                        pattern.confidence,
                        pattern.usage_count as i64,
                        pattern.created_at_ms,
                        encode_embedding(&pattern.embedding),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn query_patterns(&self, query: &PatternQuery) -> StorageResult<Vec<PatternRecord>> {
        let query = query.clone();
        let patterns = self
            .conn
            .call(move |conn| {
                let mut sql = String::from("SELECT * FROM patterns WHERE 1=1");
                let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

                if let Some(fragment) = &query.name_contains {
                    sql.push_str(" AND name LIKE ?");
                    params_vec.push(Box::new(format!("%{}%", fragment)));
                }
                if let Some(min_confidence) = query.min_confidence {
                    sql.push_str(" AND confidence >= ?");
                    params_vec.push(Box::new(min_confidence));
                }
                sql.push_str(" ORDER BY confidence DESC, created_at DESC");
                if let Some(limit) = query.limit {
                    sql.push_str(" LIMIT ?");
                    params_vec.push(Box::new(limit as i64));
                }

                let mut stmt = conn.prepare(&sql)?;
                let param_refs: Vec<&dyn rusqlite::ToSql> =
                    params_vec.iter().map(|p| p.as_ref()).collect();
                let rows = stmt.query_map(&param_refs[..], pattern_from_row)?;
                let mut patterns = Vec::new();
                for row in rows {
                    patterns.push(row?);
                }
                Ok(patterns)
            })
            .await?;
        Ok(patterns)
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
        Ok(scored.into_iter().map(|(_, pattern)| pattern).collect())
    }

    async fn save_agent_state(&self, state: AgentState) -> StorageResult<()> {
        let payload = serde_json::to_string(&state.state)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO agent_state (agent_id, state, updated_at)
                    VALUES (?1, ?2, ?3)
                    "#,
                    params![state.agent_id, payload, state.updated_at_ms],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn load_agent_state(&self, agent_id: &str) -> StorageResult<Option<AgentState>> {
        let lookup = agent_id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT state, updated_at FROM agent_state WHERE agent_id = ?1")?;
                let mut rows = stmt.query_map(params![lookup], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                match rows.next() {
                    Some(row) => Ok(Some(row?)),
                    None => Ok(None),
                }
            })
            .await?;

        match row {
            Some((raw, updated_at_ms)) => match serde_json::from_str::<AgentStateValue>(&raw) {
                Ok(state) => Ok(Some(AgentState {
                    agent_id: agent_id.to_string(),
                    state,
                    updated_at_ms,
                })),
                Err(_) => {
                    // Corrupt blob: quarantine and hand back a fresh default.
                    self.quarantine(tables::AGENT_STATE, "agent_id", agent_id.to_string())
                        .await;
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn delete_agent_state(&self, agent_id: &str) -> StorageResult<()> {
        let agent_id = agent_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM agent_state WHERE agent_id = ?1",
                    params![agent_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn list_agents_with_state(&self) -> StorageResult<Vec<String>> {
        let agents = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT agent_id FROM agent_state ORDER BY agent_id")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                let mut agents = Vec::new();
                for row in rows {
                    agents.push(row?);
                }
                Ok(agents)
            })
            .await?;
        Ok(agents)
    }

    async fn store_plan(&self, plan: &Plan) -> StorageResult<()> {
        let plan = plan.clone();
        let actions_json = serde_json::to_string(&plan.actions)?;
        let initial_json = serde_json::to_string(&plan.initial_state)?;
        let goal_json = serde_json::to_string(&plan.goal_state)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO plans
                        (id, goal_id, sequence, initial_state, goal_state, action_sequence,
                         total_cost, estimated_duration, status, created_at, started_at, completed_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                    "#,
                    params![
                        plan.id,
                        plan.goal_id,
                        actions_json,
                        initial_json,
                        goal_json,
                        actions_json,
                        plan.total_cost,
                        plan.estimated_duration_ms as i64,
                        plan.status.as_str(),
                        plan.created_at_ms,
                        plan.started_at_ms,
                        plan.completed_at_ms,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn get_plan(&self, plan_id: &str) -> StorageResult<Option<Plan>> {
        let lookup = plan_id.to_string();
        let result = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare("SELECT * FROM plans WHERE id = ?1")?;
                let mut rows = stmt.query_map(params![lookup], plan_from_row)?;
                match rows.next() {
                    Some(row) => Ok(Some(row?)),
                    None => Ok(None),
                }
            })
            .await?;

        match result {
            Some(Some(plan)) => Ok(Some(plan)),
            Some(None) => {
                self.quarantine(tables::PLANS, "id", plan_id.to_string()).await;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn update_plan_status(
        &self,
        plan_id: &str,
        status: PlanStatus,
        failure_reason: Option<&str>,
    ) -> StorageResult<()> {
        let plan_id = plan_id.to_string();
        let failure_reason = failure_reason.map(str::to_string);
        let now = now_ms();
        self.conn
            .call(move |conn| {
                let success: Option<i64> = match status {
                    PlanStatus::Succeeded => Some(1),
                    PlanStatus::Failed => Some(0),
                    _ => None,
                };
                let started_at = (status == PlanStatus::Running).then_some(now);
                let completed_at = matches!(
                    status,
                    PlanStatus::Succeeded | PlanStatus::Failed | PlanStatus::Replanned
                )
                .then_some(now);

                conn.execute(
                    r#"
                    UPDATE plans SET
                        status = ?2,
                        failure_reason = ?3,
                        success = COALESCE(?4, success),
                        started_at = COALESCE(?5, started_at),
                        completed_at = COALESCE(?6, completed_at)
                    WHERE id = ?1
                    "#,
                    params![plan_id, status.as_str(), failure_reason, success, started_at, completed_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn query_plans(
        &self,
        goal_id: Option<&str>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Plan>> {
        let goal_id = goal_id.map(str::to_string);
        let plans = self
            .conn
            .call(move |conn| {
                let mut sql = String::from("SELECT * FROM plans WHERE 1=1");
                let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
                if let Some(goal_id) = goal_id {
                    sql.push_str(" AND goal_id = ?");
                    params_vec.push(Box::new(goal_id));
                }
                sql.push_str(" ORDER BY created_at DESC");
                if let Some(limit) = limit {
                    sql.push_str(" LIMIT ?");
                    params_vec.push(Box::new(limit as i64));
                }

                let mut stmt = conn.prepare(&sql)?;
                let param_refs: Vec<&dyn rusqlite::ToSql> =
                    params_vec.iter().map(|p| p.as_ref()).collect();
                let rows = stmt.query_map(&param_refs[..], plan_from_row)?;
                let mut plans = Vec::new();
                for row in rows {
                    // Corrupt rows are skipped in listings.
                    if let Some(plan) = row? {
                        plans.push(plan);
                    }
                }
                Ok(plans)
            })
            .await?;
        Ok(plans)
    }

    async fn store_action(&self, action: &Action) -> StorageResult<()> {
        let action = action.clone();
        let preconditions = serde_json::to_string(&action.preconditions)?;
        let effects = serde_json::to_string(&action.effects)?;
        let now = now_ms();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO actions
                        (id, name, description, agent_type, preconditions, effects,
                         cost, duration_estimate, success_rate, execution_count, category,
                         created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?11, ?11)
                    ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        description = excluded.description,
                        agent_type = excluded.agent_type,
                        preconditions = excluded.preconditions,
                        effects = excluded.effects,
                        cost = excluded.cost,
                        duration_estimate = excluded.duration_estimate,
                        success_rate = excluded.success_rate,
                        category = excluded.category,
                        updated_at = excluded.updated_at
                    "#,
                    params![
                        action.id,
                        action.name,
                        action.description,
                        action.agent_type,
                        preconditions,
                        effects,
                        action.cost,
                        action.duration_estimate_ms as i64,
                        action.success_rate,
                        action.category.as_str(),
                        now,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn record_action_execution(&self, action_id: &str) -> StorageResult<()> {
        let action_id = action_id.to_string();
        let now = now_ms();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE actions SET execution_count = execution_count + 1, updated_at = ?2 WHERE id = ?1",
                    params![action_id, now],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn store_metric(&self, metric: MetricRecord) -> StorageResult<()> {
        self.store_metrics(vec![metric]).await
    }

    async fn store_metrics(&self, metrics: Vec<MetricRecord>) -> StorageResult<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        r#"
                        INSERT OR REPLACE INTO quality_metrics
                            (id, timestamp, agent_id, metric_name, metric_value, dimensions)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                        "#,
                    )?;
                    for metric in &metrics {
                        stmt.execute(params![
                            metric.id,
                            metric.timestamp_ms,
                            metric.agent_id,
                            metric.metric_name,
                            metric.value,
                            serde_json::to_string(&metric.dimensions).unwrap_or_default(),
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn query_metrics(&self, query: &MetricQuery) -> StorageResult<Vec<MetricRecord>> {
        let query = query.clone();
        let metrics = self
            .conn
            .call(move |conn| {
                let mut sql = String::from("SELECT * FROM quality_metrics WHERE 1=1");
                let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

                if let Some(agent_id) = &query.agent_id {
                    sql.push_str(" AND agent_id = ?");
                    params_vec.push(Box::new(agent_id.clone()));
                }
                if let Some(metric_name) = &query.metric_name {
                    sql.push_str(" AND metric_name = ?");
                    params_vec.push(Box::new(metric_name.clone()));
                }
                if let Some(since) = query.since_ms {
                    sql.push_str(" AND timestamp >= ?");
                    params_vec.push(Box::new(since));
                }
                if let Some(until) = query.until_ms {
                    sql.push_str(" AND timestamp < ?");
                    params_vec.push(Box::new(until));
                }
                sql.push_str(" ORDER BY timestamp DESC");
                if let Some(limit) = query.limit {
                    sql.push_str(" LIMIT ?");
                    params_vec.push(Box::new(limit as i64));
                }

                let mut stmt = conn.prepare(&sql)?;
                let param_refs: Vec<&dyn rusqlite::ToSql> =
                    params_vec.iter().map(|p| p.as_ref()).collect();
                let rows = stmt.query_map(&param_refs[..], metric_from_row)?;
                let mut metrics = Vec::new();
                for row in rows {
                    metrics.push(row?);
                }
                Ok(metrics)
            })
            .await?;
        Ok(metrics)
    }

    async fn aggregate_metrics(
        &self,
        agent_id: Option<&str>,
        metric_name: &str,
        period_start_ms: i64,
        period_end_ms: i64,
    ) -> StorageResult<Option<AggregatedMetric>> {
        let agent_id = agent_id.map(str::to_string);
        let metric_name = metric_name.to_string();
        let aggregate_id = Uuid::new_v4().to_string();

        let aggregate = self
            .conn
            .call(move |conn| {
                let mut sql = String::from(
                    "SELECT COUNT(*), SUM(metric_value), MIN(metric_value), MAX(metric_value), AVG(metric_value) \
                     FROM quality_metrics WHERE metric_name = ?1 AND timestamp >= ?2 AND timestamp < ?3",
                );
                let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![
                    Box::new(metric_name.clone()),
                    Box::new(period_start_ms),
                    Box::new(period_end_ms),
                ];
                if let Some(agent_id) = &agent_id {
                    sql.push_str(" AND agent_id = ?4");
                    params_vec.push(Box::new(agent_id.clone()));
                }

                let param_refs: Vec<&dyn rusqlite::ToSql> =
                    params_vec.iter().map(|p| p.as_ref()).collect();
                let row = conn.query_row(&sql, &param_refs[..], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<f64>>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                        row.get::<_, Option<f64>>(4)?,
                    ))
                })?;

                let (count, sum, min, max, avg) = row;
                if count == 0 {
                    return Ok(None);
                }
                let aggregate = AggregatedMetric {
                    period_start_ms,
                    period_end_ms,
                    agent_id: agent_id.clone(),
                    metric_name: metric_name.clone(),
                    count: count as u64,
                    sum: sum.unwrap_or(0.0),
                    min: min.unwrap_or(0.0),
                    max: max.unwrap_or(0.0),
                    avg: avg.unwrap_or(0.0),
                };

                conn.execute(
                    r#"
                    INSERT INTO aggregated_metrics
                        (id, period_start, period_end, agent_id, metric_name, count, sum, min, max, avg)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    "#,
                    params![
                        aggregate_id,
                        aggregate.period_start_ms,
                        aggregate.period_end_ms,
                        aggregate.agent_id,
                        aggregate.metric_name,
                        aggregate.count as i64,
                        aggregate.sum,
                        aggregate.min,
                        aggregate.max,
                        aggregate.avg,
                    ],
                )?;
                Ok(Some(aggregate))
            })
            .await?;
        Ok(aggregate)
    }

    async fn delete_old_metrics(&self, cutoff_ms: i64) -> StorageResult<u64> {
        let deleted = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    "DELETE FROM quality_metrics WHERE timestamp < ?1",
                    params![cutoff_ms],
                )?;
                Ok(count as u64)
            })
            .await?;
        Ok(deleted)
    }
}

#[async_trait]
impl SyncQueueStore for LocalProvider {
    async fn persist_op(&self, op: &SyncOp) -> StorageResult<()> {
        let op = op.clone();
        let payload = match &op.payload {
            Some(value) => Some(serde_json::to_string(value)?),
            None => None,
        };
        self.conn
            .call(move |conn| {
                // One durable row per (table, record_id); coalescing applies
                // on disk as well as in memory.
                conn.execute(
                    "DELETE FROM sync_queue WHERE table_name = ?1 AND record_id = ?2",
                    params![op.table, op.record_id],
                )?;
                conn.execute(
                    r#"
                    INSERT INTO sync_queue
                        (id, op_type, table_name, record_id, data, retry_count, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                    params![
                        op.id,
                        op.op_type.as_str(),
                        op.table,
                        op.record_id,
                        payload,
                        op.retries as i64,
                        op.enqueued_at_ms,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn remove_op(&self, op_id: &str) -> StorageResult<()> {
        let op_id = op_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM sync_queue WHERE id = ?1", params![op_id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn load_ops(&self) -> StorageResult<Vec<SyncOp>> {
        let ops = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT * FROM sync_queue ORDER BY created_at, id")?;
                let rows = stmt.query_map([], |row| {
                    let op_type_raw: String = row.get("op_type")?;
                    let payload_raw: Option<String> = row.get("data")?;
                    Ok(SyncOp {
                        id: row.get("id")?,
                        op_type: SyncOpType::parse(&op_type_raw).unwrap_or(SyncOpType::Update),
                        table: row.get("table_name")?,
                        record_id: row.get("record_id")?,
                        payload: payload_raw.and_then(|raw| serde_json::from_str(&raw).ok()),
                        retries: row.get::<_, i64>("retry_count")? as u32,
                        enqueued_at_ms: row.get("created_at")?,
                    })
                })?;
                let mut ops = Vec::new();
                for row in rows {
                    ops.push(row?);
                }
                Ok(ops)
            })
            .await?;
        Ok(ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_your_writes() {
        let provider = LocalProvider::open_in_memory().await.unwrap();
        let entry = MemoryEntry::new("retry-policy", "agents", serde_json::json!({"max": 3}), "a1");

        provider.store_memory_entry(entry.clone()).await.unwrap();
        let read = provider
            .get_memory_entry("retry-policy", "agents")
            .await
            .unwrap()
            .expect("entry must be visible immediately after the write");
        assert_eq!(read.value, entry.value);
    }

    #[tokio::test]
    async fn test_expired_entries_are_not_returned() {
        let provider = LocalProvider::open_in_memory().await.unwrap();
        let mut entry = MemoryEntry::new("stale", "agents", serde_json::json!(1), "a1");
        entry.expires_at_ms = Some(now_ms() - 1);
        provider.store_memory_entry(entry).await.unwrap();

        assert!(provider
            .get_memory_entry("stale", "agents")
            .await
            .unwrap()
            .is_none());
        assert!(provider
            .query_memory_entries(&MemoryQuery::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_query_orders_and_limits() {
        let provider = LocalProvider::open_in_memory().await.unwrap();
        for i in 0..5 {
            let mut entry =
                MemoryEntry::new(format!("k{}", i), "p", serde_json::json!(i), "agent");
            entry.created_at_ms = 1000 + i as i64;
            provider.store_memory_entry(entry).await.unwrap();
        }

        let results = provider
            .query_memory_entries(&MemoryQuery {
                partition: Some("p".to_string()),
                limit: Some(3),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        // Newest first.
        assert_eq!(results[0].key, "k4");
        assert_eq!(results[2].key, "k2");
    }

    #[tokio::test]
    async fn test_delete_by_glob_pattern() {
        let provider = LocalProvider::open_in_memory().await.unwrap();
        for key in ["task-1", "task-2", "note-1"] {
            provider
                .store_memory_entry(MemoryEntry::new(key, "p", serde_json::json!(1), "a"))
                .await
                .unwrap();
        }

        let deleted = provider.delete_memory_entries("task-*", Some("p")).await.unwrap();
        assert_eq!(deleted, 2);
        assert!(provider.get_memory_entry("note-1", "p").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_event_lifecycle() {
        let provider = LocalProvider::open_in_memory().await.unwrap();
        let events: Vec<EventRecord> = (0..3)
            .map(|i| EventRecord {
                id: format!("evt-{}", i),
                event_type: "plan_completed".to_string(),
                payload: serde_json::json!({"seq": i}),
                source: "planner".to_string(),
                timestamp_ms: 1_000 + i,
                ttl_ms: None,
            })
            .collect();
        provider.store_events(events).await.unwrap();

        let recent = provider
            .query_events(&EventQuery {
                event_type: Some("plan_completed".to_string()),
                since_ms: Some(1_001),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);

        let removed = provider.delete_old_events(1_002).await.unwrap();
        assert_eq!(removed, 2);
    }

    #[tokio::test]
    async fn test_plan_roundtrip_and_status_update() {
        let provider = LocalProvider::open_in_memory().await.unwrap();
        let planner = gauntlet_planner::GoapPlanner::with_default_catalog();
        let mut state = gauntlet_core::WorldState::default();
        state.coverage.line = 40.0;
        state.resources.time_remaining = 900.0;

        let plan = planner
            .plan(
                &state,
                "coverage-target",
                &[gauntlet_core::Condition::gte("coverage.line", 80.0)],
                &gauntlet_planner::PlanConstraints::default(),
                None,
            )
            .unwrap();

        provider.store_plan(&plan).await.unwrap();
        let loaded = provider.get_plan(&plan.id).await.unwrap().unwrap();
        assert_eq!(loaded, plan);

        provider
            .update_plan_status(&plan.id, PlanStatus::Failed, Some("executor lost"))
            .await
            .unwrap();
        let failed = provider.get_plan(&plan.id).await.unwrap().unwrap();
        assert_eq!(failed.status, PlanStatus::Failed);
        assert!(failed.completed_at_ms.is_some());

        let by_goal = provider
            .query_plans(Some("coverage-target"), None)
            .await
            .unwrap();
        assert_eq!(by_goal.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_plan_is_quarantined() {
        let provider = LocalProvider::open_in_memory().await.unwrap();
        provider
            .conn
            .call(|conn| {
                conn.execute(
                    r#"
                    INSERT INTO plans
                        (id, goal_id, sequence, initial_state, goal_state, action_sequence,
                         total_cost, estimated_duration, status, created_at)
                    VALUES ('bad-plan', 'g', 'not json', 'not json', '{}', 'not json',
                            1.0, 10, 'pending', 0)
                    "#,
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(provider.get_plan("bad-plan").await.unwrap().is_none());
        // The row is renamed, not deleted, and no longer matches its old id.
        assert!(provider.get_plan("bad-plan_quarantine").await.unwrap().is_none());
        let remaining: i64 = provider
            .conn
            .call(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM plans WHERE id = 'bad-plan_quarantine'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn test_agent_state_roundtrip() {
        let provider = LocalProvider::open_in_memory().await.unwrap();
        let state = AgentState {
            agent_id: "perf-hunter".to_string(),
            state: AgentStateValue::Structured(serde_json::json!({"warmup": true})),
            updated_at_ms: now_ms(),
        };
        provider.save_agent_state(state.clone()).await.unwrap();

        let loaded = provider.load_agent_state("perf-hunter").await.unwrap().unwrap();
        assert_eq!(loaded.state, state.state);

        assert_eq!(
            provider.list_agents_with_state().await.unwrap(),
            vec!["perf-hunter".to_string()]
        );

        provider.delete_agent_state("perf-hunter").await.unwrap();
        assert!(provider.load_agent_state("perf-hunter").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_metric_aggregation() {
        let provider = LocalProvider::open_in_memory().await.unwrap();
        let samples: Vec<MetricRecord> = [10.0, 20.0, 30.0]
            .iter()
            .enumerate()
            .map(|(i, value)| MetricRecord {
                id: format!("m{}", i),
                timestamp_ms: 1_000 + i as i64,
                agent_id: "coverage-analyzer".to_string(),
                metric_name: "line_coverage".to_string(),
                value: *value,
                dimensions: Default::default(),
            })
            .collect();
        provider.store_metrics(samples).await.unwrap();

        let aggregate = provider
            .aggregate_metrics(Some("coverage-analyzer"), "line_coverage", 0, 2_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(aggregate.count, 3);
        assert_eq!(aggregate.sum, 60.0);
        assert_eq!(aggregate.min, 10.0);
        assert_eq!(aggregate.max, 30.0);
        assert_eq!(aggregate.avg, 20.0);

        let empty = provider
            .aggregate_metrics(None, "line_coverage", 5_000, 6_000)
            .await
            .unwrap();
        assert!(empty.is_none());
    }

    #[tokio::test]
    async fn test_similar_code_search() {
        let provider = LocalProvider::open_in_memory().await.unwrap();
        let chunks = vec![
            CodeChunk {
                id: "c1".to_string(),
                project_id: "proj".to_string(),
                file_path: "src/a.rs".to_string(),
                start_line: 1,
                end_line: 10,
                content: "fn a() {}".to_string(),
                language: "rust".to_string(),
                embedding: Some(vec![1.0, 0.0]),
            },
            CodeChunk {
                id: "c2".to_string(),
                project_id: "proj".to_string(),
                file_path: "src/b.rs".to_string(),
                start_line: 1,
                end_line: 10,
                content: "fn b() {}".to_string(),
                language: "rust".to_string(),
                embedding: Some(vec![0.0, 1.0]),
            },
        ];
        provider.store_code_chunks(chunks).await.unwrap();

        let results = provider
            .search_similar_code(
                &[1.0, 0.1],
                &SimilarCodeOptions {
                    project_id: Some("proj".to_string()),
                    limit: 1,
                    min_similarity: 0.5,
                },
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "c1");

        let deleted = provider
            .delete_code_chunks_for_file("proj", "src/a.rs")
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        let remaining = provider
            .delete_code_chunks_for_project("proj")
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn test_action_execution_counter() {
        let provider = LocalProvider::open_in_memory().await.unwrap();
        let registry = gauntlet_core::ActionRegistry::with_default_catalog();
        let action = registry.get("measure-coverage").unwrap();

        provider.store_action(&action).await.unwrap();
        provider.record_action_execution("measure-coverage").await.unwrap();
        provider.record_action_execution("measure-coverage").await.unwrap();

        let count: i64 = provider
            .conn
            .call(|conn| {
                Ok(conn.query_row(
                    "SELECT execution_count FROM actions WHERE id = 'measure-coverage'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(count, 2);

        // Re-storing the catalog definition keeps the counter.
        provider.store_action(&action).await.unwrap();
        let count: i64 = provider
            .conn
            .call(|conn| {
                Ok(conn.query_row(
                    "SELECT execution_count FROM actions WHERE id = 'measure-coverage'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_sync_queue_store_coalesces_on_disk() {
        let provider = LocalProvider::open_in_memory().await.unwrap();
        let first = SyncOp::insert("memory_entries", "p/k", serde_json::json!({"v": 1}));
        let second = SyncOp::insert("memory_entries", "p/k", serde_json::json!({"v": 2}));

        provider.persist_op(&first).await.unwrap();
        provider.persist_op(&second).await.unwrap();

        let ops = provider.load_ops().await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].payload, Some(serde_json::json!({"v": 2})));

        provider.remove_op(&ops[0].id).await.unwrap();
        assert!(provider.load_ops().await.unwrap().is_empty());
    }
}
