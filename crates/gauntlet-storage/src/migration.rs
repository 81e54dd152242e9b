use log::{info, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::StorageResult;
use crate::local::LocalProvider;
use crate::provider::PersistenceProvider;
use crate::records::{
    now_ms, tables, CodeChunkQuery, EventQuery, ExperienceQuery, MemoryQuery, MetricQuery,
    PatternQuery,
};
use crate::remote::RemoteStore;

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub batch_size: usize,
    /// Report what would migrate without writing to the remote.
    pub dry_run: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            batch_size: 200,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationReport {
    /// Migrated record count per table.
    pub migrated: BTreeMap<String, u64>,
    pub failed: u64,
}

impl MigrationReport {
    pub fn total(&self) -> u64 {
        self.migrated.values().sum()
    }
}

/// One-shot copy of a local store into the remote provider.
///
/// Record ids that are not valid identifiers for the remote store (non-UUID)
/// are replaced with fresh UUIDs and preserved in `metadata.original_id`.
/// Timestamps are normalized to millisecond epochs, accepting seconds,
/// milliseconds, and ISO-8601 strings; anything unparsable becomes "now".
pub async fn migrate_local_to_remote(
    source_path: &str,
    remote: Arc<dyn RemoteStore>,
    options: &MigrationOptions,
) -> StorageResult<MigrationReport> {
    let source = LocalProvider::open(source_path).await?;
    let mut report = MigrationReport::default();

    let memory = source.query_memory_entries(&MemoryQuery::default()).await?;
    let memory_rows: Vec<Value> = memory
        .iter()
        .filter_map(|entry| {
            let mut row = serde_json::to_value(entry).ok()?;
            attach_row_id(&mut row, &entry.record_id());
            Some(row)
        })
        .collect();
    migrate_table(&remote, tables::MEMORY_ENTRIES, memory_rows, options, &mut report).await;

    let events = source.query_events(&EventQuery::default()).await?;
    let event_rows = prepare_rows(events.iter().map(|e| (e.id.clone(), serde_json::to_value(e))));
    migrate_table(&remote, tables::EVENTS, event_rows, options, &mut report).await;

    let metrics = source.query_metrics(&MetricQuery::default()).await?;
    let metric_rows = prepare_rows(metrics.iter().map(|m| (m.id.clone(), serde_json::to_value(m))));
    migrate_table(&remote, tables::QUALITY_METRICS, metric_rows, options, &mut report).await;

    let chunks = source.query_code_chunks(&CodeChunkQuery::default()).await?;
    let chunk_rows = prepare_rows(chunks.iter().map(|c| (c.id.clone(), serde_json::to_value(c))));
    migrate_table(&remote, tables::CODE_CHUNKS, chunk_rows, options, &mut report).await;

    let experiences = source.query_experiences(&ExperienceQuery::default()).await?;
    let experience_rows =
        prepare_rows(experiences.iter().map(|e| (e.id.clone(), serde_json::to_value(e))));
    migrate_table(&remote, tables::EXPERIENCES, experience_rows, options, &mut report).await;

    let patterns = source.query_patterns(&PatternQuery::default()).await?;
    let pattern_rows =
        prepare_rows(patterns.iter().map(|p| (p.id.clone(), serde_json::to_value(p))));
    migrate_table(&remote, tables::PATTERNS, pattern_rows, options, &mut report).await;

    let plans = source.query_plans(None, None).await?;
    let plan_rows = prepare_rows(plans.iter().map(|p| (p.id.clone(), serde_json::to_value(p))));
    migrate_table(&remote, tables::PLANS, plan_rows, options, &mut report).await;

    info!(
        "migration from {} complete: {} records ({} failed)",
        source_path,
        report.total(),
        report.failed
    );
    Ok(report)
}

fn prepare_rows<I>(records: I) -> Vec<Value>
where
    I: Iterator<Item = (String, serde_json::Result<Value>)>,
{
    records
        .filter_map(|(id, value)| {
            let mut row = value.ok()?;
            attach_row_id(&mut row, &id);
            Some(row)
        })
        .collect()
}

async fn migrate_table(
    remote: &Arc<dyn RemoteStore>,
    table: &str,
    rows: Vec<Value>,
    options: &MigrationOptions,
    report: &mut MigrationReport,
) {
    let mut migrated = 0u64;
    for batch in rows.chunks(options.batch_size.max(1)) {
        for row in batch {
            let mut row = row.clone();
            normalize_row_timestamps(&mut row);
            if options.dry_run {
                migrated += 1;
                continue;
            }
            let record_id = row
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            match remote.force_upsert(table, &record_id, &row).await {
                Ok(()) => migrated += 1,
                Err(e) => {
                    warn!("failed to migrate {}/{}: {}", table, record_id, e);
                    report.failed += 1;
                }
            }
        }
    }
    if migrated > 0 {
        report.migrated.insert(table.to_string(), migrated);
    }
}

/// Ensure the row carries a remote-valid id, stashing the original in
/// `metadata.original_id` when it had to be replaced.
fn attach_row_id(row: &mut Value, original_id: &str) {
    let Value::Object(map) = row else { return };
    if Uuid::parse_str(original_id).is_ok() {
        map.insert("id".to_string(), Value::String(original_id.to_string()));
        return;
    }

    map.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
    let metadata = map
        .entry("metadata".to_string())
        .or_insert_with(|| Value::Object(Default::default()));
    if let Value::Object(meta) = metadata {
        meta.insert(
            "original_id".to_string(),
            Value::String(original_id.to_string()),
        );
    }
}

/// Epoch-millisecond boundary: before this, a number reads as seconds.
const SECONDS_CUTOFF: i64 = 100_000_000_000;

/// Normalize a timestamp in any accepted representation to epoch
/// milliseconds. Seconds, milliseconds, and ISO-8601 strings are accepted;
/// invalid values become the current time.
pub fn normalize_timestamp(value: &Value) -> i64 {
    match value {
        Value::Number(n) => {
            if let Some(ms) = n.as_i64() {
                if ms <= 0 {
                    now_ms()
                } else if ms < SECONDS_CUTOFF {
                    ms * 1000
                } else {
                    ms
                }
            } else if let Some(f) = n.as_f64() {
                let ms = f as i64;
                if ms <= 0 {
                    now_ms()
                } else if ms < SECONDS_CUTOFF {
                    ms * 1000
                } else {
                    ms
                }
            } else {
                now_ms()
            }
        }
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(|_| now_ms()),
        _ => now_ms(),
    }
}

const TIMESTAMP_FIELDS: &[&str] = &[
    "created_at_ms",
    "updated_at_ms",
    "timestamp_ms",
    "expires_at_ms",
    "started_at_ms",
    "completed_at_ms",
];

fn normalize_row_timestamps(row: &mut Value) {
    let Value::Object(map) = row else { return };
    for field in TIMESTAMP_FIELDS {
        if let Some(value) = map.get(*field) {
            if value.is_null() {
                continue;
            }
            let normalized = normalize_timestamp(value);
            map.insert(field.to_string(), Value::from(normalized));
        }
    }
}
