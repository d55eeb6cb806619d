//! SQLite store for traces, spans and captured payloads.
//!
//! Uses a single database file with three tables and the indexes the
//! operator CLI queries against. `start_time`/`end_time`/`duration_ns` are
//! INTEGER nanoseconds; open-ended structures (metadata, attributes, events,
//! links, finish reasons, messages) are JSON text columns; enumerations are
//! stored by their stable string form.

use chrono::{DateTime, Utc};
use ledgerline_core::error::PersistenceError;
use ledgerline_core::model::{
    MessageType, OperationName, Span, SpanKind, SpanMessage, StatusCode, Trace,
};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// Longest span name persisted; longer names are truncated.
const MAX_SPAN_NAME_LEN: usize = 500;

/// A production SQLite store for trace telemetry.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database
    /// (useful for tests).
    pub async fn new(path: &str) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| PersistenceError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| PersistenceError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite trace store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, PersistenceError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create tables and indexes.
    async fn run_migrations(&self) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS traces (
                id                  TEXT PRIMARY KEY,
                trace_id            TEXT UNIQUE NOT NULL,
                service_name        TEXT NOT NULL,
                start_time          INTEGER NOT NULL,
                end_time            INTEGER,
                duration_ns         INTEGER,
                status              TEXT NOT NULL DEFAULT 'unset',
                root_span_id        TEXT,
                total_spans         INTEGER NOT NULL DEFAULT 0,
                total_input_tokens  INTEGER NOT NULL DEFAULT 0,
                total_output_tokens INTEGER NOT NULL DEFAULT 0,
                estimated_cost      REAL NOT NULL DEFAULT 0,
                metadata            TEXT,
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::MigrationFailed(format!("traces table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS spans (
                id                    TEXT PRIMARY KEY,
                trace_id              TEXT NOT NULL
                                      REFERENCES traces(trace_id) ON DELETE CASCADE,
                span_id               TEXT UNIQUE NOT NULL,
                parent_span_id        TEXT,
                name                  TEXT NOT NULL,
                kind                  TEXT NOT NULL,
                start_time            INTEGER NOT NULL,
                end_time              INTEGER,
                duration_ns           INTEGER,
                operation_name        TEXT,
                provider_name         TEXT,
                request_model         TEXT,
                response_model        TEXT,
                input_tokens          INTEGER,
                output_tokens         INTEGER,
                cache_read_tokens     INTEGER,
                cache_creation_tokens INTEGER,
                temperature           REAL,
                top_p                 REAL,
                max_tokens            INTEGER,
                finish_reasons        TEXT,
                status_code           TEXT NOT NULL DEFAULT 'unset',
                status_description    TEXT,
                cost_estimate         REAL,
                attributes            TEXT,
                events                TEXT,
                links                 TEXT,
                created_at            TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::MigrationFailed(format!("spans table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS span_messages (
                id           TEXT PRIMARY KEY,
                span_id      TEXT NOT NULL
                             REFERENCES spans(span_id) ON DELETE CASCADE,
                message_type TEXT NOT NULL,
                messages     TEXT NOT NULL,
                created_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::MigrationFailed(format!("span_messages table: {e}")))?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_traces_service_created ON traces(service_name, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_traces_duration ON traces(duration_ns)",
            "CREATE INDEX IF NOT EXISTS idx_traces_cost ON traces(estimated_cost)",
            "CREATE INDEX IF NOT EXISTS idx_traces_status ON traces(status)",
            "CREATE INDEX IF NOT EXISTS idx_spans_trace_id ON spans(trace_id)",
            "CREATE INDEX IF NOT EXISTS idx_spans_parent ON spans(parent_span_id)",
            "CREATE INDEX IF NOT EXISTS idx_spans_name ON spans(name)",
            "CREATE INDEX IF NOT EXISTS idx_spans_op_provider ON spans(operation_name, provider_name)",
            "CREATE INDEX IF NOT EXISTS idx_spans_request_model ON spans(request_model)",
            "CREATE INDEX IF NOT EXISTS idx_spans_tokens ON spans(input_tokens, output_tokens)",
            "CREATE INDEX IF NOT EXISTS idx_spans_created_at ON spans(created_at)",
            "CREATE INDEX IF NOT EXISTS idx_span_messages_span ON span_messages(span_id)",
        ];
        for sql in indexes {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| PersistenceError::MigrationFailed(format!("index: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    // ── Writes ────────────────────────────────────────────────────────

    /// Insert a freshly started trace.
    pub async fn insert_trace(&self, trace: &Trace) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO traces (
                id, trace_id, service_name, start_time, end_time, duration_ns,
                status, root_span_id, total_spans, total_input_tokens,
                total_output_tokens, estimated_cost, metadata, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(&trace.id)
        .bind(&trace.trace_id)
        .bind(&trace.service_name)
        .bind(to_nanos(trace.start_time))
        .bind(trace.end_time.map(to_nanos))
        .bind(trace.duration_ns.map(|ns| ns as i64))
        .bind(trace.status.as_str())
        .bind(&trace.root_span_id)
        .bind(trace.total_spans as i64)
        .bind(trace.total_input_tokens as i64)
        .bind(trace.total_output_tokens as i64)
        .bind(trace.estimated_cost)
        .bind(json_map_text(&trace.metadata)?)
        .bind(trace.created_at.to_rfc3339())
        .bind(trace.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(format!("trace INSERT failed: {e}")))?;

        debug!(trace_id = %trace.trace_id, "trace row inserted");
        Ok(())
    }

    /// Write a finalized trace's aggregates. At most one update succeeds:
    /// the row must still be `unset`. Returns whether this call won.
    pub async fn update_trace_finalized(&self, trace: &Trace) -> Result<bool, PersistenceError> {
        let result = sqlx::query(
            r#"
            UPDATE traces SET
                end_time = ?2,
                duration_ns = ?3,
                status = ?4,
                root_span_id = ?5,
                total_spans = ?6,
                total_input_tokens = ?7,
                total_output_tokens = ?8,
                estimated_cost = ?9,
                metadata = ?10,
                updated_at = ?11
            WHERE trace_id = ?1 AND status = 'unset'
            "#,
        )
        .bind(&trace.trace_id)
        .bind(trace.end_time.map(to_nanos))
        .bind(trace.duration_ns.map(|ns| ns as i64))
        .bind(trace.status.as_str())
        .bind(&trace.root_span_id)
        .bind(trace.total_spans as i64)
        .bind(trace.total_input_tokens as i64)
        .bind(trace.total_output_tokens as i64)
        .bind(trace.estimated_cost)
        .bind(json_map_text(&trace.metadata)?)
        .bind(trace.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(format!("trace UPDATE failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Insert a freshly started span.
    pub async fn insert_span(&self, span: &Span) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO spans (
                id, trace_id, span_id, parent_span_id, name, kind,
                start_time, end_time, duration_ns, operation_name, provider_name,
                request_model, response_model, input_tokens, output_tokens,
                cache_read_tokens, cache_creation_tokens, temperature, top_p,
                max_tokens, finish_reasons, status_code, status_description,
                cost_estimate, attributes, events, links, created_at
            )
            VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28
            )
            "#,
        )
        .bind(&span.id)
        .bind(&span.trace_id)
        .bind(&span.span_id)
        .bind(&span.parent_span_id)
        .bind(truncate_name(&span.name))
        .bind(span.kind.as_str())
        .bind(to_nanos(span.start_time))
        .bind(span.end_time.map(to_nanos))
        .bind(span.duration_ns.map(|ns| ns as i64))
        .bind(span.operation_name.as_ref().map(|op| op.as_str().to_string()))
        .bind(&span.provider_name)
        .bind(&span.request_model)
        .bind(&span.response_model)
        .bind(span.input_tokens.map(|t| t as i64))
        .bind(span.output_tokens.map(|t| t as i64))
        .bind(span.cache_read_tokens.map(|t| t as i64))
        .bind(span.cache_creation_tokens.map(|t| t as i64))
        .bind(span.params.temperature)
        .bind(span.params.top_p)
        .bind(span.params.max_tokens.map(|t| t as i64))
        .bind(json_vec_text(&span.finish_reasons)?)
        .bind(span.status_code.as_str())
        .bind(&span.status_description)
        .bind(span.cost_estimate)
        .bind(json_map_text(&span.attributes)?)
        .bind(json_vec_text(&span.events)?)
        .bind(json_vec_text(&span.links)?)
        .bind(span.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(format!("span INSERT failed: {e}")))?;

        debug!(span_id = %span.span_id, "span row inserted");
        Ok(())
    }

    /// Write a finalized span. At most one update succeeds: the row must
    /// still be `unset`. Returns whether this call won.
    pub async fn update_span_finalized(&self, span: &Span) -> Result<bool, PersistenceError> {
        let result = sqlx::query(
            r#"
            UPDATE spans SET
                end_time = ?2,
                duration_ns = ?3,
                operation_name = ?4,
                provider_name = ?5,
                request_model = ?6,
                response_model = ?7,
                input_tokens = ?8,
                output_tokens = ?9,
                cache_read_tokens = ?10,
                cache_creation_tokens = ?11,
                temperature = ?12,
                top_p = ?13,
                max_tokens = ?14,
                finish_reasons = ?15,
                status_code = ?16,
                status_description = ?17,
                cost_estimate = ?18,
                attributes = ?19,
                events = ?20,
                links = ?21
            WHERE span_id = ?1 AND status_code = 'unset'
            "#,
        )
        .bind(&span.span_id)
        .bind(span.end_time.map(to_nanos))
        .bind(span.duration_ns.map(|ns| ns as i64))
        .bind(span.operation_name.as_ref().map(|op| op.as_str().to_string()))
        .bind(&span.provider_name)
        .bind(&span.request_model)
        .bind(&span.response_model)
        .bind(span.input_tokens.map(|t| t as i64))
        .bind(span.output_tokens.map(|t| t as i64))
        .bind(span.cache_read_tokens.map(|t| t as i64))
        .bind(span.cache_creation_tokens.map(|t| t as i64))
        .bind(span.params.temperature)
        .bind(span.params.top_p)
        .bind(span.params.max_tokens.map(|t| t as i64))
        .bind(json_vec_text(&span.finish_reasons)?)
        .bind(span.status_code.as_str())
        .bind(&span.status_description)
        .bind(span.cost_estimate)
        .bind(json_map_text(&span.attributes)?)
        .bind(json_vec_text(&span.events)?)
        .bind(json_vec_text(&span.links)?)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(format!("span UPDATE failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Append a captured payload.
    pub async fn insert_span_message(&self, message: &SpanMessage) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO span_messages (id, span_id, message_type, messages, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&message.id)
        .bind(&message.span_id)
        .bind(message.message_type.as_str())
        .bind(json_vec_text(&message.messages)?)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(format!("span_message INSERT failed: {e}")))?;

        Ok(())
    }

    // ── Reads ─────────────────────────────────────────────────────────

    pub async fn get_trace(&self, trace_id: &str) -> Result<Option<Trace>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM traces WHERE trace_id = ?1")
            .bind(trace_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PersistenceError::QueryFailed(format!("trace by id: {e}")))?;

        match row {
            Some(ref r) => Ok(Some(row_to_trace(r)?)),
            None => Ok(None),
        }
    }

    /// Most recent traces first, optionally filtered by service name.
    pub async fn recent_traces(
        &self,
        limit: u32,
        service_name: Option<&str>,
    ) -> Result<Vec<Trace>, PersistenceError> {
        let rows = match service_name {
            Some(service) => {
                sqlx::query(
                    "SELECT * FROM traces WHERE service_name = ?1 \
                     ORDER BY created_at DESC LIMIT ?2",
                )
                .bind(service)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM traces ORDER BY created_at DESC LIMIT ?1")
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| PersistenceError::QueryFailed(format!("recent traces: {e}")))?;

        rows.iter().map(row_to_trace).collect()
    }

    pub async fn get_span(&self, span_id: &str) -> Result<Option<Span>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM spans WHERE span_id = ?1")
            .bind(span_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PersistenceError::QueryFailed(format!("span by id: {e}")))?;

        match row {
            Some(ref r) => Ok(Some(row_to_span(r)?)),
            None => Ok(None),
        }
    }

    /// Spans of a trace in start order.
    pub async fn spans_for_trace(&self, trace_id: &str) -> Result<Vec<Span>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT * FROM spans WHERE trace_id = ?1 ORDER BY start_time ASC, created_at ASC",
        )
        .bind(trace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PersistenceError::QueryFailed(format!("spans for trace: {e}")))?;

        rows.iter().map(row_to_span).collect()
    }

    /// Captured payloads of a span in capture order.
    pub async fn messages_for_span(
        &self,
        span_id: &str,
    ) -> Result<Vec<SpanMessage>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT * FROM span_messages WHERE span_id = ?1 ORDER BY created_at ASC, id ASC",
        )
        .bind(span_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PersistenceError::QueryFailed(format!("messages for span: {e}")))?;

        rows.iter().map(row_to_message).collect()
    }

    /// Aggregate usage over every persisted trace, with a per-service
    /// breakdown sorted by cost.
    pub async fn usage_summary(&self) -> Result<UsageSummary, PersistenceError> {
        let totals = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS trace_count,
                COALESCE(SUM(total_spans), 0) AS span_count,
                COALESCE(SUM(total_input_tokens), 0) AS input_tokens,
                COALESCE(SUM(total_output_tokens), 0) AS output_tokens,
                COALESCE(SUM(estimated_cost), 0.0) AS cost
            FROM traces
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PersistenceError::QueryFailed(format!("usage totals: {e}")))?;

        let rows = sqlx::query(
            r#"
            SELECT
                service_name,
                COUNT(*) AS trace_count,
                COALESCE(SUM(total_input_tokens), 0) AS input_tokens,
                COALESCE(SUM(total_output_tokens), 0) AS output_tokens,
                COALESCE(SUM(estimated_cost), 0.0) AS cost
            FROM traces
            GROUP BY service_name
            ORDER BY cost DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PersistenceError::QueryFailed(format!("usage by service: {e}")))?;

        let by_service = rows
            .iter()
            .map(|row| {
                Ok(ServiceUsage {
                    service_name: get(row, "service_name")?,
                    trace_count: get::<i64>(row, "trace_count")? as u64,
                    total_input_tokens: get::<i64>(row, "input_tokens")? as u64,
                    total_output_tokens: get::<i64>(row, "output_tokens")? as u64,
                    total_cost_usd: get::<f64>(row, "cost")?,
                })
            })
            .collect::<Result<Vec<_>, PersistenceError>>()?;

        Ok(UsageSummary {
            trace_count: get::<i64>(&totals, "trace_count")? as u64,
            span_count: get::<i64>(&totals, "span_count")? as u64,
            total_input_tokens: get::<i64>(&totals, "input_tokens")? as u64,
            total_output_tokens: get::<i64>(&totals, "output_tokens")? as u64,
            total_cost_usd: get::<f64>(&totals, "cost")?,
            by_service,
        })
    }
}

// ── Aggregated views ──────────────────────────────────────────────────────

/// Aggregate usage over the whole store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSummary {
    pub trace_count: u64,
    pub span_count: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    pub by_service: Vec<ServiceUsage>,
}

/// Usage aggregated for one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceUsage {
    pub service_name: String,
    pub trace_count: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
}

// ── Row mapping ───────────────────────────────────────────────────────────

fn get<'r, T>(row: &'r sqlx::sqlite::SqliteRow, column: &str) -> Result<T, PersistenceError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column)
        .map_err(|e| PersistenceError::QueryFailed(format!("{column} column: {e}")))
}

fn row_to_trace(row: &sqlx::sqlite::SqliteRow) -> Result<Trace, PersistenceError> {
    Ok(Trace {
        id: get(row, "id")?,
        trace_id: get(row, "trace_id")?,
        service_name: get(row, "service_name")?,
        start_time: from_nanos(get(row, "start_time")?),
        end_time: get::<Option<i64>>(row, "end_time")?.map(from_nanos),
        duration_ns: get::<Option<i64>>(row, "duration_ns")?.map(|ns| ns as u64),
        status: StatusCode::parse(&get::<String>(row, "status")?),
        root_span_id: get(row, "root_span_id")?,
        total_spans: get::<i64>(row, "total_spans")? as u32,
        total_input_tokens: get::<i64>(row, "total_input_tokens")? as u32,
        total_output_tokens: get::<i64>(row, "total_output_tokens")? as u32,
        estimated_cost: get(row, "estimated_cost")?,
        metadata: parse_json_map(get::<Option<String>>(row, "metadata")?),
        created_at: parse_rfc3339(&get::<String>(row, "created_at")?),
        updated_at: parse_rfc3339(&get::<String>(row, "updated_at")?),
    })
}

fn row_to_span(row: &sqlx::sqlite::SqliteRow) -> Result<Span, PersistenceError> {
    Ok(Span {
        id: get(row, "id")?,
        trace_id: get(row, "trace_id")?,
        span_id: get(row, "span_id")?,
        parent_span_id: get(row, "parent_span_id")?,
        name: get(row, "name")?,
        kind: SpanKind::parse(&get::<String>(row, "kind")?),
        start_time: from_nanos(get(row, "start_time")?),
        end_time: get::<Option<i64>>(row, "end_time")?.map(from_nanos),
        duration_ns: get::<Option<i64>>(row, "duration_ns")?.map(|ns| ns as u64),
        operation_name: get::<Option<String>>(row, "operation_name")?
            .map(|s| OperationName::from(s.as_str())),
        provider_name: get(row, "provider_name")?,
        request_model: get(row, "request_model")?,
        response_model: get(row, "response_model")?,
        input_tokens: get::<Option<i64>>(row, "input_tokens")?.map(|t| t as u32),
        output_tokens: get::<Option<i64>>(row, "output_tokens")?.map(|t| t as u32),
        cache_read_tokens: get::<Option<i64>>(row, "cache_read_tokens")?.map(|t| t as u32),
        cache_creation_tokens: get::<Option<i64>>(row, "cache_creation_tokens")?
            .map(|t| t as u32),
        params: ledgerline_core::model::RequestParams {
            temperature: get(row, "temperature")?,
            top_p: get(row, "top_p")?,
            max_tokens: get::<Option<i64>>(row, "max_tokens")?.map(|t| t as u32),
        },
        finish_reasons: parse_json_vec(get::<Option<String>>(row, "finish_reasons")?),
        status_code: StatusCode::parse(&get::<String>(row, "status_code")?),
        status_description: get(row, "status_description")?,
        cost_estimate: get(row, "cost_estimate")?,
        attributes: parse_json_map(get::<Option<String>>(row, "attributes")?),
        events: parse_json_vec(get::<Option<String>>(row, "events")?),
        links: parse_json_vec(get::<Option<String>>(row, "links")?),
        created_at: parse_rfc3339(&get::<String>(row, "created_at")?),
    })
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<SpanMessage, PersistenceError> {
    Ok(SpanMessage {
        id: get(row, "id")?,
        span_id: get(row, "span_id")?,
        message_type: MessageType::parse(&get::<String>(row, "message_type")?),
        messages: parse_json_vec(get::<Option<String>>(row, "messages")?),
        created_at: parse_rfc3339(&get::<String>(row, "created_at")?),
    })
}

// ── Conversions ───────────────────────────────────────────────────────────

fn to_nanos(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_nanos_opt().unwrap_or_default()
}

fn from_nanos(ns: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(ns)
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Serialize an open map as a JSON text column; NULL when empty.
fn json_map_text(
    map: &serde_json::Map<String, serde_json::Value>,
) -> Result<Option<String>, PersistenceError> {
    if map.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(map)
        .map(Some)
        .map_err(|e| PersistenceError::Storage(format!("JSON serialization: {e}")))
}

/// Serialize an ordered list as a JSON text column; NULL when empty.
fn json_vec_text<T: Serialize>(items: &[T]) -> Result<Option<String>, PersistenceError> {
    if items.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(items)
        .map(Some)
        .map_err(|e| PersistenceError::Storage(format!("JSON serialization: {e}")))
}

fn parse_json_map(text: Option<String>) -> serde_json::Map<String, serde_json::Value> {
    text.and_then(|t| serde_json::from_str(&t).ok())
        .unwrap_or_default()
}

fn parse_json_vec<T: for<'de> Deserialize<'de>>(text: Option<String>) -> Vec<T> {
    text.and_then(|t| serde_json::from_str(&t).ok())
        .unwrap_or_default()
}

fn truncate_name(name: &str) -> String {
    name.chars().take(MAX_SPAN_NAME_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerline_core::model::{MessageRecord, RequestParams, Role, SpanLink};

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn full_span(trace_id: &str) -> Span {
        let mut span = Span::new(trace_id, "chat claude-sonnet-4", SpanKind::Client);
        span.operation_name = Some(OperationName::Chat);
        span.provider_name = Some("anthropic".into());
        span.request_model = Some("claude-sonnet-4".into());
        span.response_model = Some("claude-sonnet-4-20250514".into());
        span.input_tokens = Some(1200);
        span.output_tokens = Some(340);
        span.cache_read_tokens = Some(800);
        span.cache_creation_tokens = Some(100);
        span.params = RequestParams {
            temperature: Some(0.7),
            max_tokens: Some(4096),
            top_p: Some(0.95),
        };
        span.finish_reasons = vec!["stop".into()];
        span.status_code = StatusCode::Ok;
        span.cost_estimate = Some(0.009042);
        span.attributes
            .insert("gen_ai.system".into(), serde_json::json!("anthropic"));
        span.add_event("first_token");
        span.links.push(SpanLink {
            trace_id: "11111111111111111111111111111111".into(),
            span_id: "2222222222222222".into(),
        });
        span.end_time = Some(span.start_time + chrono::Duration::milliseconds(1850));
        span.duration_ns = Some(1_850_000_000);
        span
    }

    #[tokio::test]
    async fn trace_insert_and_read_back() {
        let store = test_store().await;
        let trace = Trace::new("chat-api");
        store.insert_trace(&trace).await.unwrap();

        let loaded = store.get_trace(&trace.trace_id).await.unwrap().unwrap();
        assert_eq!(loaded.trace_id, trace.trace_id);
        assert_eq!(loaded.service_name, "chat-api");
        assert_eq!(loaded.status, StatusCode::Unset);
        assert_eq!(loaded.start_time, trace.start_time);
        assert!(loaded.end_time.is_none());
    }

    #[tokio::test]
    async fn span_row_round_trip_preserves_genai_fields() {
        let store = test_store().await;
        let trace = Trace::new("chat-api");
        store.insert_trace(&trace).await.unwrap();
        let span = full_span(&trace.trace_id);
        store.insert_span(&span).await.unwrap();

        let loaded = store.get_span(&span.span_id).await.unwrap().unwrap();
        assert_eq!(loaded.span_id, span.span_id);
        assert_eq!(loaded.name, span.name);
        assert_eq!(loaded.kind, span.kind);
        assert_eq!(loaded.operation_name, span.operation_name);
        assert_eq!(loaded.provider_name, span.provider_name);
        assert_eq!(loaded.request_model, span.request_model);
        assert_eq!(loaded.response_model, span.response_model);
        assert_eq!(loaded.input_tokens, span.input_tokens);
        assert_eq!(loaded.output_tokens, span.output_tokens);
        assert_eq!(loaded.cache_read_tokens, span.cache_read_tokens);
        assert_eq!(loaded.cache_creation_tokens, span.cache_creation_tokens);
        assert_eq!(loaded.params, span.params);
        assert_eq!(loaded.finish_reasons, span.finish_reasons);
        assert_eq!(loaded.status_code, span.status_code);
        assert_eq!(loaded.cost_estimate, span.cost_estimate);
        assert_eq!(loaded.attributes, span.attributes);
        assert_eq!(loaded.events, span.events);
        assert_eq!(loaded.links, span.links);
        assert_eq!(loaded.start_time, span.start_time);
        assert_eq!(loaded.end_time, span.end_time);
        assert_eq!(loaded.duration_ns, span.duration_ns);
    }

    #[tokio::test]
    async fn span_finalize_update_wins_once() {
        let store = test_store().await;
        let trace = Trace::new("svc");
        store.insert_trace(&trace).await.unwrap();

        let mut span = Span::new(&trace.trace_id, "chat", SpanKind::Client);
        store.insert_span(&span).await.unwrap();

        span.end_time = Some(Utc::now());
        span.duration_ns = Some(42_000_000);
        span.status_code = StatusCode::Ok;
        span.input_tokens = Some(10);
        span.output_tokens = Some(20);

        assert!(store.update_span_finalized(&span).await.unwrap());
        // A racing finalize finds the row no longer 'unset' and writes nothing.
        assert!(!store.update_span_finalized(&span).await.unwrap());

        let loaded = store.get_span(&span.span_id).await.unwrap().unwrap();
        assert_eq!(loaded.status_code, StatusCode::Ok);
        assert_eq!(loaded.input_tokens, Some(10));
    }

    #[tokio::test]
    async fn trace_finalize_update_wins_once() {
        let store = test_store().await;
        let mut trace = Trace::new("svc");
        store.insert_trace(&trace).await.unwrap();

        trace.end_time = Some(Utc::now());
        trace.duration_ns = Some(5_000_000_000);
        trace.status = StatusCode::Ok;
        trace.total_spans = 3;
        trace.total_input_tokens = 100;
        trace.total_output_tokens = 200;
        trace.estimated_cost = 0.0123;

        assert!(store.update_trace_finalized(&trace).await.unwrap());
        assert!(!store.update_trace_finalized(&trace).await.unwrap());

        let loaded = store.get_trace(&trace.trace_id).await.unwrap().unwrap();
        assert_eq!(loaded.total_spans, 3);
        assert!((loaded.estimated_cost - 0.0123).abs() < 1e-9);
        assert_eq!(loaded.status, StatusCode::Ok);
    }

    #[tokio::test]
    async fn span_messages_append_and_read_in_order() {
        let store = test_store().await;
        let trace = Trace::new("svc");
        store.insert_trace(&trace).await.unwrap();
        let span = full_span(&trace.trace_id);
        store.insert_span(&span).await.unwrap();

        let input = SpanMessage::new(
            &span.span_id,
            MessageType::Input,
            vec![MessageRecord::new(Role::User, "hello")],
        );
        let output = SpanMessage::new(
            &span.span_id,
            MessageType::Output,
            vec![MessageRecord::new(Role::Assistant, "hi")],
        );
        store.insert_span_message(&input).await.unwrap();
        store.insert_span_message(&output).await.unwrap();

        let messages = store.messages_for_span(&span.span_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].messages[0].content, "hello");
        assert_eq!(messages[1].message_type, MessageType::Output);
    }

    #[tokio::test]
    async fn deleting_a_trace_cascades() {
        let store = test_store().await;
        let trace = Trace::new("svc");
        store.insert_trace(&trace).await.unwrap();
        let span = full_span(&trace.trace_id);
        store.insert_span(&span).await.unwrap();
        store
            .insert_span_message(&SpanMessage::new(
                &span.span_id,
                MessageType::Input,
                vec![MessageRecord::new(Role::User, "hello")],
            ))
            .await
            .unwrap();

        sqlx::query("DELETE FROM traces WHERE trace_id = ?1")
            .bind(&trace.trace_id)
            .execute(&store.pool)
            .await
            .unwrap();

        assert!(store.get_span(&span.span_id).await.unwrap().is_none());
        assert!(store.messages_for_span(&span.span_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recent_traces_filters_by_service() {
        let store = test_store().await;
        for service in ["chat-api", "chat-api", "batch-worker"] {
            store.insert_trace(&Trace::new(service)).await.unwrap();
        }

        let all = store.recent_traces(10, None).await.unwrap();
        assert_eq!(all.len(), 3);

        let chat = store.recent_traces(10, Some("chat-api")).await.unwrap();
        assert_eq!(chat.len(), 2);
        assert!(chat.iter().all(|t| t.service_name == "chat-api"));
    }

    #[tokio::test]
    async fn usage_summary_aggregates_finalized_totals() {
        let store = test_store().await;

        let mut a = Trace::new("chat-api");
        a.total_spans = 2;
        a.total_input_tokens = 1000;
        a.total_output_tokens = 500;
        a.estimated_cost = 0.06;
        a.status = StatusCode::Ok;
        store.insert_trace(&a).await.unwrap();

        let mut b = Trace::new("batch-worker");
        b.total_spans = 1;
        b.total_input_tokens = 200;
        b.total_output_tokens = 100;
        b.estimated_cost = 0.01;
        b.status = StatusCode::Ok;
        store.insert_trace(&b).await.unwrap();

        let summary = store.usage_summary().await.unwrap();
        assert_eq!(summary.trace_count, 2);
        assert_eq!(summary.span_count, 3);
        assert_eq!(summary.total_input_tokens, 1200);
        assert_eq!(summary.total_output_tokens, 600);
        assert!((summary.total_cost_usd - 0.07).abs() < 1e-9);
        assert_eq!(summary.by_service.len(), 2);
        // Sorted by cost, descending.
        assert_eq!(summary.by_service[0].service_name, "chat-api");
    }

    #[tokio::test]
    async fn long_span_names_are_truncated() {
        let store = test_store().await;
        let trace = Trace::new("svc");
        store.insert_trace(&trace).await.unwrap();

        let mut span = Span::new(&trace.trace_id, "x".repeat(900), SpanKind::Internal);
        span.status_code = StatusCode::Ok;
        store.insert_span(&span).await.unwrap();

        let loaded = store.get_span(&span.span_id).await.unwrap().unwrap();
        assert_eq!(loaded.name.chars().count(), 500);
    }

    #[tokio::test]
    async fn operation_name_survives_unknown_variants() {
        let store = test_store().await;
        let trace = Trace::new("svc");
        store.insert_trace(&trace).await.unwrap();

        let mut span = Span::new(&trace.trace_id, "moderate", SpanKind::Client);
        span.operation_name = Some(OperationName::from("moderation"));
        store.insert_span(&span).await.unwrap();

        let loaded = store.get_span(&span.span_id).await.unwrap().unwrap();
        assert_eq!(
            loaded.operation_name,
            Some(OperationName::Other("moderation".into()))
        );
    }
}
