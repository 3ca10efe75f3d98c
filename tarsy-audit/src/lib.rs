//! Audit trail persistence: sessions, stage executions, and interactions,
//! stored in SQLite with microsecond timestamps.
//!
//! Writes are append-mostly and serialized per session by construction: the
//! hook bus dispatcher is the only interaction writer, and the orchestrator
//! is the only session/stage writer within one alert task. Reads are
//! independent of the write path.

pub mod model;

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{prelude::FromRow, SqlitePool};
use tracing::info;

use tarsy_core::error::AuditError;
use tarsy_core::timestamp::now_us;
use tarsy_hooks::{LlmInteractionEvent, McpInteractionEvent, SessionLifecycleEvent};

use model::{
    AlertSession, LifecycleRecord, LlmInteractionRecord, McpInteractionRecord, SessionFilter,
    SessionPage, SessionStatus, SessionTimeline, StageExecution, StageStatus, TimelineEntry,
};

/// Highest schema version this binary understands. The store refuses to open
/// a database migrated past this.
const SUPPORTED_SCHEMA_VERSION: i64 = 1;

/// Numbered additive migrations; each entry is applied in one transaction
/// and recorded in `schema_migrations`.
const MIGRATIONS: &[(i64, &[&str])] = &[(1, &[
    r#"
    CREATE TABLE IF NOT EXISTS alert_sessions (
        session_id TEXT PRIMARY KEY,
        alert_id TEXT NOT NULL,
        alert_type TEXT NOT NULL,
        chain_id TEXT NOT NULL DEFAULT '',
        chain_definition TEXT,
        alert_data TEXT NOT NULL,
        status TEXT NOT NULL,
        current_stage_index INTEGER,
        current_stage_id TEXT,
        started_at_us INTEGER NOT NULL,
        completed_at_us INTEGER,
        final_analysis TEXT,
        error_message TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_alert_sessions_started ON alert_sessions(started_at_us DESC)",
    "CREATE INDEX IF NOT EXISTS idx_alert_sessions_status ON alert_sessions(status)",
    "CREATE INDEX IF NOT EXISTS idx_alert_sessions_alert_type ON alert_sessions(alert_type)",
    "CREATE INDEX IF NOT EXISTS idx_alert_sessions_chain ON alert_sessions(chain_id)",
    r#"
    CREATE TABLE IF NOT EXISTS stage_executions (
        execution_id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        stage_id TEXT NOT NULL,
        stage_index INTEGER NOT NULL,
        agent_id TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at_us INTEGER NOT NULL,
        completed_at_us INTEGER,
        duration_ms INTEGER,
        stage_output TEXT,
        error_message TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_stage_executions_session ON stage_executions(session_id, stage_index)",
    r#"
    CREATE TABLE IF NOT EXISTS llm_interactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        stage_execution_id TEXT,
        ts_us INTEGER NOT NULL,
        model TEXT NOT NULL,
        messages TEXT NOT NULL,
        response TEXT,
        token_usage TEXT,
        duration_ms INTEGER NOT NULL DEFAULT 0,
        error TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_llm_interactions_session_ts ON llm_interactions(session_id, ts_us)",
    r#"
    CREATE TABLE IF NOT EXISTS mcp_interactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        stage_execution_id TEXT,
        ts_us INTEGER NOT NULL,
        server_id TEXT NOT NULL,
        tool_name TEXT NOT NULL,
        arguments TEXT NOT NULL,
        result TEXT,
        duration_ms INTEGER NOT NULL DEFAULT 0,
        error TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_mcp_interactions_session_ts ON mcp_interactions(session_id, ts_us)",
    r#"
    CREATE TABLE IF NOT EXISTS lifecycle_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        stage_execution_id TEXT,
        ts_us INTEGER NOT NULL,
        kind TEXT NOT NULL,
        detail TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_lifecycle_events_session_ts ON lifecycle_events(session_id, ts_us)",
])];

#[derive(Clone)]
pub struct AuditStore {
    pool: SqlitePool,
}

#[derive(Debug, FromRow)]
struct SessionRow {
    session_id: String,
    alert_id: String,
    alert_type: String,
    chain_id: String,
    chain_definition: Option<String>,
    alert_data: String,
    status: String,
    current_stage_index: Option<i64>,
    current_stage_id: Option<String>,
    started_at_us: i64,
    completed_at_us: Option<i64>,
    final_analysis: Option<String>,
    error_message: Option<String>,
}

#[derive(Debug, FromRow)]
struct StageRow {
    execution_id: String,
    session_id: String,
    stage_id: String,
    stage_index: i64,
    agent_id: String,
    status: String,
    started_at_us: i64,
    completed_at_us: Option<i64>,
    duration_ms: Option<i64>,
    stage_output: Option<String>,
    error_message: Option<String>,
}

#[derive(Debug, FromRow)]
struct LlmRow {
    id: i64,
    session_id: String,
    stage_execution_id: Option<String>,
    ts_us: i64,
    model: String,
    messages: String,
    response: Option<String>,
    token_usage: Option<String>,
    duration_ms: i64,
    error: Option<String>,
}

#[derive(Debug, FromRow)]
struct McpRow {
    id: i64,
    session_id: String,
    stage_execution_id: Option<String>,
    ts_us: i64,
    server_id: String,
    tool_name: String,
    arguments: String,
    result: Option<String>,
    duration_ms: i64,
    error: Option<String>,
}

#[derive(Debug, FromRow)]
struct LifecycleRow {
    id: i64,
    session_id: String,
    stage_execution_id: Option<String>,
    ts_us: i64,
    kind: String,
    detail: Option<String>,
}

fn db_err(err: impl std::fmt::Display) -> AuditError {
    AuditError::Database(err.to_string())
}

impl AuditStore {
    /// Open (creating if missing) a SQLite-backed store at the given path.
    pub async fn open(path: &Path) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(db_err)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(db_err)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err)?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store for tests and ephemeral runs.
    pub async fn in_memory() -> Result<Self, AuditError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at_us INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let current: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        let current = current.unwrap_or(0);

        if current > SUPPORTED_SCHEMA_VERSION {
            return Err(AuditError::UnknownSchemaVersion {
                found: current,
                supported: SUPPORTED_SCHEMA_VERSION,
            });
        }

        for (version, statements) in MIGRATIONS {
            if *version <= current {
                continue;
            }
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            for statement in *statements {
                sqlx::query(statement)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }
            sqlx::query("INSERT INTO schema_migrations (version, applied_at_us) VALUES (?, ?)")
                .bind(version)
                .bind(now_us())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            info!(version, "applied audit schema migration");
        }
        Ok(())
    }

    /// Record a forced schema version, for testing the refuse-to-start path.
    pub async fn force_schema_version(&self, version: i64) -> Result<(), AuditError> {
        sqlx::query("INSERT INTO schema_migrations (version, applied_at_us) VALUES (?, ?)")
            .bind(version)
            .bind(now_us())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Re-run the schema check, as `open` would on a fresh start.
    pub async fn check_schema(&self) -> Result<(), AuditError> {
        self.migrate().await
    }

    pub async fn health_check(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }

    // ------------------------------------------------------------------
    // Session writes
    // ------------------------------------------------------------------

    pub async fn create_session(&self, session: &AlertSession) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO alert_sessions (
                session_id, alert_id, alert_type, chain_id, chain_definition,
                alert_data, status, current_stage_index, current_stage_id,
                started_at_us, completed_at_us, final_analysis, error_message
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.alert_id)
        .bind(&session.alert_type)
        .bind(&session.chain_id)
        .bind(session.chain_definition.as_ref().map(|v| v.to_string()))
        .bind(session.alert_data.to_string())
        .bind(session.status.as_str())
        .bind(session.current_stage_index)
        .bind(&session.current_stage_id)
        .bind(session.started_at_us)
        .bind(session.completed_at_us)
        .bind(&session.final_analysis)
        .bind(&session.error_message)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Point the session at its currently active stage and mark it
    /// processing.
    pub async fn update_session_current_stage(
        &self,
        session_id: &str,
        stage_index: i64,
        stage_execution_id: &str,
    ) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            UPDATE alert_sessions
            SET status = ?, current_stage_index = ?, current_stage_id = ?
            WHERE session_id = ? AND status IN ('pending', 'processing')
            "#,
        )
        .bind(SessionStatus::Processing.as_str())
        .bind(stage_index)
        .bind(stage_execution_id)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Terminal session write. Idempotent: a session already in a terminal
    /// status is left untouched and `false` is returned.
    pub async fn finalize_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        completed_at_us: i64,
        final_analysis: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<bool, AuditError> {
        if !status.is_terminal() {
            return Err(AuditError::InvalidTerminalState(format!(
                "finalize_session called with non-terminal status '{}'",
                status.as_str()
            )));
        }
        let result = sqlx::query(
            r#"
            UPDATE alert_sessions
            SET status = ?, completed_at_us = ?, final_analysis = ?, error_message = ?
            WHERE session_id = ? AND status IN ('pending', 'processing')
            "#,
        )
        .bind(status.as_str())
        .bind(completed_at_us)
        .bind(final_analysis)
        .bind(error_message)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Stage writes
    // ------------------------------------------------------------------

    pub async fn create_stage_execution(&self, stage: &StageExecution) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO stage_executions (
                execution_id, session_id, stage_id, stage_index, agent_id,
                status, started_at_us, completed_at_us, duration_ms,
                stage_output, error_message
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&stage.execution_id)
        .bind(&stage.session_id)
        .bind(&stage.stage_id)
        .bind(stage.stage_index)
        .bind(&stage.agent_id)
        .bind(stage.status.as_str())
        .bind(stage.started_at_us)
        .bind(stage.completed_at_us)
        .bind(stage.duration_ms)
        .bind(stage.stage_output.as_ref().map(|v| v.to_string()))
        .bind(&stage.error_message)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Exactly one terminal update per stage. `stage_output` and
    /// `error_message` are mutually exclusive: success carries output,
    /// failure carries an error.
    pub async fn finalize_stage_execution(
        &self,
        execution_id: &str,
        status: StageStatus,
        completed_at_us: i64,
        duration_ms: i64,
        stage_output: Option<&serde_json::Value>,
        error_message: Option<&str>,
    ) -> Result<(), AuditError> {
        match (status, stage_output.is_some(), error_message.is_some()) {
            (StageStatus::Completed, true, false) | (StageStatus::Failed, false, true) => {}
            _ => {
                return Err(AuditError::InvalidTerminalState(format!(
                    "stage '{execution_id}': terminal status '{}' requires output xor error",
                    status.as_str()
                )));
            }
        }
        sqlx::query(
            r#"
            UPDATE stage_executions
            SET status = ?, completed_at_us = ?, duration_ms = ?, stage_output = ?, error_message = ?
            WHERE execution_id = ? AND status IN ('pending', 'active')
            "#,
        )
        .bind(status.as_str())
        .bind(completed_at_us)
        .bind(duration_ms)
        .bind(stage_output.map(|v| v.to_string()))
        .bind(error_message)
        .bind(execution_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Interaction appends (called from the hook bus dispatcher)
    // ------------------------------------------------------------------

    pub async fn append_llm_interaction(
        &self,
        event: &LlmInteractionEvent,
    ) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO llm_interactions (
                session_id, stage_execution_id, ts_us, model, messages,
                response, token_usage, duration_ms, error
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.session_id)
        .bind(&event.stage_execution_id)
        .bind(event.ts_us)
        .bind(&event.model)
        .bind(event.messages.to_string())
        .bind(&event.response)
        .bind(
            event
                .token_usage
                .as_ref()
                .and_then(|u| serde_json::to_string(u).ok()),
        )
        .bind(event.duration_ms)
        .bind(&event.error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn append_mcp_interaction(
        &self,
        event: &McpInteractionEvent,
    ) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO mcp_interactions (
                session_id, stage_execution_id, ts_us, server_id, tool_name,
                arguments, result, duration_ms, error
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.session_id)
        .bind(&event.stage_execution_id)
        .bind(event.ts_us)
        .bind(&event.server_id)
        .bind(&event.tool_name)
        .bind(event.arguments.to_string())
        .bind(event.result.as_ref().map(|v| v.to_string()))
        .bind(event.duration_ms)
        .bind(&event.error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn append_lifecycle_event(
        &self,
        event: &SessionLifecycleEvent,
    ) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO lifecycle_events (session_id, stage_execution_id, ts_us, kind, detail)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.session_id)
        .bind(&event.stage_execution_id)
        .bind(event.ts_us)
        .bind(event.kind.as_str())
        .bind(&event.detail)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn get_session(&self, session_id: &str) -> Result<Option<AlertSession>, AuditError> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM alert_sessions WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(parse_session_row).transpose()
    }

    /// Paginated session listing, newest first. `page` is zero-based.
    pub async fn list_sessions(
        &self,
        filter: &SessionFilter,
        page: u32,
        size: u32,
    ) -> Result<SessionPage, AuditError> {
        let mut conditions: Vec<&str> = Vec::new();
        if filter.status.is_some() {
            conditions.push("status = ?");
        }
        if filter.alert_type.is_some() {
            conditions.push("alert_type = ?");
        }
        if filter.chain_id.is_some() {
            conditions.push("chain_id = ?");
        }
        if filter.started_between.is_some() {
            conditions.push("started_at_us BETWEEN ? AND ?");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM alert_sessions{where_clause}");
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(status) = filter.status {
            count_query = count_query.bind(status.as_str());
        }
        if let Some(ref alert_type) = filter.alert_type {
            count_query = count_query.bind(alert_type);
        }
        if let Some(ref chain_id) = filter.chain_id {
            count_query = count_query.bind(chain_id);
        }
        if let Some((from, to)) = filter.started_between {
            count_query = count_query.bind(from).bind(to);
        }
        let total = count_query.fetch_one(&self.pool).await.map_err(db_err)?;

        let list_sql = format!(
            "SELECT * FROM alert_sessions{where_clause} \
             ORDER BY started_at_us DESC LIMIT ? OFFSET ?"
        );
        let mut list_query = sqlx::query_as::<_, SessionRow>(&list_sql);
        if let Some(status) = filter.status {
            list_query = list_query.bind(status.as_str());
        }
        if let Some(ref alert_type) = filter.alert_type {
            list_query = list_query.bind(alert_type);
        }
        if let Some(ref chain_id) = filter.chain_id {
            list_query = list_query.bind(chain_id);
        }
        if let Some((from, to)) = filter.started_between {
            list_query = list_query.bind(from).bind(to);
        }
        let rows = list_query
            .bind(i64::from(size))
            .bind(i64::from(page) * i64::from(size))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(SessionPage {
            sessions: rows
                .into_iter()
                .map(parse_session_row)
                .collect::<Result<_, _>>()?,
            page,
            size,
            total,
        })
    }

    pub async fn list_stage_executions(
        &self,
        session_id: &str,
    ) -> Result<Vec<StageExecution>, AuditError> {
        let rows = sqlx::query_as::<_, StageRow>(
            "SELECT * FROM stage_executions WHERE session_id = ? ORDER BY stage_index ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(parse_stage_row).collect()
    }

    /// Session + stages + all interactions merged chronologically. Ties on
    /// `ts_us` (impossible within one session, possible across restarts)
    /// fall back to insertion id.
    pub async fn get_session_with_timeline(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionTimeline>, AuditError> {
        let Some(session) = self.get_session(session_id).await? else {
            return Ok(None);
        };
        let stages = self.list_stage_executions(session_id).await?;

        let llm_rows = sqlx::query_as::<_, LlmRow>(
            "SELECT * FROM llm_interactions WHERE session_id = ? ORDER BY ts_us ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let mcp_rows = sqlx::query_as::<_, McpRow>(
            "SELECT * FROM mcp_interactions WHERE session_id = ? ORDER BY ts_us ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let lifecycle_rows = sqlx::query_as::<_, LifecycleRow>(
            "SELECT * FROM lifecycle_events WHERE session_id = ? ORDER BY ts_us ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut entries: Vec<TimelineEntry> = Vec::new();
        for row in llm_rows {
            entries.push(TimelineEntry::Llm(parse_llm_row(row)?));
        }
        for row in mcp_rows {
            entries.push(TimelineEntry::Mcp(parse_mcp_row(row)?));
        }
        for row in lifecycle_rows {
            entries.push(TimelineEntry::Lifecycle(LifecycleRecord {
                id: row.id,
                session_id: row.session_id,
                stage_execution_id: row.stage_execution_id,
                ts_us: row.ts_us,
                kind: row.kind,
                detail: row.detail,
            }));
        }
        entries.sort_by_key(|e| (e.ts_us(), e.insertion_id()));

        Ok(Some(SessionTimeline {
            session,
            stages,
            entries,
        }))
    }

    /// Retention sweep: delete sessions started before the horizon, with
    /// their stages and interactions. Returns the number of sessions
    /// removed.
    pub async fn purge_sessions_older_than(&self, horizon_us: i64) -> Result<u64, AuditError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for table in [
            "lifecycle_events",
            "mcp_interactions",
            "llm_interactions",
            "stage_executions",
        ] {
            let sql = format!(
                "DELETE FROM {table} WHERE session_id IN \
                 (SELECT session_id FROM alert_sessions WHERE started_at_us < ?)"
            );
            sqlx::query(&sql)
                .bind(horizon_us)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        let deleted = sqlx::query("DELETE FROM alert_sessions WHERE started_at_us < ?")
            .bind(horizon_us)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();
        tx.commit().await.map_err(db_err)?;
        Ok(deleted)
    }
}

fn parse_session_row(row: SessionRow) -> Result<AlertSession, AuditError> {
    Ok(AlertSession {
        status: SessionStatus::parse(&row.status)?,
        chain_definition: row
            .chain_definition
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(db_err)?,
        alert_data: serde_json::from_str(&row.alert_data).map_err(db_err)?,
        session_id: row.session_id,
        alert_id: row.alert_id,
        alert_type: row.alert_type,
        chain_id: row.chain_id,
        current_stage_index: row.current_stage_index,
        current_stage_id: row.current_stage_id,
        started_at_us: row.started_at_us,
        completed_at_us: row.completed_at_us,
        final_analysis: row.final_analysis,
        error_message: row.error_message,
    })
}

fn parse_stage_row(row: StageRow) -> Result<StageExecution, AuditError> {
    Ok(StageExecution {
        status: StageStatus::parse(&row.status)?,
        stage_output: row
            .stage_output
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(db_err)?,
        execution_id: row.execution_id,
        session_id: row.session_id,
        stage_id: row.stage_id,
        stage_index: row.stage_index,
        agent_id: row.agent_id,
        started_at_us: row.started_at_us,
        completed_at_us: row.completed_at_us,
        duration_ms: row.duration_ms,
        error_message: row.error_message,
    })
}

fn parse_llm_row(row: LlmRow) -> Result<LlmInteractionRecord, AuditError> {
    Ok(LlmInteractionRecord {
        messages: serde_json::from_str(&row.messages).map_err(db_err)?,
        token_usage: row
            .token_usage
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(db_err)?,
        id: row.id,
        session_id: row.session_id,
        stage_execution_id: row.stage_execution_id,
        ts_us: row.ts_us,
        model: row.model,
        response: row.response,
        duration_ms: row.duration_ms,
        error: row.error,
    })
}

fn parse_mcp_row(row: McpRow) -> Result<McpInteractionRecord, AuditError> {
    Ok(McpInteractionRecord {
        arguments: serde_json::from_str(&row.arguments).map_err(db_err)?,
        result: row
            .result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(db_err)?,
        id: row.id,
        session_id: row.session_id,
        stage_execution_id: row.stage_execution_id,
        ts_us: row.ts_us,
        server_id: row.server_id,
        tool_name: row.tool_name,
        duration_ms: row.duration_ms,
        error: row.error,
    })
}
