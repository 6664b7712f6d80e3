use async_trait::async_trait;
use chrono::Utc;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::{Checkpoint, CheckpointMeta, CheckpointStore, ReviewDecision, SessionSummary};
use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};
use crate::session::{Session, Stage};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed checkpoint store implementation
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store instance
    pub async fn new(config: &DatabaseConfig) -> StoreResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StoreError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory store for tests.
    ///
    /// The pool is pinned to one connection; a second connection would see
    /// its own empty in-memory database.
    pub async fn new_in_memory() -> StoreResult<Self> {
        let options =
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| StoreError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StoreResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StoreError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn save(&self, session: &Session) -> StoreResult<i64> {
        let snapshot = serde_json::to_string(session)?;
        let now = Utc::now().to_rfc3339();
        let status = if session.stage.is_terminal() {
            session.overall_status().to_string()
        } else {
            "running".to_string()
        };

        // MAX(seq) read and insert share a transaction so sequence numbers
        // never collide or skip.
        let mut tx = self.pool.begin().await?;

        let next_seq: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) + 1 FROM checkpoints WHERE session_id = ?")
                .bind(&session.id)
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query(
            r#"
            INSERT INTO checkpoints (session_id, seq, stage, snapshot, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(next_seq)
        .bind(session.stage.to_string())
        .bind(&snapshot)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, stage, symptom, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                stage = excluded.stage,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&session.id)
        .bind(session.stage.to_string())
        .bind(&session.symptom)
        .bind(&status)
        .bind(session.created_at.to_rfc3339())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            session_id = %session.id,
            seq = next_seq,
            stage = %session.stage,
            "Checkpoint saved"
        );

        Ok(next_seq)
    }

    async fn load_latest(&self, session_id: &str) -> StoreResult<Option<Checkpoint>> {
        let row: Option<CheckpointRow> = sqlx::query_as(
            r#"
            SELECT session_id, seq, stage, snapshot, created_at
            FROM checkpoints
            WHERE session_id = ?
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.parse()).transpose()
    }

    async fn load_checkpoint(&self, session_id: &str, seq: i64) -> StoreResult<Option<Checkpoint>> {
        let row: Option<CheckpointRow> = sqlx::query_as(
            r#"
            SELECT session_id, seq, stage, snapshot, created_at
            FROM checkpoints
            WHERE session_id = ? AND seq = ?
            "#,
        )
        .bind(session_id)
        .bind(seq)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.parse()).transpose()
    }

    async fn list_checkpoints(&self, session_id: &str) -> StoreResult<Vec<CheckpointMeta>> {
        let rows: Vec<CheckpointMetaRow> = sqlx::query_as(
            r#"
            SELECT session_id, seq, stage, created_at
            FROM checkpoints
            WHERE session_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.parse()).collect()
    }

    async fn list_sessions(&self) -> StoreResult<Vec<SessionSummary>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, stage, symptom, status, created_at, updated_at
            FROM sessions
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.parse()).collect()
    }

    async fn acquire_lease(
        &self,
        session_id: &str,
        holder: &str,
        ttl_ms: u64,
    ) -> StoreResult<bool> {
        let now = Utc::now().timestamp_millis();
        let expires_at = now + ttl_ms as i64;

        // The upsert only fires when the existing lease is expired or ours,
        // so a live foreign lease leaves zero rows affected.
        let result = sqlx::query(
            r#"
            INSERT INTO session_leases (session_id, holder, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE session_leases.expires_at < ? OR session_leases.holder = excluded.holder
            "#,
        )
        .bind(session_id)
        .bind(holder)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn refresh_lease(
        &self,
        session_id: &str,
        holder: &str,
        ttl_ms: u64,
    ) -> StoreResult<bool> {
        let expires_at = Utc::now().timestamp_millis() + ttl_ms as i64;

        let result = sqlx::query(
            r#"
            UPDATE session_leases
            SET expires_at = ?
            WHERE session_id = ? AND holder = ?
            "#,
        )
        .bind(expires_at)
        .bind(session_id)
        .bind(holder)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_lease(&self, session_id: &str, holder: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM session_leases WHERE session_id = ? AND holder = ?")
            .bind(session_id)
            .bind(holder)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn record_review(&self, decision: &ReviewDecision) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO review_decisions (session_id, decision, note, decided_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                decision = excluded.decision,
                note = excluded.note,
                decided_at = excluded.decided_at
            "#,
        )
        .bind(&decision.session_id)
        .bind(decision.decision.to_string())
        .bind(&decision.note)
        .bind(decision.decided_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_review(&self, session_id: &str) -> StoreResult<Option<ReviewDecision>> {
        let row: Option<ReviewRow> = sqlx::query_as(
            r#"
            SELECT session_id, decision, note, decided_at
            FROM review_decisions
            WHERE session_id = ?
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.parse()).transpose()
    }

    async fn clear_review(&self, session_id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM review_decisions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

// Internal row types for SQLx mapping

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    session_id: String,
    seq: i64,
    stage: String,
    snapshot: String,
    created_at: String,
}

impl CheckpointRow {
    fn parse(self) -> StoreResult<Checkpoint> {
        let stage = parse_stage(&self.stage)?;
        let session: Session = serde_json::from_str(&self.snapshot)?;

        Ok(Checkpoint {
            session_id: self.session_id,
            seq: self.seq,
            stage,
            session,
            created_at: parse_timestamp(&self.created_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct CheckpointMetaRow {
    session_id: String,
    seq: i64,
    stage: String,
    created_at: String,
}

impl CheckpointMetaRow {
    fn parse(self) -> StoreResult<CheckpointMeta> {
        Ok(CheckpointMeta {
            session_id: self.session_id,
            seq: self.seq,
            stage: parse_stage(&self.stage)?,
            created_at: parse_timestamp(&self.created_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    stage: String,
    symptom: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    fn parse(self) -> StoreResult<SessionSummary> {
        Ok(SessionSummary {
            id: self.id,
            stage: parse_stage(&self.stage)?,
            symptom: self.symptom,
            status: self.status,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReviewRow {
    session_id: String,
    decision: String,
    note: Option<String>,
    decided_at: String,
}

impl ReviewRow {
    fn parse(self) -> StoreResult<ReviewDecision> {
        let decision = self.decision.parse().map_err(|e: String| StoreError::Query {
            message: format!("Invalid review row: {}", e),
        })?;

        Ok(ReviewDecision {
            session_id: self.session_id,
            decision,
            note: self.note,
            decided_at: parse_timestamp(&self.decided_at),
        })
    }
}

fn parse_stage(s: &str) -> StoreResult<Stage> {
    s.parse().map_err(|e: String| StoreError::Query {
        message: format!("Invalid stage in row: {}", e),
    })
}

fn parse_timestamp(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
