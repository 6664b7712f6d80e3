//! Checkpoint persistence for diagnostic sessions.
//!
//! The engine checkpoints the whole [`Session`] at stage boundaries and at
//! reasoning-round boundaries. Checkpoints are append-only and ordered by a
//! per-session sequence number, so a crashed run can resume from the latest
//! snapshot and earlier snapshots stay available for inspection.
//!
//! The store also owns the single-writer lease that keeps two processes from
//! driving the same session, and the out-of-band review decisions written by
//! the approval CLI.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::session::{Session, Stage};

/// A durable snapshot of a session.
///
/// `stage` is the stage the session will run next, so resume re-enters
/// exactly where the run left off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Session the snapshot belongs to.
    pub session_id: String,
    /// Per-session sequence number, starting at 1.
    pub seq: i64,
    /// Stage recorded at save time.
    pub stage: Stage,
    /// The full session state.
    pub session: Session,
    /// When the checkpoint was written.
    pub created_at: DateTime<Utc>,
}

/// Checkpoint listing entry without the snapshot payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Session the checkpoint belongs to.
    pub session_id: String,
    /// Per-session sequence number.
    pub seq: i64,
    /// Stage recorded at save time.
    pub stage: Stage,
    /// When the checkpoint was written.
    pub created_at: DateTime<Utc>,
}

/// Session listing entry backed by the summary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session identifier.
    pub id: String,
    /// Stage the session will run next.
    pub stage: Stage,
    /// Symptom the run was started with.
    pub symptom: String,
    /// `running` while in flight, otherwise the overall outcome.
    pub status: String,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the last checkpoint was written.
    pub updated_at: DateTime<Utc>,
}

/// A reviewer's verdict on the proposed fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewChoice {
    /// Execution of the proposed fixes may proceed.
    Approved,
    /// Execution must not proceed.
    Rejected,
}

impl std::fmt::Display for ReviewChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewChoice::Approved => write!(f, "approved"),
            ReviewChoice::Rejected => write!(f, "rejected"),
        }
    }
}

impl std::str::FromStr for ReviewChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "approved" | "approve" => Ok(ReviewChoice::Approved),
            "rejected" | "reject" => Ok(ReviewChoice::Rejected),
            _ => Err(format!("Unknown review choice: {}", s)),
        }
    }
}

/// A recorded human-review decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewDecision {
    /// Session the decision applies to.
    pub session_id: String,
    /// The verdict.
    pub decision: ReviewChoice,
    /// Optional reviewer note; a rejection note starting with
    /// `more-evidence:` sends the session back to analysis.
    pub note: Option<String>,
    /// When the decision was recorded.
    pub decided_at: DateTime<Utc>,
}

impl ReviewDecision {
    /// Create a new decision timestamped now.
    pub fn new(
        session_id: impl Into<String>,
        decision: ReviewChoice,
        note: Option<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            decision,
            note,
            decided_at: Utc::now(),
        }
    }

    /// Whether the reviewer asked for another analysis pass.
    pub fn wants_more_evidence(&self) -> bool {
        self.decision == ReviewChoice::Rejected
            && self
                .note
                .as_deref()
                .map(|n| n.trim_start().starts_with("more-evidence:"))
                .unwrap_or(false)
    }
}

/// Persistence backend for sessions, checkpoints, leases, and reviews.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    // === Checkpoint operations ===

    /// Append a checkpoint for the session, returning the assigned sequence
    /// number. Also upserts the session summary row.
    async fn save(&self, session: &Session) -> StoreResult<i64>;

    /// Load the latest checkpoint for a session.
    async fn load_latest(&self, session_id: &str) -> StoreResult<Option<Checkpoint>>;

    /// Load one specific checkpoint.
    async fn load_checkpoint(&self, session_id: &str, seq: i64) -> StoreResult<Option<Checkpoint>>;

    /// List checkpoint metadata for a session, oldest first.
    async fn list_checkpoints(&self, session_id: &str) -> StoreResult<Vec<CheckpointMeta>>;

    /// List session summaries, most recently updated first.
    async fn list_sessions(&self) -> StoreResult<Vec<SessionSummary>>;

    // === Lease operations ===

    /// Try to take the single-writer lease for a session.
    ///
    /// Returns `false` when another holder has an unexpired lease. Taking a
    /// lease you already hold extends it.
    async fn acquire_lease(&self, session_id: &str, holder: &str, ttl_ms: u64)
        -> StoreResult<bool>;

    /// Extend a lease you hold. Returns `false` if the lease is no longer
    /// yours.
    async fn refresh_lease(&self, session_id: &str, holder: &str, ttl_ms: u64)
        -> StoreResult<bool>;

    /// Release a lease you hold. Releasing someone else's lease is a no-op.
    async fn release_lease(&self, session_id: &str, holder: &str) -> StoreResult<()>;

    // === Review operations ===

    /// Record a review decision, replacing any earlier one for the session.
    async fn record_review(&self, decision: &ReviewDecision) -> StoreResult<()>;

    /// Load the review decision for a session, if one has been recorded.
    async fn load_review(&self, session_id: &str) -> StoreResult<Option<ReviewDecision>>;

    /// Remove a consumed review decision.
    ///
    /// The gate clears a "more evidence" rejection before looping back, so
    /// the next review visit waits for a fresh decision instead of
    /// re-reading the old one.
    async fn clear_review(&self, session_id: &str) -> StoreResult<()>;
}
