//! The blocking human-review gate.
//!
//! The gate polls the checkpoint store for a reviewer's decision, keeping
//! the session lease alive across waits that outlast the lease TTL. Three
//! exits: approval moves to execution, rejection moves straight to the
//! report, and a rejection whose note starts with `more-evidence:` loops
//! the session back into analysis with a fresh round budget. A gate that
//! times out counts as "no approval" and the report says nothing was
//! executed.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use super::{SessionHandle, WorkflowEngine};
use crate::error::EngineResult;
use crate::session::{ApprovalStatus, Stage};
use crate::storage::ReviewChoice;

/// HUMAN_REVIEW: wait for a decision or time out.
///
/// `Ok(None)` means cancellation was observed while waiting.
pub(crate) async fn run_review(
    engine: &WorkflowEngine,
    handle: &mut SessionHandle,
) -> EngineResult<Option<Stage>> {
    let engine_cfg = &engine.config().engine;
    let poll = Duration::from_millis(engine_cfg.review_poll_ms.max(100));
    let deadline = Instant::now() + Duration::from_millis(engine_cfg.review_timeout_ms);

    let mutating = handle
        .session
        .fix_suggestions
        .as_deref()
        .map(|fixes| fixes.iter().filter(|f| f.mutating).count())
        .unwrap_or(0);
    info!(
        session_id = %handle.session.id,
        mutating_steps = mutating,
        timeout_ms = engine_cfg.review_timeout_ms,
        "Waiting for human review"
    );

    loop {
        if handle.cancel.is_cancelled() {
            info!(session_id = %handle.session.id, "Cancelled while awaiting review");
            return Ok(None);
        }

        if let Some(decision) = engine.store().load_review(&handle.session.id).await? {
            handle.session.review_note = decision.note.clone();

            if decision.wants_more_evidence() {
                info!(
                    session_id = %handle.session.id,
                    "Reviewer asked for more evidence; looping back to analysis"
                );
                // Consume the decision so the next gate visit waits fresh.
                engine.store().clear_review(&handle.session.id).await?;
                if let Some(note) = decision.note {
                    handle.session.context_notes.push(note);
                }
                handle.session.approval = ApprovalStatus::Pending;
                handle.session.termination = None;
                handle.session.round_limit =
                    handle.session.round + engine_cfg.max_rounds;
                return Ok(Some(Stage::Analyze));
            }

            return match decision.decision {
                ReviewChoice::Approved => {
                    info!(session_id = %handle.session.id, "Fixes approved");
                    handle.session.approval = ApprovalStatus::Approved;
                    Ok(Some(Stage::Execute))
                }
                ReviewChoice::Rejected => {
                    info!(session_id = %handle.session.id, "Fixes rejected");
                    handle.session.approval = ApprovalStatus::Rejected;
                    Ok(Some(Stage::Report))
                }
            };
        }

        if Instant::now() >= deadline {
            warn!(
                session_id = %handle.session.id,
                "Review timed out; finishing without execution"
            );
            handle.session.approval = ApprovalStatus::TimedOut;
            return Ok(Some(Stage::Report));
        }

        // Review waits can outlast the lease TTL.
        engine
            .store()
            .refresh_lease(&handle.session.id, &handle.holder, engine_cfg.lease_ttl_ms)
            .await?;
        tokio::time::sleep(poll).await;
    }
}
