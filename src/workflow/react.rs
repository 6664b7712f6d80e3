//! The bounded tool-calling reasoning loop behind the analyze stage.
//!
//! Each round asks the oracle for the next step, runs the requested tool
//! batch, folds successes into the evidence log, and checkpoints twice per
//! batch: once with the pending records before dispatch (intent) and once
//! with the finished records after. A crash between the two leaves pending
//! records in the snapshot, which resume converts to failed-and-retryable.
//!
//! The loop never takes an oracle failure or an empty round down with it; it
//! records the problem, marks the termination reason, and lets downstream
//! stages produce a degraded but complete diagnosis.

use serde_json::Value;
use tracing::{debug, info, warn};

use super::{SessionHandle, WorkflowEngine};
use crate::error::{EngineResult, ErrorCode, ErrorEntry};
use crate::oracle::{DecideRequest, Decision, ToolRequest};
use crate::prompts::playbook_for;
use crate::session::{
    CallStatus, EvidenceItem, Session, TerminationReason, ToolCallRecord,
};
use crate::tools::ToolRegistry;

/// Per-evidence-item character cap inside the digest.
const DIGEST_ITEM_CHARS: usize = 600;

/// How the reasoning loop ended.
pub(crate) enum LoopEnd {
    /// The loop set a termination reason; move to root-cause analysis.
    Terminated,
    /// Cancellation was observed; the session is checkpointed mid-loop.
    Suspended,
}

/// ANALYZE: run reasoning rounds until conclusion, exhaustion, or stall.
pub(crate) async fn run_analyze(
    engine: &WorkflowEngine,
    handle: &mut SessionHandle,
) -> EngineResult<LoopEnd> {
    let max_rounds = engine.config().engine.max_rounds;
    let limit = if handle.session.round_limit == 0 {
        max_rounds
    } else {
        handle.session.round_limit
    };
    // Rounds before this visit belong to an earlier pass over the loop;
    // their successes may be re-collected for fresh evidence.
    let visit_start = limit.saturating_sub(max_rounds);

    loop {
        if handle.session.round >= limit {
            info!(
                session_id = %handle.session.id,
                rounds = handle.session.round,
                "Round budget exhausted without a conclusion"
            );
            handle.session.termination = Some(TerminationReason::Exhausted);
            break;
        }
        if handle.cancel.is_cancelled() {
            info!(session_id = %handle.session.id, "Cancelled between rounds");
            return Ok(LoopEnd::Suspended);
        }

        let round = handle.session.round + 1;
        let category = handle.session.category();
        let request = DecideRequest::new(
            &handle.session.id,
            &handle.session.symptom,
            category,
            round,
            limit,
        )
        .with_playbook(playbook_for(category))
        .with_tool_catalog(engine.scheduler().registry().catalog())
        .with_evidence_digest(evidence_digest(
            &handle.session,
            engine.config().engine.context_budget_chars,
        ))
        .with_notes(handle.session.context_notes.clone());

        let decision = match engine.oracle().decide(request).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    session_id = %handle.session.id,
                    round,
                    error = %e,
                    "Oracle unusable; treating round as stalled"
                );
                handle.session.record_error(ErrorEntry::new(
                    ErrorCode::from(&e),
                    "analyze",
                    e.to_string(),
                ));
                handle.session.termination = Some(TerminationReason::Stalled);
                break;
            }
        };

        handle.session.round = round;

        match decision {
            Decision::Conclude {
                summary,
                confidence,
            } => {
                info!(
                    session_id = %handle.session.id,
                    round,
                    confidence,
                    "Oracle concluded"
                );
                handle.session.conclusion = Some(summary);
                handle.session.conclusion_confidence = Some(confidence);
                handle.session.termination = Some(TerminationReason::Concluded);
                break;
            }
            Decision::Invoke(requests) => {
                let pending = prepare_batch(&handle.session, requests, round, visit_start);
                if pending.is_empty() {
                    info!(
                        session_id = %handle.session.id,
                        round,
                        "Round requested no new work; treating as stalled"
                    );
                    handle.session.termination = Some(TerminationReason::Stalled);
                    break;
                }

                debug!(
                    session_id = %handle.session.id,
                    round,
                    batch = pending.len(),
                    "Dispatching reasoning-round batch"
                );

                // Intent checkpoint: pending records are durable before any
                // call runs.
                handle.session.tool_calls.extend(pending.clone());
                handle.session.touch();
                engine.save_and_refresh(handle).await?;

                let finished = engine.scheduler().run_batch(pending).await;

                if handle.cancel.is_cancelled() {
                    // Discard the results; the pending records in the intent
                    // checkpoint become failed-and-retryable on resume.
                    info!(
                        session_id = %handle.session.id,
                        round,
                        "Cancelled during tool batch; results discarded"
                    );
                    return Ok(LoopEnd::Suspended);
                }

                apply_batch(
                    &mut handle.session,
                    engine.scheduler().registry(),
                    finished,
                );
                handle.session.touch();
                engine.save_and_refresh(handle).await?;
            }
        }
    }

    Ok(LoopEnd::Terminated)
}

/// Turn oracle tool requests into pending audit records.
///
/// Drops exact duplicates within the batch and calls that already succeeded
/// during this visit of the loop; successes from an earlier visit may be
/// repeated to refresh their evidence.
fn prepare_batch(
    session: &Session,
    requests: Vec<ToolRequest>,
    round: u32,
    visit_start: u32,
) -> Vec<ToolCallRecord> {
    let mut seen: Vec<(String, Value)> = Vec::new();
    let mut pending = Vec::new();

    for request in requests {
        let key = (request.tool.clone(), request.args.clone());
        if seen.contains(&key) {
            debug!(tool = %request.tool, "Dropping duplicate call within the batch");
            continue;
        }
        if let Some(prior) = session.succeeded_call(&request.tool, &request.args) {
            if prior.round > visit_start {
                debug!(
                    tool = %request.tool,
                    prior_round = prior.round,
                    "Suppressing repeat of an already-succeeded call"
                );
                continue;
            }
        }
        seen.push(key);
        pending.push(ToolCallRecord::new(request.tool, request.args, round));
    }

    pending
}

/// Fold a finished batch back into the session.
///
/// Each finished record replaces its pending twin by id; successes also
/// append an evidence item tagged with the tool's capability tag.
fn apply_batch(session: &mut Session, registry: &ToolRegistry, finished: Vec<ToolCallRecord>) {
    for record in finished {
        if record.status == CallStatus::Succeeded {
            let tag = registry
                .evidence_tag(&record.tool_name)
                .unwrap_or_else(|| record.tool_name.clone());
            let payload = record.result.clone().unwrap_or(Value::Null);
            session
                .evidence
                .push(EvidenceItem::new(tag, record.tool_name.clone(), payload));
        }

        match session.tool_calls.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record,
            None => session.tool_calls.push(record),
        }
    }
}

/// Render the evidence log into a budgeted digest for oracle context.
///
/// One line per effective (latest-per-tag) item; when the budget overflows,
/// the oldest lines are dropped first and the cut is marked.
pub(crate) fn evidence_digest(session: &Session, budget_chars: usize) -> String {
    let items = session.effective_evidence();
    if items.is_empty() {
        return "(no evidence collected yet)".to_string();
    }

    let lines: Vec<String> = items
        .iter()
        .map(|item| {
            format!(
                "- [{}] from {}: {}",
                item.tag,
                item.origin_tool,
                snippet(&item.payload, DIGEST_ITEM_CHARS)
            )
        })
        .collect();

    let mut total: usize = lines.iter().map(|l| l.chars().count() + 1).sum();
    let mut start = 0;
    while total > budget_chars && start + 1 < lines.len() {
        total -= lines[start].chars().count() + 1;
        start += 1;
    }

    let mut digest = String::new();
    if start > 0 {
        digest.push_str("(earlier evidence truncated)\n");
    }
    digest.push_str(&lines[start..].join("\n"));
    digest
}

fn snippet(payload: &Value, max_chars: usize) -> String {
    let text = match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() <= max_chars {
        text
    } else {
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push('…');
        cut
    }
}
