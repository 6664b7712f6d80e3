//! Approved-fix execution and post-execution verification.
//!
//! Execution runs only the mutating steps of the approved fix list, only
//! through the configured kubectl binary, and at most once per session: a
//! resume that lands back in this stage finds the execution record and moves
//! on instead of re-running restarts. Each step is checkpointed before the
//! next starts, and a failed step stops the rest.
//!
//! Verification re-runs the baseline probe and compares unhealthy component
//! counts before and after.

use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use super::baseline;
use super::{SessionHandle, WorkflowEngine};
use crate::error::EngineResult;
use crate::session::{ExecutionRecord, FixSuggestion, VerificationResult};

/// Captured output cap per execution record.
const DETAIL_CHARS: usize = 2000;

/// EXECUTE: run approved mutating fix steps.
pub(crate) async fn run_execute(
    engine: &WorkflowEngine,
    handle: &mut SessionHandle,
) -> EngineResult<()> {
    if handle.session.execution.is_some() {
        warn!(
            session_id = %handle.session.id,
            "Execution already attempted; not re-running mutating steps"
        );
        return Ok(());
    }

    // Intent checkpoint: an empty execution record marks the attempt before
    // the first command runs.
    handle.session.execution = Some(Vec::new());
    handle.session.touch();
    engine.save_and_refresh(handle).await?;

    let steps: Vec<(usize, FixSuggestion)> = handle
        .session
        .fix_suggestions
        .as_deref()
        .unwrap_or_default()
        .iter()
        .enumerate()
        .filter(|(_, fix)| fix.mutating)
        .map(|(i, fix)| (i, fix.clone()))
        .collect();

    if steps.is_empty() {
        info!(session_id = %handle.session.id, "No mutating steps to execute");
        return Ok(());
    }

    let execute_enabled = engine.config().engine.execute_enabled;
    let kubectl_bin = engine.config().kube.kubectl_bin.clone();
    let step_timeout = Duration::from_millis(engine.config().engine.tool_timeout_ms);

    let mut halted = false;
    for (index, fix) in steps {
        let record = if halted {
            ExecutionRecord {
                step: index,
                description: fix.description.clone(),
                success: false,
                detail: Some("skipped: an earlier step failed".to_string()),
            }
        } else if !execute_enabled {
            ExecutionRecord {
                step: index,
                description: fix.description.clone(),
                success: false,
                detail: Some("skipped: execution disabled by configuration".to_string()),
            }
        } else {
            let record = run_step(index, &fix, &kubectl_bin, step_timeout).await;
            if !record.success {
                warn!(
                    session_id = %handle.session.id,
                    step = index,
                    "Mutating step failed; halting remaining steps"
                );
                halted = true;
            }
            record
        };

        info!(
            session_id = %handle.session.id,
            step = record.step,
            success = record.success,
            "Execution step recorded"
        );
        if let Some(execution) = handle.session.execution.as_mut() {
            execution.push(record);
        }
        handle.session.touch();
        engine.save_and_refresh(handle).await?;
    }

    Ok(())
}

/// Run one mutating step through the kubectl binary.
async fn run_step(
    index: usize,
    fix: &FixSuggestion,
    kubectl_bin: &str,
    timeout: Duration,
) -> ExecutionRecord {
    let mut record = ExecutionRecord {
        step: index,
        description: fix.description.clone(),
        success: false,
        detail: None,
    };

    let Some(argv) = fix.command.as_deref() else {
        record.detail = Some("refused: step has no runnable command".to_string());
        return record;
    };
    let Some((program, args)) = argv.split_first() else {
        record.detail = Some("refused: step command is empty".to_string());
        return record;
    };

    // Only the configured kubectl binary may run; suggestions are written
    // with a literal "kubectl" head that is rewritten here.
    let program = if program == "kubectl" {
        kubectl_bin
    } else {
        program.as_str()
    };
    if program != kubectl_bin {
        record.detail = Some(format!(
            "refused: only {} commands may be executed, got {}",
            kubectl_bin, program
        ));
        return record;
    }

    let output = tokio::time::timeout(
        timeout,
        Command::new(program).args(args).kill_on_drop(true).output(),
    )
    .await;

    match output {
        Err(_) => {
            record.detail = Some(format!("timed out after {}ms", timeout.as_millis()));
        }
        Ok(Err(e)) => {
            record.detail = Some(format!("failed to spawn {}: {}", program, e));
        }
        Ok(Ok(output)) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                if !combined.is_empty() {
                    combined.push('\n');
                }
                combined.push_str(stderr.trim());
            }
            record.success = output.status.success();
            if !record.success && combined.trim().is_empty() {
                combined = format!("exited with {}", output.status);
            }
            record.detail = Some(clip(&combined));
        }
    }
    record
}

fn clip(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= DETAIL_CHARS {
        trimmed.to_string()
    } else {
        let mut cut: String = trimmed.chars().take(DETAIL_CHARS).collect();
        cut.push('…');
        cut
    }
}

/// VERIFY: re-run the baseline probe and compare against the pre-execution
/// snapshot.
pub(crate) async fn run_verify(
    engine: &WorkflowEngine,
    handle: &mut SessionHandle,
) -> EngineResult<()> {
    let before = baseline::unhealthy_components(&handle.session);

    let (records, health) = baseline::collect_baseline(engine, handle.session.round).await;
    handle.session.tool_calls.extend(records);
    let after = baseline::record_snapshot(&mut handle.session, &health);

    let verification = VerificationResult {
        unhealthy_before: before.len(),
        unhealthy_after: after.len(),
        improved: after.len() < before.len(),
        still_unhealthy: after,
    };
    info!(
        session_id = %handle.session.id,
        before = verification.unhealthy_before,
        after = verification.unhealthy_after,
        improved = verification.improved,
        "Verification complete"
    );
    handle.session.verification = Some(verification);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_step_refuses_non_kubectl() {
        let fix = FixSuggestion::action(
            "remove everything",
            vec!["rm".to_string(), "-rf".to_string(), "/tmp/x".to_string()],
        );
        let record = run_step(0, &fix, "kubectl", Duration::from_secs(5)).await;
        assert!(!record.success);
        assert!(record.detail.as_deref().unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn test_run_step_refuses_missing_command() {
        let fix = FixSuggestion::manual("think about it");
        let record = run_step(2, &fix, "kubectl", Duration::from_secs(5)).await;
        assert!(!record.success);
        assert_eq!(record.step, 2);
        assert!(record.detail.as_deref().unwrap().contains("no runnable"));
    }

    #[tokio::test]
    async fn test_run_step_rewrites_kubectl_head() {
        // With /bin/echo as the kubectl binary, the literal "kubectl" head
        // is rewritten and the remaining argv is echoed back.
        let fix = FixSuggestion::action(
            "echo the restart",
            vec![
                "kubectl".to_string(),
                "rollout".to_string(),
                "restart".to_string(),
            ],
        );
        let record = run_step(0, &fix, "/bin/echo", Duration::from_secs(5)).await;
        assert!(record.success);
        assert!(record.detail.as_deref().unwrap().contains("rollout restart"));
    }

    #[tokio::test]
    async fn test_run_step_captures_failure() {
        let fix = FixSuggestion::action("always fails", vec!["kubectl".to_string()]);
        let record = run_step(0, &fix, "/bin/false", Duration::from_secs(5)).await;
        assert!(!record.success);
        assert!(record.detail.is_some());
    }

    #[tokio::test]
    async fn test_run_step_spawn_error() {
        let fix = FixSuggestion::action("cannot spawn", vec!["kubectl".to_string()]);
        let record = run_step(0, &fix, "/nonexistent/kubectl", Duration::from_secs(5)).await;
        assert!(!record.success);
        assert!(record.detail.as_deref().unwrap().contains("failed to spawn"));
    }

    #[test]
    fn test_clip_bounds_detail() {
        let long = "x".repeat(5000);
        let clipped = clip(&long);
        assert!(clipped.chars().count() <= DETAIL_CHARS + 1);
        assert!(clipped.ends_with('…'));
        assert_eq!(clip("short"), "short");
    }
}
