//! Final report serialization.
//!
//! The report is the one artifact a user reads without the engine: the
//! diagnosis, the proposed and executed fixes, and the full audit trail of
//! calls, evidence, and errors. It is written atomically (temp file, then
//! rename) as `<session_id>.json` under the configured report directory, so
//! a re-run simply replaces the previous report for the session.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::ReportConfig;
use crate::error::{EngineError, EngineResult, ErrorEntry};
use crate::session::{
    ApprovalStatus, Classification, ExecutionRecord, FixSuggestion, OverallStatus,
    RootCauseResult, Session, SkippedCandidate, VerificationResult,
};

/// The serialized diagnostic report.
#[derive(Debug, Serialize)]
pub struct Report {
    /// Session the report belongs to.
    pub session_id: String,
    /// Overall outcome (`completed`, `max_rounds_reached`, `failed`,
    /// `not_executed_no_approval`).
    pub status: String,
    /// One-line diagnosis; `inconclusive` when no cause was determined.
    pub diagnosis: String,
    /// The symptom as reported.
    pub symptom: String,
    /// Classified diagnostic category.
    pub category: String,
    /// Full classification result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    /// The oracle's own conclusion, when it concluded explicitly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    /// Confidence the oracle attached to its conclusion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion_confidence: Option<f64>,
    /// The analyzer's root-cause hypothesis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<RootCauseResult>,
    /// Proposed remediation steps.
    pub fix_suggestions: Vec<FixSuggestion>,
    /// Review-gate outcome.
    pub approval: String,
    /// Reviewer's note, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_note: Option<String>,
    /// Set when fixes were proposed but never executed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_note: Option<String>,
    /// Per-step execution results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<Vec<ExecutionRecord>>,
    /// Post-execution verification outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    /// Why the reasoning loop stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination: Option<String>,
    /// Reasoning rounds used.
    pub rounds: u32,
    /// Effective evidence, truncated for readability.
    pub evidence: Vec<EvidenceSummary>,
    /// Full tool-call audit trail.
    pub tool_calls: Vec<ToolCallSummary>,
    /// Analyzers considered and disqualified.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_analyzers: Vec<SkippedCandidate>,
    /// Failures recorded along the way.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorEntry>,
    /// Context notes from review loop-backs.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    /// When the session started.
    pub created_at: DateTime<Utc>,
    /// When the report was written.
    pub finished_at: DateTime<Utc>,
}

/// One effective evidence item, payload clipped to the configured cap.
#[derive(Debug, Serialize)]
pub struct EvidenceSummary {
    /// Capability tag.
    pub tag: String,
    /// Tool that produced the data.
    pub origin_tool: String,
    /// Clipped payload text.
    pub payload: String,
    /// When the item was collected.
    pub collected_at: DateTime<Utc>,
}

/// One audited tool call.
#[derive(Debug, Serialize)]
pub struct ToolCallSummary {
    /// Tool name.
    pub tool: String,
    /// Final status.
    pub status: String,
    /// Reasoning round that requested the call; 0 for stage-level batches.
    pub round: u32,
    /// Wall-clock duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Error message for unsuccessful calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Report {
    /// Build a report from session state.
    pub fn from_session(session: &Session, config: &ReportConfig) -> Self {
        let status = session.overall_status();
        let diagnosis = match (&session.root_cause, status) {
            (_, OverallStatus::Failed) | (None, _) => "inconclusive".to_string(),
            (Some(rc), _) => rc.cause.clone(),
        };
        let execution_note = match session.approval {
            ApprovalStatus::Rejected | ApprovalStatus::TimedOut => {
                Some("not executed: no approval".to_string())
            }
            _ => None,
        };

        let evidence = session
            .effective_evidence()
            .into_iter()
            .map(|item| EvidenceSummary {
                tag: item.tag.clone(),
                origin_tool: item.origin_tool.clone(),
                payload: clip(&payload_text(&item.payload), config.max_field_chars),
                collected_at: item.collected_at,
            })
            .collect();

        let tool_calls = session
            .tool_calls
            .iter()
            .map(|record| ToolCallSummary {
                tool: record.tool_name.clone(),
                status: record.status.to_string(),
                round: record.round,
                duration_ms: record.duration_ms,
                error: record.error.clone(),
            })
            .collect();

        Self {
            session_id: session.id.clone(),
            status: status.to_string(),
            diagnosis,
            symptom: session.symptom.clone(),
            category: session.category().to_string(),
            classification: session.classification.clone(),
            conclusion: session.conclusion.clone(),
            conclusion_confidence: session.conclusion_confidence,
            root_cause: session.root_cause.clone(),
            fix_suggestions: session.fix_suggestions.clone().unwrap_or_default(),
            approval: session.approval.to_string(),
            review_note: session.review_note.clone(),
            execution_note,
            execution: session.execution.clone(),
            verification: session.verification.clone(),
            termination: session.termination.map(|t| t.to_string()),
            rounds: session.round,
            evidence,
            tool_calls,
            skipped_analyzers: session.skipped_analyzers.clone(),
            errors: session.errors.clone(),
            notes: session.context_notes.clone(),
            created_at: session.created_at,
            finished_at: Utc::now(),
        }
    }
}

/// Serialize the session's report to `<dir>/<session_id>.json`.
///
/// The write goes through a dotted temp file and a rename, so readers never
/// observe a half-written report.
pub fn write_report(session: &Session, config: &ReportConfig) -> EngineResult<PathBuf> {
    let report = Report::from_session(session, config);

    std::fs::create_dir_all(&config.dir).map_err(|e| EngineError::Report {
        message: format!("create {}: {}", config.dir.display(), e),
    })?;

    let path = config.dir.join(format!("{}.json", session.id));
    let tmp = config.dir.join(format!(".{}.json.tmp", session.id));

    let json = serde_json::to_string_pretty(&report).map_err(|e| EngineError::Report {
        message: format!("serialize report: {}", e),
    })?;
    std::fs::write(&tmp, json).map_err(|e| EngineError::Report {
        message: format!("write {}: {}", tmp.display(), e),
    })?;
    std::fs::rename(&tmp, &path).map_err(|e| EngineError::Report {
        message: format!("rename {}: {}", path.display(), e),
    })?;

    debug!(path = %path.display(), "Report written");
    Ok(path)
}

fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push_str("…[truncated]");
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::error::ErrorCode;
    use crate::session::{
        Category, EvidenceItem, Stage, TerminationReason, ToolCallRecord,
    };

    fn finished_session() -> Session {
        let mut session = Session::new("sess-report", "pods cannot reach the payments service");
        session.stage = Stage::Done;
        session.round = 3;
        session.classification = Some(Classification::new(
            Category::PodToService,
            0.85,
            "symptom names a service",
        ));
        session.record_evidence(EvidenceItem::new(
            "service_endpoints",
            "collect_service_endpoints",
            json!("NAME  ENDPOINTS\npayments  <none>"),
        ));
        session.tool_calls.push(
            ToolCallRecord::new("collect_service_endpoints", json!({"service": "payments"}), 1)
                .succeeded(json!("<none>"), 210),
        );
        session.termination = Some(TerminationReason::Concluded);
        session.conclusion = Some("the service has no backends".to_string());
        session.conclusion_confidence = Some(0.9);
        session.root_cause = Some(
            RootCauseResult::new(
                "the service has no ready endpoints; its selector matches no ready pods",
                0.9,
                "service_backend",
            )
            .with_evidence(vec!["service_endpoints".to_string()]),
        );
        session.fix_suggestions = Some(vec![FixSuggestion::manual(
            "fix the selector or the readiness probes",
        )]);
        session.approval = ApprovalStatus::Approved;
        session
    }

    #[test]
    fn test_report_reflects_diagnosis() {
        let report = Report::from_session(&finished_session(), &ReportConfig::default());
        assert_eq!(report.status, "completed");
        assert_eq!(report.category, "pod_to_service");
        assert!(report.diagnosis.contains("no ready endpoints"));
        assert_eq!(report.conclusion_confidence, Some(0.9));
        assert!(report.execution_note.is_none());
        assert_eq!(report.rounds, 3);
        assert_eq!(report.evidence.len(), 1);
        assert_eq!(report.tool_calls.len(), 1);
        assert_eq!(report.tool_calls[0].status, "succeeded");
    }

    #[test]
    fn test_report_marks_unapproved_execution() {
        let mut session = finished_session();
        session.approval = ApprovalStatus::TimedOut;
        let report = Report::from_session(&session, &ReportConfig::default());
        assert_eq!(report.status, "not_executed_no_approval");
        assert_eq!(
            report.execution_note.as_deref(),
            Some("not executed: no approval")
        );

        session.approval = ApprovalStatus::Rejected;
        let report = Report::from_session(&session, &ReportConfig::default());
        assert_eq!(
            report.execution_note.as_deref(),
            Some("not executed: no approval")
        );
    }

    #[test]
    fn test_failed_session_is_inconclusive_with_errors() {
        let mut session = finished_session();
        session.stage = Stage::Failed;
        session.record_error(ErrorEntry::new(
            ErrorCode::StorageError,
            "analyze",
            "checkpoint store failed",
        ));
        let report = Report::from_session(&session, &ReportConfig::default());
        assert_eq!(report.status, "failed");
        assert_eq!(report.diagnosis, "inconclusive");
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].code, ErrorCode::StorageError);
    }

    #[test]
    fn test_missing_root_cause_is_inconclusive() {
        let mut session = finished_session();
        session.root_cause = None;
        let report = Report::from_session(&session, &ReportConfig::default());
        assert_eq!(report.diagnosis, "inconclusive");
    }

    #[test]
    fn test_evidence_payload_clipped() {
        let mut session = finished_session();
        session.record_evidence(EvidenceItem::new(
            "pod_logs",
            "collect_pod_logs",
            json!("L".repeat(10_000)),
        ));
        let config = ReportConfig {
            max_field_chars: 100,
            ..ReportConfig::default()
        };
        let report = Report::from_session(&session, &config);
        let logs = report
            .evidence
            .iter()
            .find(|e| e.tag == "pod_logs")
            .unwrap();
        assert!(logs.payload.ends_with("…[truncated]"));
        assert!(logs.payload.chars().count() < 200);
    }

    #[test]
    fn test_write_report_atomic() {
        let dir = TempDir::new().unwrap();
        let config = ReportConfig {
            dir: dir.path().to_path_buf(),
            ..ReportConfig::default()
        };
        let session = finished_session();

        let path = write_report(&session, &config).unwrap();
        assert_eq!(path, dir.path().join("sess-report.json"));

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["session_id"], "sess-report");
        assert_eq!(parsed["status"], "completed");
        assert!(parsed["diagnosis"]
            .as_str()
            .unwrap()
            .contains("no ready endpoints"));

        // No temp file left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_write_report_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let config = ReportConfig {
            dir: dir.path().to_path_buf(),
            ..ReportConfig::default()
        };
        let mut session = finished_session();

        write_report(&session, &config).unwrap();
        session.approval = ApprovalStatus::Rejected;
        let path = write_report(&session, &config).unwrap();

        let parsed: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["approval"], "rejected");
    }
}
