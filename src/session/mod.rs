//! Session data model for diagnostic runs.
//!
//! A [`Session`] is one end-to-end diagnostic run: the symptom, the stage the
//! workflow is in, accumulated evidence, the tool-call audit trail, and the
//! eventual root cause and remediation suggestions. Sessions are serialized
//! whole into checkpoints, so everything here derives serde.

use std::collections::BTreeSet;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorEntry;

/// Stage of the diagnostic workflow state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Fast baseline health snapshot of the overlay control plane.
    Collect,
    /// Symptom classification into a diagnostic category.
    Classify,
    /// Bounded tool-calling reasoning loop.
    Analyze,
    /// Analyzer dispatch over accumulated evidence.
    RootCause,
    /// Remediation derivation from the root cause.
    FixSuggest,
    /// Blocking human-approval gate.
    HumanReview,
    /// Approved mutating fixes (optional).
    Execute,
    /// Post-execution baseline re-check (optional).
    Verify,
    /// Final report serialization.
    Report,
    /// Terminal: unrecoverable stage error captured.
    Failed,
    /// Terminal: run finished.
    Done,
}

impl Stage {
    /// Whether the stage ends the workflow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Failed | Stage::Done)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Collect => write!(f, "collect"),
            Stage::Classify => write!(f, "classify"),
            Stage::Analyze => write!(f, "analyze"),
            Stage::RootCause => write!(f, "root_cause"),
            Stage::FixSuggest => write!(f, "fix_suggest"),
            Stage::HumanReview => write!(f, "human_review"),
            Stage::Execute => write!(f, "execute"),
            Stage::Verify => write!(f, "verify"),
            Stage::Report => write!(f, "report"),
            Stage::Failed => write!(f, "failed"),
            Stage::Done => write!(f, "done"),
        }
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "collect" => Ok(Stage::Collect),
            "classify" => Ok(Stage::Classify),
            "analyze" => Ok(Stage::Analyze),
            "root_cause" => Ok(Stage::RootCause),
            "fix_suggest" => Ok(Stage::FixSuggest),
            "human_review" => Ok(Stage::HumanReview),
            "execute" => Ok(Stage::Execute),
            "verify" => Ok(Stage::Verify),
            "report" => Ok(Stage::Report),
            "failed" => Ok(Stage::Failed),
            "done" => Ok(Stage::Done),
            _ => Err(format!("Unknown stage: {}", s)),
        }
    }
}

/// Diagnostic category assigned by classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Catch-all when no specific scenario matches.
    #[default]
    General,
    /// Two pods on the same node cannot reach each other.
    PodToPod,
    /// Pods on different nodes cannot reach each other.
    PodToPodCrossNode,
    /// A pod cannot reach a cluster service VIP.
    PodToService,
    /// A pod cannot reach an address outside the cluster.
    PodToExternal,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::General => write!(f, "general"),
            Category::PodToPod => write!(f, "pod_to_pod"),
            Category::PodToPodCrossNode => write!(f, "pod_to_pod_cross_node"),
            Category::PodToService => write!(f, "pod_to_service"),
            Category::PodToExternal => write!(f, "pod_to_external"),
        }
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "general" => Ok(Category::General),
            "pod_to_pod" => Ok(Category::PodToPod),
            "pod_to_pod_cross_node" => Ok(Category::PodToPodCrossNode),
            "pod_to_service" => Ok(Category::PodToService),
            "pod_to_external" => Ok(Category::PodToExternal),
            _ => Err(format!("Unknown category: {}", s)),
        }
    }
}

/// Result of the classify stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Assigned diagnostic category.
    pub category: Category,
    /// Confidence in the assignment (0.0-1.0).
    pub confidence: f64,
    /// Short explanation for the assignment.
    pub rationale: String,
}

impl Classification {
    /// Create a new classification.
    pub fn new(category: Category, confidence: f64, rationale: impl Into<String>) -> Self {
        Self {
            category,
            confidence: confidence.clamp(0.0, 1.0),
            rationale: rationale.into(),
        }
    }

    /// Zero-confidence fallback when classification is unavailable or
    /// unusable.
    pub fn fallback(rationale: impl Into<String>) -> Self {
        Self {
            category: Category::General,
            confidence: 0.0,
            rationale: rationale.into(),
        }
    }
}

/// Status of one tool call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Scheduled but not yet finished.
    #[default]
    Pending,
    /// Finished and the collector reported success.
    Succeeded,
    /// Finished with a failure, or interrupted before completion.
    Failed,
    /// Exceeded the per-call timeout.
    TimedOut,
}

impl CallStatus {
    /// Whether the record will no longer change.
    pub fn is_final(&self) -> bool {
        !matches!(self, CallStatus::Pending)
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallStatus::Pending => write!(f, "pending"),
            CallStatus::Succeeded => write!(f, "succeeded"),
            CallStatus::Failed => write!(f, "failed"),
            CallStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

impl std::str::FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(CallStatus::Pending),
            "succeeded" => Ok(CallStatus::Succeeded),
            "failed" => Ok(CallStatus::Failed),
            "timed_out" => Ok(CallStatus::TimedOut),
            _ => Err(format!("Unknown call status: {}", s)),
        }
    }
}

/// Audit record for one tool invocation.
///
/// Append-only: once status leaves pending the record is never edited, only
/// replaced wholesale when the batch that produced it completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Unique record identifier.
    pub id: String,
    /// Name of the invoked tool.
    pub tool_name: String,
    /// Arguments as a JSON object.
    pub args: serde_json::Value,
    /// Current status.
    pub status: CallStatus,
    /// Result payload (if succeeded).
    pub result: Option<serde_json::Value>,
    /// Error message (if failed or timed out).
    pub error: Option<String>,
    /// Wall-clock duration in milliseconds (once finished).
    pub duration_ms: Option<i64>,
    /// Reasoning round that requested the call; 0 for stage-level batches.
    pub round: u32,
}

impl ToolCallRecord {
    /// Create a new pending record.
    pub fn new(tool_name: impl Into<String>, args: serde_json::Value, round: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            args,
            status: CallStatus::Pending,
            result: None,
            error: None,
            duration_ms: None,
            round,
        }
    }

    /// Mark as succeeded with a result payload.
    pub fn succeeded(mut self, result: serde_json::Value, duration_ms: i64) -> Self {
        self.status = CallStatus::Succeeded;
        self.result = Some(result);
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Mark as failed with an error message.
    pub fn failed(mut self, error: impl Into<String>, duration_ms: i64) -> Self {
        self.status = CallStatus::Failed;
        self.error = Some(error.into());
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Mark as timed out.
    pub fn timed_out(mut self, duration_ms: i64) -> Self {
        self.status = CallStatus::TimedOut;
        self.error = Some("per-call timeout exceeded".to_string());
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// A tagged, timestamped unit of collected diagnostic data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Capability tag used for analyzer matching; later items with the same
    /// tag supersede earlier ones.
    pub tag: String,
    /// Tool that produced the data.
    pub origin_tool: String,
    /// Collected payload.
    pub payload: serde_json::Value,
    /// When the item was recorded.
    pub collected_at: DateTime<Utc>,
}

impl EvidenceItem {
    /// Create a new evidence item.
    pub fn new(
        tag: impl Into<String>,
        origin_tool: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            tag: tag.into(),
            origin_tool: origin_tool.into(),
            payload,
            collected_at: Utc::now(),
        }
    }
}

/// Root-cause hypothesis produced by an analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCauseResult {
    /// The hypothesized cause.
    pub cause: String,
    /// Confidence in the hypothesis (0.0-1.0).
    pub confidence: f64,
    /// Capability tags of the evidence that supports the hypothesis.
    pub supporting_evidence: Vec<String>,
    /// Name of the analyzer that produced the result.
    pub analyzer: String,
}

impl RootCauseResult {
    /// Create a new root-cause result.
    pub fn new(cause: impl Into<String>, confidence: f64, analyzer: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            confidence: confidence.clamp(0.0, 1.0),
            supporting_evidence: Vec::new(),
            analyzer: analyzer.into(),
        }
    }

    /// Attach supporting evidence tags.
    pub fn with_evidence(mut self, tags: Vec<String>) -> Self {
        self.supporting_evidence = tags;
        self
    }
}

/// One remediation step derived from a root cause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixSuggestion {
    /// What the step does and why.
    pub description: String,
    /// Concrete command as an argument vector, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Whether running the step changes cluster state.
    pub mutating: bool,
}

impl FixSuggestion {
    /// A read-only check step.
    pub fn check(description: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            description: description.into(),
            command: Some(command),
            mutating: false,
        }
    }

    /// A mutating remediation step.
    pub fn action(description: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            description: description.into(),
            command: Some(command),
            mutating: true,
        }
    }

    /// A manual step with no runnable command.
    pub fn manual(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            command: None,
            mutating: false,
        }
    }
}

/// Outcome of the human-review gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// No decision recorded yet.
    #[default]
    Pending,
    /// Reviewer approved execution.
    Approved,
    /// Reviewer rejected execution.
    Rejected,
    /// The gate timed out without a decision.
    TimedOut,
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalStatus::Pending => write!(f, "pending"),
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
            ApprovalStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            "timed_out" => Ok(ApprovalStatus::TimedOut),
            _ => Err(format!("Unknown approval status: {}", s)),
        }
    }
}

/// Why the reasoning loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The oracle signaled an explicit conclusion.
    Concluded,
    /// The round budget ran out.
    Exhausted,
    /// A round produced neither tool calls nor a conclusion.
    Stalled,
}

impl TerminationReason {
    /// Whether the loop ended without a real conclusion.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, TerminationReason::Exhausted | TerminationReason::Stalled)
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::Concluded => write!(f, "concluded"),
            TerminationReason::Exhausted => write!(f, "exhausted"),
            TerminationReason::Stalled => write!(f, "stalled"),
        }
    }
}

impl std::str::FromStr for TerminationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "concluded" => Ok(TerminationReason::Concluded),
            "exhausted" => Ok(TerminationReason::Exhausted),
            "stalled" => Ok(TerminationReason::Stalled),
            _ => Err(format!("Unknown termination reason: {}", s)),
        }
    }
}

/// A note about an analyzer that was considered and disqualified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedCandidate {
    /// Analyzer name.
    pub analyzer: String,
    /// Why it was skipped (e.g. a missing capability tag).
    pub reason: String,
}

/// Result of executing one approved fix step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Index into the fix-suggestion list.
    pub step: usize,
    /// Step description at execution time.
    pub description: String,
    /// Whether the step succeeded.
    pub success: bool,
    /// Captured output or error detail.
    pub detail: Option<String>,
}

/// Outcome of the post-execution verification pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Unhealthy component count before execution.
    pub unhealthy_before: usize,
    /// Unhealthy component count after execution.
    pub unhealthy_after: usize,
    /// Whether the cluster looks healthier than before.
    pub improved: bool,
    /// Components still unhealthy after execution.
    pub still_unhealthy: Vec<String>,
}

/// Overall outcome recorded in the final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// Diagnosis concluded normally.
    Completed,
    /// The reasoning loop ran out of rounds; diagnosis is a fallback.
    MaxRoundsReached,
    /// The session hit an unrecoverable error.
    Failed,
    /// Diagnosis finished but no approval arrived, so nothing was executed.
    NotExecutedNoApproval,
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverallStatus::Completed => write!(f, "completed"),
            OverallStatus::MaxRoundsReached => write!(f, "max_rounds_reached"),
            OverallStatus::Failed => write!(f, "failed"),
            OverallStatus::NotExecutedNoApproval => write!(f, "not_executed_no_approval"),
        }
    }
}

/// One end-to-end diagnostic run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Caller-supplied stable identifier (thread id).
    pub id: String,
    /// Stage the workflow will run next.
    pub stage: Stage,
    /// Completed reasoning rounds in the analyze stage.
    pub round: u32,
    /// Round ceiling for the reasoning loop; zero means "use the configured
    /// default". Raised when review loops the session back for more
    /// evidence, so re-analysis gets a fresh budget.
    #[serde(default)]
    pub round_limit: u32,
    /// Free-text symptom description.
    pub symptom: String,
    /// Extra context appended by review loop-backs.
    pub context_notes: Vec<String>,
    /// Classification result (after classify).
    pub classification: Option<Classification>,
    /// Append-only evidence log.
    pub evidence: Vec<EvidenceItem>,
    /// Append-only tool-call audit trail.
    pub tool_calls: Vec<ToolCallRecord>,
    /// Why the reasoning loop stopped (after analyze).
    pub termination: Option<TerminationReason>,
    /// The oracle's conclusion summary, when it concluded explicitly.
    pub conclusion: Option<String>,
    /// Confidence the oracle attached to its conclusion.
    #[serde(default)]
    pub conclusion_confidence: Option<f64>,
    /// Root-cause hypothesis (after root_cause).
    pub root_cause: Option<RootCauseResult>,
    /// Remediation steps (after fix_suggest).
    pub fix_suggestions: Option<Vec<FixSuggestion>>,
    /// Human-review outcome.
    pub approval: ApprovalStatus,
    /// Reviewer's note, if any.
    pub review_note: Option<String>,
    /// Per-step execution results (after execute).
    pub execution: Option<Vec<ExecutionRecord>>,
    /// Verification outcome (after verify).
    pub verification: Option<VerificationResult>,
    /// Analyzers considered and disqualified during selection.
    pub skipped_analyzers: Vec<SkippedCandidate>,
    /// Recorded failures, by stage.
    pub errors: Vec<ErrorEntry>,
    /// Registry override requested by the caller.
    pub analyzer_override: Option<String>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new session at the collect stage.
    pub fn new(id: impl Into<String>, symptom: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            stage: Stage::Collect,
            round: 0,
            round_limit: 0,
            symptom: symptom.into(),
            context_notes: Vec::new(),
            classification: None,
            evidence: Vec::new(),
            tool_calls: Vec::new(),
            termination: None,
            conclusion: None,
            conclusion_confidence: None,
            root_cause: None,
            fix_suggestions: None,
            approval: ApprovalStatus::Pending,
            review_note: None,
            execution: None,
            verification: None,
            skipped_analyzers: Vec::new(),
            errors: Vec::new(),
            analyzer_override: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Request a specific analyzer instead of registry selection.
    pub fn with_analyzer_override(mut self, name: impl Into<String>) -> Self {
        self.analyzer_override = Some(name.into());
        self
    }

    /// The classified category, falling back to general before classify has
    /// run.
    pub fn category(&self) -> Category {
        self.classification
            .as_ref()
            .map(|c| c.category)
            .unwrap_or_default()
    }

    /// Append an evidence item and bump the update timestamp.
    pub fn record_evidence(&mut self, item: EvidenceItem) {
        self.evidence.push(item);
        self.touch();
    }

    /// Record a failure in the audit trail.
    pub fn record_error(&mut self, entry: ErrorEntry) {
        self.errors.push(entry);
        self.touch();
    }

    /// Latest evidence item per tag, in first-appearance tag order.
    ///
    /// Re-collection supersedes by tag; the raw log keeps everything for
    /// audit.
    pub fn effective_evidence(&self) -> Vec<&EvidenceItem> {
        let mut order: Vec<&str> = Vec::new();
        let mut latest: HashMap<&str, &EvidenceItem> = HashMap::new();
        for item in &self.evidence {
            if !latest.contains_key(item.tag.as_str()) {
                order.push(item.tag.as_str());
            }
            latest.insert(item.tag.as_str(), item);
        }
        order
            .into_iter()
            .filter_map(|tag| latest.get(tag).copied())
            .collect()
    }

    /// Capability tags currently present in the evidence log.
    pub fn evidence_tags(&self) -> BTreeSet<String> {
        self.evidence.iter().map(|item| item.tag.clone()).collect()
    }

    /// Find the most recent successful call with the same name and
    /// arguments.
    ///
    /// Latest-match matters for duplicate suppression: after a loop-back
    /// the round of the newest repeat decides whether a call counts as
    /// fresh, not the round of its first occurrence.
    pub fn succeeded_call(
        &self,
        tool_name: &str,
        args: &serde_json::Value,
    ) -> Option<&ToolCallRecord> {
        self.tool_calls.iter().rev().find(|record| {
            record.status == CallStatus::Succeeded
                && record.tool_name == tool_name
                && &record.args == args
        })
    }

    /// Convert any pending call records into failed-and-retryable ones.
    ///
    /// Called on resume: a pending record in a checkpoint means the process
    /// died mid-batch, so the call never reported completion.
    pub fn fail_pending_calls(&mut self) -> usize {
        let mut repaired = 0;
        for record in &mut self.tool_calls {
            if record.status == CallStatus::Pending {
                record.status = CallStatus::Failed;
                record.error = Some("interrupted before completion; retryable".to_string());
                repaired += 1;
            }
        }
        if repaired > 0 {
            self.touch();
        }
        repaired
    }

    /// Derive the overall outcome for the final report.
    pub fn overall_status(&self) -> OverallStatus {
        if self.stage == Stage::Failed {
            return OverallStatus::Failed;
        }
        if self.termination.map(|t| t.is_exhausted()).unwrap_or(false) {
            return OverallStatus::MaxRoundsReached;
        }
        match self.approval {
            ApprovalStatus::Rejected | ApprovalStatus::TimedOut => {
                OverallStatus::NotExecutedNoApproval
            }
            _ => OverallStatus::Completed,
        }
    }

    /// Bump the update timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
