//! The diagnostic workflow engine.
//!
//! A session moves strictly forward through the stage machine:
//!
//! ```text
//! collect -> classify -> analyze -> root_cause -> fix_suggest
//!                           ^                         |
//!                           |                         v
//!                           +----(more evidence)-- human_review
//!                                                     |
//!                                   approved          v
//!                              execute -> verify -> report -> done
//! ```
//!
//! Every stage transition writes a checkpoint; inside the analyze stage,
//! every tool batch writes two (intent before dispatch, results after). A
//! stage that fails puts the session into the terminal `failed` stage with
//! the error captured in a final checkpoint, so no run is ever lost; only a
//! broken checkpoint store aborts with an error. A single-writer lease keyed
//! by session id keeps two processes from driving the same session.

mod baseline;
mod execute;
mod fixes;
mod react;
mod report;
mod review;

pub use report::write_report;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::analyzers::{AnalyzerRegistry, GENERAL_ANALYZER};
use crate::config::Config;
use crate::error::{EngineError, EngineResult, ErrorCode, ErrorEntry};
use crate::oracle::{ClassifyRequest, DecisionOracle};
use crate::session::{Category, Classification, RootCauseResult, Session, Stage};
use crate::storage::CheckpointStore;
use crate::tools::ToolScheduler;

/// Cooperative cancellation flag shared with the caller.
///
/// Checked between stages and between reasoning rounds; in-flight tool calls
/// are left to finish but their results are discarded once the flag is
/// observed.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An exclusively held session, live for the duration of a run.
#[derive(Debug)]
pub struct SessionHandle {
    /// The session state the engine mutates stage by stage.
    pub session: Session,
    holder: String,
    cancel: CancelFlag,
}

impl SessionHandle {
    fn new(session: Session, holder: String) -> Self {
        Self {
            session,
            holder,
            cancel: CancelFlag::new(),
        }
    }

    /// Lease holder identity for this run.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Clone the cancellation flag for an external controller.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
}

/// Outcome of advancing a session by one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageResult {
    /// The stage completed and the session moved forward.
    Advanced {
        /// Stage that just ran.
        from: Stage,
        /// Stage the session will run next.
        to: Stage,
    },
    /// A terminal stage was reached.
    Finished {
        /// The terminal stage (`done` or `failed`).
        stage: Stage,
    },
    /// Cancellation was observed before the stage completed; the session is
    /// checkpointed mid-stage and resumable.
    Suspended {
        /// The stage that was interrupted.
        stage: Stage,
    },
}

/// Sequences a session through the diagnostic stages.
pub struct WorkflowEngine {
    store: Arc<dyn CheckpointStore>,
    oracle: Arc<dyn DecisionOracle>,
    scheduler: ToolScheduler,
    analyzers: AnalyzerRegistry,
    config: Config,
}

impl WorkflowEngine {
    /// Assemble an engine from its collaborators.
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        oracle: Arc<dyn DecisionOracle>,
        scheduler: ToolScheduler,
        analyzers: AnalyzerRegistry,
        config: Config,
    ) -> Self {
        Self {
            store,
            oracle,
            scheduler,
            analyzers,
            config,
        }
    }

    /// The checkpoint store backing this engine.
    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Begin a new session.
    ///
    /// Fails fast with [`EngineError::SessionBusy`] when another process
    /// holds the session lease, and with [`EngineError::SessionExists`] when
    /// checkpoints for the id already exist.
    pub async fn start(
        &self,
        session_id: &str,
        symptom: &str,
        analyzer_override: Option<String>,
    ) -> EngineResult<SessionHandle> {
        validate_session_id(session_id)?;
        if symptom.trim().is_empty() {
            return Err(EngineError::Config {
                message: "symptom must not be empty".to_string(),
            });
        }

        let holder = Uuid::new_v4().to_string();
        self.take_lease(session_id, &holder).await?;

        match self.start_inner(session_id, symptom, analyzer_override, &holder).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.drop_lease(session_id, &holder).await;
                Err(e)
            }
        }
    }

    async fn start_inner(
        &self,
        session_id: &str,
        symptom: &str,
        analyzer_override: Option<String>,
        holder: &str,
    ) -> EngineResult<SessionHandle> {
        if self.store.load_latest(session_id).await?.is_some() {
            return Err(EngineError::SessionExists {
                session_id: session_id.to_string(),
            });
        }

        let mut session = Session::new(session_id, symptom);
        session.round_limit = self.config.engine.max_rounds;
        if let Some(name) = analyzer_override {
            session = session.with_analyzer_override(name);
        }

        let handle = SessionHandle::new(session, holder.to_string());
        let seq = self.store.save(&handle.session).await?;

        info!(
            session_id = %handle.session.id,
            seq,
            "Session started"
        );
        Ok(handle)
    }

    /// Resume a session from its latest checkpoint.
    ///
    /// Pending tool calls found in the snapshot are marked
    /// failed-and-retryable; a session checkpointed in the `failed` stage
    /// re-enters analysis with a fresh round budget.
    pub async fn resume(&self, session_id: &str) -> EngineResult<SessionHandle> {
        validate_session_id(session_id)?;

        let holder = Uuid::new_v4().to_string();
        self.take_lease(session_id, &holder).await?;

        match self.resume_inner(session_id, &holder).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.drop_lease(session_id, &holder).await;
                Err(e)
            }
        }
    }

    async fn resume_inner(&self, session_id: &str, holder: &str) -> EngineResult<SessionHandle> {
        let checkpoint = self
            .store
            .load_latest(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;

        let mut session = checkpoint.session;

        let repaired = session.fail_pending_calls();
        if repaired > 0 {
            warn!(
                session_id,
                repaired, "Marked interrupted tool calls failed-and-retryable"
            );
        }

        if session.stage == Stage::Failed {
            info!(session_id, "Resuming failed session into re-analysis");
            session.stage = Stage::Analyze;
            session.termination = None;
            session.round_limit = session.round + self.config.engine.max_rounds;
        }
        if session.round_limit == 0 {
            session.round_limit = self.config.engine.max_rounds;
        }

        let handle = SessionHandle::new(session, holder.to_string());
        let seq = self.store.save(&handle.session).await?;

        info!(
            session_id,
            seq,
            stage = %handle.session.stage,
            "Session resumed"
        );
        Ok(handle)
    }

    /// Advance the session exactly one stage.
    ///
    /// Stage failures are captured into a terminal `failed` checkpoint and
    /// reported as [`StageResult::Finished`]; only checkpoint-store failures
    /// surface as errors.
    pub async fn step(&self, handle: &mut SessionHandle) -> EngineResult<StageResult> {
        let current = handle.session.stage;
        if current.is_terminal() {
            self.drop_lease(&handle.session.id, &handle.holder).await;
            return Ok(StageResult::Finished { stage: current });
        }
        if handle.cancel.is_cancelled() {
            info!(session_id = %handle.session.id, stage = %current, "Cancelled before stage");
            self.drop_lease(&handle.session.id, &handle.holder).await;
            return Ok(StageResult::Suspended { stage: current });
        }

        debug!(session_id = %handle.session.id, stage = %current, "Running stage");

        match self.run_stage(handle).await {
            Ok(Some(next)) => {
                handle.session.stage = next;
                handle.session.touch();
                self.save_or_release(handle).await?;

                if next.is_terminal() {
                    self.drop_lease(&handle.session.id, &handle.holder).await;
                    Ok(StageResult::Finished { stage: next })
                } else {
                    Ok(StageResult::Advanced {
                        from: current,
                        to: next,
                    })
                }
            }
            Ok(None) => {
                // Cancellation observed mid-stage; keep the partial progress
                // and release the lease for the next resume.
                self.save_or_release(handle).await?;
                self.drop_lease(&handle.session.id, &handle.holder).await;
                Ok(StageResult::Suspended { stage: current })
            }
            Err(EngineError::Store(e)) => {
                error!(
                    session_id = %handle.session.id,
                    stage = %current,
                    error = %e,
                    "Checkpoint store failed; aborting session"
                );
                handle.session.record_error(ErrorEntry::new(
                    ErrorCode::StorageError,
                    current.to_string(),
                    e.to_string(),
                ));
                handle.session.stage = Stage::Failed;
                // The store is already failing; these are best-effort.
                if let Err(save_err) = self.store.save(&handle.session).await {
                    warn!(error = %save_err, "Could not write failure checkpoint");
                }
                self.drop_lease(&handle.session.id, &handle.holder).await;
                Err(EngineError::Store(e))
            }
            Err(e) => {
                warn!(
                    session_id = %handle.session.id,
                    stage = %current,
                    error = %e,
                    "Stage failed; session marked failed"
                );
                let code = ErrorCode::from(&e);
                handle.session.record_error(ErrorEntry::new(
                    code,
                    current.to_string(),
                    e.to_string(),
                ));
                handle.session.stage = Stage::Failed;

                // Failure is still user-visible as a report; the checkpoint
                // is the durable record if this write fails.
                if let Err(report_err) = report::write_report(&handle.session, &self.config.report)
                {
                    warn!(error = %report_err, "Could not write failure report");
                }

                self.save_or_release(handle).await?;
                self.drop_lease(&handle.session.id, &handle.holder).await;
                Ok(StageResult::Finished {
                    stage: Stage::Failed,
                })
            }
        }
    }

    /// Run the session until it reaches a terminal stage or is cancelled.
    pub async fn run_to_completion(&self, handle: &mut SessionHandle) -> EngineResult<Stage> {
        loop {
            match self.step(handle).await? {
                StageResult::Advanced { from, to } => {
                    debug!(
                        session_id = %handle.session.id,
                        from = %from,
                        to = %to,
                        "Stage transition"
                    );
                }
                StageResult::Finished { stage } => return Ok(stage),
                StageResult::Suspended { stage } => {
                    info!(
                        session_id = %handle.session.id,
                        stage = %stage,
                        "Run suspended; resume to continue"
                    );
                    return Ok(stage);
                }
            }
        }
    }

    /// Dispatch the current stage. `Ok(None)` means cancellation was
    /// observed mid-stage.
    async fn run_stage(&self, handle: &mut SessionHandle) -> EngineResult<Option<Stage>> {
        match handle.session.stage {
            Stage::Collect => {
                baseline::run_collect(self, handle).await?;
                Ok(Some(Stage::Classify))
            }
            Stage::Classify => {
                self.classify(handle).await?;
                Ok(Some(Stage::Analyze))
            }
            Stage::Analyze => match react::run_analyze(self, handle).await? {
                react::LoopEnd::Terminated => Ok(Some(Stage::RootCause)),
                react::LoopEnd::Suspended => Ok(None),
            },
            Stage::RootCause => {
                self.root_cause(handle);
                Ok(Some(Stage::FixSuggest))
            }
            Stage::FixSuggest => {
                let suggestions = fixes::derive_fixes(&handle.session, &self.config.kube);
                info!(
                    session_id = %handle.session.id,
                    count = suggestions.len(),
                    "Fix suggestions derived"
                );
                handle.session.fix_suggestions = Some(suggestions);
                Ok(Some(Stage::HumanReview))
            }
            Stage::HumanReview => review::run_review(self, handle).await,
            Stage::Execute => {
                execute::run_execute(self, handle).await?;
                Ok(Some(Stage::Verify))
            }
            Stage::Verify => {
                execute::run_verify(self, handle).await?;
                Ok(Some(Stage::Report))
            }
            Stage::Report => {
                let path = report::write_report(&handle.session, &self.config.report)?;
                info!(
                    session_id = %handle.session.id,
                    path = %path.display(),
                    status = %handle.session.overall_status(),
                    "Report written"
                );
                Ok(Some(Stage::Done))
            }
            // Guarded by `step`; terminal stages never dispatch.
            Stage::Failed | Stage::Done => Ok(Some(handle.session.stage)),
        }
    }

    /// CLASSIFY: ask the oracle for a category, with a general fallback when
    /// the oracle is unusable or unsure.
    async fn classify(&self, handle: &mut SessionHandle) -> EngineResult<()> {
        let mut request = ClassifyRequest::new(&handle.session.id, &handle.session.symptom);
        if let Some(summary) = baseline::baseline_summary(&handle.session) {
            request = request.with_baseline(summary);
        }

        match self.oracle.classify(request).await {
            Ok(classification) => {
                if classification.confidence < self.config.engine.min_confidence
                    && classification.category != Category::General
                {
                    info!(
                        session_id = %handle.session.id,
                        category = %classification.category,
                        confidence = classification.confidence,
                        "Classification below confidence floor; using general"
                    );
                    handle.session.classification = Some(Classification::new(
                        Category::General,
                        classification.confidence,
                        format!(
                            "low-confidence {} classification: {}",
                            classification.category, classification.rationale
                        ),
                    ));
                } else {
                    info!(
                        session_id = %handle.session.id,
                        category = %classification.category,
                        confidence = classification.confidence,
                        "Symptom classified"
                    );
                    handle.session.classification = Some(classification);
                }
            }
            Err(e) => {
                warn!(
                    session_id = %handle.session.id,
                    error = %e,
                    "Classifier unavailable; falling back to general"
                );
                handle.session.record_error(ErrorEntry::new(
                    ErrorCode::from(&e),
                    "classify",
                    e.to_string(),
                ));
                handle.session.classification = Some(Classification::fallback(format!(
                    "classifier unavailable: {}",
                    e
                )));
            }
        }
        Ok(())
    }

    /// ROOT_CAUSE: dispatch one analyzer over the accumulated evidence.
    ///
    /// An exhausted or stalled reasoning loop gets the general analyzer's
    /// low-confidence verdict instead of a category-specific one.
    fn root_cause(&self, handle: &mut SessionHandle) {
        let exhausted = handle
            .session
            .termination
            .map(|t| t.is_exhausted())
            .unwrap_or(false);

        let result = if exhausted {
            info!(
                session_id = %handle.session.id,
                "Reasoning loop did not conclude; using the general analyzer"
            );
            match self.analyzers.get(GENERAL_ANALYZER) {
                Some(analyzer) => analyzer.analyze(&handle.session),
                None => inconclusive_result(),
            }
        } else {
            let selection = self.analyzers.select(&handle.session);
            handle.session.skipped_analyzers.extend(selection.skipped);
            match selection.analyzer {
                Some(analyzer) => analyzer.analyze(&handle.session),
                None => inconclusive_result(),
            }
        };

        info!(
            session_id = %handle.session.id,
            analyzer = %result.analyzer,
            confidence = result.confidence,
            "Root cause determined"
        );
        handle.session.root_cause = Some(result);
        handle.session.touch();
    }

    /// Checkpoint the session and keep the lease alive.
    ///
    /// A lease that expired while the process was stalled is re-acquired;
    /// if someone else took it over, the session is theirs now.
    pub(crate) async fn save_and_refresh(&self, handle: &SessionHandle) -> EngineResult<i64> {
        let ttl = self.config.engine.lease_ttl_ms;
        let renewed = self
            .store
            .refresh_lease(&handle.session.id, &handle.holder, ttl)
            .await?;
        if !renewed {
            let reacquired = self
                .store
                .acquire_lease(&handle.session.id, &handle.holder, ttl)
                .await?;
            if !reacquired {
                return Err(EngineError::SessionBusy {
                    session_id: handle.session.id.clone(),
                });
            }
        }
        Ok(self.store.save(&handle.session).await?)
    }

    /// Checkpoint via [`Self::save_and_refresh`], releasing the lease before
    /// a store failure propagates so the session does not stay locked until
    /// TTL expiry.
    async fn save_or_release(&self, handle: &SessionHandle) -> EngineResult<i64> {
        match self.save_and_refresh(handle).await {
            Ok(seq) => Ok(seq),
            Err(e) => {
                self.drop_lease(&handle.session.id, &handle.holder).await;
                Err(e)
            }
        }
    }

    async fn take_lease(&self, session_id: &str, holder: &str) -> EngineResult<()> {
        let acquired = self
            .store
            .acquire_lease(session_id, holder, self.config.engine.lease_ttl_ms)
            .await?;
        if !acquired {
            return Err(EngineError::SessionBusy {
                session_id: session_id.to_string(),
            });
        }
        Ok(())
    }

    async fn drop_lease(&self, session_id: &str, holder: &str) {
        if let Err(e) = self.store.release_lease(session_id, holder).await {
            warn!(session_id, error = %e, "Could not release session lease");
        }
    }

    pub(crate) fn oracle(&self) -> &Arc<dyn DecisionOracle> {
        &self.oracle
    }

    pub(crate) fn scheduler(&self) -> &ToolScheduler {
        &self.scheduler
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }
}

fn inconclusive_result() -> RootCauseResult {
    RootCauseResult::new("no analyzer available; diagnosis inconclusive", 0.0, "none")
}

// Ids become report filenames and database keys, so the charset is strict.
fn validate_session_id(session_id: &str) -> EngineResult<()> {
    if session_id.is_empty() || session_id.len() > 128 {
        return Err(EngineError::Config {
            message: "session id must be 1-128 characters".to_string(),
        });
    }
    if session_id.starts_with('.')
        || !session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(EngineError::Config {
            message: format!(
                "session id {:?} may only contain letters, digits, '-', '_', and '.'",
                session_id
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());

        let shared = flag.clone();
        shared.request();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_session_id_validation() {
        assert!(validate_session_id("sess-1").is_ok());
        assert!(validate_session_id("thread_42.a").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id(&"x".repeat(129)).is_err());
        assert!(validate_session_id("a/b").is_err());
        assert!(validate_session_id("..hidden").is_err());
        assert!(validate_session_id("with space").is_err());
    }

    #[test]
    fn test_inconclusive_result_shape() {
        let result = inconclusive_result();
        assert_eq!(result.analyzer, "none");
        assert_eq!(result.confidence, 0.0);
        assert!(result.cause.contains("inconclusive"));
    }
}
