//! # Kube-OVN Triage Engine
//!
//! A resumable diagnostic engine for Kube-OVN overlay networks. A session
//! starts from a reported symptom, walks a fixed stage machine, and ends in
//! a JSON report; every stage transition is checkpointed to SQLite so an
//! interrupted run resumes exactly where it stopped.
//!
//! ## Features
//!
//! - **Staged workflow**: baseline collection, symptom classification, a
//!   bounded evidence-gathering loop, deterministic root-cause analysis,
//!   fix suggestion, human review, guarded execution, verification, report
//! - **Decision oracle**: an LLM endpoint picks diagnostic tools each round
//!   and decides when the evidence is conclusive
//! - **Checkpoints and leases**: full session snapshots per transition, with
//!   a lease keeping two processes off the same session
//! - **Human gate**: mutating fixes run only after an explicit approval, and
//!   a reviewer can send the session back for more evidence
//!
//! ## Architecture
//!
//! ```text
//! COLLECT → CLASSIFY → ANALYZE → ROOT_CAUSE → FIX_SUGGEST → HUMAN_REVIEW
//!                         ↑                                       │
//!                         └─ more evidence ───────────────────────┤
//!                                                                 ↓
//!                     REPORT ← VERIFY ← EXECUTE ←─ approved ──────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use ovn_triage::analyzers::{register_builtin_analyzers, AnalyzerRegistry};
//! use ovn_triage::oracle::HttpOracle;
//! use ovn_triage::storage::SqliteStore;
//! use ovn_triage::tools::{register_builtin_tools, ToolRegistry, ToolScheduler};
//! use ovn_triage::{Config, WorkflowEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(SqliteStore::new(&config.database).await?);
//!     let oracle = Arc::new(HttpOracle::new(&config.oracle, config.request.clone())?);
//!
//!     let mut tools = ToolRegistry::new();
//!     register_builtin_tools(&mut tools, &config.kube)?;
//!     let scheduler = ToolScheduler::new(
//!         Arc::new(tools),
//!         config.engine.tool_concurrency,
//!         config.engine.tool_timeout_ms,
//!     );
//!
//!     let mut analyzers = AnalyzerRegistry::new();
//!     register_builtin_analyzers(&mut analyzers)?;
//!
//!     let engine = WorkflowEngine::new(store, oracle, scheduler, analyzers, config);
//!     let mut handle = engine
//!         .start("sess-1", "pod cannot reach its service", None)
//!         .await?;
//!     let stage = engine.run_to_completion(&mut handle).await?;
//!     println!("finished at {stage}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Root-cause analyzers and their selection registry.
pub mod analyzers;
/// Configuration management for the engine.
pub mod config;
/// Error types and result aliases for the engine.
pub mod error;
/// Decision oracle trait, request/response types, and HTTP client.
pub mod oracle;
/// System prompts and per-category diagnostic playbooks.
pub mod prompts;
/// Session state: stages, evidence, tool calls, verdicts.
pub mod session;
/// Checkpoint store trait and SQLite implementation.
pub mod storage;
/// Diagnostic tool registry and bounded-concurrency scheduler.
pub mod tools;
/// The stage machine driving a session from symptom to report.
pub mod workflow;

pub use config::Config;
pub use error::{EngineError, EngineResult};
pub use session::{Session, Stage};
pub use workflow::{CancelFlag, SessionHandle, StageResult, WorkflowEngine};
