//! Decision oracle abstraction and HTTP client.
//!
//! The oracle makes the two judgment calls the engine cannot make from rules
//! alone: classifying a free-text symptom into a diagnostic category, and
//! choosing the next tool calls (or concluding) inside the reasoning loop.
//! Everything else about a round, scheduling, recording, and checkpointing,
//! stays in the engine, so the oracle can be swapped for a scripted one in
//! tests.

mod client;
mod types;

pub use client::HttpOracle;
pub use types::{
    ClassifyReply, ClassifyRequest, DecideReply, DecideRequest, Decision, Message, MessageRole,
    OracleReply, OracleRequest, ToolRequest,
};

use async_trait::async_trait;

use crate::error::OracleResult;
use crate::session::Classification;

/// Backend that makes classification and next-step decisions.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Classify a symptom into a diagnostic category.
    async fn classify(&self, request: ClassifyRequest) -> OracleResult<Classification>;

    /// Decide the next reasoning step: request tool calls or conclude.
    async fn decide(&self, request: DecideRequest) -> OracleResult<Decision>;
}
