//! Root-cause analyzers.
//!
//! An analyzer is a stateless strategy that turns accumulated evidence into
//! a root-cause verdict. Each one declares the diagnostic category it serves
//! and the evidence tags it cannot work without; the registry picks exactly
//! one per session from those declarations. Analysis itself is a pure
//! function of session evidence so a replayed session reaches the same
//! verdict.

mod builtin;
mod registry;

pub use builtin::{builtin_analyzers, register_builtin_analyzers, GENERAL_ANALYZER};
pub use registry::{AnalyzerRegistry, Selection};

use std::collections::BTreeSet;

use crate::session::{Category, RootCauseResult, Session};

/// Static declaration an analyzer registers under.
#[derive(Debug, Clone)]
pub struct AnalyzerMetadata {
    /// Registry name, lowercase snake_case.
    pub name: String,
    /// Diagnostic category this analyzer serves.
    pub category: Category,
    /// Evidence tags that must be present for the analyzer to qualify.
    pub required_tags: Vec<String>,
    /// Baseline applicability score; higher wins among qualifying peers.
    pub base_score: u32,
    /// One-line description for reports.
    pub description: String,
}

impl AnalyzerMetadata {
    /// Create a new metadata declaration.
    pub fn new(
        name: impl Into<String>,
        category: Category,
        required_tags: &[&str],
        base_score: u32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            required_tags: required_tags.iter().map(|t| t.to_string()).collect(),
            base_score,
            description: description.into(),
        }
    }

    /// Required tags missing from the given evidence tag set.
    pub fn missing_tags(&self, tags: &BTreeSet<String>) -> Vec<String> {
        self.required_tags
            .iter()
            .filter(|t| !tags.contains(*t))
            .cloned()
            .collect()
    }
}

/// A root-cause strategy.
pub trait Analyzer: Send + Sync {
    /// Registration metadata.
    fn metadata(&self) -> &AnalyzerMetadata;

    /// Applicability score given the evidence tags present.
    ///
    /// Defaults to the declared base score; analyzers that benefit from
    /// optional evidence can report higher when it is available.
    fn applicability(&self, _tags: &BTreeSet<String>) -> u32 {
        self.metadata().base_score
    }

    /// Produce a verdict from session evidence.
    ///
    /// Must depend only on the session's evidence and symptom, never on
    /// external state, so a resumed session re-derives the same result. An
    /// analyzer that cannot isolate a fault still returns a verdict, with
    /// confidence reflecting the uncertainty.
    fn analyze(&self, session: &Session) -> RootCauseResult;
}
