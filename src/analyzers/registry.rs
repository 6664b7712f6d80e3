//! Analyzer registration and deterministic selection.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::analyzers::Analyzer;
use crate::error::{AnalyzerError, AnalyzerResult};
use crate::session::{Category, Session, SkippedCandidate};

/// Outcome of analyzer selection.
pub struct Selection {
    /// The chosen analyzer; `None` only when nothing in the registry
    /// qualifies, including the fallback tier.
    pub analyzer: Option<Arc<dyn Analyzer>>,
    /// Candidates that were considered and disqualified, with reasons.
    pub skipped: Vec<SkippedCandidate>,
}

/// Holds registered analyzers in registration order.
///
/// Selection is deterministic: the same category and evidence tags always
/// pick the same analyzer, with registration order breaking score ties.
pub struct AnalyzerRegistry {
    analyzers: Vec<Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            analyzers: Vec::new(),
        }
    }

    /// Register an analyzer, validating its name.
    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) -> AnalyzerResult<()> {
        let name = analyzer.metadata().name.clone();

        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(AnalyzerError::Registration {
                message: format!("invalid analyzer name: {:?}", name),
            });
        }
        if self.get(&name).is_some() {
            return Err(AnalyzerError::Registration {
                message: format!("duplicate analyzer name: {}", name),
            });
        }

        self.analyzers.push(analyzer);
        Ok(())
    }

    /// Look up an analyzer by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Analyzer>> {
        self.analyzers
            .iter()
            .find(|a| a.metadata().name == name)
            .cloned()
    }

    /// Registered analyzer names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.analyzers
            .iter()
            .map(|a| a.metadata().name.clone())
            .collect()
    }

    /// Number of registered analyzers.
    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    /// Pick one analyzer for the session.
    ///
    /// An explicit override is honored when it is registered and its
    /// dependencies are met; otherwise it is noted as skipped and selection
    /// proceeds normally. Candidates matching the session category are
    /// filtered by required tags, then ranked by applicability score. When
    /// none qualify, general-purpose analyzers are tried the same way.
    pub fn select(&self, session: &Session) -> Selection {
        let tags = session.evidence_tags();
        let mut skipped = Vec::new();

        if let Some(name) = &session.analyzer_override {
            match self.get(name) {
                None => skipped.push(SkippedCandidate {
                    analyzer: name.clone(),
                    reason: "override not registered; using automatic selection".to_string(),
                }),
                Some(analyzer) => {
                    let missing = analyzer.metadata().missing_tags(&tags);
                    if missing.is_empty() {
                        debug!(analyzer = %name, "Using analyzer override");
                        return Selection {
                            analyzer: Some(analyzer),
                            skipped,
                        };
                    }
                    skipped.push(SkippedCandidate {
                        analyzer: name.clone(),
                        reason: AnalyzerError::DependencyUnmet {
                            analyzer: name.clone(),
                            missing,
                        }
                        .to_string(),
                    });
                }
            }
        }

        let category = session.category();
        let mut pick = self.pick_in(category, &tags, &mut skipped);
        if pick.is_none() && category != Category::General {
            pick = self.pick_in(Category::General, &tags, &mut skipped);
        }

        if let Some(analyzer) = &pick {
            debug!(
                analyzer = %analyzer.metadata().name,
                category = %category,
                skipped = skipped.len(),
                "Selected analyzer"
            );
        }

        Selection {
            analyzer: pick,
            skipped,
        }
    }

    /// Best qualifying analyzer within one category tier.
    fn pick_in(
        &self,
        category: Category,
        tags: &BTreeSet<String>,
        skipped: &mut Vec<SkippedCandidate>,
    ) -> Option<Arc<dyn Analyzer>> {
        let mut best: Option<(u32, Arc<dyn Analyzer>)> = None;

        for analyzer in &self.analyzers {
            let meta = analyzer.metadata();
            if meta.category != category {
                continue;
            }

            let missing = meta.missing_tags(tags);
            if !missing.is_empty() {
                skipped.push(SkippedCandidate {
                    analyzer: meta.name.clone(),
                    reason: AnalyzerError::DependencyUnmet {
                        analyzer: meta.name.clone(),
                        missing,
                    }
                    .to_string(),
                });
                continue;
            }

            let score = analyzer.applicability(tags);
            // Strict comparison keeps the earliest registration on ties.
            if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                best = Some((score, Arc::clone(analyzer)));
            }
        }

        best.map(|(_, analyzer)| analyzer)
    }
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::AnalyzerMetadata;
    use crate::session::{EvidenceItem, RootCauseResult};
    use serde_json::json;

    struct FixedAnalyzer {
        meta: AnalyzerMetadata,
    }

    impl FixedAnalyzer {
        fn new(name: &str, category: Category, required: &[&str], score: u32) -> Arc<Self> {
            Arc::new(Self {
                meta: AnalyzerMetadata::new(name, category, required, score, "test analyzer"),
            })
        }
    }

    impl Analyzer for FixedAnalyzer {
        fn metadata(&self) -> &AnalyzerMetadata {
            &self.meta
        }

        fn analyze(&self, _session: &Session) -> RootCauseResult {
            RootCauseResult::new("fixed", 0.5, &self.meta.name)
        }
    }

    fn session_with_tags(category: Category, tags: &[&str]) -> Session {
        let mut session = Session::new("sess-select", "pods cannot reach each other");
        session.classification = Some(crate::session::Classification::new(category, 0.9, "test"));
        for tag in tags {
            session.record_evidence(EvidenceItem::new(*tag, "test_tool", json!("data")));
        }
        session
    }

    #[test]
    fn test_select_by_category_and_tags() {
        let mut registry = AnalyzerRegistry::new();
        registry
            .register(FixedAnalyzer::new("general", Category::General, &[], 1))
            .unwrap();
        registry
            .register(FixedAnalyzer::new(
                "pod_pair",
                Category::PodToPod,
                &["ovn_trace"],
                10,
            ))
            .unwrap();

        let session = session_with_tags(Category::PodToPod, &["ovn_trace", "pod_describe"]);
        let selection = registry.select(&session);
        assert_eq!(
            selection.analyzer.unwrap().metadata().name,
            "pod_pair"
        );
        assert!(selection.skipped.is_empty());
    }

    #[test]
    fn test_missing_dependency_disqualifies_and_is_noted() {
        let mut registry = AnalyzerRegistry::new();
        registry
            .register(FixedAnalyzer::new("general", Category::General, &[], 1))
            .unwrap();
        registry
            .register(FixedAnalyzer::new(
                "pod_pair",
                Category::PodToPod,
                &["ovn_trace"],
                10,
            ))
            .unwrap();

        let session = session_with_tags(Category::PodToPod, &["pod_describe"]);
        let selection = registry.select(&session);

        assert_eq!(selection.analyzer.unwrap().metadata().name, "general");
        assert_eq!(selection.skipped.len(), 1);
        assert_eq!(selection.skipped[0].analyzer, "pod_pair");
        assert!(selection.skipped[0].reason.contains("ovn_trace"));
    }

    #[test]
    fn test_highest_score_wins_and_ties_keep_registration_order() {
        let mut registry = AnalyzerRegistry::new();
        registry
            .register(FixedAnalyzer::new("first", Category::PodToPod, &[], 5))
            .unwrap();
        registry
            .register(FixedAnalyzer::new("second", Category::PodToPod, &[], 5))
            .unwrap();
        registry
            .register(FixedAnalyzer::new("third", Category::PodToPod, &[], 8))
            .unwrap();

        let session = session_with_tags(Category::PodToPod, &[]);
        assert_eq!(
            registry.select(&session).analyzer.unwrap().metadata().name,
            "third"
        );

        let mut tied = AnalyzerRegistry::new();
        tied.register(FixedAnalyzer::new("first", Category::PodToPod, &[], 5))
            .unwrap();
        tied.register(FixedAnalyzer::new("second", Category::PodToPod, &[], 5))
            .unwrap();
        assert_eq!(
            tied.select(&session).analyzer.unwrap().metadata().name,
            "first"
        );
    }

    #[test]
    fn test_override_honored_when_deps_met() {
        let mut registry = AnalyzerRegistry::new();
        registry
            .register(FixedAnalyzer::new("general", Category::General, &[], 1))
            .unwrap();
        registry
            .register(FixedAnalyzer::new(
                "service_path",
                Category::PodToService,
                &[],
                10,
            ))
            .unwrap();

        let mut session = session_with_tags(Category::PodToPod, &[]);
        session.analyzer_override = Some("service_path".to_string());

        let selection = registry.select(&session);
        assert_eq!(selection.analyzer.unwrap().metadata().name, "service_path");
    }

    #[test]
    fn test_unregistered_override_falls_back_with_note() {
        let mut registry = AnalyzerRegistry::new();
        registry
            .register(FixedAnalyzer::new("general", Category::General, &[], 1))
            .unwrap();

        let mut session = session_with_tags(Category::General, &[]);
        session.analyzer_override = Some("no_such_analyzer".to_string());

        let selection = registry.select(&session);
        assert_eq!(selection.analyzer.unwrap().metadata().name, "general");
        assert_eq!(selection.skipped.len(), 1);
        assert!(selection.skipped[0].reason.contains("not registered"));
    }

    #[test]
    fn test_selection_is_deterministic() {
        let mut registry = AnalyzerRegistry::new();
        registry
            .register(FixedAnalyzer::new("general", Category::General, &[], 1))
            .unwrap();
        registry
            .register(FixedAnalyzer::new(
                "pod_pair",
                Category::PodToPod,
                &["ovn_trace"],
                10,
            ))
            .unwrap();

        let session = session_with_tags(Category::PodToPod, &["ovn_trace"]);
        let first = registry.select(&session).analyzer.unwrap().metadata().name.clone();
        for _ in 0..5 {
            let again = registry.select(&session).analyzer.unwrap().metadata().name.clone();
            assert_eq!(again, first);
        }
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = AnalyzerRegistry::new();
        registry
            .register(FixedAnalyzer::new("general", Category::General, &[], 1))
            .unwrap();
        let err = registry
            .register(FixedAnalyzer::new("general", Category::General, &[], 1))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_empty_registry_selects_nothing() {
        let registry = AnalyzerRegistry::new();
        let session = session_with_tags(Category::General, &[]);
        assert!(registry.select(&session).analyzer.is_none());
    }
}
