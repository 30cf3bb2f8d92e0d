//! Per-source candidate fusion: merge retrieval hits across models, attach
//! hybrid scores and category labels, then rank and truncate.

pub mod hybrid;
pub mod merge;
pub mod rank;
pub mod text;

use crate::embed::ModelKind;
use cognate_core::config::HybridWeights;
use cognate_core::lexeme::LexemeRow;
use serde::Serialize;

pub use hybrid::{HybridComponents, HybridScore, compute_hybrid};
pub use merge::{Candidate, CandidateMerger, candidate_key};
pub use rank::rank_candidates;

/// Configured embedding models in run order, with their kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelRoster {
    models: Vec<(String, ModelKind)>,
}

impl ModelRoster {
    #[must_use]
    pub const fn new(models: Vec<(String, ModelKind)>) -> Self {
        Self { models }
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.models.iter().map(|(name, _)| name.clone()).collect()
    }

    #[must_use]
    pub fn kind_of(&self, model: &str) -> Option<ModelKind> {
        self.models
            .iter()
            .find(|(name, _)| name == model)
            .map(|(_, kind)| *kind)
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Triage label for a candidate. Advisory only; it feeds the ranking
/// tie-break and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    StrongUnion,
    SemanticOnly,
    FormOnly,
    Unclassified,
}

impl Category {
    /// Label for a candidate retrieved by `retrieved_by`.
    ///
    /// Agreement of every configured model counts only when at least two
    /// are configured; a single-model run is labelled by that model's kind.
    #[must_use]
    pub fn resolve(retrieved_by: &[String], roster: &ModelRoster) -> Self {
        if retrieved_by.is_empty() {
            return Self::Unclassified;
        }
        if roster.len() >= 2
            && roster
                .models
                .iter()
                .all(|(name, _)| retrieved_by.contains(name))
        {
            return Self::StrongUnion;
        }
        let kinds: Vec<Option<ModelKind>> = retrieved_by
            .iter()
            .map(|model| roster.kind_of(model))
            .collect();
        if kinds.iter().all(|k| *k == Some(ModelKind::Semantic)) {
            Self::SemanticOnly
        } else if kinds.iter().all(|k| *k == Some(ModelKind::Form)) {
            Self::FormOnly
        } else {
            Self::Unclassified
        }
    }

    /// Ranking tier: strong union above every single-model label.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::StrongUnion => 2,
            Self::SemanticOnly | Self::FormOnly | Self::Unclassified => 1,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StrongUnion => "strong_union",
            Self::SemanticOnly => "semantic_only",
            Self::FormOnly => "form_only",
            Self::Unclassified => "unclassified",
        }
    }
}

/// Label every merged candidate, attach hybrid scores when `weights` is
/// given, and return them ranked and truncated to `max_per_source`.
#[must_use]
pub fn finalize<'a>(
    merger: CandidateMerger<'a>,
    source: &LexemeRow,
    roster: &ModelRoster,
    weights: Option<&HybridWeights>,
    max_per_source: usize,
) -> Vec<Candidate<'a>> {
    let mut candidates = merger.into_candidates();
    for candidate in &mut candidates {
        candidate.category = Category::resolve(&candidate.retrieved_by, roster);
        candidate.semantic_score = candidate.best_score(ModelKind::Semantic, roster);
        candidate.form_score = candidate.best_score(ModelKind::Form, roster);
        if let Some(weights) = weights {
            candidate.hybrid = Some(compute_hybrid(
                source,
                candidate.target,
                candidate.semantic_score,
                candidate.form_score,
                weights,
            ));
        }
    }
    rank_candidates(&mut candidates, max_per_source);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> ModelRoster {
        ModelRoster::new(vec![
            ("semantic".to_string(), ModelKind::Semantic),
            ("form".to_string(), ModelKind::Form),
        ])
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn both_models_is_strong_union() {
        assert_eq!(
            Category::resolve(&names(&["form", "semantic"]), &roster()),
            Category::StrongUnion
        );
    }

    #[test]
    fn single_model_labels_by_kind() {
        assert_eq!(
            Category::resolve(&names(&["semantic"]), &roster()),
            Category::SemanticOnly
        );
        assert_eq!(
            Category::resolve(&names(&["form"]), &roster()),
            Category::FormOnly
        );
    }

    #[test]
    fn single_model_run_is_never_strong_union() {
        let solo = ModelRoster::new(vec![("form".to_string(), ModelKind::Form)]);
        assert_eq!(Category::resolve(&names(&["form"]), &solo), Category::FormOnly);
    }

    #[test]
    fn mixed_or_unknown_kinds_are_unclassified() {
        let roster = ModelRoster::new(vec![
            ("semantic".to_string(), ModelKind::Semantic),
            ("form".to_string(), ModelKind::Form),
            ("custom".to_string(), ModelKind::Other),
        ]);
        assert_eq!(
            Category::resolve(&names(&["semantic", "form"]), &roster),
            Category::Unclassified
        );
        assert_eq!(Category::resolve(&[], &roster), Category::Unclassified);
    }

    #[test]
    fn strong_union_outranks_single_model_labels() {
        assert!(Category::StrongUnion.rank() > Category::SemanticOnly.rank());
        assert_eq!(Category::FormOnly.rank(), Category::Unclassified.rank());
        assert_eq!(Category::FormOnly.as_str(), "form_only");
    }
}
