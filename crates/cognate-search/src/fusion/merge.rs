use super::hybrid::HybridScore;
use super::{Category, ModelRoster};
use crate::embed::ModelKind;
use cognate_core::corpus::CorpusSpec;
use cognate_core::lexeme::LexemeRow;
use std::collections::BTreeMap;

/// Composite identity of a retrieved target:
/// `language|stage|identity|position`.
#[must_use]
pub fn candidate_key(corpus: &CorpusSpec, row: &LexemeRow) -> String {
    format!(
        "{}|{}|{}|{}",
        corpus.language,
        corpus.stage,
        row.identity(),
        row.position()
    )
}

/// One target proposed for the current source lexeme.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub key: String,
    pub target_corpus: &'a CorpusSpec,
    pub target: &'a LexemeRow,
    /// Raw retrieval score per model.
    pub scores: BTreeMap<String, f64>,
    /// Models that retrieved this target, in first-retrieval order.
    pub retrieved_by: Vec<String>,
    pub category: Category,
    pub semantic_score: Option<f64>,
    pub form_score: Option<f64>,
    pub hybrid: Option<HybridScore>,
}

impl<'a> Candidate<'a> {
    fn new(key: String, target_corpus: &'a CorpusSpec, target: &'a LexemeRow) -> Self {
        Self {
            key,
            target_corpus,
            target,
            scores: BTreeMap::new(),
            retrieved_by: Vec::new(),
            category: Category::Unclassified,
            semantic_score: None,
            form_score: None,
            hybrid: None,
        }
    }

    /// Highest raw score among models of `kind`.
    #[must_use]
    pub fn best_score(&self, kind: ModelKind, roster: &ModelRoster) -> Option<f64> {
        self.scores
            .iter()
            .filter(|(model, _)| roster.kind_of(model) == Some(kind))
            .map(|(_, score)| *score)
            .reduce(f64::max)
    }
}

/// Accumulates retrieval hits for one source lexeme, deduplicating targets
/// by [`candidate_key`].
#[derive(Debug, Default)]
pub struct CandidateMerger<'a> {
    candidates: BTreeMap<String, Candidate<'a>>,
}

impl<'a> CandidateMerger<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `model` retrieved `target` with `score`. A repeat hit
    /// from the same model keeps the higher score.
    pub fn add(&mut self, model: &str, corpus: &'a CorpusSpec, target: &'a LexemeRow, score: f32) {
        let key = candidate_key(corpus, target);
        let candidate = self
            .candidates
            .entry(key)
            .or_insert_with_key(|key| Candidate::new(key.clone(), corpus, target));
        let score = f64::from(score);
        candidate
            .scores
            .entry(model.to_string())
            .and_modify(|existing| *existing = existing.max(score))
            .or_insert(score);
        if !candidate.retrieved_by.iter().any(|m| m == model) {
            candidate.retrieved_by.push(model.to_string());
        }
    }

    /// Add every `(row, score)` hit against `rows`. Rows outside the
    /// corpus are skipped.
    pub fn add_hits<I>(&mut self, model: &str, corpus: &'a CorpusSpec, rows: &'a [LexemeRow], hits: I)
    where
        I: IntoIterator<Item = (usize, f32)>,
    {
        for (row, score) in hits {
            if let Some(target) = rows.get(row) {
                self.add(model, corpus, target, score);
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Candidates in key order.
    #[must_use]
    pub fn into_candidates(self) -> Vec<Candidate<'a>> {
        self.candidates.into_values().collect()
    }
}
