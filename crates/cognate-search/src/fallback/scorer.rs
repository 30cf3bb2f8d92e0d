use super::features::LexemeFeatures;
use cognate_core::config::FallbackConfig;
use serde::Serialize;
use std::collections::BTreeSet;

/// Characters of each gloss carried into a match record.
pub const GLOSS_PREVIEW: usize = 30;

/// Per-signal scores of one pair. Records carry them rounded to two
/// decimals; the weighted total is taken before rounding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchComponents {
    pub skeleton: f64,
    pub articulatory: f64,
    pub orthography: f64,
    pub semantics: f64,
}

impl MatchComponents {
    #[must_use]
    pub fn rounded(self) -> Self {
        Self {
            skeleton: round2(self.skeleton),
            articulatory: round2(self.articulatory),
            orthography: round2(self.orthography),
            semantics: round2(self.semantics),
        }
    }
}

/// An accepted brute-force pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchRecord {
    pub source_id: String,
    pub source_gloss: String,
    pub target_id: String,
    pub target_gloss: String,
    pub score: f64,
    pub concept_match: Option<String>,
    pub components: MatchComponents,
}

#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn preview(text: &str) -> String {
    text.chars().take(GLOSS_PREVIEW).collect()
}

fn set_jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

/// Weighted pair scorer with the dynamic acceptance threshold.
#[derive(Debug, Clone, Copy)]
pub struct PairScorer {
    config: FallbackConfig,
}

impl PairScorer {
    #[must_use]
    pub const fn new(config: FallbackConfig) -> Self {
        Self { config }
    }

    /// Unrounded signal scores.
    #[must_use]
    pub fn components(&self, source: &LexemeFeatures, target: &LexemeFeatures) -> MatchComponents {
        let shared_trace = source.trace.intersection(&target.trace).count();
        MatchComponents {
            skeleton: set_jaccard(&source.skeleton, &target.skeleton),
            articulatory: self.config.articulatory_placeholder,
            orthography: (0.3 * shared_trace as f64).min(1.0),
            semantics: semantics(source, target),
        }
    }

    /// Weighted total before rounding.
    #[must_use]
    pub fn total(&self, c: &MatchComponents) -> f64 {
        let cfg = &self.config;
        c.semantics.mul_add(
            cfg.semantics,
            c.orthography.mul_add(
                cfg.orthography,
                c.skeleton.mul_add(cfg.skeleton, c.articulatory * cfg.articulatory),
            ),
        )
    }

    /// Acceptance threshold given the pair's semantics score.
    #[must_use]
    pub fn threshold_for(&self, semantics: f64) -> f64 {
        if semantics > self.config.relax_above_semantics {
            self.config.relaxed_threshold
        } else {
            self.config.threshold
        }
    }

    /// Score a pair and return its record if it clears the threshold.
    #[must_use]
    pub fn score(&self, source: &LexemeFeatures, target: &LexemeFeatures) -> Option<MatchRecord> {
        let raw = self.components(source, target);
        let score = round2(self.total(&raw));
        let components = raw.rounded();
        if score < self.threshold_for(components.semantics) {
            return None;
        }
        let concept_match = match (&source.concept_id, &target.concept_id) {
            (Some(s), Some(t)) if s == t => Some(s.clone()),
            _ => None,
        };
        Some(MatchRecord {
            source_id: source.identity.clone(),
            source_gloss: preview(&source.gloss),
            target_id: target.identity.clone(),
            target_gloss: preview(&target.lemma),
            score,
            concept_match,
            components,
        })
    }
}

fn semantics(source: &LexemeFeatures, target: &LexemeFeatures) -> f64 {
    if matches!((&source.concept_id, &target.concept_id), (Some(s), Some(t)) if s == t) {
        return 1.0;
    }
    let shared = source.keywords.intersection(&target.keywords).count();
    if shared == 0 {
        0.0
    } else {
        (0.5 * shared as f64).min(0.8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cognate_core::lexeme::LexemeRow;
    use serde_json::{Value, json};

    fn features(value: Value) -> LexemeFeatures {
        let Value::Object(map) = value else {
            panic!("object expected");
        };
        LexemeFeatures::derive(&LexemeRow::new(0, map), None)
    }

    fn scorer() -> PairScorer {
        PairScorer::new(FallbackConfig::default())
    }

    #[test]
    fn shared_concept_clears_relaxed_threshold() {
        let source = features(json!({"id": "s", "lemma": "ب", "concept_id": "C9", "skeleton": []}));
        let target = features(json!({"id": "t", "lemma": "zz", "concept_id": "C9", "skeleton": [], "ort": {"trace": []}}));
        let record = scorer().score(&source, &target).expect("accepted");

        assert!((record.components.semantics - 1.0).abs() < 1e-9);
        assert!(record.components.skeleton.abs() < 1e-9);
        assert!(record.components.orthography.abs() < 1e-9);
        // 0.5 * 3 + 1.0 * 2
        assert!((record.score - 3.5).abs() < 1e-9);
        assert_eq!(record.concept_match.as_deref(), Some("C9"));
    }

    #[test]
    fn dissimilar_pair_without_semantics_is_rejected() {
        let source = features(json!({"lemma": "عين", "gloss": "eye"}));
        let target = features(json!({"lemma": "house", "gloss": "dwelling"}));
        // articulatory alone gives 1.5, below the default 2.0
        assert!(scorer().score(&source, &target).is_none());
    }

    #[test]
    fn keyword_overlap_is_capped() {
        let source = features(json!({"lemma": "x", "gloss": "eye spring water"}));
        let target = features(json!({"lemma": "y", "gloss": "water spring eye"}));
        let components = scorer().components(&source, &target);
        assert!((components.semantics - 0.8).abs() < 1e-9);
        assert!((scorer().threshold_for(components.semantics) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn single_keyword_keeps_default_threshold() {
        let source = features(json!({"lemma": "x", "gloss": "eye"}));
        let target = features(json!({"lemma": "y", "gloss": "eye"}));
        let components = scorer().components(&source, &target);
        assert!((components.semantics - 0.5).abs() < 1e-9);
        assert!((scorer().threshold_for(components.semantics) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn orthography_counts_shared_trace_characters() {
        let source = features(json!({"lemma": "abcd"}));
        let target = features(json!({"lemma": "abce"}));
        let components = scorer().components(&source, &target);
        assert!((components.orthography - 0.9).abs() < 1e-9);
        let same = scorer().components(&source, &source);
        assert!((same.orthography - 1.0).abs() < 1e-9);
    }

    #[test]
    fn skeleton_is_set_jaccard() {
        let source = features(json!({"lemma": "x", "skeleton": ["k", "t", "b"]}));
        let target = features(json!({"lemma": "y", "skeleton": ["k", "t", "l"]}));
        let components = scorer().components(&source, &target);
        assert!((components.skeleton - 0.5).abs() < 1e-9);
    }

    #[test]
    fn glosses_are_truncated() {
        let long = "a".repeat(45);
        let source = features(json!({"id": "s", "lemma": "kitab", "gloss": long, "concept_id": "C1"}));
        let target = features(json!({"id": "t", "lemma": "b".repeat(40), "concept_id": "C1"}));
        let record = scorer().score(&source, &target).expect("accepted");
        assert_eq!(record.source_gloss.chars().count(), GLOSS_PREVIEW);
        assert_eq!(record.target_gloss.chars().count(), GLOSS_PREVIEW);
    }

    #[test]
    fn weights_come_from_config() {
        let config = FallbackConfig {
            articulatory: 0.0,
            ..FallbackConfig::default()
        };
        let source = features(json!({"lemma": "x"}));
        let target = features(json!({"lemma": "y"}));
        let scorer = PairScorer::new(config);
        let components = scorer.components(&source, &target);
        assert!(scorer.total(&components).abs() < 1e-9);
    }

    #[test]
    fn total_weighs_unrounded_components() {
        let source = features(json!({"id": "s", "lemma": "x", "skeleton": ["k", "t"]}));
        let target = features(json!({"id": "t", "lemma": "y", "skeleton": ["k", "s"]}));
        let record = scorer().score(&source, &target).expect("accepted");
        // 1/3 * 3 + 0.5 * 3
        assert!((record.score - 2.5).abs() < 1e-9);
        assert!((record.components.skeleton - 0.33).abs() < 1e-9);
    }

    #[test]
    fn definition_stands_in_for_missing_gloss() {
        let source = features(json!({"id": "s", "lemma": "x", "definition": "<i>eye</i>", "concept_id": "C1"}));
        let target = features(json!({"id": "t", "lemma": "y", "concept_id": "C1"}));
        let record = scorer().score(&source, &target).expect("accepted");
        assert_eq!(record.source_gloss, "eye");
    }

    #[test]
    fn rounding_is_to_two_places() {
        assert!((round2(0.333_33) - 0.33).abs() < 1e-12);
        assert!((round2(2.675_1) - 2.68).abs() < 1e-12);
    }
}
