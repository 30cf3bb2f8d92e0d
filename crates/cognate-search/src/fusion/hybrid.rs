//! Heuristic text-similarity signals and their weighted combination.

use super::text::{jaccard, ngram_set, normalize, sequence_ratio, skeleton};
use cognate_core::config::HybridWeights;
use cognate_core::lexeme::{LexemeRow, field};
use serde::Serialize;
use std::collections::BTreeMap;

const ORTHOGRAPHY_NGRAMS: [usize; 3] = [2, 3, 4];
const SKELETON_NGRAMS: [usize; 2] = [2, 3];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HybridComponents {
    pub orthography: f64,
    pub phonetic: f64,
    pub skeleton: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridScore {
    pub components: HybridComponents,
    pub combined_score: f64,
    /// Weights of the signals that actually contributed, by signal name.
    pub weights_used: BTreeMap<String, f64>,
}

/// Surface-form similarity over transliteration (else lemma): 60% n-gram
/// Jaccard for n in 2..=4, 40% sequence ratio.
#[must_use]
pub fn orthography_score(source: &LexemeRow, target: &LexemeRow) -> f64 {
    let fields = [field::TRANSLIT, field::LEMMA];
    let a = normalize(source.first_text(&fields).unwrap_or_default());
    let b = normalize(target.first_text(&fields).unwrap_or_default());
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let j = jaccard(
        &ngram_set(&a, &ORTHOGRAPHY_NGRAMS),
        &ngram_set(&b, &ORTHOGRAPHY_NGRAMS),
    );
    0.6f64.mul_add(j, 0.4 * sequence_ratio(&a, &b))
}

/// Sequence ratio over the phonetic transcription (else the raw one).
#[must_use]
pub fn phonetic_score(source: &LexemeRow, target: &LexemeRow) -> f64 {
    let fields = [field::IPA, field::IPA_RAW];
    let a = normalize(source.first_text(&fields).unwrap_or_default());
    let b = normalize(target.first_text(&fields).unwrap_or_default());
    sequence_ratio(&a, &b)
}

/// Consonant-skeleton similarity over ipa, else translit, else lemma:
/// half 2/3-gram Jaccard, half sequence ratio.
#[must_use]
pub fn skeleton_score(source: &LexemeRow, target: &LexemeRow) -> f64 {
    let fields = [field::IPA, field::TRANSLIT, field::LEMMA];
    let a = skeleton(source.first_text(&fields).unwrap_or_default());
    let b = skeleton(target.first_text(&fields).unwrap_or_default());
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let j = jaccard(&ngram_set(&a, &SKELETON_NGRAMS), &ngram_set(&b, &SKELETON_NGRAMS));
    0.5f64.mul_add(j, 0.5 * sequence_ratio(&a, &b))
}

/// Weighted mean of the defined signals, renormalized by the weights used.
///
/// Returns `(0.0, {})` when nothing is defined or the used weights sum to
/// zero; callers must read that as unscored.
#[must_use]
pub fn combine(signals: &[(&str, Option<f64>, f64)]) -> (f64, BTreeMap<String, f64>) {
    let used: Vec<(&str, f64, f64)> = signals
        .iter()
        .filter_map(|&(name, value, weight)| value.map(|v| (name, v, weight)))
        .collect();
    let weight_sum: f64 = used.iter().map(|(_, _, w)| w).sum();
    if used.is_empty() || weight_sum <= 0.0 {
        return (0.0, BTreeMap::new());
    }
    let weighted: f64 = used.iter().map(|(_, v, w)| v * w).sum();
    let weights = used
        .into_iter()
        .map(|(name, _, w)| (name.to_string(), w))
        .collect();
    (weighted / weight_sum, weights)
}

/// Score one source/target pair. `semantic` and `form` are the best
/// retrieval scores from models of that kind, if any retrieved the pair.
#[must_use]
pub fn compute_hybrid(
    source: &LexemeRow,
    target: &LexemeRow,
    semantic: Option<f64>,
    form: Option<f64>,
    weights: &HybridWeights,
) -> HybridScore {
    let components = HybridComponents {
        orthography: orthography_score(source, target),
        phonetic: phonetic_score(source, target),
        skeleton: skeleton_score(source, target),
    };
    let (combined_score, weights_used) = combine(&[
        ("semantic", semantic, weights.semantic),
        ("form", form, weights.form),
        ("orthography", Some(components.orthography), weights.orthography),
        ("phonetic", Some(components.phonetic), weights.phonetic),
        ("skeleton", Some(components.skeleton), weights.skeleton),
    ]);
    HybridScore {
        components,
        combined_score,
        weights_used,
    }
}
