use super::merge::Candidate;
use std::cmp::Ordering;

/// Stand-in for an absent score in the sort key.
pub const MISSING_SCORE: f64 = -1e9;

/// Descending composite key: combined score, category tier, semantic
/// score, form score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SortKey {
    pub combined: f64,
    pub tier: u8,
    pub semantic: f64,
    pub form: f64,
}

impl SortKey {
    #[must_use]
    pub fn of(candidate: &Candidate<'_>) -> Self {
        Self {
            combined: candidate
                .hybrid
                .as_ref()
                .map_or(MISSING_SCORE, |h| h.combined_score),
            tier: candidate.category.rank(),
            semantic: candidate.semantic_score.unwrap_or(MISSING_SCORE),
            form: candidate.form_score.unwrap_or(MISSING_SCORE),
        }
    }

    /// Best first.
    fn descending(&self, other: &Self) -> Ordering {
        other
            .combined
            .total_cmp(&self.combined)
            .then(other.tier.cmp(&self.tier))
            .then(other.semantic.total_cmp(&self.semantic))
            .then(other.form.total_cmp(&self.form))
    }
}

/// Sort best first, breaking exact ties by candidate key, then keep at
/// most `max_per_source`.
pub fn rank_candidates(candidates: &mut Vec<Candidate<'_>>, max_per_source: usize) {
    candidates.sort_by(|a, b| {
        SortKey::of(a)
            .descending(&SortKey::of(b))
            .then_with(|| a.key.cmp(&b.key))
    });
    candidates.truncate(max_per_source);
}
