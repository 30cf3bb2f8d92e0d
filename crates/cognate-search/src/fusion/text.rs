//! String similarity primitives for the hybrid scorer.
//!
//! Everything works on Unicode scalar values, never bytes, so scripts with
//! multi-byte encodings compare like Latin ones.

use caseless::default_case_fold_str;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

/// Vowels removed when reducing a word to its consonant skeleton.
pub const VOWELS: &str = "aeiouyɑæɛɪɔʊʌəɨʉɯ";

#[allow(clippy::expect_used)] // constant pattern; compiled by tests
static PUNCTUATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[\s\-\x{2010}-\x{2015}_.,;:!?"'`~()\[\]{}<>|/\\]+"#)
        .expect("invalid PUNCTUATION pattern")
});

/// NFKC, full Unicode case fold, then strip whitespace and punctuation.
#[must_use]
pub fn normalize(text: &str) -> String {
    let folded = default_case_fold_str(&text.nfkc().collect::<String>());
    PUNCTUATION.replace_all(&folded, "").into_owned()
}

/// Consonant skeleton of `text`: normalized, alphabetic, not a vowel.
#[must_use]
pub fn skeleton(text: &str) -> String {
    normalize(text)
        .chars()
        .filter(|ch| ch.is_alphabetic() && !VOWELS.contains(*ch))
        .collect()
}

/// Distinct character n-grams of `text`. Shorter text yields an empty set.
#[must_use]
pub fn char_ngrams(text: &str, n: usize) -> HashSet<String> {
    let chars: Vec<char> = text.chars().collect();
    if n == 0 || chars.len() < n {
        return HashSet::new();
    }
    chars.windows(n).map(|w| w.iter().collect()).collect()
}

/// Union of [`char_ngrams`] for every size in `sizes`.
#[must_use]
pub fn ngram_set(text: &str, sizes: &[usize]) -> HashSet<String> {
    sizes.iter().flat_map(|&n| char_ngrams(text, n)).collect()
}

/// `|a ∩ b| / |a ∪ b|`, or 0 when either set is empty.
#[must_use]
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

/// Ratcliff/Obershelp similarity: `2·M / T` where `M` is the total size of
/// the recursively found longest matching blocks and `T` the combined
/// length. 0 when either side is empty.
#[must_use]
pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let matched = matching_characters(&a, &b);
    2.0 * matched as f64 / (a.len() + b.len()) as f64
}

fn matching_characters(a: &[char], b: &[char]) -> usize {
    let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, ch) in b.iter().enumerate() {
        b2j.entry(*ch).or_default().push(j);
    }

    let mut total = 0;
    let mut queue = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, size) = longest_match(a, &b2j, (alo, ahi), (blo, bhi));
        if size == 0 {
            continue;
        }
        total += size;
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            queue.push((i + size, ahi, j + size, bhi));
        }
    }
    total
}

/// Longest common block of `a[alo..ahi]` and `b[blo..bhi]`, earliest in `a`
/// then earliest in `b` on ties.
fn longest_match(
    a: &[char],
    b2j: &HashMap<char, Vec<usize>>,
    (alo, ahi): (usize, usize),
    (blo, bhi): (usize, usize),
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);
    let mut run_ending_at: HashMap<usize, usize> = HashMap::new();

    for (i, ch) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next: HashMap<usize, usize> = HashMap::new();
        for &j in b2j.get(ch).map(Vec::as_slice).unwrap_or_default() {
            if j < blo {
                continue;
            }
            if j >= bhi {
                break;
            }
            let size = j
                .checked_sub(1)
                .and_then(|prev| run_ending_at.get(&prev))
                .copied()
                .unwrap_or(0)
                + 1;
            next.insert(j, size);
            if size > best_size {
                best_i = i + 1 - size;
                best_j = j + 1 - size;
                best_size = size;
            }
        }
        run_ending_at = next;
    }
    (best_i, best_j, best_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn normalize_folds_case_and_strips_punctuation() {
        assert_eq!(normalize("  Ra's-Al_Ghul. "), "rasalghul");
        assert_eq!(normalize("ﬁ"), "fi");
        assert_eq!(normalize("a\u{2014}b"), "ab");
    }

    #[test]
    fn punctuation_pattern_compiles() {
        assert!(PUNCTUATION.is_match("a-b"));
    }

    #[test]
    fn normalize_applies_full_case_folding() {
        assert_eq!(normalize("Straße"), "strasse");
        assert_eq!(normalize("STRASSE"), normalize("straße"));
        assert_eq!(normalize("ΣΟΦΙΑ"), normalize("σοφια"));
    }

    #[test]
    fn ratio_matches_reference_values() {
        // Known SequenceMatcher results.
        assert!(close(sequence_ratio("abcd", "bcde"), 0.75));
        assert!(close(sequence_ratio("kitten", "sitting"), 8.0 / 13.0));
        assert!(close(sequence_ratio("same", "same"), 1.0));
        assert!(close(sequence_ratio("abc", "xyz"), 0.0));
    }

    #[test]
    fn ratio_is_zero_for_empty_side() {
        assert!(close(sequence_ratio("", "abc"), 0.0));
        assert!(close(sequence_ratio("", ""), 0.0));
    }

    #[test]
    fn ratio_counts_code_points() {
        // ʕ and ɪ are single code points despite multi-byte encodings.
        assert!(close(sequence_ratio("ʕajn", "aɪ"), 2.0 * 1.0 / 6.0));
    }

    #[test]
    fn ngrams_of_short_text_are_empty() {
        assert!(char_ngrams("ab", 3).is_empty());
        assert_eq!(char_ngrams("abc", 3).len(), 1);
        assert_eq!(char_ngrams("عين", 2).len(), 2);
    }

    #[test]
    fn jaccard_handles_empty_and_overlap() {
        let empty = HashSet::new();
        let ab = ngram_set("abc", &[2]);
        let bc = ngram_set("bcd", &[2]);
        assert!(close(jaccard(&empty, &ab), 0.0));
        assert!(close(jaccard(&ab, &bc), 1.0 / 3.0));
        assert!(close(jaccard(&ab, &ab), 1.0));
    }

    #[test]
    fn skeleton_drops_vowels_and_marks() {
        assert_eq!(skeleton("kataba"), "ktb");
        assert_eq!(skeleton("ʕajn"), "ʕjn");
        assert_eq!(skeleton("Ra's"), "rs");
    }
}
