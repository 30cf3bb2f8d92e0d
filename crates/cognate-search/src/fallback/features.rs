//! Per-lexeme features for brute-force matching, derived once up front.

use anyhow::Result;
use cognate_core::jsonl::read_values_lenient;
use cognate_core::lexeme::{LexemeRow, field};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::LazyLock;

/// Vowels (and the length mark) dropped from skeletons.
pub const SKELETON_VOWELS: &str = "aeiouyɑæɛɪɔʊʌəɨʉɯː";

#[allow(clippy::expect_used)] // constant pattern; compiled by tests
static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("invalid MARKUP pattern"));
#[allow(clippy::expect_used)] // constant pattern; compiled by tests
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("invalid WHITESPACE pattern"));
#[allow(clippy::expect_used)] // constant pattern; compiled by tests
static KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[a-zA-Z]{3,}\b").expect("invalid KEYWORD pattern"));

/// Replace tags with spaces and collapse whitespace.
#[must_use]
pub fn strip_markup(text: &str) -> String {
    let spaced = MARKUP.replace_all(text, " ");
    WHITESPACE.replace_all(&spaced, " ").trim().to_string()
}

/// Synonym-to-concept lookup table.
#[derive(Debug, Clone, Default)]
pub struct ConceptMapper {
    synonyms: HashMap<String, String>,
    concepts: usize,
}

impl ConceptMapper {
    /// Load a concepts JSONL file: `concept_id`, `core_gloss_en`,
    /// `synonyms_en[]`. Malformed lines and entries without an id are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or unreadable.
    pub fn load(path: &Path) -> Result<Self> {
        let mut mapper = Self::default();
        for value in read_values_lenient(path)? {
            let Some(id) = value
                .get("concept_id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
            else {
                continue;
            };
            mapper.concepts += 1;
            if let Some(core) = value.get("core_gloss_en").and_then(Value::as_str) {
                mapper.insert(core, id);
            }
            for synonym in value
                .get("synonyms_en")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
            {
                mapper.insert(synonym, id);
            }
        }
        tracing::info!(
            path = %path.display(),
            concepts = mapper.concepts,
            synonyms = mapper.synonyms.len(),
            "concept map loaded"
        );
        Ok(mapper)
    }

    pub fn insert(&mut self, synonym: &str, concept_id: &str) {
        self.synonyms
            .insert(synonym.to_lowercase(), concept_id.to_string());
    }

    /// Concept of the first token found in the table.
    #[must_use]
    pub fn resolve<'t, I>(&self, tokens: I) -> Option<&str>
    where
        I: IntoIterator<Item = &'t str>,
    {
        tokens
            .into_iter()
            .find_map(|token| self.synonyms.get(&token.trim().to_lowercase()))
            .map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.synonyms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.synonyms.is_empty()
    }
}

/// Immutable feature record for one lexeme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexemeFeatures {
    pub identity: String,
    pub position: usize,
    /// Gloss with markup removed; empty when the row has none.
    pub gloss: String,
    pub lemma: String,
    pub keywords: BTreeSet<String>,
    pub concept_id: Option<String>,
    pub skeleton: BTreeSet<String>,
    pub trace: BTreeSet<char>,
}

impl LexemeFeatures {
    #[must_use]
    pub fn derive(row: &LexemeRow, mapper: Option<&ConceptMapper>) -> Self {
        let lemma = row.lemma().unwrap_or_default().to_string();
        let raw_gloss = row
            .first_text(&[field::GLOSS, field::DEFINITION])
            .unwrap_or_default();
        let gloss = if raw_gloss.contains('<') && raw_gloss.contains('>') {
            strip_markup(raw_gloss)
        } else {
            raw_gloss.to_string()
        };

        let text = format!("{lemma} {gloss}");
        let tokens: Vec<String> = KEYWORD
            .find_iter(&text)
            .map(|m| m.as_str().to_lowercase())
            .collect();

        let concept_id = match row.get(field::CONCEPT_ID) {
            Some(_) => row.text(field::CONCEPT_ID).map(str::to_string),
            None => mapper
                .and_then(|m| m.resolve(tokens.iter().map(String::as_str)))
                .map(str::to_string),
        };

        Self {
            identity: row.identity().to_string(),
            position: row.position(),
            gloss,
            keywords: tokens.into_iter().collect(),
            concept_id,
            skeleton: skeleton_of(row, &lemma),
            trace: trace_of(row, &lemma),
            lemma,
        }
    }
}

fn is_consonant(ch: char) -> bool {
    ch.is_alphabetic() && !ch.to_lowercase().any(|l| SKELETON_VOWELS.contains(l))
}

fn skeleton_of(row: &LexemeRow, lemma: &str) -> BTreeSet<String> {
    match row.get(field::SKELETON) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s.chars().map(String::from).collect(),
        _ => {
            let source = row
                .first_text(&[field::IPA, field::TRANSLIT, field::ORTHOGRAPHY])
                .unwrap_or(lemma);
            source
                .chars()
                .filter(|ch| is_consonant(*ch))
                .map(String::from)
                .collect()
        }
    }
}

fn trace_of(row: &LexemeRow, lemma: &str) -> BTreeSet<char> {
    let declared = row
        .get(field::ORT)
        .and_then(|ort| ort.get("trace"))
        .and_then(Value::as_array);
    if let Some(items) = declared {
        return items
            .iter()
            .filter_map(Value::as_str)
            .flat_map(str::chars)
            .collect();
    }
    row.text(field::ORTHOGRAPHY).unwrap_or(lemma).chars().collect()
}
