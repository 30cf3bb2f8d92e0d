//! Lexeme rows: one corpus entry with a small required core and an open
//! attribute bag.
//!
//! Readers go through the typed accessors, which treat missing, `null`, and
//! blank values alike as absent.

use serde_json::{Map, Value};

/// Attribute names with a defined meaning in the row format.
pub mod field {
    pub const ID: &str = "id";
    pub const LEMMA: &str = "lemma";
    pub const TRANSLIT: &str = "translit";
    pub const IPA: &str = "ipa";
    pub const IPA_RAW: &str = "ipa_raw";
    pub const LANGUAGE: &str = "language";
    pub const STAGE: &str = "stage";
    pub const GLOSS: &str = "gloss";
    pub const DEFINITION: &str = "definition";
    pub const ORTHOGRAPHY: &str = "orthography";
    pub const CONCEPT_ID: &str = "concept_id";
    pub const SKELETON: &str = "skeleton";
    pub const ORT: &str = "ort";
}

/// One loaded corpus entry.
///
/// `position` is the 0-based line number of the record in its source file.
/// `identity` is the declared `id`, or `row:<position>` when none was given.
/// Identity is unique per corpus, not globally.
#[derive(Debug, Clone, PartialEq)]
pub struct LexemeRow {
    position: usize,
    identity: String,
    attributes: Map<String, Value>,
}

impl LexemeRow {
    /// Build a row from a parsed record, synthesizing the identity if needed.
    #[must_use]
    pub fn new(position: usize, attributes: Map<String, Value>) -> Self {
        let identity = declared_identity(&attributes)
            .unwrap_or_else(|| synthesized_identity(position));
        Self {
            position,
            identity,
            attributes,
        }
    }

    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[must_use]
    pub const fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Raw attribute lookup.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Trimmed, non-empty string value of an attribute.
    ///
    /// Numbers and booleans are not coerced; only JSON strings count as text.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// First non-empty text among `names`, in order.
    #[must_use]
    pub fn first_text(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| self.text(name))
    }

    #[must_use]
    pub fn lemma(&self) -> Option<&str> {
        self.text(field::LEMMA)
    }

    #[must_use]
    pub fn translit(&self) -> Option<&str> {
        self.text(field::TRANSLIT)
    }

    #[must_use]
    pub fn ipa(&self) -> Option<&str> {
        self.text(field::IPA)
    }

    #[must_use]
    pub fn ipa_raw(&self) -> Option<&str> {
        self.text(field::IPA_RAW)
    }

    /// Text handed to embedding backends: the lemma with internal whitespace
    /// collapsed, or the identity when the lemma is missing.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        let collapsed = self
            .lemma()
            .map(|lemma| lemma.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        if collapsed.is_empty() {
            self.identity.clone()
        } else {
            collapsed
        }
    }
}

fn declared_identity(attributes: &Map<String, Value>) -> Option<String> {
    match attributes.get(field::ID)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| s.clone())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn synthesized_identity(position: usize) -> String {
    format!("row:{position}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(position: usize, value: Value) -> LexemeRow {
        let Value::Object(map) = value else {
            panic!("test rows must be objects");
        };
        LexemeRow::new(position, map)
    }

    #[test]
    fn declared_id_is_kept() {
        let r = row(3, json!({"id": "ar-001", "lemma": "عين"}));
        assert_eq!(r.identity(), "ar-001");
        assert_eq!(r.position(), 3);
    }

    #[test]
    fn numeric_id_is_stringified() {
        let r = row(0, json!({"id": 42, "lemma": "x"}));
        assert_eq!(r.identity(), "42");
    }

    #[test]
    fn missing_or_blank_id_is_synthesized() {
        assert_eq!(row(7, json!({"lemma": "eye"})).identity(), "row:7");
        assert_eq!(row(8, json!({"id": "  ", "lemma": "eye"})).identity(), "row:8");
        assert_eq!(row(9, json!({"id": null})).identity(), "row:9");
    }

    #[test]
    fn text_accessors_treat_blank_as_absent() {
        let r = row(0, json!({"lemma": "  head ", "ipa": "", "translit": null, "ipa_raw": 5}));
        assert_eq!(r.lemma(), Some("head"));
        assert_eq!(r.ipa(), None);
        assert_eq!(r.translit(), None);
        assert_eq!(r.ipa_raw(), None);
    }

    #[test]
    fn first_text_respects_order() {
        let r = row(0, json!({"lemma": "ra's", "translit": "raʔs"}));
        assert_eq!(r.first_text(&[field::IPA, field::TRANSLIT, field::LEMMA]), Some("raʔs"));
    }

    #[test]
    fn embedding_text_collapses_whitespace_and_falls_back_to_identity() {
        let r = row(1, json!({"id": "en-9", "lemma": " old \t english  "}));
        assert_eq!(r.embedding_text(), "old english");

        let bare = row(2, json!({"id": "en-10"}));
        assert_eq!(bare.embedding_text(), "en-10");
    }
}
