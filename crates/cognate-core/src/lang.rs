//! Language-code to embedding-language-tag resolution.

use crate::error::CognateError;
use std::collections::BTreeMap;

const BUILTIN: &[(&str, &str)] = &[
    ("ar", "arb_Arab"),
    ("ara", "arb_Arab"),
    ("arb", "arb_Arab"),
    ("en", "eng_Latn"),
    ("eng", "eng_Latn"),
    ("fr", "fra_Latn"),
    ("fra", "fra_Latn"),
    ("de", "deu_Latn"),
    ("deu", "deu_Latn"),
    ("la", "lat_Latn"),
    ("lat", "lat_Latn"),
    ("grc", "grc_Grek"),
    ("el", "ell_Grek"),
    ("ell", "ell_Grek"),
    ("he", "heb_Hebr"),
    ("heb", "heb_Hebr"),
    ("syr", "syc_Syrc"),
    ("syc", "syc_Syrc"),
];

/// Case-insensitive map from corpus language codes to the tags the semantic
/// encoder expects.
#[derive(Debug, Clone)]
pub struct LanguageMap {
    tags: BTreeMap<String, String>,
}

impl Default for LanguageMap {
    fn default() -> Self {
        Self {
            tags: BUILTIN
                .iter()
                .map(|(code, tag)| ((*code).to_string(), (*tag).to_string()))
                .collect(),
        }
    }
}

impl LanguageMap {
    /// Built-in map extended (and overridden) by `extra` entries.
    #[must_use]
    pub fn with_overrides<'a, I>(extra: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut map = Self::default();
        for (code, tag) in extra {
            map.tags
                .insert(code.trim().to_lowercase(), tag.trim().to_string());
        }
        map
    }

    /// Resolve the embedding tag for `language`.
    ///
    /// An explicit non-empty `override_tag` always wins.
    ///
    /// # Errors
    ///
    /// Returns [`CognateError::UnknownLanguage`] for an empty code or one with
    /// no mapping.
    pub fn resolve(
        &self,
        language: &str,
        override_tag: Option<&str>,
    ) -> Result<String, CognateError> {
        if let Some(tag) = override_tag.map(str::trim).filter(|t| !t.is_empty()) {
            return Ok(tag.to_string());
        }

        let code = language.trim().to_lowercase();
        if code.is_empty() {
            return Err(CognateError::UnknownLanguage {
                language: language.to_string(),
            });
        }

        self.tags
            .get(&code)
            .cloned()
            .ok_or_else(|| CognateError::UnknownLanguage {
                language: language.to_string(),
            })
    }
}
