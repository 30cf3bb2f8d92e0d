//! Corpus selection: `<language>[@<stage>][@<embedding-language>]=<path>`.

use crate::error::CognateError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Stage used when a corpus spec does not name one.
pub const DEFAULT_STAGE: &str = "unknown";

/// One resolved corpus selection.
///
/// Caches, indexes, and candidate keys are partitioned by
/// `(language, stage)`, so two specs for the same language with different
/// stages are distinct resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusSpec {
    pub language: String,
    pub stage: String,
    pub path: PathBuf,
    pub embedding_language: Option<String>,
}

impl CorpusSpec {
    /// Parse a corpus spec string.
    ///
    /// Empty `@` segments after the language are ignored. Relative paths are resolved against the
    /// current working directory.
    ///
    /// # Errors
    ///
    /// Returns [`CognateError::InvalidCorpusSpec`] when `=` or the language
    /// is missing, the path is empty, or more than three `@` segments are
    /// given.
    pub fn parse(raw: &str) -> Result<Self, CognateError> {
        let invalid = |reason: &str| CognateError::InvalidCorpusSpec {
            spec: raw.to_string(),
            reason: reason.to_string(),
        };

        let (head, path) = raw
            .split_once('=')
            .ok_or_else(|| invalid("expected <language>[@<stage>][@<embedding-language>]=<path>"))?;

        let path = path.trim();
        if path.is_empty() {
            return Err(invalid("path is empty"));
        }

        let mut segments = head.split('@').map(str::trim);
        let language = segments
            .next()
            .filter(|language| !language.is_empty())
            .ok_or_else(|| invalid("language is missing"))?;
        let rest: Vec<&str> = segments.filter(|part| !part.is_empty()).collect();

        let (stage, embedding_language) = match rest.as_slice() {
            [] => (DEFAULT_STAGE, None),
            [stage] => (*stage, None),
            [stage, tag] => (*stage, Some((*tag).to_string())),
            _ => return Err(invalid("too many @ segments")),
        };

        Ok(Self {
            language: language.to_string(),
            stage: stage.to_string(),
            path: absolutize(PathBuf::from(path)),
            embedding_language,
        })
    }

    /// Human label used in logs and summaries: `language:stage`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}:{}", self.language, self.stage)
    }
}

impl FromStr for CorpusSpec {
    type Err = CognateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CorpusSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.language, self.stage)?;
        if let Some(tag) = &self.embedding_language {
            write!(f, "@{tag}")?;
        }
        write!(f, "={}", self.path.display())
    }
}

fn absolutize(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}
