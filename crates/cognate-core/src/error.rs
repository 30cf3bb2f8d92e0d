use std::fmt;
use std::path::PathBuf;

/// Machine-readable error codes for scripts and orchestration wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    InvalidCorpusSpec,
    MissingCorpus,
    InvalidTopK,
    InvalidWeight,
    UnknownLanguage,
    CorpusNotFound,
    MalformedRecord,
    CacheCorrupt,
    IndexMismatch,
    LockContention,
    UnknownModel,
    BackendUnavailable,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::InvalidCorpusSpec => "E1002",
            Self::MissingCorpus => "E1003",
            Self::InvalidTopK => "E1004",
            Self::InvalidWeight => "E1005",
            Self::UnknownLanguage => "E1006",
            Self::CorpusNotFound => "E2001",
            Self::MalformedRecord => "E2002",
            Self::CacheCorrupt => "E3001",
            Self::IndexMismatch => "E3002",
            Self::LockContention => "E3003",
            Self::UnknownModel => "E4001",
            Self::BackendUnavailable => "E4002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidCorpusSpec => "Invalid corpus spec",
            Self::MissingCorpus => "Missing source or target corpus",
            Self::InvalidTopK => "Invalid top-K",
            Self::InvalidWeight => "Invalid scoring weight",
            Self::UnknownLanguage => "No embedding language mapping",
            Self::CorpusNotFound => "Corpus file not found",
            Self::MalformedRecord => "Malformed corpus record",
            Self::CacheCorrupt => "Embedding cache corrupt",
            Self::IndexMismatch => "Index does not match embeddings",
            Self::LockContention => "Cache lock contention",
            Self::UnknownModel => "Unknown embedding model",
            Self::BackendUnavailable => "Embedding backend unavailable",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix the TOML syntax in cognate.toml and retry."),
            Self::InvalidCorpusSpec => {
                Some("Use <language>[@<stage>][@<embedding-language>]=<path>.")
            }
            Self::MissingCorpus => Some("Pass at least one --source and one --target."),
            Self::InvalidTopK => Some("Use a positive integer for --top-k."),
            Self::InvalidWeight => Some("Weights must be finite and non-negative."),
            Self::UnknownLanguage => Some(
                "Append an explicit tag to the corpus spec, e.g. `eng@old@eng_Latn=<path>`, or add it under [languages].",
            ),
            Self::CorpusNotFound => Some("Check the corpus path; relative paths resolve from the working directory."),
            Self::MalformedRecord => Some("Fix or remove the offending JSONL line."),
            Self::CacheCorrupt => Some("Re-run with --rebuild-cache to recompute embeddings."),
            Self::IndexMismatch => Some("Re-run with --rebuild-index to rebuild the index."),
            Self::LockContention => {
                Some("Another run is writing the same cache key; retry after it finishes.")
            }
            Self::UnknownModel => Some("Use one of the registered models, e.g. `semantic` or `form`."),
            Self::BackendUnavailable => Some(
                "Build with `--features semantic-ort` or `semantic-model2vec` and place model files in [embed].model_dir.",
            ),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Classified failures surfaced to the caller.
///
/// Library functions return `anyhow::Result`; these variants sit at the root
/// of the error chain so the CLI can recover a stable [`ErrorCode`].
#[derive(Debug, thiserror::Error)]
pub enum CognateError {
    #[error("failed to parse config {path}: {reason}")]
    ConfigParse { path: PathBuf, reason: String },

    #[error("invalid corpus spec {spec:?}: {reason}")]
    InvalidCorpusSpec { spec: String, reason: String },

    #[error("missing {role} corpus: provide at least one --{role}")]
    MissingCorpus { role: &'static str },

    #[error("top-k must be a positive integer, got {0}")]
    InvalidTopK(i64),

    #[error("weight `{name}` must be finite and non-negative, got {value}")]
    InvalidWeight { name: String, value: f64 },

    #[error("no embedding language mapping for language {language:?}")]
    UnknownLanguage { language: String },

    #[error("corpus file not found: {}", path.display())]
    CorpusNotFound { path: PathBuf },

    #[error("malformed record at {}:{line}: {reason}", path.display())]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("embedding cache corrupt at {}: {reason}", path.display())]
    CacheCorrupt { path: PathBuf, reason: String },

    #[error("index at {} does not match embeddings: {reason}", path.display())]
    IndexMismatch { path: PathBuf, reason: String },

    #[error("timed out after {waited_ms}ms waiting for cache lock {}", path.display())]
    LockTimeout { path: PathBuf, waited_ms: u128 },

    #[error("unknown embedding model {0:?}")]
    UnknownModel(String),

    #[error("embedding backend `{model}` unavailable: {capability}")]
    BackendUnavailable { model: String, capability: String },
}

impl CognateError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Self::InvalidCorpusSpec { .. } => ErrorCode::InvalidCorpusSpec,
            Self::MissingCorpus { .. } => ErrorCode::MissingCorpus,
            Self::InvalidTopK(_) => ErrorCode::InvalidTopK,
            Self::InvalidWeight { .. } => ErrorCode::InvalidWeight,
            Self::UnknownLanguage { .. } => ErrorCode::UnknownLanguage,
            Self::CorpusNotFound { .. } => ErrorCode::CorpusNotFound,
            Self::MalformedRecord { .. } => ErrorCode::MalformedRecord,
            Self::CacheCorrupt { .. } => ErrorCode::CacheCorrupt,
            Self::IndexMismatch { .. } => ErrorCode::IndexMismatch,
            Self::LockTimeout { .. } => ErrorCode::LockContention,
            Self::UnknownModel(_) => ErrorCode::UnknownModel,
            Self::BackendUnavailable { .. } => ErrorCode::BackendUnavailable,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// Find the first [`CognateError`] in an `anyhow` error chain.
#[must_use]
pub fn classify(err: &anyhow::Error) -> Option<&CognateError> {
    err.chain().find_map(|cause| cause.downcast_ref::<CognateError>())
}
