//! Brute-force pair matching for corpora too small to need an index.
//!
//! Every source lexeme is scored against every target lexeme. Features are
//! derived once per row before scoring; accepted pairs are collected, sorted
//! once and written at the end.

pub mod features;
pub mod scorer;

pub use features::{ConceptMapper, LexemeFeatures};
pub use scorer::{MatchComponents, MatchRecord, PairScorer};

use anyhow::Result;
use cognate_core::config::FallbackConfig;
use cognate_core::jsonl::{ReadOptions, read_rows};
use cognate_core::lexeme::LexemeRow;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

pub const MATCH_MODE: &str = "brute_force";

/// Sources between debug progress lines.
const PROGRESS_EVERY: usize = 1000;

/// Script a source lemma must contain to be matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFilter {
    Arabic,
    Hebrew,
    Syriac,
    Greek,
    Latin,
}

impl ScriptFilter {
    pub const ALL: [Self; 5] = [
        Self::Arabic,
        Self::Hebrew,
        Self::Syriac,
        Self::Greek,
        Self::Latin,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Arabic => "arabic",
            Self::Hebrew => "hebrew",
            Self::Syriac => "syriac",
            Self::Greek => "greek",
            Self::Latin => "latin",
        }
    }

    #[must_use]
    pub const fn contains(self, ch: char) -> bool {
        match self {
            Self::Arabic => matches!(ch, '\u{0600}'..='\u{06FF}'),
            Self::Hebrew => matches!(ch, '\u{0590}'..='\u{05FF}'),
            Self::Syriac => matches!(ch, '\u{0700}'..='\u{074F}'),
            Self::Greek => matches!(ch, '\u{0370}'..='\u{03FF}' | '\u{1F00}'..='\u{1FFF}'),
            Self::Latin => ch.is_ascii_alphabetic() || matches!(ch, '\u{00C0}'..='\u{024F}'),
        }
    }

    /// Whether the row's lemma has at least one character of this script.
    #[must_use]
    pub fn admits(self, row: &LexemeRow) -> bool {
        row.lemma().is_some_and(|lemma| lemma.chars().any(|ch| self.contains(ch)))
    }
}

impl fmt::Display for ScriptFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|script| script.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<_> = Self::ALL.into_iter().map(Self::as_str).collect();
                format!("unknown script '{s}' (expected one of: {})", known.join(", "))
            })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MatchRequest {
    pub source: PathBuf,
    /// Target corpus parts, scored in order.
    pub targets: Vec<PathBuf>,
    pub concepts: Option<PathBuf>,
    /// Rows loaded per input file; 0 means unlimited.
    pub limit: usize,
    pub source_script: Option<ScriptFilter>,
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub accepted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchSummary {
    pub run_id: String,
    pub mode: &'static str,
    pub source_rows: usize,
    pub parts: Vec<PartSummary>,
    pub pairs_scored: u64,
    pub accepted: usize,
}

/// Accepted pairs in output order, plus run statistics.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub summary: MatchSummary,
    pub records: Vec<MatchRecord>,
}

#[derive(Debug)]
struct Accepted {
    source_position: usize,
    part: usize,
    target_position: usize,
    record: MatchRecord,
}

#[must_use]
pub fn default_match_path(output_dir: &Path, run_id: &str) -> PathBuf {
    output_dir.join(format!("match_{run_id}.jsonl"))
}

/// Score every source row against every row of every target part.
///
/// # Errors
///
/// Returns an error if a weight is invalid, the request names no target, or
/// an input file is missing.
pub fn run_match(config: &FallbackConfig, request: &MatchRequest) -> Result<MatchOutcome> {
    config.validate()?;
    if request.source.as_os_str().is_empty() {
        return Err(cognate_core::CognateError::MissingCorpus { role: "source" }.into());
    }
    if request.targets.is_empty() {
        return Err(cognate_core::CognateError::MissingCorpus { role: "target" }.into());
    }

    let run_id = request
        .run_id
        .clone()
        .unwrap_or_else(crate::discovery::new_run_id);
    let mapper = request
        .concepts
        .as_deref()
        .map(ConceptMapper::load)
        .transpose()?;
    let scorer = PairScorer::new(*config);

    let sources = load_sources(request)?;
    let source_features: Vec<LexemeFeatures> = sources
        .iter()
        .map(|row| LexemeFeatures::derive(row, mapper.as_ref()))
        .collect();
    tracing::info!(
        path = %request.source.display(),
        rows = source_features.len(),
        script = request.source_script.map(ScriptFilter::as_str),
        "source loaded"
    );

    let mut accepted = Vec::new();
    let mut parts = Vec::with_capacity(request.targets.len());
    let mut pairs_scored = 0_u64;

    for (part, path) in request.targets.iter().enumerate() {
        let started = Instant::now();
        let rows = read_rows(path, ReadOptions::lenient(request.limit))?;
        let targets: Vec<LexemeFeatures> = rows
            .iter()
            .map(|row| LexemeFeatures::derive(row, mapper.as_ref()))
            .collect();
        tracing::info!(
            part = part + 1,
            of = request.targets.len(),
            path = %path.display(),
            rows = targets.len(),
            "scoring target part"
        );

        let before = accepted.len();
        for (done, source) in source_features.iter().enumerate() {
            for target in &targets {
                if let Some(record) = scorer.score(source, target) {
                    accepted.push(Accepted {
                        source_position: source.position,
                        part,
                        target_position: target.position,
                        record,
                    });
                }
            }
            if (done + 1) % PROGRESS_EVERY == 0 {
                tracing::debug!(part = part + 1, sources = done + 1, "progress");
            }
        }
        pairs_scored += (source_features.len() as u64) * (targets.len() as u64);

        let part_accepted = accepted.len() - before;
        tracing::info!(
            part = part + 1,
            accepted = part_accepted,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "target part done"
        );
        parts.push(PartSummary {
            path: path.clone(),
            rows: targets.len(),
            accepted: part_accepted,
        });
    }

    accepted.sort_by(|a, b| {
        b.record
            .score
            .total_cmp(&a.record.score)
            .then(a.source_position.cmp(&b.source_position))
            .then(a.part.cmp(&b.part))
            .then(a.target_position.cmp(&b.target_position))
    });

    let summary = MatchSummary {
        run_id,
        mode: MATCH_MODE,
        source_rows: source_features.len(),
        parts,
        pairs_scored,
        accepted: accepted.len(),
    };
    tracing::info!(
        run_id = %summary.run_id,
        pairs = summary.pairs_scored,
        accepted = summary.accepted,
        "matching finished"
    );
    Ok(MatchOutcome {
        summary,
        records: accepted.into_iter().map(|a| a.record).collect(),
    })
}

fn load_sources(request: &MatchRequest) -> Result<Vec<LexemeRow>> {
    let Some(script) = request.source_script else {
        return read_rows(&request.source, ReadOptions::lenient(request.limit));
    };
    let rows = read_rows(&request.source, ReadOptions::lenient(0))?;
    let total = rows.len();
    let mut kept: Vec<LexemeRow> = rows.into_iter().filter(|row| script.admits(row)).collect();
    if request.limit > 0 {
        kept.truncate(request.limit);
    }
    tracing::debug!(%script, total, kept = kept.len(), "source script filter applied");
    Ok(kept)
}
