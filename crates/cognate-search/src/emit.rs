//! Lead records and the per-source streaming writer.

use crate::fusion::{Candidate, Category, HybridScore};
use anyhow::Result;
use cognate_core::corpus::CorpusSpec;
use cognate_core::jsonl::LeadWriter;
use cognate_core::lexeme::LexemeRow;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

pub const DISCOVERY_MODE: &str = "discovery_retrieval";

#[derive(Debug, Clone, Serialize)]
pub struct LexemeDescriptor<'a> {
    pub id: &'a str,
    pub position: usize,
    pub lemma: Option<&'a str>,
    pub language: &'a str,
    pub stage: &'a str,
}

impl<'a> LexemeDescriptor<'a> {
    #[must_use]
    pub fn new(corpus: &'a CorpusSpec, row: &'a LexemeRow) -> Self {
        Self {
            id: row.identity(),
            position: row.position(),
            lemma: row.lemma(),
            language: &corpus.language,
            stage: &corpus.stage,
        }
    }
}

/// Run parameters repeated on every lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provenance {
    pub mode: &'static str,
    pub models: Vec<String>,
    pub topk_per_target: usize,
    pub max_out_per_source: usize,
}

#[derive(Debug, Serialize)]
pub struct LeadRecord<'a> {
    pub run_id: &'a str,
    pub source: LexemeDescriptor<'a>,
    pub target: LexemeDescriptor<'a>,
    pub scores: &'a BTreeMap<String, f64>,
    pub retrieved_by: &'a [String],
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hybrid: Option<&'a HybridScore>,
    pub provenance: &'a Provenance,
}

/// Write one source lexeme's ranked leads and flush, so output on disk
/// never lags more than one source behind.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn write_leads<W: Write>(
    writer: &mut LeadWriter<W>,
    run_id: &str,
    source_corpus: &CorpusSpec,
    source: &LexemeRow,
    candidates: &[Candidate<'_>],
    provenance: &Provenance,
) -> Result<usize> {
    for candidate in candidates {
        let record = LeadRecord {
            run_id,
            source: LexemeDescriptor::new(source_corpus, source),
            target: LexemeDescriptor::new(candidate.target_corpus, candidate.target),
            scores: &candidate.scores,
            retrieved_by: &candidate.retrieved_by,
            category: candidate.category,
            hybrid: candidate.hybrid.as_ref(),
            provenance,
        };
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(candidates.len())
}
