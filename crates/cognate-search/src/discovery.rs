//! Discovery runs: retrieve, merge, score, rank, and stream leads.
//!
//! A run has two phases. [`prepare`] does everything that can fail for
//! configuration or dependency reasons (backends, language tags, corpus
//! loads, embeddings, indexes) without touching the output. Only then does
//! the caller open its writer and call [`PreparedRun::emit`], which writes
//! each source lexeme's leads before moving on to the next.

use crate::cache::{CachedEmbeddings, EmbeddingCache};
use crate::emit::{DISCOVERY_MODE, Provenance, write_leads};
use crate::embed::{Embedder, EmbedderRegistry};
use crate::fusion::{self, CandidateMerger, ModelRoster};
use crate::index::{FlatIpIndex, IndexStore, TopK};
use anyhow::{Context, Result, bail};
use chrono::Utc;
use cognate_core::config::{CognateConfig, HybridWeights};
use cognate_core::corpus::CorpusSpec;
use cognate_core::error::CognateError;
use cognate_core::jsonl::{LeadWriter, ReadOptions, read_rows};
use cognate_core::lang::LanguageMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Corpora and switches for one run. Everything else comes from
/// [`CognateConfig`].
#[derive(Debug, Clone, Default)]
pub struct DiscoveryRequest {
    pub sources: Vec<CorpusSpec>,
    pub targets: Vec<CorpusSpec>,
    pub rebuild_cache: bool,
    pub rebuild_index: bool,
    /// Pin the run id instead of deriving it from the clock.
    pub run_id: Option<String>,
}

/// Outcome of [`PreparedRun::emit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub models: Vec<String>,
    pub sources_processed: usize,
    pub leads_written: usize,
    /// Non-sentinel hits per target corpus (`language:stage`), all models.
    pub retrievals: BTreeMap<String, usize>,
}

struct ModelView {
    embeddings: CachedEmbeddings,
    index: Option<FlatIpIndex>,
}

struct PreparedCorpus {
    spec: CorpusSpec,
    /// One view per configured model, in roster order.
    views: Vec<ModelView>,
}

/// Fully loaded run, ready to stream.
pub struct PreparedRun {
    run_id: String,
    roster: ModelRoster,
    top_k: TopK,
    max_per_source: usize,
    weights: Option<HybridWeights>,
    sources: Vec<PreparedCorpus>,
    targets: Vec<PreparedCorpus>,
}

impl std::fmt::Debug for PreparedRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedRun")
            .field("run_id", &self.run_id)
            .field("models", &self.roster.names())
            .field("sources", &self.sources.len())
            .field("targets", &self.targets.len())
            .finish_non_exhaustive()
    }
}

/// UTC timestamp run id, `%Y%m%d_%H%M%S`.
#[must_use]
pub fn new_run_id() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// `<output_dir>/discovery_<run_id>.jsonl`
#[must_use]
pub fn default_output_path(output_dir: &Path, run_id: &str) -> PathBuf {
    output_dir.join(format!("discovery_{run_id}.jsonl"))
}

fn dedup_models(models: &[String]) -> Vec<String> {
    let mut seen = Vec::with_capacity(models.len());
    for model in models {
        if !seen.contains(model) {
            seen.push(model.clone());
        }
    }
    seen
}

fn language_tag(
    embedders: &[Box<dyn Embedder>],
    languages: &LanguageMap,
    spec: &CorpusSpec,
) -> Result<Option<String>, CognateError> {
    if embedders.iter().any(|e| e.needs_language()) {
        languages
            .resolve(&spec.language, spec.embedding_language.as_deref())
            .map(Some)
    } else {
        Ok(None)
    }
}

/// Validate, create backends, load corpora, and embed and index everything
/// the run needs. Nothing is written outside the cache directory.
///
/// # Errors
///
/// Configuration errors ([`CognateError::MissingCorpus`],
/// [`CognateError::InvalidTopK`], [`CognateError::InvalidWeight`],
/// [`CognateError::UnknownLanguage`], [`CognateError::UnknownModel`]),
/// [`CognateError::BackendUnavailable`], corpus load failures, and cache or
/// index errors.
pub fn prepare(
    config: &CognateConfig,
    registry: &EmbedderRegistry,
    request: &DiscoveryRequest,
) -> Result<PreparedRun> {
    if request.sources.is_empty() {
        return Err(CognateError::MissingCorpus { role: "source" }.into());
    }
    if request.targets.is_empty() {
        return Err(CognateError::MissingCorpus { role: "target" }.into());
    }
    let top_k = TopK::new(config.discovery.top_k)?;
    config.weights.validate()?;

    let names = dedup_models(&config.discovery.models);
    if names.is_empty() {
        bail!("no embedding models configured; set [discovery].models or pass --models");
    }
    let mut roster = Vec::with_capacity(names.len());
    let mut embedders = Vec::with_capacity(names.len());
    for name in &names {
        let kind = registry
            .kind_of(name)
            .ok_or_else(|| CognateError::UnknownModel(name.clone()))?;
        embedders.push(registry.create(name, &config.embed)?);
        roster.push((name.clone(), kind));
    }
    let roster = ModelRoster::new(roster);

    let languages = config.language_map();
    let mut tags = Vec::new();
    for spec in request.sources.iter().chain(&request.targets) {
        tags.push(language_tag(&embedders, &languages, spec)?);
    }

    let cache = EmbeddingCache::new(&config.discovery.cache_dir, config.discovery.lock_timeout());
    let indexes = IndexStore::new(&config.discovery.cache_dir, config.discovery.lock_timeout());
    let read = ReadOptions::strict(config.discovery.limit);

    let mut prepared = Vec::with_capacity(tags.len());
    let all_specs = request.sources.iter().chain(&request.targets);
    for (n, (spec, tag)) in all_specs.zip(&tags).enumerate() {
        let is_target = n >= request.sources.len();
        let rows = read_rows(&spec.path, read)
            .with_context(|| format!("Failed to load corpus {}", spec.label()))?;
        tracing::info!(
            corpus = %spec.label(),
            rows = rows.len(),
            role = if is_target { "target" } else { "source" },
            "corpus loaded"
        );

        let mut views = Vec::with_capacity(embedders.len());
        for embedder in &embedders {
            let tag = embedder.needs_language().then_some(tag.as_deref()).flatten();
            let embeddings =
                cache.get_or_compute(embedder.as_ref(), spec, &rows, tag, request.rebuild_cache)?;
            let index = if is_target {
                let rebuild = request.rebuild_index || embeddings.computed;
                Some(indexes.load_or_build(embedder.name(), spec, &embeddings.matrix, rebuild)?)
            } else {
                None
            };
            views.push(ModelView { embeddings, index });
        }
        prepared.push(PreparedCorpus {
            spec: spec.clone(),
            views,
        });
    }
    let targets = prepared.split_off(request.sources.len());

    Ok(PreparedRun {
        run_id: request.run_id.clone().unwrap_or_else(new_run_id),
        roster,
        top_k,
        max_per_source: config.discovery.max_per_source,
        weights: config.discovery.hybrid.then_some(config.weights),
        sources: prepared,
        targets,
    })
}

impl PreparedRun {
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[must_use]
    pub fn provenance(&self) -> Provenance {
        Provenance {
            mode: DISCOVERY_MODE,
            models: self.roster.names(),
            topk_per_target: self.top_k.get(),
            max_out_per_source: self.max_per_source,
        }
    }

    /// Stream leads for every source lexeme, in source-row order.
    ///
    /// Source rows come from the first model's cached row set; other
    /// models are aligned to it by position.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn emit<W: Write>(&self, writer: &mut LeadWriter<W>) -> Result<RunSummary> {
        let provenance = self.provenance();
        let models = self.roster.names();
        let mut summary = RunSummary {
            run_id: self.run_id.clone(),
            models: models.clone(),
            sources_processed: 0,
            leads_written: 0,
            retrievals: self
                .targets
                .iter()
                .map(|t| (t.spec.label(), 0))
                .collect(),
        };

        for source in &self.sources {
            let Some(primary) = source.views.first() else {
                continue;
            };
            let alignments: Vec<HashMap<usize, usize>> = source
                .views
                .iter()
                .map(|view| {
                    view.embeddings
                        .rows
                        .iter()
                        .enumerate()
                        .map(|(idx, row)| (row.position(), idx))
                        .collect()
                })
                .collect();
            let mut misaligned = vec![false; models.len()];

            for (primary_idx, source_row) in primary.embeddings.rows.iter().enumerate() {
                let mut merger = CandidateMerger::new();
                for (m, (model, view)) in models.iter().zip(&source.views).enumerate() {
                    let row_idx = if m == 0 {
                        Some(primary_idx)
                    } else {
                        alignments[m].get(&source_row.position()).copied()
                    };
                    let Some(query) = row_idx.and_then(|idx| view.embeddings.matrix.row(idx))
                    else {
                        if !misaligned[m] {
                            misaligned[m] = true;
                            tracing::warn!(
                                model = %model,
                                corpus = %source.spec.label(),
                                position = source_row.position(),
                                "source row missing from this model's cached rows; skipping model for such rows"
                            );
                        }
                        continue;
                    };

                    for target in &self.targets {
                        let target_view = &target.views[m];
                        let Some(index) = &target_view.index else {
                            continue;
                        };
                        let hits = index.nearest(query, self.top_k);
                        if let Some(count) = summary.retrievals.get_mut(&target.spec.label()) {
                            *count += hits.len();
                        }
                        merger.add_hits(model, &target.spec, &target_view.embeddings.rows, hits);
                    }
                }

                let candidates = fusion::finalize(
                    merger,
                    source_row,
                    &self.roster,
                    self.weights.as_ref(),
                    self.max_per_source,
                );
                summary.leads_written += write_leads(
                    writer,
                    &self.run_id,
                    &source.spec,
                    source_row,
                    &candidates,
                    &provenance,
                )?;
                summary.sources_processed += 1;
            }
        }

        tracing::info!(
            run_id = %summary.run_id,
            sources = summary.sources_processed,
            leads = summary.leads_written,
            "discovery complete"
        );
        Ok(summary)
    }
}
