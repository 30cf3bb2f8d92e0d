//! `cognate discover`: embedding retrieval with hybrid scoring.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use cognate_core::config::CognateConfig;
use cognate_core::corpus::CorpusSpec;
use cognate_core::jsonl::LeadWriter;
use cognate_search::discovery::{DiscoveryRequest, RunSummary, default_output_path, prepare};
use cognate_search::embed::EmbedderRegistry;
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, render};

/// Arguments for `cognate discover`.
#[derive(Args, Debug, Default)]
pub struct DiscoverArgs {
    /// Source corpus: `<language>[@<stage>][@<embedding-language>]=<path>`.
    #[arg(long = "source", value_name = "SPEC")]
    pub sources: Vec<String>,

    /// Target corpus, same syntax as --source. Repeatable.
    #[arg(long = "target", value_name = "SPEC")]
    pub targets: Vec<String>,

    /// Embedding models to retrieve with.
    #[arg(long, num_args = 1.., value_name = "MODEL")]
    pub models: Vec<String>,

    /// Neighbours retrieved per target corpus and model.
    #[arg(long, allow_hyphen_values = true)]
    pub top_k: Option<i64>,

    /// Leads kept per source lexeme.
    #[arg(long)]
    pub max_out: Option<usize>,

    /// Rows loaded per corpus (0 = all).
    #[arg(long)]
    pub limit: Option<usize>,

    /// Recompute embeddings even when cached.
    #[arg(long)]
    pub rebuild_cache: bool,

    /// Rebuild target indexes even when cached.
    #[arg(long)]
    pub rebuild_index: bool,

    /// Skip orthography/phonetic/skeleton scoring.
    #[arg(long)]
    pub no_hybrid: bool,

    #[arg(long, value_name = "F")]
    pub w_semantic: Option<f64>,
    #[arg(long, value_name = "F")]
    pub w_form: Option<f64>,
    #[arg(long, value_name = "F")]
    pub w_orth: Option<f64>,
    #[arg(long, value_name = "F")]
    pub w_phonetic: Option<f64>,
    #[arg(long, value_name = "F")]
    pub w_skeleton: Option<f64>,

    /// Cache root for embeddings and indexes.
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Lead file (default: `<output_dir>/discovery_<run_id>.jsonl`).
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Pin the run id for reproducible output.
    #[arg(long)]
    pub run_id: Option<String>,
}

impl DiscoverArgs {
    /// Layer flag overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut CognateConfig) {
        let discovery = &mut config.discovery;
        if !self.models.is_empty() {
            discovery.models.clone_from(&self.models);
        }
        if let Some(k) = self.top_k {
            discovery.top_k = k;
        }
        if let Some(max) = self.max_out {
            discovery.max_per_source = max;
        }
        if let Some(limit) = self.limit {
            discovery.limit = limit;
        }
        if self.no_hybrid {
            discovery.hybrid = false;
        }
        if let Some(dir) = &self.cache_dir {
            discovery.cache_dir.clone_from(dir);
        }

        let weights = &mut config.weights;
        for (flag, slot) in [
            (self.w_semantic, &mut weights.semantic),
            (self.w_form, &mut weights.form),
            (self.w_orth, &mut weights.orthography),
            (self.w_phonetic, &mut weights.phonetic),
            (self.w_skeleton, &mut weights.skeleton),
        ] {
            if let Some(value) = flag {
                *slot = value;
            }
        }
    }

    fn request(&self) -> Result<DiscoveryRequest> {
        let parse = |specs: &[String]| -> Result<Vec<CorpusSpec>> {
            specs
                .iter()
                .map(|raw| CorpusSpec::parse(raw).map_err(anyhow::Error::from))
                .collect()
        };
        Ok(DiscoveryRequest {
            sources: parse(&self.sources)?,
            targets: parse(&self.targets)?,
            rebuild_cache: self.rebuild_cache,
            rebuild_index: self.rebuild_index,
            run_id: self.run_id.clone(),
        })
    }
}

#[derive(Debug, Serialize)]
struct DiscoverReport {
    output: PathBuf,
    #[serde(flatten)]
    summary: RunSummary,
}

/// Execute `cognate discover`.
///
/// Everything that can fail for configuration or dependency reasons runs
/// before the lead file is created.
pub fn run_discover(args: &DiscoverArgs, mut config: CognateConfig, output: OutputMode) -> Result<()> {
    args.apply(&mut config);
    let request = args.request()?;
    let registry = EmbedderRegistry::with_defaults();
    let run = prepare(&config, &registry, &request)?;

    let path = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&config.discovery.output_dir, run.run_id()));
    let mut writer = LeadWriter::create(&path)?;
    let summary = run
        .emit(&mut writer)
        .with_context(|| format!("Failed to write leads to {}", path.display()))?;

    let report = DiscoverReport {
        output: path,
        summary,
    };
    render(output, &report, render_discover_human)
}

fn render_discover_human(report: &DiscoverReport, w: &mut dyn Write) -> std::io::Result<()> {
    let summary = &report.summary;
    pretty_kv(w, "run", &summary.run_id)?;
    pretty_kv(w, "models", summary.models.join(", "))?;
    pretty_kv(w, "sources", summary.sources_processed.to_string())?;
    pretty_kv(w, "leads", summary.leads_written.to_string())?;
    for (target, hits) in &summary.retrievals {
        pretty_kv(w, &format!("hits {target}"), hits.to_string())?;
    }
    pretty_kv(w, "output", report.output.display().to_string())
}
