//! `cognate match`: brute-force pair scoring for small corpora.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use cognate_core::config::CognateConfig;
use cognate_core::jsonl::write_jsonl;
use cognate_search::fallback::{
    MatchRequest, MatchSummary, ScriptFilter, default_match_path, run_match,
};
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, render};

/// Arguments for `cognate match`.
#[derive(Args, Debug, Default)]
pub struct MatchArgs {
    /// Source corpus (JSONL).
    #[arg(long, value_name = "PATH")]
    pub source: Option<PathBuf>,

    /// Target corpus part (JSONL). Repeatable; parts are scored in order.
    #[arg(long = "target", value_name = "PATH")]
    pub targets: Vec<PathBuf>,

    /// Concept table (`concept_id`, `core_gloss_en`, `synonyms_en`).
    #[arg(long, value_name = "PATH")]
    pub concepts: Option<PathBuf>,

    /// Rows loaded per input file (0 = all).
    #[arg(long, default_value_t = 0)]
    pub limit: usize,

    /// Keep only source lemmas containing this script.
    #[arg(long, value_name = "SCRIPT")]
    pub source_script: Option<ScriptFilter>,

    #[arg(long, value_name = "F")]
    pub w_skel: Option<f64>,
    #[arg(long, value_name = "F")]
    pub w_artic: Option<f64>,
    #[arg(long, value_name = "F")]
    pub w_ort: Option<f64>,
    #[arg(long, value_name = "F")]
    pub w_sem: Option<f64>,

    /// Lead file (default: `<output_dir>/match_<run_id>.jsonl`).
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Pin the run id.
    #[arg(long)]
    pub run_id: Option<String>,
}

impl MatchArgs {
    pub fn apply(&self, config: &mut CognateConfig) {
        let fallback = &mut config.fallback;
        for (flag, slot) in [
            (self.w_skel, &mut fallback.skeleton),
            (self.w_artic, &mut fallback.articulatory),
            (self.w_ort, &mut fallback.orthography),
            (self.w_sem, &mut fallback.semantics),
        ] {
            if let Some(value) = flag {
                *slot = value;
            }
        }
    }

    fn request(&self) -> MatchRequest {
        MatchRequest {
            source: self.source.clone().unwrap_or_default(),
            targets: self.targets.clone(),
            concepts: self.concepts.clone(),
            limit: self.limit,
            source_script: self.source_script,
            run_id: self.run_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MatchReport {
    output: PathBuf,
    #[serde(flatten)]
    summary: MatchSummary,
}

/// Execute `cognate match`.
pub fn run_match_cmd(args: &MatchArgs, mut config: CognateConfig, output: OutputMode) -> Result<()> {
    args.apply(&mut config);
    let outcome = run_match(&config.fallback, &args.request())?;

    let path = args.output.clone().unwrap_or_else(|| {
        default_match_path(&config.discovery.output_dir, &outcome.summary.run_id)
    });
    write_jsonl(&path, &outcome.records)?;
    tracing::info!(path = %path.display(), leads = outcome.records.len(), "match leads written");

    let report = MatchReport {
        output: path,
        summary: outcome.summary,
    };
    render(output, &report, render_match_human)
}

fn render_match_human(report: &MatchReport, w: &mut dyn Write) -> std::io::Result<()> {
    let summary = &report.summary;
    pretty_kv(w, "run", &summary.run_id)?;
    pretty_kv(w, "source rows", summary.source_rows.to_string())?;
    for part in &summary.parts {
        pretty_kv(
            w,
            "target part",
            format!(
                "{} ({} rows, {} accepted)",
                part.path.display(),
                part.rows,
                part.accepted
            ),
        )?;
    }
    pretty_kv(w, "pairs scored", summary.pairs_scored.to_string())?;
    pretty_kv(w, "accepted", summary.accepted.to_string())?;
    pretty_kv(w, "output", report.output.display().to_string())
}
