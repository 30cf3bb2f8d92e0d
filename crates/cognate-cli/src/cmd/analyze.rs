//! `cognate analyze`: summary statistics for a lead file.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use cognate_search::analysis::{LeadReport, analyze_leads};

use crate::output::{OutputMode, pretty_kv, render};

/// Arguments for `cognate analyze`.
#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Lead file written by `discover` or `match`.
    #[arg(value_name = "LEADS")]
    pub leads: PathBuf,

    /// Number of top leads to list.
    #[arg(long, default_value_t = 20)]
    pub top: usize,
}

/// Execute `cognate analyze`.
pub fn run_analyze(args: &AnalyzeArgs, output: OutputMode) -> Result<()> {
    let report = analyze_leads(&args.leads, args.top)?;
    render(output, &report, render_analyze_human)
}

fn render_analyze_human(report: &LeadReport, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_kv(w, "leads", report.total.to_string())?;
    if report.unscored > 0 {
        pretty_kv(w, "unscored", report.unscored.to_string())?;
    }
    pretty_kv(w, "mean score", format!("{:.2}", report.mean))?;
    pretty_kv(w, "max score", format!("{:.2}", report.max))?;
    for (category, count) in &report.categories {
        pretty_kv(w, category, count.to_string())?;
    }
    if report.top.is_empty() {
        return Ok(());
    }

    writeln!(w)?;
    writeln!(w, "{:<8} | {:<24} | {:<24} | CATEGORY", "SCORE", "SOURCE", "TARGET")?;
    writeln!(w, "{:-<80}", "")?;
    for lead in &report.top {
        let source: String = lead.source.chars().take(24).collect();
        let target: String = lead.target.chars().take(24).collect();
        writeln!(
            w,
            "{:<8.3} | {source:<24} | {target:<24} | {}",
            lead.score,
            lead.category.as_deref().unwrap_or("-")
        )?;
    }
    Ok(())
}
