//! Summary statistics over a lead file from either matching path.

use anyhow::Result;
use cognate_core::jsonl::read_values_lenient;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// One of the highest-scoring leads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopLead {
    pub score: f64,
    pub source: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadReport {
    /// Leads carrying a usable score.
    pub total: usize,
    /// Records skipped because no score could be found.
    pub unscored: usize,
    pub mean: f64,
    pub max: f64,
    pub categories: BTreeMap<String, usize>,
    pub top: Vec<TopLead>,
}

/// `hybrid.combined_score` for discovery leads, else `score`.
#[must_use]
pub fn lead_score(lead: &Value) -> Option<f64> {
    lead.pointer("/hybrid/combined_score")
        .and_then(Value::as_f64)
        .or_else(|| lead.get("score").and_then(Value::as_f64))
}

fn side_label(lead: &Value, side: &str) -> String {
    let descriptor = lead.get(side);
    descriptor
        .and_then(|d| d.get("lemma"))
        .filter(|v| !v.is_null())
        .or_else(|| descriptor.and_then(|d| d.get("id")))
        .or_else(|| lead.get(format!("{side}_id")))
        .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
        .unwrap_or_default()
}

/// Summarise `leads`, keeping the `top` best by score. Ties keep file order.
#[must_use]
pub fn summarize(leads: &[Value], top: usize) -> LeadReport {
    let mut scored: Vec<(f64, &Value)> = Vec::with_capacity(leads.len());
    let mut categories = BTreeMap::new();
    for lead in leads {
        if let Some(category) = lead.get("category").and_then(Value::as_str) {
            *categories.entry(category.to_string()).or_insert(0) += 1;
        }
        if let Some(score) = lead_score(lead) {
            scored.push((score, lead));
        }
    }

    let total = scored.len();
    let (mean, max) = if total == 0 {
        (0.0, 0.0)
    } else {
        let sum: f64 = scored.iter().map(|(s, _)| s).sum();
        let max = scored
            .iter()
            .map(|(s, _)| *s)
            .fold(f64::NEG_INFINITY, f64::max);
        (sum / total as f64, max)
    };

    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    let top = scored
        .iter()
        .take(top)
        .map(|(score, lead)| TopLead {
            score: *score,
            source: side_label(lead, "source"),
            target: side_label(lead, "target"),
            category: lead
                .get("category")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
        .collect();

    LeadReport {
        total,
        unscored: leads.len() - total,
        mean,
        max,
        categories,
        top,
    }
}

/// Read and summarise a lead file. Malformed lines are skipped.
///
/// # Errors
///
/// Returns an error if the file is missing or unreadable.
pub fn analyze_leads(path: &Path, top: usize) -> Result<LeadReport> {
    let leads = read_values_lenient(path)?;
    let report = summarize(&leads, top);
    tracing::info!(
        path = %path.display(),
        total = report.total,
        unscored = report.unscored,
        "leads analysed"
    );
    Ok(report)
}
