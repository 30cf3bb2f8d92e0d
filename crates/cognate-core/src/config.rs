use crate::error::CognateError;
use crate::lang::LanguageMap;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Project config file looked up in the working directory.
pub const PROJECT_CONFIG_FILE: &str = "cognate.toml";

/// Run configuration, built once and passed explicitly to every component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CognateConfig {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub weights: HybridWeights,
    #[serde(default)]
    pub embed: EmbedSettings,
    #[serde(default)]
    pub fallback: FallbackConfig,
    /// Extra `code = "tag"` entries for the embedding-language map.
    #[serde(default)]
    pub languages: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    #[serde(default = "default_max_per_source")]
    pub max_per_source: usize,
    /// Rows loaded per corpus; 0 means unlimited.
    #[serde(default)]
    pub limit: usize,
    #[serde(default = "default_true")]
    pub hybrid: bool,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
            top_k: default_top_k(),
            max_per_source: default_max_per_source(),
            limit: 0,
            hybrid: default_true(),
            cache_dir: default_cache_dir(),
            output_dir: default_output_dir(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl DiscoveryConfig {
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Coefficients for the five hybrid signals.
///
/// Only signals with a defined value for a pair contribute, and the combined
/// score is renormalized by the weights actually used.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridWeights {
    #[serde(default = "default_w_semantic")]
    pub semantic: f64,
    #[serde(default = "default_w_form")]
    pub form: f64,
    #[serde(default = "default_w_orthography")]
    pub orthography: f64,
    #[serde(default = "default_w_phonetic")]
    pub phonetic: f64,
    #[serde(default = "default_w_skeleton")]
    pub skeleton: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            semantic: default_w_semantic(),
            form: default_w_form(),
            orthography: default_w_orthography(),
            phonetic: default_w_phonetic(),
            skeleton: default_w_skeleton(),
        }
    }
}

impl HybridWeights {
    /// Weights by signal name, in a fixed order.
    #[must_use]
    pub const fn named(&self) -> [(&'static str, f64); 5] {
        [
            ("semantic", self.semantic),
            ("form", self.form),
            ("orthography", self.orthography),
            ("phonetic", self.phonetic),
            ("skeleton", self.skeleton),
        ]
    }

    /// # Errors
    ///
    /// Returns [`CognateError::InvalidWeight`] for the first weight that is
    /// negative, NaN, or infinite.
    pub fn validate(&self) -> Result<(), CognateError> {
        validate_weights(&self.named())
    }
}

/// Pooling applied to transformer token states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    #[default]
    Mean,
    Cls,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedSettings {
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
    /// Hex SHA-256 the model file must match before it is loaded.
    #[serde(default)]
    pub model_sha256: Option<String>,
    #[serde(default)]
    pub pooling: Pooling,
    #[serde(default = "default_form_dimension")]
    pub form_dimension: usize,
    #[serde(default = "default_form_max_ngram")]
    pub form_max_ngram: usize,
}

impl Default for EmbedSettings {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            model_sha256: None,
            pooling: Pooling::default(),
            form_dimension: default_form_dimension(),
            form_max_ngram: default_form_max_ngram(),
        }
    }
}

/// Brute-force scorer weights and acceptance thresholds.
///
/// Defaults are empirically tuned.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_fb_skeleton")]
    pub skeleton: f64,
    #[serde(default = "default_fb_articulatory")]
    pub articulatory: f64,
    #[serde(default = "default_fb_orthography")]
    pub orthography: f64,
    #[serde(default = "default_fb_semantics")]
    pub semantics: f64,
    #[serde(default = "default_fb_threshold")]
    pub threshold: f64,
    #[serde(default = "default_fb_relaxed_threshold")]
    pub relaxed_threshold: f64,
    #[serde(default = "default_fb_relax_above")]
    pub relax_above_semantics: f64,
    #[serde(default = "default_fb_articulatory_placeholder")]
    pub articulatory_placeholder: f64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            skeleton: default_fb_skeleton(),
            articulatory: default_fb_articulatory(),
            orthography: default_fb_orthography(),
            semantics: default_fb_semantics(),
            threshold: default_fb_threshold(),
            relaxed_threshold: default_fb_relaxed_threshold(),
            relax_above_semantics: default_fb_relax_above(),
            articulatory_placeholder: default_fb_articulatory_placeholder(),
        }
    }
}

impl FallbackConfig {
    /// # Errors
    ///
    /// Returns [`CognateError::InvalidWeight`] for the first invalid weight.
    pub fn validate(&self) -> Result<(), CognateError> {
        validate_weights(&[
            ("skeleton", self.skeleton),
            ("articulatory", self.articulatory),
            ("orthography", self.orthography),
            ("semantics", self.semantics),
        ])
    }
}

fn validate_weights(weights: &[(&str, f64)]) -> Result<(), CognateError> {
    for &(name, value) in weights {
        if !value.is_finite() || value < 0.0 {
            return Err(CognateError::InvalidWeight {
                name: name.to_string(),
                value,
            });
        }
    }
    Ok(())
}

impl CognateConfig {
    /// Check every value that would otherwise fail deep inside a run.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found.
    pub fn validate(&self) -> Result<(), CognateError> {
        if self.discovery.top_k <= 0 {
            return Err(CognateError::InvalidTopK(self.discovery.top_k));
        }
        self.weights.validate()?;
        self.fallback.validate()
    }

    /// Embedding-language map with `[languages]` entries applied.
    #[must_use]
    pub fn language_map(&self) -> LanguageMap {
        LanguageMap::with_overrides(&self.languages)
    }
}

/// Path of the per-user config file, if the platform has a config dir.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cognate/config.toml"))
}

/// Load configuration with precedence defaults → user config → project
/// config (`explicit`, or `./cognate.toml` when present).
///
/// Tables merge key by key, so a project file may override a single weight
/// without restating the rest.
///
/// # Errors
///
/// Returns [`CognateError::ConfigParse`] naming the file that failed, or an
/// I/O error if an explicitly named file cannot be read.
pub fn load_config(explicit: Option<&Path>) -> Result<CognateConfig> {
    let mut layers = Vec::new();
    if let Some(path) = user_config_path().filter(|p| p.is_file()) {
        layers.push(path);
    }
    match explicit {
        Some(path) => layers.push(path.to_path_buf()),
        None => {
            let project = PathBuf::from(PROJECT_CONFIG_FILE);
            if project.is_file() {
                layers.push(project);
            }
        }
    }
    load_layers(&layers)
}

/// Merge the given TOML files in order and deserialize the result.
///
/// # Errors
///
/// See [`load_config`].
pub fn load_layers(paths: &[PathBuf]) -> Result<CognateConfig> {
    let mut merged = toml::Table::new();
    for path in paths {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let table: toml::Table = toml::from_str(&content).map_err(|err| CognateError::ConfigParse {
            path: path.clone(),
            reason: err.message().to_string(),
        })?;
        merge_tables(&mut merged, table);
        tracing::debug!(path = %path.display(), "config layer applied");
    }

    let source = paths
        .last()
        .cloned()
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    toml::Value::Table(merged)
        .try_into::<CognateConfig>()
        .map_err(|err| {
            CognateError::ConfigParse {
                path: source,
                reason: err.message().to_string(),
            }
            .into()
        })
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

const fn default_true() -> bool {
    true
}

fn default_models() -> Vec<String> {
    vec!["semantic".to_string(), "form".to_string()]
}

const fn default_top_k() -> i64 {
    200
}

const fn default_max_per_source() -> usize {
    200
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".cognate/cache")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".cognate/leads")
}

const fn default_lock_timeout_ms() -> u64 {
    5000
}

const fn default_w_semantic() -> f64 {
    0.40
}

const fn default_w_form() -> f64 {
    0.20
}

const fn default_w_orthography() -> f64 {
    0.15
}

const fn default_w_phonetic() -> f64 {
    0.15
}

const fn default_w_skeleton() -> f64 {
    0.10
}

fn default_model_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cognate"))
        .join("cognate/models/semantic")
}

const fn default_form_dimension() -> usize {
    256
}

const fn default_form_max_ngram() -> usize {
    3
}

const fn default_fb_skeleton() -> f64 {
    3.0
}

const fn default_fb_articulatory() -> f64 {
    3.0
}

const fn default_fb_orthography() -> f64 {
    2.0
}

const fn default_fb_semantics() -> f64 {
    2.0
}

const fn default_fb_threshold() -> f64 {
    2.0
}

const fn default_fb_relaxed_threshold() -> f64 {
    1.5
}

const fn default_fb_relax_above() -> f64 {
    0.5
}

const fn default_fb_articulatory_placeholder() -> f64 {
    0.5
}
