//! Pluggable embedding backends.
//!
//! Every backend maps a batch of texts to a row-aligned matrix of unit-norm
//! vectors, so downstream retrieval can use inner product as cosine
//! similarity. Backends are created by name through [`EmbedderRegistry`];
//! registering a new one does not touch merge, score, or rank code.

pub mod form;
pub mod semantic;

use anyhow::{Result, bail};
use cognate_core::config::EmbedSettings;
use cognate_core::error::CognateError;
use std::collections::BTreeMap;
use std::fmt;

pub use form::CharFormEncoder;
pub use semantic::SemanticEncoder;

/// Which similarity notion a backend captures. Drives category labels and
/// which hybrid weight its score uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Semantic,
    Form,
    Other,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Semantic => "semantic",
            Self::Form => "form",
            Self::Other => "other",
        })
    }
}

/// Text-to-vector backend.
///
/// Implementations must be deterministic for identical input and
/// configuration, independent of call order, and return unit-norm rows
/// (all-zero rows stay all-zero).
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ModelKind;

    fn dimension(&self) -> usize;

    /// Whether [`Embedder::embed`] requires a resolved language tag.
    fn needs_language(&self) -> bool {
        false
    }

    /// Embed `texts` in order, one row per text.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or a required language tag is
    /// missing.
    fn embed(&self, texts: &[&str], language: Option<&str>) -> Result<EmbeddingMatrix>;
}

/// Row-major matrix of `f32` vectors with a fixed dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    dim: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// A matrix with zero rows.
    #[must_use]
    pub const fn empty(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
        }
    }

    /// Build from rows, L2-normalizing each one.
    ///
    /// # Errors
    ///
    /// Fails if any row's length differs from `dim`.
    pub fn from_rows_normalized(dim: usize, rows: Vec<Vec<f32>>) -> Result<Self> {
        let mut data = Vec::with_capacity(rows.len() * dim);
        for (idx, mut row) in rows.into_iter().enumerate() {
            if row.len() != dim {
                bail!(
                    "embedding row {idx} has dimension {}, expected {dim}",
                    row.len()
                );
            }
            l2_normalize(&mut row);
            data.extend_from_slice(&row);
        }
        Ok(Self { dim, data })
    }

    /// Wrap already-normalized row-major data, e.g. from disk.
    ///
    /// # Errors
    ///
    /// Fails if `data` is not a whole number of rows.
    pub fn from_raw(dim: usize, data: Vec<f32>) -> Result<Self> {
        if dim == 0 && !data.is_empty() {
            bail!("zero-dimension matrix cannot hold {} values", data.len());
        }
        if dim > 0 && data.len() % dim != 0 {
            bail!(
                "matrix data length {} is not a multiple of dimension {dim}",
                data.len()
            );
        }
        Ok(Self { dim, data })
    }

    #[must_use]
    pub const fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row `idx`, or `None` past the end.
    #[must_use]
    pub fn row(&self, idx: usize) -> Option<&[f32]> {
        let start = idx.checked_mul(self.dim)?;
        self.data.get(start..start + self.dim)
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dim.max(1))
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Scale `v` to unit L2 norm in place. All-zero (or non-finite norm)
/// vectors are left unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Inner product of two equal-length vectors.
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn create_semantic(settings: &EmbedSettings) -> Result<Box<dyn Embedder>> {
    Ok(Box::new(SemanticEncoder::load(settings)?))
}

fn create_form(settings: &EmbedSettings) -> Result<Box<dyn Embedder>> {
    Ok(Box::new(CharFormEncoder::from_settings(settings)?))
}

/// Constructor for a named backend.
pub type EmbedderFactory = Box<dyn Fn(&EmbedSettings) -> Result<Box<dyn Embedder>> + Send + Sync>;

struct Registration {
    kind: ModelKind,
    factory: EmbedderFactory,
}

/// Factory table keyed by model name.
pub struct EmbedderRegistry {
    entries: BTreeMap<String, Registration>,
}

impl Default for EmbedderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for EmbedderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbedderRegistry")
            .field("models", &self.names())
            .finish()
    }
}

impl EmbedderRegistry {
    /// A registry with no backends.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// `semantic` and `form`.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(
            semantic::MODEL_NAME,
            ModelKind::Semantic,
            Box::new(create_semantic),
        );
        registry.register(form::MODEL_NAME, ModelKind::Form, Box::new(create_form));
        registry
    }

    /// Add or replace a backend.
    pub fn register(&mut self, name: &str, kind: ModelKind, factory: EmbedderFactory) {
        self.entries
            .insert(name.to_string(), Registration { kind, factory });
    }

    #[must_use]
    pub fn kind_of(&self, name: &str) -> Option<ModelKind> {
        self.entries.get(name).map(|entry| entry.kind)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Instantiate the backend registered as `name`.
    ///
    /// # Errors
    ///
    /// [`CognateError::UnknownModel`] for unregistered names, or whatever the
    /// factory returns (e.g. [`CognateError::BackendUnavailable`]).
    pub fn create(&self, name: &str, settings: &EmbedSettings) -> Result<Box<dyn Embedder>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| CognateError::UnknownModel(name.to_string()))?;
        let embedder = (entry.factory)(settings)?;
        tracing::debug!(
            model = name,
            kind = %entry.kind,
            dim = embedder.dimension(),
            "embedding backend ready"
        );
        Ok(embedder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cognate_core::error::{ErrorCode, classify};

    #[test]
    fn l2_normalize_yields_unit_norm() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_leaves_zero_vector() {
        let mut v = vec![0.0; 4];
        l2_normalize(&mut v);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn matrix_rejects_ragged_rows() {
        let err = EmbeddingMatrix::from_rows_normalized(2, vec![vec![1.0, 0.0], vec![1.0]]);
        assert!(err.is_err());
    }

    #[test]
    fn matrix_rows_are_addressable() {
        let m = EmbeddingMatrix::from_rows_normalized(2, vec![vec![2.0, 0.0], vec![0.0, 0.5]])
            .expect("matrix");
        assert_eq!(m.rows(), 2);
        assert_eq!(m.row(0), Some(&[1.0, 0.0][..]));
        assert_eq!(m.row(1), Some(&[0.0, 1.0][..]));
        assert_eq!(m.row(2), None);
        assert_eq!(m.iter_rows().count(), 2);
    }

    #[test]
    fn from_raw_requires_whole_rows() {
        assert!(EmbeddingMatrix::from_raw(3, vec![0.0; 6]).is_ok());
        assert!(EmbeddingMatrix::from_raw(3, vec![0.0; 5]).is_err());
        assert!(EmbeddingMatrix::from_raw(0, vec![1.0]).is_err());
    }

    #[test]
    fn registry_rejects_unknown_model() {
        let registry = EmbedderRegistry::with_defaults();
        let Err(err) = registry.create("canine", &EmbedSettings::default()) else {
            panic!("unknown model");
        };
        assert_eq!(
            classify(&err).map(CognateError::code),
            Some(ErrorCode::UnknownModel)
        );
    }

    #[test]
    fn registry_knows_default_kinds() {
        let registry = EmbedderRegistry::with_defaults();
        assert_eq!(registry.kind_of("semantic"), Some(ModelKind::Semantic));
        assert_eq!(registry.kind_of("form"), Some(ModelKind::Form));
        assert_eq!(registry.names(), vec!["form", "semantic"]);
    }

    #[test]
    fn form_backend_is_always_available() {
        let registry = EmbedderRegistry::with_defaults();
        let form = registry
            .create("form", &EmbedSettings::default())
            .expect("form backend");
        assert_eq!(form.kind(), ModelKind::Form);
        assert!(!form.needs_language());
    }
}
