//! Exact inner-product nearest-neighbour search.
//!
//! Corpora here are small enough that a flat scan is affordable, and
//! retrieval recall matters more than latency, so there is no approximate
//! structure. Indexes persist under `<cache_dir>/indexes/<model>/<lang>/<stage>/`.

use crate::cache::write_atomic;
use crate::codec::{MatrixKind, checksum, decode_matrix, encode_matrix};
use crate::embed::{EmbeddingMatrix, dot};
use anyhow::{Context, Result, anyhow, bail};
use cognate_core::corpus::CorpusSpec;
use cognate_core::error::CognateError;
use cognate_core::lock::CacheLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const INDEX_FILE: &str = "index.bin";
pub const INDEX_META_FILE: &str = "meta.json";

/// Position reported for result slots beyond the corpus size.
pub const SENTINEL_POSITION: i64 = -1;

/// Number of neighbours requested per query. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopK(NonZeroUsize);

impl TopK {
    /// # Errors
    ///
    /// [`CognateError::InvalidTopK`] for zero or negative `k`.
    pub fn new(k: i64) -> Result<Self, CognateError> {
        usize::try_from(k)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(Self)
            .ok_or(CognateError::InvalidTopK(k))
    }

    #[must_use]
    pub const fn get(self) -> usize {
        self.0.get()
    }
}

/// Row-major `queries × k` search results.
///
/// `positions` are row indices into the indexed matrix, or
/// [`SENTINEL_POSITION`] (with score `-inf`) for unfilled slots.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHits {
    k: usize,
    scores: Vec<f32>,
    positions: Vec<i64>,
}

impl SearchHits {
    #[must_use]
    pub fn queries(&self) -> usize {
        self.scores.len().checked_div(self.k).unwrap_or(0)
    }

    #[must_use]
    pub fn scores(&self, query: usize) -> &[f32] {
        self.scores
            .get(query * self.k..(query + 1) * self.k)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn positions(&self, query: usize) -> &[i64] {
        self.positions
            .get(query * self.k..(query + 1) * self.k)
            .unwrap_or_default()
    }

    /// `(row, score)` pairs for one query, skipping sentinel slots.
    pub fn hits(&self, query: usize) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.positions(query)
            .iter()
            .zip(self.scores(query))
            .filter_map(|(&pos, &score)| usize::try_from(pos).ok().map(|row| (row, score)))
    }
}

/// Flat inner-product index over unit-norm rows.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIpIndex {
    matrix: EmbeddingMatrix,
}

fn by_score_then_row(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
}

impl FlatIpIndex {
    #[must_use]
    pub fn build(matrix: &EmbeddingMatrix) -> Self {
        Self {
            matrix: matrix.clone(),
        }
    }

    #[must_use]
    pub const fn dim(&self) -> usize {
        self.matrix.dim()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.matrix.rows()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty()
    }

    /// The best `min(k, len)` rows for a single query, best first, without
    /// sentinel padding. Equal scores go to the lower row.
    #[must_use]
    pub fn nearest(&self, query: &[f32], k: TopK) -> Vec<(usize, f32)> {
        let k = k.get().min(self.len());
        if k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(usize, f32)> = self
            .matrix
            .iter_rows()
            .enumerate()
            .map(|(row, vector)| (row, dot(query, vector)))
            .collect();

        if scored.len() > k {
            scored.select_nth_unstable_by(k - 1, by_score_then_row);
            scored.truncate(k);
        }
        scored.sort_by(by_score_then_row);
        scored
    }

    /// Top-`k` rows for a single query, padded to exactly `k` slots with
    /// sentinels.
    ///
    /// # Errors
    ///
    /// Fails if `k` slots cannot be allocated.
    pub fn search_vector(&self, query: &[f32], k: TopK) -> Result<(Vec<f32>, Vec<i64>)> {
        let hits = self.nearest(query, k);
        let k = k.get();
        let mut scores = Vec::new();
        let mut positions = Vec::new();
        scores
            .try_reserve_exact(k)
            .and_then(|()| positions.try_reserve_exact(k))
            .map_err(|err| anyhow!("cannot allocate {k} result slots: {err}"))?;
        for (row, score) in hits {
            scores.push(score);
            positions.push(i64::try_from(row).unwrap_or(SENTINEL_POSITION));
        }
        scores.resize(k, f32::NEG_INFINITY);
        positions.resize(k, SENTINEL_POSITION);
        Ok((scores, positions))
    }

    /// Search every row of `queries`.
    ///
    /// # Errors
    ///
    /// Fails if the query dimension differs from the index dimension, or
    /// the padded result does not fit in memory.
    pub fn search(&self, queries: &EmbeddingMatrix, k: TopK) -> Result<SearchHits> {
        if queries.dim() != self.dim() {
            bail!(
                "query dimension {} does not match index dimension {}",
                queries.dim(),
                self.dim()
            );
        }
        let slots = queries
            .rows()
            .checked_mul(k.get())
            .ok_or_else(|| anyhow!("{} queries x top-k {} overflows", queries.rows(), k.get()))?;
        let mut scores = Vec::new();
        let mut positions = Vec::new();
        scores
            .try_reserve_exact(slots)
            .and_then(|()| positions.try_reserve_exact(slots))
            .map_err(|err| anyhow!("cannot allocate {slots} result slots: {err}"))?;
        for query in queries.iter_rows() {
            let (s, p) = self.search_vector(query, k)?;
            scores.extend(s);
            positions.extend(p);
        }
        Ok(SearchHits {
            k: k.get(),
            scores,
            positions,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub dim: usize,
    pub count: usize,
    /// CRC-64 of the embedding payload the index was built from. Absent in
    /// metadata written before it was recorded, which reads as stale.
    #[serde(default)]
    pub embeddings_crc: Option<u64>,
}

/// CRC-64 over the little-endian bytes of `matrix`.
#[must_use]
pub fn embeddings_crc(matrix: &EmbeddingMatrix) -> u64 {
    let bytes: Vec<u8> = matrix
        .as_slice()
        .iter()
        .flat_map(|value| value.to_le_bytes())
        .collect();
    checksum(&bytes)
}

enum Stored {
    Current(FlatIpIndex),
    Stale { built_from: Option<u64> },
}

/// Persists flat indexes keyed by `(model, language, stage)`.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
    lock_timeout: Duration,
}

impl IndexStore {
    #[must_use]
    pub fn new(cache_dir: &Path, lock_timeout: Duration) -> Self {
        Self {
            root: cache_dir.join("indexes"),
            lock_timeout,
        }
    }

    #[must_use]
    pub fn key_dir(&self, model: &str, corpus: &CorpusSpec) -> PathBuf {
        self.root
            .join(model)
            .join(&corpus.language)
            .join(&corpus.stage)
    }

    /// Load the stored index for this key, or build and save one from
    /// `embeddings` when absent, when `rebuild` is set, or when the stored
    /// index was built from different embedding contents.
    ///
    /// # Errors
    ///
    /// [`CognateError::IndexMismatch`] if a stored index cannot be decoded or
    /// its shape disagrees with `embeddings`; I/O and lock errors on save.
    pub fn load_or_build(
        &self,
        model: &str,
        corpus: &CorpusSpec,
        embeddings: &EmbeddingMatrix,
        rebuild: bool,
    ) -> Result<FlatIpIndex> {
        let dir = self.key_dir(model, corpus);
        let index_path = dir.join(INDEX_FILE);

        if !rebuild && index_path.is_file() {
            match load_index(&dir, embeddings)? {
                Stored::Current(index) => {
                    tracing::debug!(
                        model,
                        language = %corpus.language,
                        stage = %corpus.stage,
                        count = index.len(),
                        "index loaded"
                    );
                    return Ok(index);
                }
                Stored::Stale { built_from } => {
                    tracing::warn!(
                        model,
                        language = %corpus.language,
                        stage = %corpus.stage,
                        built_from = ?built_from,
                        "stored index was built from other embeddings; rebuilding"
                    );
                }
            }
        }

        let index = FlatIpIndex::build(embeddings);
        self.save(&dir, &index)?;
        tracing::info!(
            model,
            language = %corpus.language,
            stage = %corpus.stage,
            count = index.len(),
            "index built"
        );
        Ok(index)
    }

    fn save(&self, dir: &Path, index: &FlatIpIndex) -> Result<()> {
        let lock = CacheLock::acquire_dir(dir, self.lock_timeout)?;
        let encoded = encode_matrix(MatrixKind::Index, index.dim(), index.matrix.as_slice());
        write_atomic(&dir.join(INDEX_FILE), &encoded)?;
        let meta = IndexMeta {
            dim: index.dim(),
            count: index.len(),
            embeddings_crc: Some(embeddings_crc(&index.matrix)),
        };
        write_atomic(&dir.join(INDEX_META_FILE), &serde_json::to_vec(&meta)?)?;
        lock.release();
        Ok(())
    }
}

fn mismatch(path: &Path, reason: impl Into<String>) -> CognateError {
    CognateError::IndexMismatch {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn load_index(dir: &Path, embeddings: &EmbeddingMatrix) -> Result<Stored> {
    let index_path = dir.join(INDEX_FILE);
    let meta_path = dir.join(INDEX_META_FILE);

    let meta_bytes =
        fs::read(&meta_path).map_err(|err| mismatch(&meta_path, format!("unreadable: {err}")))?;
    let meta: IndexMeta = serde_json::from_slice(&meta_bytes)
        .map_err(|err| mismatch(&meta_path, format!("invalid metadata: {err}")))?;
    if meta.dim != embeddings.dim() || meta.count != embeddings.rows() {
        return Err(mismatch(
            &index_path,
            format!(
                "index holds {} x {} but embeddings are {} x {}",
                meta.count,
                meta.dim,
                embeddings.rows(),
                embeddings.dim()
            ),
        )
        .into());
    }
    if meta.embeddings_crc != Some(embeddings_crc(embeddings)) {
        return Ok(Stored::Stale {
            built_from: meta.embeddings_crc,
        });
    }

    let bytes = fs::read(&index_path)
        .with_context(|| format!("Failed to read {}", index_path.display()))?;
    let raw = decode_matrix(MatrixKind::Index, &bytes)
        .map_err(|err| mismatch(&index_path, err.to_string()))?;
    if raw.dim != meta.dim || raw.rows != meta.count {
        return Err(mismatch(&index_path, "payload shape disagrees with meta.json").into());
    }
    let matrix = EmbeddingMatrix::from_raw(raw.dim, raw.data)
        .map_err(|err| mismatch(&index_path, err.to_string()))?;
    Ok(Stored::Current(FlatIpIndex { matrix }))
}
