//! Persistent embedding cache.
//!
//! Each `(model, language, stage)` key owns a directory under
//! `<cache_dir>/embeddings/` holding the vector matrix (`vectors.bin`), the
//! rows it was computed against (`rows.jsonl`), and a small `meta.json`.
//! On a hit, the cached rows are authoritative: matrix row `i` always
//! describes `rows.jsonl` entry `i`, whatever the fresh corpus load yields.

use crate::codec::{MatrixKind, decode_matrix, encode_matrix};
use crate::embed::{Embedder, EmbeddingMatrix};
use anyhow::{Context, Result, bail};
use cognate_core::corpus::CorpusSpec;
use cognate_core::error::CognateError;
use cognate_core::lexeme::LexemeRow;
use cognate_core::lock::CacheLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const VECTORS_FILE: &str = "vectors.bin";
pub const ROWS_FILE: &str = "rows.jsonl";
pub const META_FILE: &str = "meta.json";

/// Attribute added to each cached row to carry its source position.
pub const ROW_INDEX_FIELD: &str = "_row_idx";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub model: String,
    pub language: String,
    pub stage: String,
    pub rows: usize,
    pub dim: usize,
    pub fingerprint: String,
}

/// Matrix plus the row set it is aligned with.
#[derive(Debug, Clone)]
pub struct CachedEmbeddings {
    pub matrix: EmbeddingMatrix,
    pub rows: Vec<LexemeRow>,
    /// `true` when the backend ran during this call.
    pub computed: bool,
}

#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    root: PathBuf,
    lock_timeout: Duration,
}

impl EmbeddingCache {
    #[must_use]
    pub fn new(cache_dir: &Path, lock_timeout: Duration) -> Self {
        Self {
            root: cache_dir.join("embeddings"),
            lock_timeout,
        }
    }

    /// Directory holding the cache entry for `model` over `corpus`.
    #[must_use]
    pub fn key_dir(&self, model: &str, corpus: &CorpusSpec) -> PathBuf {
        self.root
            .join(model)
            .join(&corpus.language)
            .join(&corpus.stage)
    }

    /// Return cached embeddings for `corpus`, computing and persisting them
    /// with `embedder` on a miss or when `recompute` is set.
    ///
    /// # Errors
    ///
    /// [`CognateError::CacheCorrupt`] if a cached entry cannot be decoded or
    /// its matrix and rows disagree; any backend or I/O failure on a miss.
    pub fn get_or_compute(
        &self,
        embedder: &dyn Embedder,
        corpus: &CorpusSpec,
        rows: &[LexemeRow],
        language_tag: Option<&str>,
        recompute: bool,
    ) -> Result<CachedEmbeddings> {
        let model = embedder.name();
        let dir = self.key_dir(model, corpus);
        let vectors = dir.join(VECTORS_FILE);
        let rows_path = dir.join(ROWS_FILE);

        if !recompute && vectors.is_file() && rows_path.is_file() {
            let cached = load_entry(&dir, embedder.dimension())?;
            warn_if_stale(&dir, model, corpus, rows, &cached.rows);
            tracing::debug!(
                model,
                language = %corpus.language,
                stage = %corpus.stage,
                rows = cached.rows.len(),
                "embedding cache hit"
            );
            return Ok(cached);
        }

        let texts: Vec<String> = rows.iter().map(LexemeRow::embedding_text).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let matrix = embedder
            .embed(&refs, language_tag)
            .with_context(|| format!("Failed to embed {} with `{model}`", corpus.label()))?;
        if matrix.rows() != rows.len() {
            bail!(
                "backend `{model}` returned {} rows for {} texts",
                matrix.rows(),
                rows.len()
            );
        }

        let meta = CacheMeta {
            model: model.to_string(),
            language: corpus.language.clone(),
            stage: corpus.stage.clone(),
            rows: rows.len(),
            dim: matrix.dim(),
            fingerprint: fingerprint(rows),
        };
        self.store(&dir, &matrix, rows, &meta)?;
        tracing::info!(
            model,
            language = %corpus.language,
            stage = %corpus.stage,
            rows = rows.len(),
            "embeddings computed and cached"
        );

        Ok(CachedEmbeddings {
            matrix,
            rows: rows.to_vec(),
            computed: true,
        })
    }

    fn store(
        &self,
        dir: &Path,
        matrix: &EmbeddingMatrix,
        rows: &[LexemeRow],
        meta: &CacheMeta,
    ) -> Result<()> {
        let lock = CacheLock::acquire_dir(dir, self.lock_timeout)?;

        let encoded = encode_matrix(MatrixKind::Embeddings, matrix.dim(), matrix.as_slice());
        write_atomic(&dir.join(VECTORS_FILE), &encoded)?;

        let mut dump = String::new();
        for row in rows {
            let mut attributes = row.attributes().clone();
            attributes.insert(ROW_INDEX_FIELD.to_string(), Value::from(row.position()));
            dump.push_str(&serde_json::to_string(&attributes)?);
            dump.push('\n');
        }
        write_atomic(&dir.join(ROWS_FILE), dump.as_bytes())?;

        let meta_json = serde_json::to_vec_pretty(meta)?;
        write_atomic(&dir.join(META_FILE), &meta_json)?;

        lock.release();
        Ok(())
    }
}

fn corrupt(path: &Path, reason: impl Into<String>) -> CognateError {
    CognateError::CacheCorrupt {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn load_entry(dir: &Path, expected_dim: usize) -> Result<CachedEmbeddings> {
    let vectors_path = dir.join(VECTORS_FILE);
    let bytes = fs::read(&vectors_path)
        .with_context(|| format!("Failed to read {}", vectors_path.display()))?;
    let raw = decode_matrix(MatrixKind::Embeddings, &bytes)
        .map_err(|err| corrupt(&vectors_path, err.to_string()))?;
    if raw.dim != expected_dim {
        return Err(corrupt(
            &vectors_path,
            format!("dimension {} but backend produces {expected_dim}", raw.dim),
        )
        .into());
    }

    let rows_path = dir.join(ROWS_FILE);
    let rows = load_rows(&rows_path)?;
    if rows.len() != raw.rows {
        return Err(corrupt(
            &vectors_path,
            format!("{} vectors but {} cached rows", raw.rows, rows.len()),
        )
        .into());
    }

    let matrix = EmbeddingMatrix::from_raw(raw.dim, raw.data)
        .map_err(|err| corrupt(&vectors_path, err.to_string()))?;
    Ok(CachedEmbeddings {
        matrix,
        rows,
        computed: false,
    })
}

fn load_rows(path: &Path) -> Result<Vec<LexemeRow>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut rows = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(Value::Object(mut attributes)) = serde_json::from_str::<Value>(line) else {
            return Err(corrupt(path, format!("line {} is not a JSON object", idx + 1)).into());
        };
        let position = attributes
            .remove(ROW_INDEX_FIELD)
            .as_ref()
            .and_then(Value::as_u64)
            .and_then(|v| usize::try_from(v).ok())
            .ok_or_else(|| corrupt(path, format!("line {} has no {ROW_INDEX_FIELD}", idx + 1)))?;
        rows.push(LexemeRow::new(position, attributes));
    }
    Ok(rows)
}

fn warn_if_stale(
    dir: &Path,
    model: &str,
    corpus: &CorpusSpec,
    fresh: &[LexemeRow],
    cached: &[LexemeRow],
) {
    let meta_path = dir.join(META_FILE);
    let meta = fs::read(&meta_path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<CacheMeta>(&bytes).ok());
    let cached_fingerprint = meta.map_or_else(|| fingerprint(cached), |m| m.fingerprint);
    if cached.len() != fresh.len() || cached_fingerprint != fingerprint(fresh) {
        tracing::warn!(
            model,
            language = %corpus.language,
            stage = %corpus.stage,
            cached_rows = cached.len(),
            fresh_rows = fresh.len(),
            "cached embeddings differ from the corpus on disk; using cached rows (pass --rebuild-cache to refresh)"
        );
    }
}

/// SHA-256 over `(position, identity, embedding text)` of every row.
#[must_use]
pub fn fingerprint(rows: &[LexemeRow]) -> String {
    let mut hasher = Sha256::new();
    for row in rows {
        hasher.update((row.position() as u64).to_le_bytes());
        hasher.update(row.identity().as_bytes());
        hasher.update([0]);
        hasher.update(row.embedding_text().as_bytes());
        hasher.update([0]);
    }
    format!("{:x}", hasher.finalize())
}

/// Write through `<path>.tmp` and rename into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!("{file_name}.tmp"));
    fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to move {} into place", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{CharFormEncoder, ModelKind};
    use cognate_core::error::{ErrorCode, classify};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        inner: CharFormEncoder,
        calls: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self {
                inner: CharFormEncoder::new(32, 3).expect("encoder"),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Embedder for CountingEmbedder {
        fn name(&self) -> &str {
            "counting"
        }

        fn kind(&self) -> ModelKind {
            ModelKind::Form
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn embed(&self, texts: &[&str], language: Option<&str>) -> Result<EmbeddingMatrix> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(texts, language)
        }
    }

    fn rows(lemmas: &[&str]) -> Vec<LexemeRow> {
        lemmas
            .iter()
            .enumerate()
            .map(|(i, lemma)| {
                let Value::Object(map) = json!({"id": format!("w{i}"), "lemma": lemma}) else {
                    unreachable!()
                };
                LexemeRow::new(i * 2, map)
            })
            .collect()
    }

    fn corpus(dir: &Path) -> CorpusSpec {
        CorpusSpec::parse(&format!("ara@modern={}", dir.join("c.jsonl").display()))
            .expect("spec")
    }

    fn cache(dir: &Path) -> EmbeddingCache {
        EmbeddingCache::new(dir, Duration::from_millis(200))
    }

    #[test]
    fn miss_then_hit_reuses_cached_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = cache(dir.path());
        let spec = corpus(dir.path());
        let embedder = CountingEmbedder::new();
        let fresh = rows(&["kitab", "qalam"]);

        let first = cache
            .get_or_compute(&embedder, &spec, &fresh, None, false)
            .expect("miss");
        assert!(first.computed);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

        let second = cache
            .get_or_compute(&embedder, &spec, &fresh, None, false)
            .expect("hit");
        assert!(!second.computed);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.matrix, first.matrix);
        assert_eq!(second.rows, fresh);
        assert!(second.rows[0].get(ROW_INDEX_FIELD).is_none());
    }

    #[test]
    fn cached_rows_win_over_fresh_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = cache(dir.path());
        let spec = corpus(dir.path());
        let embedder = CountingEmbedder::new();

        cache
            .get_or_compute(&embedder, &spec, &rows(&["a", "b", "c"]), None, false)
            .expect("miss");
        let hit = cache
            .get_or_compute(&embedder, &spec, &rows(&["a"]), None, false)
            .expect("stale hit");
        assert_eq!(hit.rows.len(), 3);
        assert_eq!(hit.matrix.rows(), 3);
    }

    #[test]
    fn recompute_bypasses_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = cache(dir.path());
        let spec = corpus(dir.path());
        let embedder = CountingEmbedder::new();
        let fresh = rows(&["x"]);

        cache.get_or_compute(&embedder, &spec, &fresh, None, false).expect("miss");
        let again = cache.get_or_compute(&embedder, &spec, &fresh, None, true).expect("recompute");
        assert!(again.computed);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn flipped_vector_byte_is_cache_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = cache(dir.path());
        let spec = corpus(dir.path());
        let embedder = CountingEmbedder::new();
        cache
            .get_or_compute(&embedder, &spec, &rows(&["kitab"]), None, false)
            .expect("miss");

        let vectors = cache.key_dir("counting", &spec).join(VECTORS_FILE);
        let mut bytes = fs::read(&vectors).expect("read");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&vectors, bytes).expect("write");

        let err = cache
            .get_or_compute(&embedder, &spec, &rows(&["kitab"]), None, false)
            .expect_err("corrupt");
        assert_eq!(
            classify(&err).map(CognateError::code),
            Some(ErrorCode::CacheCorrupt)
        );
    }

    #[test]
    fn row_count_mismatch_is_cache_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = cache(dir.path());
        let spec = corpus(dir.path());
        let embedder = CountingEmbedder::new();
        cache
            .get_or_compute(&embedder, &spec, &rows(&["a", "b"]), None, false)
            .expect("miss");

        let rows_path = cache.key_dir("counting", &spec).join(ROWS_FILE);
        let content = fs::read_to_string(&rows_path).expect("read");
        let first_line = content.lines().next().expect("line");
        fs::write(&rows_path, format!("{first_line}\n")).expect("truncate");

        let err = cache
            .get_or_compute(&embedder, &spec, &rows(&["a", "b"]), None, false)
            .expect_err("mismatch");
        assert_eq!(
            classify(&err).map(CognateError::code),
            Some(ErrorCode::CacheCorrupt)
        );
    }

    #[test]
    fn meta_records_shape_and_fingerprint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = cache(dir.path());
        let spec = corpus(dir.path());
        let fresh = rows(&["a", "b"]);
        cache
            .get_or_compute(&CountingEmbedder::new(), &spec, &fresh, None, false)
            .expect("miss");

        let meta_path = cache.key_dir("counting", &spec).join(META_FILE);
        let meta: CacheMeta =
            serde_json::from_slice(&fs::read(meta_path).expect("read")).expect("meta");
        assert_eq!(meta.rows, 2);
        assert_eq!(meta.dim, 32);
        assert_eq!(meta.language, "ara");
        assert_eq!(meta.stage, "modern");
        assert_eq!(meta.fingerprint, fingerprint(&fresh));
    }

    #[test]
    fn fingerprint_tracks_positions() {
        let a = rows(&["a", "b"]);
        let mut b = a.clone();
        b.swap(0, 1);
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a), fingerprint(&a.clone()));
    }
}
