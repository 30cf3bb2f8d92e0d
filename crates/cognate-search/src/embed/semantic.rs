//! Meaning-based encoder.
//!
//! The runtime is chosen at compile time: `semantic-ort` runs a transformer
//! exported to ONNX, `semantic-model2vec` reads a static embedding table
//! from safetensors. Both read `tokenizer.json` from the model directory.
//! A build with neither feature, or a model directory without the expected
//! files, fails at creation with [`CognateError::BackendUnavailable`].

use super::{Embedder, EmbeddingMatrix, ModelKind};
use anyhow::{Result, anyhow, bail};
use cognate_core::config::{EmbedSettings, Pooling};
use cognate_core::error::CognateError;
use sha2::{Digest, Sha256};
use std::path::Path;

pub const MODEL_NAME: &str = "semantic";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const ONNX_MODEL_FILE: &str = "model.onnx";
pub const STATIC_MODEL_FILE: &str = "model.safetensors";

const BATCH_SIZE: usize = 64;
const SAMPLE_TEXT: &str = "sample";

/// Compiled-in inference engine behind [`SemanticEncoder`].
trait SemanticRuntime: Send + Sync {
    fn backend(&self) -> &'static str;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Semantic encoder. Each text is prefixed with its corpus's resolved
/// language tag before tokenization.
pub struct SemanticEncoder {
    runtime: Box<dyn SemanticRuntime>,
    dim: usize,
}

impl std::fmt::Debug for SemanticEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticEncoder")
            .field("backend", &self.runtime.backend())
            .field("dim", &self.dim)
            .finish()
    }
}

impl SemanticEncoder {
    /// Load the compiled-in runtime from `settings.model_dir` and sample it
    /// once to learn the output dimension.
    ///
    /// # Errors
    ///
    /// [`CognateError::BackendUnavailable`] when no runtime is compiled in,
    /// model files are missing, or the SHA-256 pin does not match.
    pub fn load(settings: &EmbedSettings) -> Result<Self> {
        let runtime = load_runtime(settings)?;
        Self::with_runtime(runtime)
    }

    fn with_runtime(runtime: Box<dyn SemanticRuntime>) -> Result<Self> {
        let sample = runtime.embed_batch(&[SAMPLE_TEXT.to_string()])?;
        let dim = sample.first().map_or(0, Vec::len);
        if dim == 0 {
            return Err(unavailable("semantic model produced an empty embedding").into());
        }
        tracing::info!(backend = runtime.backend(), dim, "semantic encoder loaded");
        Ok(Self { runtime, dim })
    }
}

impl Embedder for SemanticEncoder {
    fn name(&self) -> &str {
        MODEL_NAME
    }

    fn kind(&self) -> ModelKind {
        ModelKind::Semantic
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn needs_language(&self) -> bool {
        true
    }

    fn embed(&self, texts: &[&str], language: Option<&str>) -> Result<EmbeddingMatrix> {
        let Some(tag) = language.map(str::trim).filter(|t| !t.is_empty()) else {
            bail!("semantic encoder requires a resolved language tag");
        };
        if texts.is_empty() {
            return Ok(EmbeddingMatrix::empty(self.dim));
        }

        let mut rows = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            let tagged: Vec<String> = chunk.iter().map(|text| format!("{tag} {text}")).collect();
            let batch = self.runtime.embed_batch(&tagged)?;
            if batch.len() != chunk.len() {
                bail!(
                    "semantic batch length mismatch: expected {}, got {}",
                    chunk.len(),
                    batch.len()
                );
            }
            rows.extend(batch);
        }
        EmbeddingMatrix::from_rows_normalized(self.dim, rows)
    }
}

fn unavailable(capability: impl Into<String>) -> CognateError {
    CognateError::BackendUnavailable {
        model: MODEL_NAME.to_string(),
        capability: capability.into(),
    }
}

fn load_runtime(settings: &EmbedSettings) -> Result<Box<dyn SemanticRuntime>> {
    #[cfg(feature = "semantic-ort")]
    {
        let model = settings.model_dir.join(ONNX_MODEL_FILE);
        if model.is_file() {
            verify_pin(&model, settings.model_sha256.as_deref())?;
            return Ok(Box::new(ort_runtime::OrtRuntime::load(settings, &model)?));
        }
    }

    #[cfg(feature = "semantic-model2vec")]
    {
        let model = settings.model_dir.join(STATIC_MODEL_FILE);
        if model.is_file() {
            verify_pin(&model, settings.model_sha256.as_deref())?;
            return Ok(Box::new(static_runtime::StaticRuntime::load(settings, &model)?));
        }
    }

    Err(missing_runtime(settings).into())
}

fn missing_runtime(settings: &EmbedSettings) -> CognateError {
    if cfg!(any(feature = "semantic-ort", feature = "semantic-model2vec")) {
        unavailable(format!(
            "no model files in {} (expected {ONNX_MODEL_FILE} or {STATIC_MODEL_FILE} next to {TOKENIZER_FILE})",
            settings.model_dir.display()
        ))
    } else {
        unavailable(
            "no semantic runtime compiled in; rebuild with the `semantic-ort` or `semantic-model2vec` feature",
        )
    }
}

/// Check `path` against an optional hex SHA-256 pin.
#[cfg_attr(
    not(any(feature = "semantic-ort", feature = "semantic-model2vec")),
    allow(dead_code)
)]
fn verify_pin(path: &Path, expected: Option<&str>) -> Result<()> {
    let Some(expected) = expected.map(str::trim).filter(|e| !e.is_empty()) else {
        return Ok(());
    };
    let bytes = std::fs::read(path)
        .map_err(|err| anyhow!("failed to read {}: {err}", path.display()))?;
    let actual = sha256_hex(&bytes);
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(unavailable(format!(
            "model file {} failed SHA-256 verification (expected {expected}, got {actual})",
            path.display()
        ))
        .into());
    }
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Pool `[batch, seq, dim]` token states into one vector per sequence.
///
/// Mean pooling averages positions where `mask` is non-zero; CLS pooling
/// takes position 0.
#[cfg_attr(not(feature = "semantic-ort"), allow(dead_code))]
fn pool_token_states(
    hidden: &[f32],
    mask: &[i64],
    batch: usize,
    seq: usize,
    dim: usize,
    pooling: Pooling,
) -> Vec<Vec<f32>> {
    (0..batch)
        .map(|b| {
            let token = |t: usize| &hidden[(b * seq + t) * dim..(b * seq + t + 1) * dim];
            match pooling {
                Pooling::Cls => token(0).to_vec(),
                Pooling::Mean => {
                    let mut sum = vec![0.0_f32; dim];
                    let mut count = 0.0_f32;
                    for t in 0..seq {
                        if mask[b * seq + t] == 0 {
                            continue;
                        }
                        for (acc, value) in sum.iter_mut().zip(token(t)) {
                            *acc += value;
                        }
                        count += 1.0;
                    }
                    if count > 0.0 {
                        for acc in &mut sum {
                            *acc /= count;
                        }
                    }
                    sum
                }
            }
        })
        .collect()
}

#[cfg(any(feature = "semantic-ort", feature = "semantic-model2vec"))]
fn load_tokenizer(settings: &EmbedSettings) -> Result<tokenizers::Tokenizer> {
    let path = settings.model_dir.join(TOKENIZER_FILE);
    if !path.is_file() {
        return Err(unavailable(format!("tokenizer file {} not found", path.display())).into());
    }
    tokenizers::Tokenizer::from_file(&path)
        .map_err(|err| anyhow!("failed to load tokenizer {}: {err}", path.display()))
}

#[cfg(feature = "semantic-ort")]
mod ort_runtime {
    use super::{SemanticRuntime, load_tokenizer, pool_token_states};
    use anyhow::{Context, Result, anyhow};
    use cognate_core::config::{EmbedSettings, Pooling};
    use ort::session::Session;
    use ort::value::Tensor;
    use std::path::Path;
    use std::sync::Mutex;
    use tokenizers::Tokenizer;

    pub struct OrtRuntime {
        session: Mutex<Session>,
        tokenizer: Tokenizer,
        pooling: Pooling,
        wants_token_types: bool,
    }

    impl OrtRuntime {
        pub fn load(settings: &EmbedSettings, model: &Path) -> Result<Self> {
            let session = Session::builder()
                .context("failed to create ONNX Runtime session builder")?
                .commit_from_file(model)
                .with_context(|| format!("failed to load semantic model from {}", model.display()))?;
            let wants_token_types = session
                .inputs
                .iter()
                .any(|input| input.name == "token_type_ids");
            Ok(Self {
                session: Mutex::new(session),
                tokenizer: load_tokenizer(settings)?,
                pooling: settings.pooling,
                wants_token_types,
            })
        }
    }

    impl SemanticRuntime for OrtRuntime {
        fn backend(&self) -> &'static str {
            "onnx"
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let encodings = self
                .tokenizer
                .encode_batch(texts.to_vec(), true)
                .map_err(|err| anyhow!("tokenization failed: {err}"))?;

            let batch = encodings.len();
            let seq = encodings
                .iter()
                .map(|e| e.get_ids().len())
                .max()
                .unwrap_or(0)
                .max(1);

            let mut ids = vec![0_i64; batch * seq];
            let mut mask = vec![0_i64; batch * seq];
            let mut types = vec![0_i64; batch * seq];
            for (b, encoding) in encodings.iter().enumerate() {
                let tokens = encoding
                    .get_ids()
                    .iter()
                    .zip(encoding.get_attention_mask())
                    .zip(encoding.get_type_ids());
                for (t, ((&id, &m), &ty)) in tokens.enumerate() {
                    ids[b * seq + t] = i64::from(id);
                    mask[b * seq + t] = i64::from(m);
                    types[b * seq + t] = i64::from(ty);
                }
            }

            let ids_tensor = Tensor::from_array(([batch, seq], ids))?;
            let mask_tensor = Tensor::from_array(([batch, seq], mask.clone()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| anyhow!("semantic session lock poisoned"))?;
            let outputs = if self.wants_token_types {
                let types_tensor = Tensor::from_array(([batch, seq], types))?;
                session.run(ort::inputs![
                    "input_ids" => ids_tensor,
                    "attention_mask" => mask_tensor,
                    "token_type_ids" => types_tensor,
                ])
            } else {
                session.run(ort::inputs![
                    "input_ids" => ids_tensor,
                    "attention_mask" => mask_tensor,
                ])
            }
            .context("semantic model inference failed")?;

            let (shape, hidden) = outputs[0]
                .try_extract_tensor::<f32>()
                .context("semantic model output is not an f32 tensor")?;
            let dim = shape.last().copied().unwrap_or(0).max(0) as usize;
            Ok(pool_token_states(hidden, &mask, batch, seq, dim, self.pooling))
        }
    }
}

#[cfg(feature = "semantic-model2vec")]
mod static_runtime {
    use super::{SemanticRuntime, load_tokenizer};
    use anyhow::{Result, anyhow, bail};
    use cognate_core::config::EmbedSettings;
    use safetensors::SafeTensors;
    use std::path::Path;
    use tokenizers::Tokenizer;

    const TABLE_NAME: &str = "embeddings";

    pub struct StaticRuntime {
        table: Vec<f32>,
        vocab: usize,
        dim: usize,
        tokenizer: Tokenizer,
    }

    impl StaticRuntime {
        pub fn load(settings: &EmbedSettings, model: &Path) -> Result<Self> {
            let bytes = std::fs::read(model)
                .map_err(|err| anyhow!("failed to read {}: {err}", model.display()))?;
            let tensors = SafeTensors::deserialize(&bytes)
                .map_err(|err| anyhow!("failed to parse {}: {err}", model.display()))?;
            let view = tensors
                .tensor(TABLE_NAME)
                .map_err(|err| anyhow!("{} has no `{TABLE_NAME}` tensor: {err}", model.display()))?;
            if view.dtype() != safetensors::Dtype::F32 {
                bail!("{} stores {:?}, expected F32", model.display(), view.dtype());
            }
            let [vocab, dim] = view.shape() else {
                bail!("{} embedding table is not 2-D", model.display());
            };
            let table = view
                .data()
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            Ok(Self {
                table,
                vocab: *vocab,
                dim: *dim,
                tokenizer: load_tokenizer(settings)?,
            })
        }
    }

    impl SemanticRuntime for StaticRuntime {
        fn backend(&self) -> &'static str {
            "model2vec"
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            texts
                .iter()
                .map(|text| {
                    let encoding = self
                        .tokenizer
                        .encode(text.as_str(), false)
                        .map_err(|err| anyhow!("tokenization failed: {err}"))?;
                    let mut sum = vec![0.0_f32; self.dim];
                    let mut count = 0.0_f32;
                    for &id in encoding.get_ids() {
                        let id = id as usize;
                        if id >= self.vocab {
                            continue;
                        }
                        let row = &self.table[id * self.dim..(id + 1) * self.dim];
                        for (acc, value) in sum.iter_mut().zip(row) {
                            *acc += value;
                        }
                        count += 1.0;
                    }
                    if count > 0.0 {
                        for acc in &mut sum {
                            *acc /= count;
                        }
                    }
                    Ok(sum)
                })
                .collect()
        }
    }
}
