use super::{Embedder, EmbeddingMatrix, ModelKind, l2_normalize};
use anyhow::{Result, bail};
use cognate_core::config::EmbedSettings;
use unicode_normalization::UnicodeNormalization;

pub const MODEL_NAME: &str = "form";

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
const BOUNDARY: char = ' ';
const UNIGRAM_WEIGHT: f32 = 0.5;

/// Character n-gram feature-hashing encoder over raw surface forms.
///
/// Text is NFC-normalized and padded with a boundary marker on each side;
/// every n-gram for `n` in `1..=max_ngram` is hashed (FNV-1a) into a signed
/// bucket. Case and script are preserved, and no language tag is used.
#[derive(Debug, Clone)]
pub struct CharFormEncoder {
    dim: usize,
    max_ngram: usize,
}

impl CharFormEncoder {
    /// # Errors
    ///
    /// Fails if `dim` or `max_ngram` is zero.
    pub fn new(dim: usize, max_ngram: usize) -> Result<Self> {
        if dim == 0 {
            bail!("form encoder dimension must be positive");
        }
        if max_ngram == 0 {
            bail!("form encoder max n-gram must be positive");
        }
        Ok(Self { dim, max_ngram })
    }

    /// # Errors
    ///
    /// See [`CharFormEncoder::new`].
    pub fn from_settings(settings: &EmbedSettings) -> Result<Self> {
        Self::new(settings.form_dimension, settings.form_max_ngram)
    }

    /// Unit-norm feature vector for one text. Blank text gives a zero vector.
    #[must_use]
    pub fn encode(&self, text: &str) -> Vec<f32> {
        let mut features = vec![0.0_f32; self.dim];
        let normalized: String = text.trim().nfc().collect();
        if normalized.is_empty() {
            return features;
        }

        let padded: Vec<char> = std::iter::once(BOUNDARY)
            .chain(normalized.chars())
            .chain(std::iter::once(BOUNDARY))
            .collect();

        let mut buf = String::new();
        for n in 1..=self.max_ngram {
            let weight = if n == 1 { UNIGRAM_WEIGHT } else { 1.0 };
            for window in padded.windows(n) {
                if n == 1 && window[0] == BOUNDARY {
                    continue;
                }
                buf.clear();
                buf.extend(window);
                let hash = fnv1a(n as u8, buf.as_bytes());
                let bucket = (hash % self.dim as u64) as usize;
                let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
                features[bucket] += sign * weight;
            }
        }

        l2_normalize(&mut features);
        features
    }
}

fn fnv1a(seed: u8, bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &byte in std::iter::once(&seed).chain(bytes) {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

impl Embedder for CharFormEncoder {
    fn name(&self) -> &str {
        MODEL_NAME
    }

    fn kind(&self) -> ModelKind {
        ModelKind::Form
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn embed(&self, texts: &[&str], _language: Option<&str>) -> Result<EmbeddingMatrix> {
        let rows = texts.iter().map(|text| self.encode(text)).collect();
        EmbeddingMatrix::from_rows_normalized(self.dim, rows)
    }
}
