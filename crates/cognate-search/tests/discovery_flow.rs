//! End-to-end discovery scenarios against on-disk corpora and caches.
//!
//! Covers:
//! - Arabic/English pair: phonetic signal present, orthography near zero
//! - Cache round trip: second run skips the backend and reproduces leads
//! - Corrupted cached vectors surface as `CacheCorrupt`
//! - Oversized top-K pads with sentinels that never become candidates
//! - A backend failure leaves no output behind

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use cognate_core::config::{CognateConfig, EmbedSettings};
use cognate_core::corpus::CorpusSpec;
use cognate_core::error::{CognateError, ErrorCode, classify};
use cognate_core::jsonl::LeadWriter;
use cognate_core::lexeme::LexemeRow;
use cognate_search::cache::VECTORS_FILE;
use cognate_search::embed::{CharFormEncoder, Embedder, EmbeddingMatrix};
use cognate_search::fusion::hybrid::{orthography_score, phonetic_score};
use cognate_search::{DiscoveryRequest, EmbedderRegistry, ModelKind, prepare};
use serde_json::{Value, json};

fn write_corpus(dir: &Path, name: &str, records: &[Value]) -> PathBuf {
    let path = dir.join(name);
    let lines: Vec<String> = records.iter().map(Value::to_string).collect();
    fs::write(&path, lines.join("\n")).expect("write corpus");
    path
}

fn spec(language: &str, path: &Path) -> CorpusSpec {
    CorpusSpec::parse(&format!("{language}={}", path.display())).expect("corpus spec")
}

fn config(dir: &Path, models: &[&str], top_k: i64) -> CognateConfig {
    let mut config = CognateConfig::default();
    config.discovery.models = models.iter().map(ToString::to_string).collect();
    config.discovery.cache_dir = dir.join("cache");
    config.discovery.top_k = top_k;
    config
}

fn eye_request(dir: &Path) -> DiscoveryRequest {
    let source = write_corpus(
        dir,
        "ara.jsonl",
        &[json!({"id": "ar-eye", "lemma": "عين", "ipa": "ʕajn"})],
    );
    let target = write_corpus(
        dir,
        "eng.jsonl",
        &[
            json!({"id": "en-eye", "lemma": "eye", "ipa": "aɪ"}),
            json!({"id": "en-water", "lemma": "water", "ipa": "ˈwɔːtər"}),
        ],
    );
    DiscoveryRequest {
        sources: vec![spec("ara", &source)],
        targets: vec![spec("eng", &target)],
        run_id: Some("it".to_string()),
        ..DiscoveryRequest::default()
    }
}

fn run_to_string(config: &CognateConfig, registry: &EmbedderRegistry, request: &DiscoveryRequest) -> Result<String> {
    let run = prepare(config, registry, request)?;
    let mut writer = LeadWriter::new(Vec::new());
    run.emit(&mut writer)?;
    Ok(String::from_utf8(writer.into_inner())?)
}

fn leads(text: &str) -> Vec<Value> {
    text.lines()
        .map(|line| serde_json::from_str(line).expect("lead json"))
        .collect()
}

/// Form encoder that counts how many times it is asked to embed.
struct CountingForm {
    inner: CharFormEncoder,
    calls: Arc<AtomicUsize>,
}

impl Embedder for CountingForm {
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

fn counting_registry(calls: &Arc<AtomicUsize>) -> EmbedderRegistry {
    let mut registry = EmbedderRegistry::with_defaults();
    let calls = Arc::clone(calls);
    registry.register(
        "counting",
        ModelKind::Form,
        Box::new(move |_: &EmbedSettings| -> Result<Box<dyn Embedder>> {
            Ok(Box::new(CountingForm {
                inner: CharFormEncoder::new(64, 3)?,
                calls: Arc::clone(&calls),
            }))
        }),
    );
    registry
}

#[test]
fn arabic_eye_versus_english_eye() {
    let dir = tempfile::tempdir().expect("tempdir");
    let request = eye_request(dir.path());
    let text = run_to_string(
        &config(dir.path(), &["form"], 10),
        &EmbedderRegistry::with_defaults(),
        &request,
    )
    .expect("run");
    let leads = leads(&text);
    let eye = leads
        .iter()
        .find(|lead| lead["target"]["id"] == "en-eye")
        .expect("eye lead");

    let components = &eye["hybrid"]["components"];
    assert!(components["phonetic"].as_f64().expect("phonetic") > 0.0);
    assert!(components["orthography"].as_f64().expect("orthography") < 0.05);
    let used = eye["hybrid"]["weights_used"].as_object().expect("weights");
    assert!(!used.contains_key("semantic"));

    let row = |value: Value| {
        let Value::Object(map) = value else {
            panic!("object expected");
        };
        LexemeRow::new(0, map)
    };
    let ar = row(json!({"lemma": "عين", "ipa": "ʕajn"}));
    let en = row(json!({"lemma": "eye", "ipa": "aɪ"}));
    assert!((phonetic_score(&ar, &en) - 1.0 / 3.0).abs() < 1e-9);
    assert!(orthography_score(&ar, &en).abs() < 1e-9);
}

#[test]
fn second_run_is_served_from_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = counting_registry(&calls);
    let config = config(dir.path(), &["counting"], 10);
    let request = eye_request(dir.path());

    let first = run_to_string(&config, &registry, &request).expect("first run");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let second = run_to_string(&config, &registry, &request).expect("second run");
    assert_eq!(calls.load(Ordering::SeqCst), 2, "cache hit must not embed");
    assert_eq!(first, second);

    let rebuild = DiscoveryRequest {
        rebuild_cache: true,
        ..request
    };
    let third = run_to_string(&config, &registry, &rebuild).expect("rebuild run");
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(first, third);
}

#[test]
fn flipped_vector_byte_is_cache_corrupt() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(dir.path(), &["form"], 10);
    let registry = EmbedderRegistry::with_defaults();
    let request = eye_request(dir.path());
    run_to_string(&config, &registry, &request).expect("warm cache");

    let vectors = dir
        .path()
        .join("cache/embeddings/form/eng/unknown")
        .join(VECTORS_FILE);
    let mut bytes = fs::read(&vectors).expect("read vectors");
    let last = bytes.len() - 1;
    bytes[last] ^= 0x40;
    fs::write(&vectors, bytes).expect("write vectors");

    let err = prepare(&config, &registry, &request).expect_err("corrupt cache");
    assert_eq!(
        classify(&err).map(CognateError::code),
        Some(ErrorCode::CacheCorrupt)
    );
}

#[test]
fn oversized_top_k_never_invents_candidates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let request = eye_request(dir.path());
    let run = prepare(
        &config(dir.path(), &["form"], 50),
        &EmbedderRegistry::with_defaults(),
        &request,
    )
    .expect("prepare");
    let mut writer = LeadWriter::new(Vec::new());
    let summary = run.emit(&mut writer).expect("emit");

    assert_eq!(summary.retrievals.get("eng:unknown"), Some(&2));
    assert_eq!(summary.leads_written, 2);
    let text = String::from_utf8(writer.into_inner()).expect("utf8");
    for lead in leads(&text) {
        assert!(lead["target"]["position"].as_u64().expect("position") < 2);
    }
}

#[test]
fn identical_inputs_give_byte_identical_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let request = eye_request(dir.path());
    let registry = EmbedderRegistry::with_defaults();
    let a = run_to_string(&config(dir.path(), &["form"], 10), &registry, &request).expect("a");
    let other = tempfile::tempdir().expect("tempdir");
    let b = run_to_string(&config(other.path(), &["form"], 10), &registry, &request).expect("b");
    assert_eq!(a, b);
}

#[test]
fn failing_backend_is_reported_before_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut registry = EmbedderRegistry::with_defaults();
    registry.register(
        "broken",
        ModelKind::Semantic,
        Box::new(|_: &EmbedSettings| -> Result<Box<dyn Embedder>> {
            Err(CognateError::BackendUnavailable {
                model: "broken".to_string(),
                capability: "a test runtime".to_string(),
            }
            .into())
        }),
    );
    let output = dir.path().join("leads.jsonl");
    let err = prepare(
        &config(dir.path(), &["form", "broken"], 10),
        &registry,
        &eye_request(dir.path()),
    )
    .expect_err("backend unavailable");
    assert_eq!(
        classify(&err).map(CognateError::code),
        Some(ErrorCode::BackendUnavailable)
    );
    assert!(!output.exists());
}

#[test]
fn index_follows_embeddings_recomputed_under_another_role() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(dir.path(), &["form"], 5);
    let registry = EmbedderRegistry::with_defaults();
    let source = write_corpus(dir.path(), "ara.jsonl", &[json!({"id": "s", "lemma": "kitab"})]);
    let other = write_corpus(dir.path(), "lat.jsonl", &[json!({"id": "l", "lemma": "liber"})]);
    let shared = dir.path().join("eng.jsonl");
    let write_shared = |first: &str| {
        let lines = [
            json!({"id": "a", "lemma": first}).to_string(),
            json!({"id": "b", "lemma": "qqqq"}).to_string(),
        ];
        fs::write(&shared, lines.join("\n")).expect("write shared corpus");
    };
    let as_target = DiscoveryRequest {
        sources: vec![spec("ara", &source)],
        targets: vec![spec("eng", &shared)],
        run_id: Some("t".to_string()),
        ..DiscoveryRequest::default()
    };

    write_shared("zzzz");
    run_to_string(&config, &registry, &as_target).expect("index built as target");

    write_shared("kitab");
    let as_source = DiscoveryRequest {
        sources: vec![spec("eng", &shared)],
        targets: vec![spec("lat", &other)],
        rebuild_cache: true,
        run_id: Some("s".to_string()),
        ..DiscoveryRequest::default()
    };
    run_to_string(&config, &registry, &as_source).expect("embeddings recomputed as source");

    let text = run_to_string(&config, &registry, &as_target).expect("target again");
    let leads = leads(&text);
    let kitab = leads
        .iter()
        .find(|lead| lead["target"]["id"] == "a")
        .expect("lead for edited row");
    assert_eq!(kitab["target"]["lemma"], "kitab");
    let form = kitab["scores"]["form"].as_f64().expect("form score");
    assert!(form > 0.99, "identical lemma scored {form}");
    assert_eq!(leads[0]["target"]["id"], "a");
}

#[test]
fn top_k_far_beyond_corpus_size_is_served() {
    let dir = tempfile::tempdir().expect("tempdir");
    let request = eye_request(dir.path());
    let run = prepare(
        &config(dir.path(), &["form"], i64::MAX),
        &EmbedderRegistry::with_defaults(),
        &request,
    )
    .expect("prepare");
    let mut writer = LeadWriter::new(Vec::new());
    let summary = run.emit(&mut writer).expect("emit");
    assert_eq!(summary.leads_written, 2);
    assert_eq!(summary.retrievals.get("eng:unknown"), Some(&2));
}
