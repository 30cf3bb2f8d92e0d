#![forbid(unsafe_code)]
//! cognate-search: retrieval, scoring and ranking of cross-language leads.
//!
//! Two matching paths share the lexeme row model from `cognate-core`:
//!
//! - [`discovery`]: embed every corpus with each configured model
//!   ([`embed`], memoised by [`cache`]), search flat inner-product indexes
//!   ([`index`]), merge and score candidates ([`fusion`]) and stream ranked
//!   leads per source lexeme ([`emit`]).
//! - [`fallback`]: brute-force pair scoring for small corpora.
//!
//! [`analysis`] summarises lead files from either path.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types; classified failures
//!   are `cognate_core::CognateError` values.
//! - **Logging**: Use `tracing` macros with structured fields.

pub mod analysis;
pub mod cache;
pub mod codec;
pub mod discovery;
pub mod embed;
pub mod emit;
pub mod fallback;
pub mod fusion;
pub mod index;

pub use discovery::{DiscoveryRequest, PreparedRun, RunSummary, prepare};
pub use embed::{Embedder, EmbedderRegistry, EmbeddingMatrix, ModelKind};
