#![forbid(unsafe_code)]
//! cognate-core: the data layer shared by discovery and fallback matching.
//!
//! # Conventions
//!
//! - **Errors**: Fallible functions return `anyhow::Result`. Classified
//!   failures are [`error::CognateError`] values at the root of the chain so
//!   callers can recover a stable [`error::ErrorCode`].
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `debug!`) with
//!   structured fields. Nothing here writes to stdout.
//! - **Configuration**: One immutable [`config::CognateConfig`] per run,
//!   passed by reference. No global state.

pub mod config;
pub mod corpus;
pub mod error;
pub mod jsonl;
pub mod lang;
pub mod lexeme;
pub mod lock;

pub use config::{CognateConfig, HybridWeights};
pub use corpus::CorpusSpec;
pub use error::{CognateError, ErrorCode};
pub use lexeme::LexemeRow;
