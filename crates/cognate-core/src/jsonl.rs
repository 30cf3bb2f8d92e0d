//! Line-delimited JSON reading and writing.
//!
//! Corpus readers come in two flavours: strict (the discovery path, where a
//! malformed record aborts the run with its line number) and lenient (the
//! fallback and analysis paths, where bad lines are skipped and a bounded
//! sample is logged).

use crate::error::CognateError;
use crate::lexeme::LexemeRow;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// How many malformed lines are logged individually before only counting.
pub const MALFORMED_SAMPLE: usize = 5;

/// Options for [`read_rows`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Maximum number of rows to load; 0 means unlimited.
    pub limit: usize,
    /// Fail on the first malformed line instead of skipping it.
    pub strict: bool,
}

impl ReadOptions {
    #[must_use]
    pub const fn strict(limit: usize) -> Self {
        Self {
            limit,
            strict: true,
        }
    }

    #[must_use]
    pub const fn lenient(limit: usize) -> Self {
        Self {
            limit,
            strict: false,
        }
    }
}

/// Counts malformed lines and logs the first few of them.
#[derive(Debug)]
pub struct MalformedLog<'a> {
    path: &'a Path,
    skipped: usize,
}

impl<'a> MalformedLog<'a> {
    #[must_use]
    pub const fn new(path: &'a Path) -> Self {
        Self { path, skipped: 0 }
    }

    pub fn record(&mut self, line: usize, reason: &str) {
        self.skipped += 1;
        if self.skipped <= MALFORMED_SAMPLE {
            tracing::warn!(
                path = %self.path.display(),
                line,
                reason,
                "skipping malformed line"
            );
        }
    }

    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped
    }

    /// Emit the summary line, if anything was skipped.
    pub fn finish(self) -> usize {
        if self.skipped > 0 {
            tracing::warn!(
                path = %self.path.display(),
                skipped = self.skipped,
                "malformed lines skipped"
            );
        }
        self.skipped
    }
}

fn open(path: &Path) -> Result<BufReader<File>> {
    if !path.is_file() {
        return Err(CognateError::CorpusNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(BufReader::new(file))
}

/// Load lexeme rows from a JSONL corpus.
///
/// Positions are 0-based source line numbers; blank lines are skipped but
/// still counted. Each record must be a JSON object.
///
/// # Errors
///
/// [`CognateError::CorpusNotFound`] if the file is missing, and in strict mode
/// [`CognateError::MalformedRecord`] for the first line that is not a JSON
/// object.
pub fn read_rows(path: &Path, options: ReadOptions) -> Result<Vec<LexemeRow>> {
    let reader = open(path)?;
    let mut rows = Vec::new();
    let mut malformed = MalformedLog::new(path);

    for (position, line) in reader.lines().enumerate() {
        if options.limit > 0 && rows.len() >= options.limit {
            break;
        }
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match parse_object(trimmed) {
            Ok(attributes) => rows.push(LexemeRow::new(position, attributes)),
            Err(reason) if options.strict => {
                return Err(CognateError::MalformedRecord {
                    path: path.to_path_buf(),
                    line: position + 1,
                    reason,
                }
                .into());
            }
            Err(reason) => malformed.record(position + 1, &reason),
        }
    }

    malformed.finish();
    tracing::debug!(path = %path.display(), rows = rows.len(), "corpus loaded");
    Ok(rows)
}

/// Read every JSON value line of `path`, skipping malformed lines.
///
/// # Errors
///
/// [`CognateError::CorpusNotFound`] if the file is missing, or an I/O error.
pub fn read_values_lenient(path: &Path) -> Result<Vec<Value>> {
    let reader = open(path)?;
    let mut values = Vec::new();
    let mut malformed = MalformedLog::new(path);

    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => values.push(value),
            Err(err) => malformed.record(idx + 1, &err.to_string()),
        }
    }

    malformed.finish();
    Ok(values)
}

fn parse_object(line: &str) -> std::result::Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("record is not a JSON object".to_string()),
        Err(err) => Err(err.to_string()),
    }
}

/// Streaming JSONL writer. Non-ASCII text is written as UTF-8, unescaped.
pub struct LeadWriter<W: Write> {
    inner: W,
    written: usize,
}

impl<W: Write> LeadWriter<W> {
    pub const fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    /// Serialize one record as a single line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the underlying write fails.
    pub fn write_record<T: Serialize + ?Sized>(&mut self, record: &T) -> Result<()> {
        serde_json::to_writer(&mut self.inner, record).context("Failed to serialize record")?;
        self.inner.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the underlying flush fails.
    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush().context("Failed to flush output")
    }

    #[must_use]
    pub const fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl LeadWriter<BufWriter<File>> {
    /// Create (truncating) `path`, creating parent directories first.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file =
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

/// Write all `records` to `path` at once.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<PathBuf> {
    let mut writer = LeadWriter::create(path)?;
    for record in records {
        writer.write_record(record)?;
    }
    writer.flush()?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, classify};
    use serde_json::json;

    fn corpus(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("corpus.jsonl");
        fs::write(&path, content).expect("write corpus");
        (dir, path)
    }

    #[test]
    fn positions_count_blank_lines() {
        let (_dir, path) = corpus("{\"id\":\"a\",\"lemma\":\"x\"}\n\n{\"lemma\":\"y\"}\n");
        let rows = read_rows(&path, ReadOptions::strict(0)).expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].position(), 0);
        assert_eq!(rows[1].position(), 2);
        assert_eq!(rows[1].identity(), "row:2");
    }

    #[test]
    fn limit_caps_rows() {
        let (_dir, path) = corpus("{\"lemma\":\"a\"}\n{\"lemma\":\"b\"}\n{\"lemma\":\"c\"}\n");
        let rows = read_rows(&path, ReadOptions::strict(2)).expect("rows");
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn strict_mode_reports_line_number() {
        let (_dir, path) = corpus("{\"lemma\":\"a\"}\nnot json\n");
        let err = read_rows(&path, ReadOptions::strict(0)).expect_err("malformed");
        match classify(&err) {
            Some(CognateError::MalformedRecord { line, .. }) => assert_eq!(*line, 2),
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn lenient_mode_skips_bad_lines() {
        let (_dir, path) = corpus("[1,2]\n{\"lemma\":\"a\"}\n{oops\n{\"lemma\":\"b\"}\n");
        let rows = read_rows(&path, ReadOptions::lenient(0)).expect("rows");
        let positions: Vec<_> = rows.iter().map(LexemeRow::position).collect();
        assert_eq!(positions, vec![1, 3]);
    }

    #[test]
    fn missing_file_is_a_hard_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = read_rows(&dir.path().join("absent.jsonl"), ReadOptions::lenient(0))
            .expect_err("missing corpus");
        assert_eq!(
            classify(&err).map(CognateError::code),
            Some(ErrorCode::CorpusNotFound)
        );
    }

    #[test]
    fn writer_keeps_utf8_unescaped() {
        let mut writer = LeadWriter::new(Vec::new());
        writer
            .write_record(&json!({"lemma": "عين"}))
            .expect("write");
        writer.flush().expect("flush");
        assert_eq!(writer.written(), 1);
        let text = String::from_utf8(writer.into_inner()).expect("utf8");
        assert_eq!(text, "{\"lemma\":\"عين\"}\n");
    }

    #[test]
    fn write_jsonl_creates_parent_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/out/leads.jsonl");
        write_jsonl(&path, &[json!({"a": 1}), json!({"a": 2})]).expect("write");
        let values = read_values_lenient(&path).expect("read back");
        assert_eq!(values.len(), 2);
    }
}
