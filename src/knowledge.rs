//! Knowledge base: CSV-backed entries plus their precomputed question
//! vectors, published as an atomically-swappable snapshot.
//!
//! Readers grab an `Arc<Snapshot>` and work against it for the whole
//! request; `reload()` builds a complete replacement before swapping it
//! in, so a snapshot never has mismatched entries and vectors.

use crate::semantic::embeddings::{EmbeddingError, Encoder};
use serde::{Deserialize, Serialize};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
    time::Instant,
};

const CSV_HEADERS: [&str; 4] = ["question", "response_content", "response_type", "explanation"];

/// How a stored answer should be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    #[default]
    Text,
    Code,
}

impl ResponseKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "text" => Some(ResponseKind::Text),
            "code" => Some(ResponseKind::Code),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseKind::Text => "text",
            ResponseKind::Code => "code",
        }
    }
}

/// One curated question/answer pair. Immutable once stored; the
/// knowledge base is append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub question: String,
    pub response_content: String,
    pub response_type: ResponseKind,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("knowledge base not found at {0}")]
    NotFound(String),

    #[error("knowledge base is missing required columns: {0}")]
    MissingColumns(String),

    #[error("knowledge base row {row} is invalid: {reason}")]
    MalformedRow { row: usize, reason: String },

    #[error("failed to read knowledge base: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to encode knowledge base questions: {0}")]
    Encoding(#[from] EmbeddingError),
}

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to write knowledge base: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to re-read knowledge base: {0}")]
    Reread(#[from] LoadError),
}

/// An immutable view of the knowledge base at one point in time.
///
/// Invariant: `entries.len() == vectors.len()`, and `vectors[i]` was
/// computed from `entries[i].question` by the encoder this snapshot
/// was built with.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub entries: Vec<KnowledgeEntry>,
    pub vectors: Vec<Vec<f32>>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct KnowledgeBase {
    path: PathBuf,
    encoder: Arc<dyn Encoder>,
    current: RwLock<Arc<Snapshot>>,
    // serializes writers so concurrent appends cannot lose rows
    append_lock: Mutex<()>,
}

impl KnowledgeBase {
    /// Load the knowledge base from `path` and precompute one vector
    /// per entry, in entry order.
    pub fn load(path: &Path, encoder: Arc<dyn Encoder>) -> Result<Self, LoadError> {
        let snapshot = build_snapshot(path, encoder.as_ref())?;

        Ok(KnowledgeBase {
            path: path.to_path_buf(),
            encoder,
            current: RwLock::new(Arc::new(snapshot)),
            append_lock: Mutex::new(()),
        })
    }

    /// The snapshot at call time. Holders keep reading a consistent
    /// store even if a reload publishes a newer one meanwhile.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Durably append one entry to the backing file.
    ///
    /// Rows are re-read from disk rather than taken from the published
    /// snapshot: the snapshot can be stale when an earlier reload
    /// failed, and rewriting from it would drop rows already on disk.
    /// In-memory vectors are left untouched; call `reload()` afterward
    /// to make the entry searchable.
    pub fn append(&self, entry: &KnowledgeEntry) -> Result<(), PersistError> {
        let _guard = self.append_lock.lock().unwrap();

        let existing = read_entries(&self.path)?;

        let temp_path = self.path.with_extension("csv-tmp");
        let mut csv_wrt = csv::Writer::from_path(&temp_path)?;
        csv_wrt.write_record(CSV_HEADERS)?;
        for row in existing.iter().chain(std::iter::once(entry)) {
            csv_wrt.write_record([
                row.question.as_str(),
                row.response_content.as_str(),
                row.response_type.as_str(),
                row.explanation.as_str(),
            ])?;
        }
        csv_wrt.flush()?;
        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    /// Rebuild entries and vectors from the backing file, then publish
    /// the new snapshot in a single swap. In-flight readers keep their
    /// old snapshot; new readers see the new one in full.
    pub fn reload(&self) -> Result<(), LoadError> {
        let snapshot = build_snapshot(&self.path, self.encoder.as_ref())?;

        *self.current.write().unwrap() = Arc::new(snapshot);
        Ok(())
    }
}

/// Create an empty knowledge base file containing only the header row.
pub fn create_empty(path: &Path) -> Result<(), PersistError> {
    let mut csv_wrt = csv::Writer::from_path(path)?;
    csv_wrt.write_record(CSV_HEADERS)?;
    csv_wrt.flush()?;
    Ok(())
}

fn build_snapshot(path: &Path, encoder: &dyn Encoder) -> Result<Snapshot, LoadError> {
    let now = Instant::now();
    let entries = read_entries(path)?;

    let questions = entries
        .iter()
        .map(|entry| entry.question.clone())
        .collect::<Vec<_>>();
    let vectors = encoder.encode_batch(&questions)?;

    log::debug!(
        "loaded {} knowledge entries in {}ms",
        entries.len(),
        now.elapsed().as_micros() as f64 / 1000.0
    );

    Ok(Snapshot { entries, vectors })
}

/// Read and validate every row of the backing file, in file order.
fn read_entries(path: &Path) -> Result<Vec<KnowledgeEntry>, LoadError> {
    if let Err(err) = std::fs::metadata(path) {
        if err.kind() == ErrorKind::NotFound {
            return Err(LoadError::NotFound(path.display().to_string()));
        }
    }

    let mut csv_reader = csv::Reader::from_path(path)?;

    let headers = csv_reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h == name);

    let missing = ["question", "response_content", "response_type"]
        .iter()
        .filter(|name| column(name).is_none())
        .copied()
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(LoadError::MissingColumns(missing.join(", ")));
    }

    let question_idx = column("question").expect("checked above");
    let content_idx = column("response_content").expect("checked above");
    let type_idx = column("response_type").expect("checked above");
    let explanation_idx = column("explanation");

    let mut entries = vec![];
    for (row, record) in csv_reader.records().enumerate() {
        let record = record?;
        // header is line 1
        let row = row + 2;

        let question = record.get(question_idx).unwrap_or_default().to_string();
        let response_content = record.get(content_idx).unwrap_or_default().to_string();
        let raw_type = record.get(type_idx).unwrap_or_default();

        if question.trim().is_empty() {
            return Err(LoadError::MalformedRow {
                row,
                reason: "empty question".to_string(),
            });
        }
        if response_content.trim().is_empty() {
            return Err(LoadError::MalformedRow {
                row,
                reason: "empty response_content".to_string(),
            });
        }
        let response_type =
            ResponseKind::parse(raw_type).ok_or_else(|| LoadError::MalformedRow {
                row,
                reason: format!("unknown response_type {raw_type:?}"),
            })?;

        // explanation column is optional; missing values default to ""
        let explanation = explanation_idx
            .and_then(|idx| record.get(idx))
            .unwrap_or_default()
            .to_string();

        entries.push(KnowledgeEntry {
            question,
            response_content,
            response_type,
            explanation,
        });
    }

    Ok(entries)
}
