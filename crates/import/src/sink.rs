//! Target-store sinks for mapped batches.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use tabula_core::{MappedBatch, TabulaError};

/// Where a batch went and how many entities it carried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkReport {
    pub location: String,
    pub entities: usize,
}

/// Receives each non-empty batch produced by an import run.
///
/// A failed write is reported as a write error and counts as a table failure.
#[async_trait]
pub trait ImportSink: Send + Sync {
    async fn write(&self, batch: &MappedBatch) -> Result<SinkReport, TabulaError>;

    /// Location label for logs and reports.
    fn location(&self) -> String;
}

// ── JSON lines ───────────────────────────────────────────────────────

/// Appends one JSON line per batch.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ImportSink for JsonlSink {
    async fn write(&self, batch: &MappedBatch) -> Result<SinkReport, TabulaError> {
        let write_err = |e: std::io::Error| {
            TabulaError::Write(format!("{}: {}", self.path.display(), e))
        };
        let mut line =
            serde_json::to_vec(batch).map_err(|e| TabulaError::Write(e.to_string()))?;
        line.push(b'\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(write_err)?;
        file.write_all(&line).await.map_err(write_err)?;
        file.flush().await.map_err(write_err)?;

        debug!(path = %self.path.display(), bytes = line.len(), "batch appended");
        Ok(SinkReport {
            location: self.location(),
            entities: batch.entity_count(),
        })
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

// ── In memory ────────────────────────────────────────────────────────

/// Collects batches in memory. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<MappedBatch>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<MappedBatch> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ImportSink for MemorySink {
    async fn write(&self, batch: &MappedBatch) -> Result<SinkReport, TabulaError> {
        let mut batches = self
            .batches
            .lock()
            .map_err(|_| TabulaError::Write("memory sink lock poisoned".into()))?;
        batches.push(batch.clone());
        Ok(SinkReport {
            location: self.location(),
            entities: batch.entity_count(),
        })
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(class: &str) -> MappedBatch {
        let mut batch = MappedBatch::new();
        batch.add_object_class(class);
        batch.add_object(class, "x");
        batch
    }

    #[tokio::test]
    async fn jsonl_appends_one_line_per_batch() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::new(dir.path().join("out/import.jsonl"));
        let report = sink.write(&batch("a")).await.unwrap();
        assert_eq!(report.entities, 2);
        sink.write(&batch("b")).await.unwrap();

        let text = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: MappedBatch = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second, batch("b"));
    }

    #[tokio::test]
    async fn jsonl_write_failure_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        // a directory where the file should be
        let sink = JsonlSink::new(dir.path());
        let err = sink.write(&batch("a")).await.unwrap_err();
        assert_eq!(err.kind(), "write");
    }

    #[tokio::test]
    async fn memory_sink_clones_share_batches() {
        let sink = MemorySink::new();
        let handle = sink.clone();
        sink.write(&batch("a")).await.unwrap();
        assert_eq!(handle.batches().len(), 1);
    }
}
