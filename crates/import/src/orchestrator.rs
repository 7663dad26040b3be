//! Import orchestrator: reads, maps and writes every selected table of every
//! source, one table at a time.
//!
//! Sources are visited in the given order and the tables of each source in
//! selection order, each through its own connection session. A failing table
//! either aborts the run (`cancel_on_error`) or is recorded and skipped.
//! Cancellation is checked between tables. The report carries a checkpoint
//! of finished tables so an interrupted run can be resumed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use tabula_connector::{ConnectionSession, SessionEvent};
use tabula_core::config::{Config, SessionConfig};
use tabula_core::{MappedBatch, RowError, TabulaError};
use tabula_mapping::MappingSpec;

use crate::error::ImportError;
use crate::error_log::{write_import_error_log, write_read_error_log};
use crate::sink::ImportSink;
use crate::specification::ImportSpecification;

// ── Options and handles ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub cancel_on_error: bool,
    pub logs_dir: PathBuf,
    pub session: SessionConfig,
}

impl ImportOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cancel_on_error: config.import.cancel_on_error,
            logs_dir: config.import.logs_dir.clone(),
            session: config.session.clone(),
        }
    }
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Cooperative cancellation flag, checked between tables.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Report ───────────────────────────────────────────────────────────

/// (source, table) pairs that were fully read, mapped and written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportCheckpoint {
    pub completed: IndexSet<(String, String)>,
}

impl ImportCheckpoint {
    pub fn is_done(&self, source: &str, table: &str) -> bool {
        self.completed
            .contains(&(source.to_string(), table.to_string()))
    }

    pub fn mark(&mut self, source: &str, table: &str) {
        self.completed.insert((source.to_string(), table.to_string()));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableFailure {
    pub source: String,
    /// `None` when the source itself could not be opened.
    pub table: Option<String>,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub success: bool,
    pub cancelled: bool,
    /// A table failed while `cancel_on_error` was set.
    pub aborted: bool,
    pub tables_imported: usize,
    pub entities_written: usize,
    pub row_errors: usize,
    pub failures: Vec<TableFailure>,
    /// `<ts>_read_error.log`, when any row failed.
    pub error_log: Option<PathBuf>,
    /// `<ts>_import_error.log`, when a sink rejected a batch.
    pub import_error_log: Option<PathBuf>,
    pub checkpoint: ImportCheckpoint,
}

/// What one table produced.
enum TableOutcome {
    Done { entities: usize, row_errors: Vec<RowError> },
    /// Row errors under `cancel_on_error`; nothing was written.
    Rejected(Vec<RowError>),
    Failed(TabulaError),
}

// ── Orchestrator ─────────────────────────────────────────────────────

pub struct ImportOrchestrator {
    spec: ImportSpecification,
    options: ImportOptions,
    sinks: Vec<Box<dyn ImportSink>>,
    cancel: CancelHandle,
}

impl ImportOrchestrator {
    pub fn new(spec: ImportSpecification, options: ImportOptions) -> Self {
        Self {
            spec,
            options,
            sinks: Vec::new(),
            cancel: CancelHandle::new(),
        }
    }

    pub fn with_sink(mut self, sink: impl ImportSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Handle for cancelling a run from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn specification(&self) -> &ImportSpecification {
        &self.spec
    }

    /// Import every selected table of `sources`.
    pub async fn run(&self, sources: &[String]) -> Result<ImportReport, ImportError> {
        self.resume(sources, ImportCheckpoint::default()).await
    }

    /// Like [`run`](Self::run), skipping tables already in `checkpoint`.
    pub async fn resume(
        &self,
        sources: &[String],
        checkpoint: ImportCheckpoint,
    ) -> Result<ImportReport, ImportError> {
        let mut report = ImportReport {
            checkpoint,
            ..ImportReport::default()
        };
        let mut log_lines = Vec::new();
        let mut write_lines = Vec::new();
        let tables = self.spec.selected_mappings();
        info!(
            sources = sources.len(),
            tables = tables.len(),
            sinks = self.sinks.len(),
            cancel_on_error = self.options.cancel_on_error,
            "import started"
        );

        'sources: for source in sources {
            let pending: Vec<(&str, &MappingSpec)> = tables
                .iter()
                .copied()
                .filter(|(table, _)| !report.checkpoint.is_done(source, table))
                .collect();
            if pending.is_empty() {
                debug!(source = %source, "nothing left to import");
                continue;
            }
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let mut session = match self.connect(source).await {
                Ok(session) => session,
                Err(e) => {
                    self.record_failure(&mut report, source, None, &e);
                    if self.options.cancel_on_error {
                        report.aborted = true;
                        break;
                    }
                    continue;
                }
            };

            for (table, mapping) in pending {
                if self.cancel.is_cancelled() {
                    report.cancelled = true;
                    session.close().await;
                    break 'sources;
                }
                let outcome = self.import_table(&mut session, table, mapping).await;
                let failed = match outcome {
                    TableOutcome::Done {
                        entities,
                        row_errors,
                    } => {
                        report.tables_imported += 1;
                        report.entities_written += entities;
                        report.row_errors += row_errors.len();
                        report.checkpoint.mark(source, table);
                        if !row_errors.is_empty() {
                            warn!(source = %source, table = %table, row_errors = row_errors.len(), "table read with errors");
                        }
                        log_lines.extend(
                            row_errors
                                .iter()
                                .map(|e| format!("{}: {}: {}", source, table, e)),
                        );
                        false
                    }
                    TableOutcome::Rejected(row_errors) => {
                        report.row_errors += row_errors.len();
                        log_lines.extend(
                            row_errors
                                .iter()
                                .map(|e| format!("{}: {}: {}", source, table, e)),
                        );
                        let error = TabulaError::Read(format!(
                            "{} row error(s), nothing written",
                            row_errors.len()
                        ));
                        self.record_failure(&mut report, source, Some(table), &error);
                        true
                    }
                    TableOutcome::Failed(e) => {
                        if matches!(e, TabulaError::Write(_)) {
                            write_lines.push(format!("{}: {}: {}", source, table, e.message()));
                        }
                        self.record_failure(&mut report, source, Some(table), &e);
                        true
                    }
                };
                if failed && self.options.cancel_on_error {
                    report.aborted = true;
                    session.close().await;
                    break 'sources;
                }
            }
            session.close().await;
        }

        if !log_lines.is_empty() {
            match write_read_error_log(&self.options.logs_dir, &log_lines).await {
                Ok(path) => {
                    warn!(path = %path.display(), lines = log_lines.len(), "row errors logged");
                    report.error_log = Some(path);
                }
                Err(e) => warn!(error = %e, "could not write error log"),
            }
        }
        if !write_lines.is_empty() {
            match write_import_error_log(&self.options.logs_dir, &write_lines).await {
                Ok(path) => {
                    warn!(path = %path.display(), lines = write_lines.len(), "write failures logged");
                    report.import_error_log = Some(path);
                }
                Err(e) => warn!(error = %e, "could not write import error log"),
            }
        }

        report.success = report.failures.is_empty() && !report.aborted && !report.cancelled;
        if report.aborted {
            error!(failures = report.failures.len(), row_errors = report.row_errors, "import aborted on error");
        } else {
            info!(
                success = report.success,
                cancelled = report.cancelled,
                tables = report.tables_imported,
                entities = report.entities_written,
                row_errors = report.row_errors,
                failures = report.failures.len(),
                "import finished"
            );
        }
        Ok(report)
    }

    /// Open a session on `source` with the specification's table configuration.
    async fn connect(&self, source: &str) -> Result<ConnectionSession, TabulaError> {
        let mut session = ConnectionSession::new(self.options.session.clone());
        session
            .open(self.spec.descriptor(source))
            .await
            .map_err(|e| TabulaError::Connection(e.to_string()))?;
        match session.next_event().await {
            Some(SessionEvent::Connected) => {}
            Some(SessionEvent::ConnectionFailed(message)) => {
                session.close().await;
                return Err(TabulaError::Connection(message));
            }
            other => {
                session.close().await;
                return Err(TabulaError::Connection(format!("unexpected reply {:?}", other)));
            }
        }

        // stored configuration first, so discovery only fills the gaps
        session.store_mut().restore(self.spec.table_config.clone());
        if let Err(e) = session.list_tables() {
            session.close().await;
            return Err(TabulaError::Read(e.to_string()));
        }
        match session.next_event().await {
            Some(SessionEvent::TablesReady(names)) => {
                debug!(source = %source, tables = names.len(), "source connected");
                Ok(session)
            }
            Some(SessionEvent::Error(e)) => {
                session.close().await;
                Err(e)
            }
            other => {
                session.close().await;
                Err(TabulaError::Read(format!("unexpected reply {:?}", other)))
            }
        }
    }

    async fn import_table(
        &self,
        session: &mut ConnectionSession,
        table: &str,
        mapping: &MappingSpec,
    ) -> TableOutcome {
        let single: IndexMap<String, MappingSpec> =
            [(table.to_string(), mapping.clone())].into_iter().collect();
        if let Err(e) = session.apply_mappings(&single, None) {
            return TableOutcome::Failed(TabulaError::Read(e.to_string()));
        }
        let (batch, row_errors) = match session.next_event().await {
            Some(SessionEvent::MappedDataReady { batch, errors }) => (batch, errors),
            Some(SessionEvent::Error(e)) => return TableOutcome::Failed(e),
            other => {
                return TableOutcome::Failed(TabulaError::Read(format!(
                    "unexpected reply {:?}",
                    other
                )))
            }
        };
        if self.options.cancel_on_error && !row_errors.is_empty() {
            return TableOutcome::Rejected(row_errors);
        }
        match self.write(&batch).await {
            Ok(entities) => TableOutcome::Done {
                entities,
                row_errors,
            },
            Err(e) => TableOutcome::Failed(e),
        }
    }

    /// Hand a batch to every sink. Empty batches are not forwarded.
    async fn write(&self, batch: &MappedBatch) -> Result<usize, TabulaError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let mut written = 0;
        for sink in &self.sinks {
            let report = sink.write(batch).await?;
            debug!(location = %report.location, entities = report.entities, "batch written");
            written += report.entities;
        }
        Ok(written)
    }

    fn record_failure(
        &self,
        report: &mut ImportReport,
        source: &str,
        table: Option<&str>,
        error: &TabulaError,
    ) {
        warn!(source = %source, table = ?table, kind = error.kind(), error = %error, "table failed");
        report.failures.push(TableFailure {
            source: source.to_string(),
            table: table.map(str::to_string),
            kind: error.kind().to_string(),
            message: error.message().to_string(),
        });
    }
}
