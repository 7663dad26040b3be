//! Background worker owning one source adapter.
//!
//! The worker executes requests one at a time and answers each with exactly
//! one event. It stops when the shutdown flag is raised or the request
//! channel closes, disconnecting the adapter on the way out.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tabula_core::{
    ColumnTypes, DiscoveredTable, MappedBatch, RowError, RowTypes, TableOptions, TabulaError,
};
use tabula_mapping::{apply, MappingSpec};

use crate::adapter::{RawTable, SourceAdapter};

/// Everything needed to read and map one table, captured on the caller side.
#[derive(Debug, Clone)]
pub(crate) struct TableJob {
    pub table: String,
    pub options: TableOptions,
    pub column_types: ColumnTypes,
    pub row_types: RowTypes,
    pub mapping: MappingSpec,
}

#[derive(Debug)]
pub(crate) enum Request {
    Connect { locator: String },
    ListTables,
    ReadRows {
        table: String,
        options: TableOptions,
        max_rows: Option<usize>,
    },
    MapTables {
        jobs: Vec<TableJob>,
        max_rows: Option<usize>,
    },
    DefaultMapping,
}

impl Request {
    pub fn label(&self) -> &'static str {
        match self {
            Request::Connect { .. } => "connect",
            Request::ListTables => "list_tables",
            Request::ReadRows { .. } => "read_rows",
            Request::MapTables { .. } => "map_tables",
            Request::DefaultMapping => "default_mapping",
        }
    }
}

#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Connected,
    ConnectionFailed(String),
    TablesReady(Vec<DiscoveredTable>),
    DataReady { table: String, data: RawTable },
    MappedDataReady {
        batch: MappedBatch,
        errors: Vec<RowError>,
    },
    DefaultMappingReady(MappingSpec),
    Failed(TabulaError),
}

/// Caller-side handle to a running worker.
pub(crate) struct WorkerHandle {
    requests: mpsc::UnboundedSender<Request>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn spawn(adapter: Box<dyn SourceAdapter>) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(adapter, request_rx, event_tx, shutdown_rx));
        Self {
            requests: request_tx,
            events: event_rx,
            shutdown: shutdown_tx,
            task,
        }
    }

    /// Queue a request. Fails only when the worker has already exited.
    pub fn send(&self, request: Request) -> Result<(), Request> {
        self.requests.send(request).map_err(|e| e.0)
    }

    pub async fn recv(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<WorkerEvent> {
        self.events.try_recv().ok()
    }

    /// Raise the shutdown flag and wait for the task, aborting it when it
    /// does not finish within `timeout`.
    pub async fn stop(mut self, timeout: std::time::Duration) {
        let _ = self.shutdown.send(true);
        self.events.close();
        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(Ok(())) => debug!("worker joined"),
            Ok(Err(e)) => warn!(error = %e, "worker task ended abnormally"),
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "worker did not stop in time, aborting");
                self.task.abort();
                let _ = (&mut self.task).await;
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

// ── Loop ─────────────────────────────────────────────────────────────

async fn run(
    mut adapter: Box<dyn SourceAdapter>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let kind = adapter.kind();
    info!(adapter = %kind, "worker started");

    loop {
        let request = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let label = request.label();
        let is_connect = matches!(request, Request::Connect { .. });
        debug!(adapter = %kind, request = label, "request started");

        let outcome = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => {
                debug!(adapter = %kind, request = label, "request dropped on shutdown");
                break;
            }
            outcome = AssertUnwindSafe(handle(adapter.as_mut(), request)).catch_unwind() => outcome,
        };

        let event = outcome.unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            warn!(adapter = %kind, request = label, error = %message, "adapter panicked");
            if is_connect {
                WorkerEvent::ConnectionFailed(format!("adapter fault: {}", message))
            } else {
                WorkerEvent::Failed(TabulaError::Read(format!("adapter fault: {}", message)))
            }
        });

        if *shutdown.borrow() || events.send(event).is_err() {
            break;
        }
    }

    if let Err(e) = adapter.disconnect().await {
        warn!(adapter = %kind, error = %e, "disconnect failed");
    }
    info!(adapter = %kind, "worker stopped");
}

/// Resolves once the shutdown flag is raised or its sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn handle(adapter: &mut dyn SourceAdapter, request: Request) -> WorkerEvent {
    match request {
        Request::Connect { locator } => match adapter.connect(&locator).await {
            Ok(()) => WorkerEvent::Connected,
            Err(e) => {
                warn!(locator = %locator, error = %e, "connection failed");
                WorkerEvent::ConnectionFailed(e.message().to_string())
            }
        },
        Request::ListTables => match adapter.list_tables().await {
            Ok(tables) => WorkerEvent::TablesReady(tables),
            Err(e) => WorkerEvent::Failed(e),
        },
        Request::ReadRows {
            table,
            options,
            max_rows,
        } => match adapter.read_rows(&table, &options, max_rows).await {
            Ok(data) => WorkerEvent::DataReady { table, data },
            Err(e) => WorkerEvent::Failed(e),
        },
        Request::MapTables { jobs, max_rows } => match map_tables(adapter, jobs, max_rows).await {
            Ok((batch, errors)) => WorkerEvent::MappedDataReady { batch, errors },
            Err(e) => WorkerEvent::Failed(e),
        },
        Request::DefaultMapping => WorkerEvent::DefaultMappingReady(adapter.default_mapping()),
    }
}

/// Read and map each table in turn. Any table-level failure fails the whole
/// request; row errors are labelled with their table when several tables are
/// mapped together.
async fn map_tables(
    adapter: &mut dyn SourceAdapter,
    jobs: Vec<TableJob>,
    max_rows: Option<usize>,
) -> Result<(MappedBatch, Vec<RowError>), TabulaError> {
    let several = jobs.len() > 1;
    let mut batch = MappedBatch::new();
    let mut errors = Vec::new();

    for job in jobs {
        let data = adapter.read_rows(&job.table, &job.options, max_rows).await?;
        let output = apply(
            &job.mapping,
            &data.rows,
            &data.header,
            &job.column_types,
            &job.row_types,
        )
        .map_err(|e| TabulaError::Mapping(format!("table '{}': {}", job.table, e.message())))?;
        debug!(
            table = %job.table,
            rows = data.rows.len(),
            entities = output.batch.entity_count(),
            row_errors = output.errors.len(),
            "table mapped"
        );
        batch.extend(output.batch);
        errors.extend(output.errors.into_iter().map(|e| {
            if several {
                RowError::new(e.row, format!("{}: {}", job.table, e.message))
            } else {
                e
            }
        }));
    }
    Ok((batch, errors))
}
