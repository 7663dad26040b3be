//! Connection session: the caller-side owner of one source.
//!
//! A session holds the table configuration store and a handle to the worker
//! that owns the adapter. Requests are fire-and-forget; their results come
//! back through [`ConnectionSession::next_event`]. Only one request may be
//! in flight at a time.

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use tabula_core::config::SessionConfig;
use tabula_core::{MappedBatch, RowError, TableConfigStore, TableOptions, TabulaError};
use tabula_mapping::MappingSpec;

use crate::adapter::{SourceAdapter, SourceDescriptor};
use crate::error::SessionError;
use crate::worker::{Request, TableJob, WorkerEvent, WorkerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Fetching,
    /// The worker exited while a request was in flight.
    Failed,
}

/// Caller-visible completion of one request.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    ConnectionFailed(String),
    /// Table names in source order, after merging into the store.
    TablesReady(Vec<String>),
    DataReady {
        table: String,
        header: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    MappedDataReady {
        batch: MappedBatch,
        errors: Vec<RowError>,
    },
    DefaultMappingReady(MappingSpec),
    Error(TabulaError),
}

pub struct ConnectionSession {
    config: SessionConfig,
    state: SessionState,
    descriptor: Option<SourceDescriptor>,
    store: TableConfigStore,
    worker: Option<WorkerHandle>,
    in_flight: Option<&'static str>,
}

impl ConnectionSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Disconnected,
            descriptor: None,
            store: TableConfigStore::default(),
            worker: None,
            in_flight: None,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn descriptor(&self) -> Option<&SourceDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn store(&self) -> &TableConfigStore {
        &self.store
    }

    /// Direct store access for type overrides, pruning and restore.
    pub fn store_mut(&mut self) -> &mut TableConfigStore {
        &mut self.store
    }

    pub fn current_table(&self) -> Option<String> {
        self.store.current_table()
    }

    pub fn select_table(&mut self, table: impl Into<String>) {
        self.store.select(Some(table.into()));
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Replace any running worker with a fresh one for `descriptor` and
    /// request a connection. Completion arrives as `Connected` or
    /// `ConnectionFailed`.
    ///
    /// The previous worker is stopped even when the adapter cannot be built
    /// from the descriptor's settings; the session is then Disconnected.
    pub async fn open(&mut self, descriptor: SourceDescriptor) -> Result<(), SessionError> {
        self.close().await;
        let adapter = match descriptor.kind.create(&descriptor.settings) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(kind = %descriptor.kind, error = %e, "cannot build adapter");
                self.descriptor = None;
                return Err(e.into());
            }
        };
        self.open_with_adapter(descriptor, adapter).await
    }

    /// Like [`open`](Self::open) with a caller-built adapter.
    pub async fn open_with_adapter(
        &mut self,
        descriptor: SourceDescriptor,
        adapter: Box<dyn SourceAdapter>,
    ) -> Result<(), SessionError> {
        self.close().await;

        info!(kind = %descriptor.kind, locator = %descriptor.locator, "opening source");
        self.store.set_defaults(descriptor.kind.option_defaults());
        let worker = WorkerHandle::spawn(adapter);
        worker
            .send(Request::Connect {
                locator: descriptor.locator.clone(),
            })
            .map_err(|_| SessionError::WorkerGone)?;

        self.worker = Some(worker);
        self.descriptor = Some(descriptor);
        self.state = SessionState::Connecting;
        self.in_flight = Some("connect");
        Ok(())
    }

    /// Stop the worker and wait for it, at most the configured join timeout.
    /// No event is delivered after this returns.
    pub async fn close(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop(self.config.join_timeout()).await;
            info!("session closed");
        }
        self.in_flight = None;
        self.state = SessionState::Disconnected;
    }

    // ── Requests ────────────────────────────────────────────────────

    fn ensure_ready(&self) -> Result<(), SessionError> {
        if let Some(label) = self.in_flight {
            return Err(SessionError::Busy(label));
        }
        if self.state != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        Ok(())
    }

    fn submit(&mut self, request: Request) -> Result<(), SessionError> {
        self.ensure_ready()?;
        let worker = self.worker.as_ref().ok_or(SessionError::NotConnected)?;
        let label = request.label();
        if worker.send(request).is_err() {
            self.state = SessionState::Failed;
            return Err(SessionError::WorkerGone);
        }
        debug!(request = label, "request submitted");
        self.in_flight = Some(label);
        self.state = SessionState::Fetching;
        Ok(())
    }

    /// Discover tables. Emits `TablesReady`.
    pub fn list_tables(&mut self) -> Result<(), SessionError> {
        self.submit(Request::ListTables)
    }

    /// Read up to `max_rows` rows of `table` with its stored options. Emits `DataReady`.
    pub fn preview(&mut self, table: &str, max_rows: Option<usize>) -> Result<(), SessionError> {
        self.ensure_ready()?;
        let options = self.store.get_options(table);
        self.submit(Request::ReadRows {
            table: table.to_string(),
            options,
            max_rows,
        })
    }

    /// Read and map each listed table. Emits `MappedDataReady`; an empty
    /// map yields an empty batch.
    pub fn apply_mappings(
        &mut self,
        mappings: &IndexMap<String, MappingSpec>,
        max_rows: Option<usize>,
    ) -> Result<(), SessionError> {
        self.ensure_ready()?;
        let jobs = mappings
            .iter()
            .map(|(table, mapping)| TableJob {
                table: table.clone(),
                options: self.store.get_options(table),
                column_types: self.store.column_types(table),
                row_types: self.store.row_types(table),
                mapping: mapping.clone(),
            })
            .collect();
        self.submit(Request::MapTables { jobs, max_rows })
    }

    /// Emits `DefaultMappingReady`.
    pub fn request_default_mapping(&mut self) -> Result<(), SessionError> {
        self.submit(Request::DefaultMapping)
    }

    /// Merge `partial` into the current table's options and preview it again.
    pub fn update_options(&mut self, partial: TableOptions) -> Result<(), SessionError> {
        self.ensure_ready()?;
        let table = self.store.current_table().ok_or(SessionError::NoTableSelected)?;
        self.store.set_options(&table, partial);
        self.store.touch_current();
        self.preview(&table, Some(self.config.preview_rows))
    }

    // ── Events ──────────────────────────────────────────────────────

    /// Wait for the completion of the in-flight request. Returns `None` when
    /// nothing is in flight or the worker is gone.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.in_flight?;
        let event = self.worker.as_mut()?.recv().await;
        match event {
            Some(event) => Some(self.absorb(event)),
            None => {
                self.worker_lost();
                None
            }
        }
    }

    /// Non-blocking variant of [`next_event`](Self::next_event).
    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        let event = self.worker.as_mut()?.try_recv()?;
        Some(self.absorb(event))
    }

    fn worker_lost(&mut self) {
        warn!(request = ?self.in_flight, "worker exited with a request in flight");
        self.worker = None;
        self.in_flight = None;
        self.state = SessionState::Failed;
    }

    fn absorb(&mut self, event: WorkerEvent) -> SessionEvent {
        self.in_flight = None;
        self.state = SessionState::Connected;
        match event {
            WorkerEvent::Connected => {
                info!("source connected");
                SessionEvent::Connected
            }
            WorkerEvent::ConnectionFailed(message) => {
                self.state = SessionState::Disconnected;
                SessionEvent::ConnectionFailed(message)
            }
            WorkerEvent::TablesReady(tables) => {
                self.store.merge_discovered(&tables);
                let names: Vec<String> = tables.into_iter().map(|t| t.name).collect();
                if self.store.current_table().is_none() {
                    if let Some(first) = names.first() {
                        self.store.select(Some(first.clone()));
                    }
                }
                info!(tables = names.len(), "tables ready");
                SessionEvent::TablesReady(names)
            }
            WorkerEvent::DataReady { table, data } => SessionEvent::DataReady {
                table,
                header: data.header,
                rows: data.rows,
            },
            WorkerEvent::MappedDataReady { batch, errors } => {
                if !errors.is_empty() {
                    warn!(row_errors = errors.len(), "mapping produced row errors");
                }
                SessionEvent::MappedDataReady { batch, errors }
            }
            WorkerEvent::DefaultMappingReady(spec) => SessionEvent::DefaultMappingReady(spec),
            WorkerEvent::Failed(error) => {
                warn!(kind = error.kind(), error = %error, "request failed");
                SessionEvent::Error(error)
            }
        }
    }
}

impl Default for ConnectionSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
