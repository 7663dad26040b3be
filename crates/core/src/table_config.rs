//! Per-table read options and type overrides.
//!
//! The store is owned by a connection session and only mutated from the
//! caller's side. Discovery results are merged in without overwriting
//! anything the user already set.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::watch;

use crate::value::ValueType;

/// Option key → value. Keys and defaults are declared by each adapter.
pub type TableOptions = IndexMap<String, JsonValue>;

/// Column index → declared value type.
pub type ColumnTypes = IndexMap<usize, ValueType>;

/// Row index → declared value type (pivoted declarations).
pub type RowTypes = IndexMap<usize, ValueType>;

/// Everything stored for one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    #[serde(default)]
    pub options: TableOptions,
    #[serde(default)]
    pub types: ColumnTypes,
    #[serde(default)]
    pub row_types: RowTypes,
}

/// A table reported by an adapter's `list_tables`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredTable {
    pub name: String,
    #[serde(default)]
    pub options: TableOptions,
    #[serde(default)]
    pub types: ColumnTypes,
    #[serde(default)]
    pub row_types: RowTypes,
}

impl DiscoveredTable {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: TableOptions::new(),
            types: ColumnTypes::new(),
            row_types: RowTypes::new(),
        }
    }
}

/// Persisted form of the store: `{table: {options, types, row_types}}`.
pub type TableConfigSnapshot = IndexMap<String, TableConfig>;

// ── Store ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct TableConfigStore {
    tables: TableConfigSnapshot,
    defaults: TableOptions,
    current: watch::Sender<Option<String>>,
}

impl Default for TableConfigStore {
    fn default() -> Self {
        Self::new(TableOptions::new())
    }
}

impl TableConfigStore {
    /// Create an empty store with the adapter's declared option defaults.
    pub fn new(defaults: TableOptions) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            tables: IndexMap::new(),
            defaults,
            current,
        }
    }

    pub fn defaults(&self) -> &TableOptions {
        &self.defaults
    }

    /// Replace the declared defaults (a new adapter kind was opened).
    pub fn set_defaults(&mut self, defaults: TableOptions) {
        self.defaults = defaults;
    }

    /// Fill in options and types that are not stored yet.
    ///
    /// Stored keys are never overwritten and tables missing from `discovered`
    /// are kept; use [`prune`](Self::prune) to drop them.
    pub fn merge_discovered(&mut self, discovered: &[DiscoveredTable]) {
        for table in discovered {
            let entry = self.tables.entry(table.name.clone()).or_default();
            for (key, value) in &table.options {
                entry.options.entry(key.clone()).or_insert_with(|| value.clone());
            }
            for (column, kind) in &table.types {
                entry.types.entry(*column).or_insert(*kind);
            }
            for (row, kind) in &table.row_types {
                entry.row_types.entry(*row).or_insert(*kind);
            }
        }
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Table names in discovery order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Effective options: declared defaults overlaid with stored values.
    pub fn get_options(&self, table: &str) -> TableOptions {
        let mut options = self.defaults.clone();
        if let Some(config) = self.tables.get(table) {
            for (key, value) in &config.options {
                options.insert(key.clone(), value.clone());
            }
        }
        options
    }

    /// Single option lookup with default fallback.
    pub fn get_option(&self, table: &str, key: &str) -> Option<JsonValue> {
        self.tables
            .get(table)
            .and_then(|c| c.options.get(key))
            .filter(|v| !v.is_null())
            .or_else(|| self.defaults.get(key))
            .cloned()
    }

    pub fn column_types(&self, table: &str) -> ColumnTypes {
        self.tables.get(table).map(|c| c.types.clone()).unwrap_or_default()
    }

    pub fn row_types(&self, table: &str) -> RowTypes {
        self.tables.get(table).map(|c| c.row_types.clone()).unwrap_or_default()
    }

    /// Shallow merge: only the listed keys change.
    pub fn set_options(&mut self, table: &str, partial: TableOptions) {
        let entry = self.tables.entry(table.to_string()).or_default();
        entry.options.extend(partial);
    }

    pub fn set_column_types(&mut self, table: &str, types: ColumnTypes) {
        let entry = self.tables.entry(table.to_string()).or_default();
        entry.types.extend(types);
    }

    pub fn set_row_types(&mut self, table: &str, types: RowTypes) {
        let entry = self.tables.entry(table.to_string()).or_default();
        entry.row_types.extend(types);
    }

    /// Drop every table not listed in `keep`. Returns the removed names.
    pub fn prune(&mut self, keep: &[String]) -> Vec<String> {
        let removed: Vec<String> = self
            .tables
            .keys()
            .filter(|name| !keep.contains(name))
            .cloned()
            .collect();
        self.tables.retain(|name, _| keep.contains(name));
        if let Some(current) = self.current_table() {
            if removed.contains(&current) {
                self.select(None);
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        self.tables.clear();
        self.select(None);
    }

    // ── Current table ───────────────────────────────────────────────

    pub fn current_table(&self) -> Option<String> {
        self.current.borrow().clone()
    }

    /// Move the current-table pointer and notify subscribers.
    pub fn select(&mut self, table: Option<String>) {
        self.current.send_replace(table);
    }

    /// Receive a notification whenever the current table changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.current.subscribe()
    }

    /// Re-notify subscribers without moving the pointer (options changed).
    pub fn touch_current(&self) {
        self.current.send_modify(|_| {});
    }

    // ── Persistence ─────────────────────────────────────────────────

    pub fn snapshot(&self) -> TableConfigSnapshot {
        self.tables.clone()
    }

    pub fn restore(&mut self, snapshot: TableConfigSnapshot) {
        self.tables = snapshot;
    }
}
