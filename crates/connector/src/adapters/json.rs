//! Structured JSON documents.
//!
//! A root object exposes each array-valued key as a table; a root array is a
//! single table named after the file stem. Array elements may be objects
//! (their keys name the columns), arrays (positional cells) or scalars (one
//! column).

use std::path::Path;

use async_trait::async_trait;
use indexmap::IndexSet;
use serde_json::Value as JsonValue;
use tracing::debug;

use tabula_core::{DiscoveredTable, TableOptions, TabulaError};

use super::opt_bool;
use crate::adapter::{not_connected, AdapterKind, RawTable, SourceAdapter};

fn cell_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        nested => nested.to_string(),
    }
}

fn table_rows(
    items: &[JsonValue],
    has_header: bool,
    max_rows: Option<usize>,
) -> Result<RawTable, TabulaError> {
    let objects = !items.is_empty() && items.iter().all(JsonValue::is_object);
    if !objects {
        let records = items.iter().map(|item| {
            Ok(match item {
                JsonValue::Array(cells) => cells.iter().map(cell_text).collect(),
                scalar => vec![cell_text(scalar)],
            })
        });
        return RawTable::from_records(records, 0, has_header, max_rows);
    }

    // object rows: columns are the union of keys in first-seen order; the
    // keys are the header only when `has_header` is set
    let mut keys: IndexSet<&str> = IndexSet::new();
    for item in items {
        if let JsonValue::Object(map) = item {
            keys.extend(map.keys().map(String::as_str));
        }
    }
    let limit = max_rows.unwrap_or(usize::MAX);
    let rows = items
        .iter()
        .take(limit)
        .map(|item| {
            keys.iter()
                .map(|k| item.get(*k).map(cell_text).unwrap_or_default())
                .collect()
        })
        .collect();
    let header = if has_header {
        keys.iter().map(|k| k.to_string()).collect()
    } else {
        Vec::new()
    };
    Ok(RawTable { header, rows })
}

pub struct StructuredDocumentAdapter {
    document: Option<JsonValue>,
    stem: String,
}

impl StructuredDocumentAdapter {
    pub fn new() -> Self {
        Self {
            document: None,
            stem: String::new(),
        }
    }

    fn tables(&self) -> Result<Vec<(String, &[JsonValue])>, TabulaError> {
        match &self.document {
            None => Err(not_connected(self.kind())),
            Some(JsonValue::Array(items)) => Ok(vec![(self.stem.clone(), items.as_slice())]),
            Some(JsonValue::Object(map)) => Ok(map
                .iter()
                .filter_map(|(k, v)| v.as_array().map(|a| (k.clone(), a.as_slice())))
                .collect()),
            Some(_) => Ok(Vec::new()),
        }
    }
}

impl Default for StructuredDocumentAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for StructuredDocumentAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::StructuredDocument
    }

    async fn connect(&mut self, locator: &str) -> Result<(), TabulaError> {
        let bytes = tokio::fs::read(locator)
            .await
            .map_err(|e| TabulaError::Connection(format!("{}: {}", locator, e)))?;
        let document: JsonValue = serde_json::from_slice(&bytes)
            .map_err(|e| TabulaError::Connection(format!("{}: malformed JSON: {}", locator, e)))?;
        self.stem = Path::new(locator)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("data")
            .to_string();
        self.document = Some(document);
        debug!(locator, "document loaded");
        Ok(())
    }

    async fn list_tables(&mut self) -> Result<Vec<DiscoveredTable>, TabulaError> {
        Ok(self
            .tables()?
            .into_iter()
            .map(|(name, _)| DiscoveredTable::named(name))
            .collect())
    }

    async fn read_rows(
        &mut self,
        table: &str,
        options: &TableOptions,
        max_rows: Option<usize>,
    ) -> Result<RawTable, TabulaError> {
        let has_header = opt_bool(options, "has_header", true)?;
        let tables = self.tables()?;
        let (_, items) = tables
            .into_iter()
            .find(|(name, _)| name == table)
            .ok_or_else(|| TabulaError::Read(format!("no table '{}'", table)))?;
        table_rows(items, has_header, max_rows)
    }

    async fn disconnect(&mut self) -> Result<(), TabulaError> {
        self.document = None;
        Ok(())
    }
}
