//! Import specification document.
//!
//! ```json
//! {
//!   "source_type": "delimited_text",
//!   "settings": {},
//!   "table_mappings": {"csv": [ ...mapping items... ]},
//!   "table_config": {"csv": {"options": {"delimiter": ";"}, "types": {"1": "float"}}},
//!   "selected_tables": ["csv"]
//! }
//! ```
//!
//! The older flat layout with separate `table_options`, `table_types` and
//! `table_row_types` keys is accepted too and folded into `table_config`.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use tabula_connector::{AdapterKind, Settings, SourceDescriptor};
use tabula_core::{ColumnTypes, RowTypes, TableConfigSnapshot, TableOptions};
use tabula_mapping::MappingSpec;

use crate::error::ImportError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSpecification {
    pub source_type: AdapterKind,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub table_mappings: IndexMap<String, MappingSpec>,
    #[serde(default)]
    pub table_config: TableConfigSnapshot,
    #[serde(default)]
    pub selected_tables: Vec<String>,

    #[serde(default, skip_serializing)]
    table_options: IndexMap<String, TableOptions>,
    #[serde(default, skip_serializing)]
    table_types: IndexMap<String, ColumnTypes>,
    #[serde(default, skip_serializing)]
    table_row_types: IndexMap<String, RowTypes>,
}

impl ImportSpecification {
    pub fn new(source_type: AdapterKind) -> Self {
        Self {
            source_type,
            settings: Settings::new(),
            table_mappings: IndexMap::new(),
            table_config: TableConfigSnapshot::new(),
            selected_tables: Vec::new(),
            table_options: IndexMap::new(),
            table_types: IndexMap::new(),
            table_row_types: IndexMap::new(),
        }
    }

    /// Add a table with its mapping and select it.
    pub fn with_table(mut self, table: impl Into<String>, mapping: MappingSpec) -> Self {
        let table = table.into();
        self.table_mappings.insert(table.clone(), mapping);
        if !self.selected_tables.contains(&table) {
            self.selected_tables.push(table);
        }
        self
    }

    pub fn from_json(json: &str) -> Result<Self, ImportError> {
        let mut spec: Self = serde_json::from_str(json)?;
        spec.fold_legacy_keys();
        spec.validate()?;
        Ok(spec)
    }

    pub async fn load(path: &Path) -> Result<Self, ImportError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, ImportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn fold_legacy_keys(&mut self) {
        for (table, options) in std::mem::take(&mut self.table_options) {
            let entry = self.table_config.entry(table).or_default();
            for (key, value) in options {
                entry.options.entry(key).or_insert(value);
            }
        }
        for (table, types) in std::mem::take(&mut self.table_types) {
            let entry = self.table_config.entry(table).or_default();
            for (column, kind) in types {
                entry.types.entry(column).or_insert(kind);
            }
        }
        for (table, types) in std::mem::take(&mut self.table_row_types) {
            let entry = self.table_config.entry(table).or_default();
            for (row, kind) in types {
                entry.row_types.entry(row).or_insert(kind);
            }
        }
    }

    fn validate(&self) -> Result<(), ImportError> {
        let mut seen = Vec::with_capacity(self.selected_tables.len());
        for table in &self.selected_tables {
            if seen.contains(&table) {
                return Err(ImportError::Specification(format!(
                    "table '{}' is selected twice",
                    table
                )));
            }
            seen.push(table);
        }
        Ok(())
    }

    /// Selected tables that have a mapping, in selection order.
    pub fn selected_mappings(&self) -> Vec<(&str, &MappingSpec)> {
        self.selected_tables
            .iter()
            .filter_map(|table| match self.table_mappings.get(table) {
                Some(mapping) => Some((table.as_str(), mapping)),
                None => {
                    warn!(table = %table, "selected table has no mapping, skipping");
                    None
                }
            })
            .collect()
    }

    pub fn descriptor(&self, locator: impl Into<String>) -> SourceDescriptor {
        SourceDescriptor {
            kind: self.source_type,
            settings: self.settings.clone(),
            locator: locator.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tabula_core::ValueType;

    #[test]
    fn parses_full_document() {
        let doc = json!({
            "source_type": "delimited_text",
            "table_mappings": {"csv": [{
                "map_type": "ObjectClass",
                "name": {"map_type": "column", "reference": 0},
                "objects": {"map_type": "column", "reference": 1}
            }]},
            "table_config": {"csv": {"options": {"delimiter": ";"}, "types": {"1": "float"}}},
            "selected_tables": ["csv"]
        });
        let spec = ImportSpecification::from_json(&doc.to_string()).unwrap();
        assert_eq!(spec.source_type, AdapterKind::DelimitedText);
        assert_eq!(spec.table_mappings["csv"], MappingSpec::default_guess());
        assert_eq!(spec.table_config["csv"].options["delimiter"], json!(";"));
        assert_eq!(spec.table_config["csv"].types[&1], ValueType::Float);
        assert_eq!(spec.selected_mappings().len(), 1);
    }

    #[test]
    fn legacy_keys_fold_into_table_config() {
        let doc = json!({
            "source_type": "csv",
            "table_options": {"csv": {"has_header": false}},
            "table_types": {"csv": {"0": "string", "2": "datetime"}},
            "table_row_types": {"csv": {"0": "duration"}},
            "selected_tables": ["csv"]
        });
        let spec = ImportSpecification::from_json(&doc.to_string()).unwrap();
        let config = &spec.table_config["csv"];
        assert_eq!(config.options["has_header"], json!(false));
        assert_eq!(config.types[&2], ValueType::Datetime);
        assert_eq!(config.row_types[&0], ValueType::Duration);

        let out: serde_json::Value = serde_json::from_str(&spec.to_json().unwrap()).unwrap();
        assert!(out.get("table_options").is_none());
    }

    #[test]
    fn selected_without_mapping_is_skipped() {
        let mut spec = ImportSpecification::new(AdapterKind::DelimitedText)
            .with_table("a", MappingSpec::default_guess());
        spec.selected_tables.push("b".into());
        let tables: Vec<&str> = spec.selected_mappings().into_iter().map(|(t, _)| t).collect();
        assert_eq!(tables, vec!["a"]);
    }

    #[test]
    fn rejects_bad_documents() {
        assert!(ImportSpecification::from_json("{}").is_err());
        assert!(ImportSpecification::from_json(r#"{"source_type": "gdx"}"#).is_err());
        let twice = json!({"source_type": "sql", "selected_tables": ["t", "t"]});
        assert!(matches!(
            ImportSpecification::from_json(&twice.to_string()),
            Err(ImportError::Specification(_))
        ));
    }
}
