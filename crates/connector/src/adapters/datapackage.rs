//! Tabular data packages: a `datapackage.json` descriptor listing CSV
//! resources. Each resource is a table; dialect and schema seed the table's
//! options and column types.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use tabula_core::{ColumnTypes, DiscoveredTable, TableOptions, TabulaError, ValueType};

use super::delimited::{read_delimited, DelimitedOptions};
use crate::adapter::{not_connected, AdapterKind, RawTable, SourceAdapter};

const DESCRIPTOR: &str = "datapackage.json";

#[derive(Debug, Deserialize)]
struct Package {
    #[serde(default)]
    resources: Vec<Resource>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    name: Option<String>,
    path: ResourcePath,
    #[serde(default)]
    dialect: Option<Dialect>,
    #[serde(default)]
    schema: Option<Schema>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResourcePath {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
struct Dialect {
    delimiter: Option<String>,
    header: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct Schema {
    #[serde(default)]
    fields: Vec<Field>,
}

#[derive(Debug, Deserialize)]
struct Field {
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

fn field_type(kind: &str) -> Option<ValueType> {
    match kind {
        "number" | "integer" => Some(ValueType::Float),
        "datetime" | "date" => Some(ValueType::Datetime),
        "duration" => Some(ValueType::Duration),
        _ => None,
    }
}

/// A resource resolved against the package directory.
#[derive(Debug, Clone)]
struct Table {
    name: String,
    path: PathBuf,
    discovered: DiscoveredTable,
}

impl Table {
    fn resolve(base: &Path, resource: Resource) -> Option<Self> {
        let relative = match resource.path {
            ResourcePath::One(p) => p,
            // multi-part resources are read from their first part
            ResourcePath::Many(parts) => parts.into_iter().next()?,
        };
        let path = base.join(&relative);
        let name = resource.name.unwrap_or_else(|| {
            Path::new(&relative)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&relative)
                .to_string()
        });

        let mut discovered = DiscoveredTable::named(name.clone());
        let dialect = resource.dialect.unwrap_or_default();
        discovered
            .options
            .insert("has_header".into(), json!(dialect.header.unwrap_or(true)));
        discovered.options.insert(
            "delimiter".into(),
            json!(dialect.delimiter.unwrap_or_else(|| ",".to_string())),
        );
        if let Some(schema) = resource.schema {
            discovered.types = schema
                .fields
                .iter()
                .enumerate()
                .filter_map(|(i, f)| f.kind.as_deref().and_then(field_type).map(|t| (i, t)))
                .collect::<ColumnTypes>();
        }
        Some(Self {
            name,
            path,
            discovered,
        })
    }
}

pub struct TabularPackageAdapter {
    tables: Option<Vec<Table>>,
}

impl TabularPackageAdapter {
    pub fn new() -> Self {
        Self { tables: None }
    }

    fn tables(&self) -> Result<&[Table], TabulaError> {
        self.tables
            .as_deref()
            .ok_or_else(|| not_connected(self.kind()))
    }
}

impl Default for TabularPackageAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for TabularPackageAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::TabularPackage
    }

    async fn connect(&mut self, locator: &str) -> Result<(), TabulaError> {
        let mut descriptor = PathBuf::from(locator);
        if tokio::fs::metadata(&descriptor)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            descriptor.push(DESCRIPTOR);
        }
        let bytes = tokio::fs::read(&descriptor)
            .await
            .map_err(|e| TabulaError::Connection(format!("{}: {}", descriptor.display(), e)))?;
        let package: Package = serde_json::from_slice(&bytes).map_err(|e| {
            TabulaError::Connection(format!("{}: invalid package: {}", descriptor.display(), e))
        })?;
        let base = descriptor.parent().map(Path::to_path_buf).unwrap_or_default();
        let tables: Vec<Table> = package
            .resources
            .into_iter()
            .filter_map(|r| Table::resolve(&base, r))
            .collect();
        debug!(path = %descriptor.display(), resources = tables.len(), "package loaded");
        self.tables = Some(tables);
        Ok(())
    }

    async fn list_tables(&mut self) -> Result<Vec<DiscoveredTable>, TabulaError> {
        Ok(self.tables()?.iter().map(|t| t.discovered.clone()).collect())
    }

    async fn read_rows(
        &mut self,
        table: &str,
        options: &TableOptions,
        max_rows: Option<usize>,
    ) -> Result<RawTable, TabulaError> {
        let path = self
            .tables()?
            .iter()
            .find(|t| t.name == table)
            .map(|t| t.path.clone())
            .ok_or_else(|| TabulaError::Read(format!("no resource '{}'", table)))?;
        let parse = DelimitedOptions::from_options(options)?;
        tokio::task::spawn_blocking(move || read_delimited(&path, &parse, max_rows))
            .await
            .map_err(|e| TabulaError::Read(format!("reader task failed: {}", e)))?
    }

    async fn disconnect(&mut self) -> Result<(), TabulaError> {
        self.tables = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DESCRIPTOR),
            json!({
                "name": "model",
                "resources": [
                    {
                        "name": "units",
                        "path": "data/units.csv",
                        "schema": {"fields": [
                            {"name": "name", "type": "string"},
                            {"name": "capacity", "type": "number"}
                        ]}
                    },
                    {
                        "path": "nodes.csv",
                        "dialect": {"delimiter": ";", "header": false}
                    }
                ]
            })
            .to_string(),
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/units.csv"), "name,capacity\nu1,10\nu2,20\n").unwrap();
        std::fs::write(dir.path().join("nodes.csv"), "n1;north\nn2;south\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn resources_become_tables() {
        let dir = package_dir();
        let mut adapter = TabularPackageAdapter::new();
        adapter.connect(dir.path().to_str().unwrap()).await.unwrap();

        let tables = adapter.list_tables().await.unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["units", "nodes"]);
        assert_eq!(tables[0].types.get(&1), Some(&ValueType::Float));
        assert_eq!(tables[0].types.get(&0), None);
        assert_eq!(tables[1].options["delimiter"], json!(";"));
        assert_eq!(tables[1].options["has_header"], json!(false));

        let units = adapter
            .read_rows("units", &tables[0].options, None)
            .await
            .unwrap();
        assert_eq!(units.header, vec!["name", "capacity"]);
        assert_eq!(units.rows.len(), 2);

        let nodes = adapter
            .read_rows("nodes", &tables[1].options, Some(1))
            .await
            .unwrap();
        assert!(nodes.header.is_empty());
        assert_eq!(nodes.rows, vec![vec!["n1", "north"]]);
    }

    #[tokio::test]
    async fn descriptor_path_works_too() {
        let dir = package_dir();
        let mut adapter = TabularPackageAdapter::new();
        let descriptor = dir.path().join(DESCRIPTOR);
        adapter.connect(descriptor.to_str().unwrap()).await.unwrap();
        assert_eq!(adapter.list_tables().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_package_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut adapter = TabularPackageAdapter::new();
        let err = adapter.connect(dir.path().to_str().unwrap()).await.unwrap_err();
        assert_eq!(err.kind(), "connection");
    }
}
