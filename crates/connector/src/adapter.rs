//! Source adapter contract and the adapter registry.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;

use tabula_core::{DiscoveredTable, TableOptions, TabulaError};
use tabula_mapping::MappingSpec;

use crate::adapters::{
    DelimitedTextAdapter, SpreadsheetAdapter, SqlAdapter, StructuredDocumentAdapter,
    TabularPackageAdapter,
};

/// Opaque connection settings (credentials, pool sizes, ...).
pub type Settings = IndexMap<String, String>;

/// Raw rows of one table plus its header.
///
/// An empty header means the table has none; rows are then addressed by
/// column index only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Apply the common read options to a stream of records: drop `skip`
    /// leading records, take the next one as header when `has_header`, then
    /// keep at most `max_rows` records.
    pub fn from_records<I>(
        records: I,
        skip: usize,
        has_header: bool,
        max_rows: Option<usize>,
    ) -> Result<Self, TabulaError>
    where
        I: IntoIterator<Item = Result<Vec<String>, TabulaError>>,
    {
        let mut records = records.into_iter().skip(skip);
        let header = if has_header {
            records.next().transpose()?.unwrap_or_default()
        } else {
            Vec::new()
        };
        let limit = max_rows.unwrap_or(usize::MAX);
        let rows = records.take(limit).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { header, rows })
    }
}

// ── Adapter trait ────────────────────────────────────────────────────

/// One kind of tabular source.
///
/// Instances are owned by a single worker task and only ever see one call at
/// a time.
#[async_trait]
pub trait SourceAdapter: Send {
    fn kind(&self) -> AdapterKind;

    /// Open the source. Fails with a connection error when it is unreachable,
    /// unsupported or malformed.
    async fn connect(&mut self, locator: &str) -> Result<(), TabulaError>;

    /// Tables in source order, with any options and types discovered on the way.
    async fn list_tables(&mut self) -> Result<Vec<DiscoveredTable>, TabulaError>;

    /// Read a table. `None` reads everything, `Some(n)` stops after `n` data rows.
    async fn read_rows(
        &mut self,
        table: &str,
        options: &TableOptions,
        max_rows: Option<usize>,
    ) -> Result<RawTable, TabulaError>;

    /// First column is the class, second the object.
    fn default_mapping(&self) -> MappingSpec {
        MappingSpec::default_guess()
    }

    /// Release the source. Safe to call more than once.
    async fn disconnect(&mut self) -> Result<(), TabulaError>;
}

pub(crate) fn not_connected(kind: AdapterKind) -> TabulaError {
    TabulaError::Read(format!("{} source is not connected", kind))
}

// ── Kinds ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    #[serde(alias = "csv")]
    DelimitedText,
    #[serde(alias = "excel")]
    Spreadsheet,
    #[serde(alias = "json")]
    StructuredDocument,
    #[serde(alias = "datapackage")]
    TabularPackage,
    Sql,
}

impl AdapterKind {
    pub const ALL: [AdapterKind; 5] = [
        AdapterKind::DelimitedText,
        AdapterKind::Spreadsheet,
        AdapterKind::StructuredDocument,
        AdapterKind::TabularPackage,
        AdapterKind::Sql,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::DelimitedText => "delimited_text",
            AdapterKind::Spreadsheet => "spreadsheet",
            AdapterKind::StructuredDocument => "structured_document",
            AdapterKind::TabularPackage => "tabular_package",
            AdapterKind::Sql => "sql",
        }
    }

    /// Build a fresh, unconnected adapter of this kind.
    pub fn create(&self, settings: &Settings) -> Result<Box<dyn SourceAdapter>, TabulaError> {
        Ok(match self {
            AdapterKind::DelimitedText => Box::new(DelimitedTextAdapter::new()),
            AdapterKind::Spreadsheet => Box::new(SpreadsheetAdapter::new()),
            AdapterKind::StructuredDocument => Box::new(StructuredDocumentAdapter::new()),
            AdapterKind::TabularPackage => Box::new(TabularPackageAdapter::new()),
            AdapterKind::Sql => Box::new(SqlAdapter::from_settings(settings)?),
        })
    }

    /// Declared option defaults, used when a table has no stored value.
    pub fn option_defaults(&self) -> TableOptions {
        let pairs = match self {
            AdapterKind::DelimitedText => vec![
                ("delimiter", json!(",")),
                ("quotechar", json!("\"")),
                ("has_header", json!(true)),
                ("skip", json!(0)),
                ("encoding", json!("utf-8")),
            ],
            AdapterKind::Spreadsheet => vec![
                ("has_header", json!(true)),
                ("skip_rows", json!(0)),
                ("skip_columns", json!(0)),
            ],
            AdapterKind::StructuredDocument => vec![("has_header", json!(true))],
            AdapterKind::TabularPackage => {
                vec![("has_header", json!(true)), ("delimiter", json!(","))]
            }
            AdapterKind::Sql => vec![],
        };
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    /// Guess the kind from a locator.
    pub fn from_path(locator: &str) -> Option<Self> {
        if locator.contains("://") {
            return Some(AdapterKind::Sql);
        }
        let path = Path::new(locator);
        if path.is_dir() {
            return Some(AdapterKind::TabularPackage);
        }
        if path.file_name().and_then(|n| n.to_str()) == Some("datapackage.json") {
            return Some(AdapterKind::TabularPackage);
        }
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "csv" | "tsv" | "txt" | "dat" => Some(AdapterKind::DelimitedText),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Some(AdapterKind::Spreadsheet),
            "json" => Some(AdapterKind::StructuredDocument),
            "sqlite" | "db" => Some(AdapterKind::Sql),
            _ => None,
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdapterKind {
    type Err = TabulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "delimited_text" | "csv" => Ok(AdapterKind::DelimitedText),
            "spreadsheet" | "excel" => Ok(AdapterKind::Spreadsheet),
            "structured_document" | "json" => Ok(AdapterKind::StructuredDocument),
            "tabular_package" | "datapackage" => Ok(AdapterKind::TabularPackage),
            "sql" => Ok(AdapterKind::Sql),
            other => Err(TabulaError::Config(format!("unknown source type '{}'", other))),
        }
    }
}

// ── Descriptor ───────────────────────────────────────────────────────

/// What to open: kind, settings and locator. Immutable once a session opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: AdapterKind,
    #[serde(default)]
    pub settings: Settings,
    pub locator: String,
}

impl SourceDescriptor {
    pub fn new(kind: AdapterKind, locator: impl Into<String>) -> Self {
        Self {
            kind,
            settings: Settings::new(),
            locator: locator.into(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(data: &[&[&str]]) -> Vec<Result<Vec<String>, TabulaError>> {
        data.iter()
            .map(|r| Ok(r.iter().map(|c| c.to_string()).collect()))
            .collect()
    }

    #[test]
    fn from_records_applies_skip_header_and_limit() {
        let data = records(&[&["title"], &["a", "b"], &["1", "2"], &["3", "4"]]);
        let table = RawTable::from_records(data, 1, true, Some(1)).unwrap();
        assert_eq!(table.header, vec!["a", "b"]);
        assert_eq!(table.rows, vec![vec!["1".to_string(), "2".to_string()]]);
    }

    #[test]
    fn zero_rows_keeps_header() {
        let data = records(&[&["a", "b"], &["1", "2"]]);
        let table = RawTable::from_records(data, 0, true, Some(0)).unwrap();
        assert_eq!(table.header, vec!["a", "b"]);
        assert!(table.rows.is_empty());
    }

    #[test]
    fn without_header_every_record_is_data() {
        let data = records(&[&["a", "b"], &["1", "2"]]);
        let table = RawTable::from_records(data, 0, false, None).unwrap();
        assert!(table.header.is_empty());
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn kind_names_and_guessing() {
        for kind in AdapterKind::ALL {
            assert_eq!(kind.as_str().parse::<AdapterKind>().unwrap(), kind);
        }
        assert_eq!("excel".parse::<AdapterKind>().unwrap(), AdapterKind::Spreadsheet);
        assert!("gdx".parse::<AdapterKind>().is_err());

        assert_eq!(AdapterKind::from_path("units.csv"), Some(AdapterKind::DelimitedText));
        assert_eq!(AdapterKind::from_path("model.XLSX"), Some(AdapterKind::Spreadsheet));
        assert_eq!(AdapterKind::from_path("data.json"), Some(AdapterKind::StructuredDocument));
        assert_eq!(
            AdapterKind::from_path("pkg/datapackage.json"),
            Some(AdapterKind::TabularPackage)
        );
        assert_eq!(AdapterKind::from_path("sqlite:///tmp/x.db"), Some(AdapterKind::Sql));
        assert_eq!(AdapterKind::from_path("notes.md"), None);
    }

    #[test]
    fn kind_serde_accepts_short_aliases() {
        let kind: AdapterKind = serde_json::from_str("\"csv\"").unwrap();
        assert_eq!(kind, AdapterKind::DelimitedText);
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"delimited_text\"");
    }

    #[test]
    fn defaults_per_kind() {
        let csv = AdapterKind::DelimitedText.option_defaults();
        assert_eq!(csv["delimiter"], json!(","));
        assert_eq!(csv["has_header"], json!(true));
        assert!(AdapterKind::Sql.option_defaults().is_empty());
    }
}
