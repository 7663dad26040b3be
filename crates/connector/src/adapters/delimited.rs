//! Delimited text files (CSV, TSV, ...). One file is one table named `csv`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use csv::ReaderBuilder;
use tracing::debug;

use tabula_core::{DiscoveredTable, TableOptions, TabulaError};

use super::{opt_bool, opt_byte, opt_str, opt_usize};
use crate::adapter::{not_connected, AdapterKind, RawTable, SourceAdapter};

pub const TABLE_NAME: &str = "csv";

/// Parse options shared with the tabular package adapter.
#[derive(Debug, Clone)]
pub(crate) struct DelimitedOptions {
    pub delimiter: u8,
    pub quote: u8,
    pub has_header: bool,
    pub skip: usize,
    pub encoding: Encoding,
}

impl DelimitedOptions {
    pub fn from_options(options: &TableOptions) -> Result<Self, TabulaError> {
        Ok(Self {
            delimiter: opt_byte(options, "delimiter", b',')?,
            quote: opt_byte(options, "quotechar", b'"')?,
            has_header: opt_bool(options, "has_header", true)?,
            skip: opt_usize(options, "skip", 0)?,
            encoding: opt_str(options, "encoding", "utf-8").parse()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Encoding {
    Utf8,
    Ascii,
    Latin1,
}

impl std::str::FromStr for Encoding {
    type Err = TabulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" | "utf-8-sig" => Ok(Encoding::Utf8),
            "ascii" | "us-ascii" => Ok(Encoding::Ascii),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(Encoding::Latin1),
            other => Err(TabulaError::Config(format!("unsupported encoding '{}'", other))),
        }
    }
}

fn decode(bytes: Vec<u8>, encoding: Encoding) -> Result<String, TabulaError> {
    match encoding {
        Encoding::Utf8 => {
            let text = String::from_utf8(bytes)
                .map_err(|e| TabulaError::Read(format!("invalid utf-8: {}", e)))?;
            Ok(text.trim_start_matches('\u{feff}').to_string())
        }
        Encoding::Ascii => {
            if let Some(pos) = bytes.iter().position(|b| !b.is_ascii()) {
                return Err(TabulaError::Read(format!("non-ascii byte at offset {}", pos)));
            }
            String::from_utf8(bytes).map_err(|e| TabulaError::Read(e.to_string()))
        }
        Encoding::Latin1 => Ok(bytes.into_iter().map(char::from).collect()),
    }
}

/// Read and parse a delimited file. Blocking; call from `spawn_blocking`.
pub(crate) fn read_delimited(
    path: &Path,
    options: &DelimitedOptions,
    max_rows: Option<usize>,
) -> Result<RawTable, TabulaError> {
    let bytes = std::fs::read(path)
        .map_err(|e| TabulaError::Read(format!("{}: {}", path.display(), e)))?;
    let text = decode(bytes, options.encoding)?;
    let mut reader = ReaderBuilder::new()
        .delimiter(options.delimiter)
        .quote(options.quote)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let records = reader.records().map(|record| {
        record
            .map(|r| r.iter().map(str::to_string).collect())
            .map_err(|e| TabulaError::Read(e.to_string()))
    });
    RawTable::from_records(records, options.skip, options.has_header, max_rows)
}

pub struct DelimitedTextAdapter {
    path: Option<PathBuf>,
}

impl DelimitedTextAdapter {
    pub fn new() -> Self {
        Self { path: None }
    }
}

impl Default for DelimitedTextAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for DelimitedTextAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::DelimitedText
    }

    async fn connect(&mut self, locator: &str) -> Result<(), TabulaError> {
        let path = PathBuf::from(locator);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| TabulaError::Connection(format!("{}: {}", locator, e)))?;
        if !meta.is_file() {
            return Err(TabulaError::Connection(format!("{} is not a file", locator)));
        }
        self.path = Some(path);
        Ok(())
    }

    async fn list_tables(&mut self) -> Result<Vec<DiscoveredTable>, TabulaError> {
        if self.path.is_none() {
            return Err(not_connected(self.kind()));
        }
        Ok(vec![DiscoveredTable::named(TABLE_NAME)])
    }

    async fn read_rows(
        &mut self,
        table: &str,
        options: &TableOptions,
        max_rows: Option<usize>,
    ) -> Result<RawTable, TabulaError> {
        let path = self.path.clone().ok_or_else(|| not_connected(self.kind()))?;
        if table != TABLE_NAME {
            return Err(TabulaError::Read(format!("no table '{}'", table)));
        }
        let parse = DelimitedOptions::from_options(options)?;
        debug!(path = %path.display(), delimiter = %(parse.delimiter as char), "reading delimited text");
        tokio::task::spawn_blocking(move || read_delimited(&path, &parse, max_rows))
            .await
            .map_err(|e| TabulaError::Read(format!("reader task failed: {}", e)))?
    }

    async fn disconnect(&mut self) -> Result<(), TabulaError> {
        self.path = None;
        Ok(())
    }
}
