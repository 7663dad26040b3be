//! Spreadsheet workbooks (xlsx, xls, xlsb, ods). Each sheet is a table.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use calamine::{open_workbook_auto, Data, DataType, Reader};
use tracing::debug;

use tabula_core::{DiscoveredTable, TableOptions, TabulaError};

use super::{opt_bool, opt_usize};
use crate::adapter::{not_connected, AdapterKind, RawTable, SourceAdapter};

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(_) => cell
            .as_datetime()
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
            .unwrap_or_default(),
        Data::Error(e) => e.to_string(),
    }
}

fn sheet_names(path: &Path) -> Result<Vec<String>, TabulaError> {
    let workbook = open_workbook_auto(path)
        .map_err(|e| TabulaError::Connection(format!("{}: {}", path.display(), e)))?;
    Ok(workbook.sheet_names())
}

/// Cells of one sheet as text, positioned from A1 so column indices match
/// what the user sees.
fn read_sheet(
    path: &Path,
    sheet: &str,
    skip_rows: usize,
    skip_columns: usize,
    has_header: bool,
    max_rows: Option<usize>,
) -> Result<RawTable, TabulaError> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| TabulaError::Read(format!("{}: {}", path.display(), e)))?;
    let range = workbook
        .worksheet_range(sheet)
        .map_err(|e| TabulaError::Read(format!("sheet '{}': {}", sheet, e)))?;

    let (first_row, first_col) = range
        .start()
        .map(|(r, c)| (r as usize, c as usize))
        .unwrap_or((0, 0));
    let leading_rows = std::iter::repeat_with(Vec::new).take(first_row);
    let rows = range.rows().map(|cells| {
        std::iter::repeat(String::new())
            .take(first_col)
            .chain(cells.iter().map(cell_text))
            .collect::<Vec<_>>()
    });

    let records = leading_rows
        .chain(rows)
        .map(|row| Ok(row.into_iter().skip(skip_columns).collect()));
    RawTable::from_records(records, skip_rows, has_header, max_rows)
}

pub struct SpreadsheetAdapter {
    path: Option<PathBuf>,
    sheets: Vec<String>,
}

impl SpreadsheetAdapter {
    pub fn new() -> Self {
        Self {
            path: None,
            sheets: Vec::new(),
        }
    }
}

impl Default for SpreadsheetAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for SpreadsheetAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Spreadsheet
    }

    async fn connect(&mut self, locator: &str) -> Result<(), TabulaError> {
        let path = PathBuf::from(locator);
        let probe = path.clone();
        let sheets = tokio::task::spawn_blocking(move || sheet_names(&probe))
            .await
            .map_err(|e| TabulaError::Connection(format!("workbook task failed: {}", e)))??;
        debug!(path = %path.display(), sheets = sheets.len(), "workbook opened");
        self.path = Some(path);
        self.sheets = sheets;
        Ok(())
    }

    async fn list_tables(&mut self) -> Result<Vec<DiscoveredTable>, TabulaError> {
        if self.path.is_none() {
            return Err(not_connected(self.kind()));
        }
        Ok(self.sheets.iter().map(DiscoveredTable::named).collect())
    }

    async fn read_rows(
        &mut self,
        table: &str,
        options: &TableOptions,
        max_rows: Option<usize>,
    ) -> Result<RawTable, TabulaError> {
        let path = self.path.clone().ok_or_else(|| not_connected(self.kind()))?;
        if !self.sheets.iter().any(|s| s == table) {
            return Err(TabulaError::Read(format!("no sheet '{}'", table)));
        }
        let has_header = opt_bool(options, "has_header", true)?;
        let skip_rows = opt_usize(options, "skip_rows", 0)?;
        let skip_columns = opt_usize(options, "skip_columns", 0)?;
        let sheet = table.to_string();
        tokio::task::spawn_blocking(move || {
            read_sheet(&path, &sheet, skip_rows, skip_columns, has_header, max_rows)
        })
        .await
        .map_err(|e| TabulaError::Read(format!("workbook task failed: {}", e)))?
    }

    async fn disconnect(&mut self) -> Result<(), TabulaError> {
        self.path = None;
        self.sheets.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
<row r="2"><c r="B2" t="inlineStr"><is><t>note</t></is></c></row>
<row r="3"><c r="B3" t="inlineStr"><is><t>name</t></is></c><c r="C3" t="inlineStr"><is><t>capacity</t></is></c></row>
<row r="4"><c r="B4" t="inlineStr"><is><t>u1</t></is></c><c r="C4"><v>10</v></c></row>
<row r="5"><c r="B5" t="inlineStr"><is><t>u2</t></is></c><c r="C5"><v>2.5</v></c></row>
</sheetData></worksheet>"#;

    /// Minimal workbook with one sheet, "Units", whose cells start at B2.
    fn workbook() -> tempfile::NamedTempFile {
        let parts = [
            (
                "[Content_Types].xml",
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
<Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>
</Types>"#,
            ),
            (
                "_rels/.rels",
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
</Relationships>"#,
            ),
            (
                "xl/workbook.xml",
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets><sheet name="Units" sheetId="1" r:id="rId1"/></sheets>
</workbook>"#,
            ),
            (
                "xl/_rels/workbook.xml.rels",
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
</Relationships>"#,
            ),
            ("xl/worksheets/sheet1.xml", SHEET),
        ];

        let file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        let mut writer = zip::ZipWriter::new(file.reopen().unwrap());
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, body) in parts {
            writer.start_file(name, options).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        file
    }

    fn options(pairs: &[(&str, serde_json::Value)]) -> TableOptions {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    async fn connected(file: &tempfile::NamedTempFile) -> SpreadsheetAdapter {
        let mut adapter = SpreadsheetAdapter::new();
        adapter.connect(file.path().to_str().unwrap()).await.unwrap();
        adapter
    }

    #[tokio::test]
    async fn cells_line_up_from_a1() {
        let file = workbook();
        let mut adapter = connected(&file).await;
        assert_eq!(adapter.list_tables().await.unwrap(), vec![DiscoveredTable::named("Units")]);

        let table = adapter
            .read_rows("Units", &options(&[("skip_rows", json!(2))]), None)
            .await
            .unwrap();
        assert_eq!(table.header, vec!["", "name", "capacity"]);
        assert_eq!(table.rows, vec![vec!["", "u1", "10"], vec!["", "u2", "2.5"]]);

        // first row is the empty row 1, the title sits in B2
        let raw = adapter
            .read_rows("Units", &options(&[("has_header", json!(false))]), Some(2))
            .await
            .unwrap();
        assert!(raw.header.is_empty());
        assert!(raw.rows[0].is_empty());
        assert_eq!(raw.rows[1], vec!["", "note", ""]);
    }

    #[tokio::test]
    async fn skips_and_bounded_reads() {
        let file = workbook();
        let mut adapter = connected(&file).await;
        let skipped = options(&[("skip_rows", json!(2)), ("skip_columns", json!(1))]);

        let table = adapter.read_rows("Units", &skipped, Some(0)).await.unwrap();
        assert_eq!(table.header, vec!["name", "capacity"]);
        assert!(table.rows.is_empty());

        let headerless = options(&[
            ("skip_rows", json!(3)),
            ("skip_columns", json!(1)),
            ("has_header", json!(false)),
        ]);
        let table = adapter.read_rows("Units", &headerless, Some(1)).await.unwrap();
        assert!(table.header.is_empty());
        assert_eq!(table.rows, vec![vec!["u1", "10"]]);

        let missing = adapter.read_rows("Nodes", &skipped, None).await;
        assert!(matches!(missing, Err(TabulaError::Read(_))));
        adapter.disconnect().await.unwrap();
    }

    #[test]
    fn cell_rendering() {
        assert_eq!(cell_text(&Data::Empty), "");
        assert_eq!(cell_text(&Data::Float(2.5)), "2.5");
        assert_eq!(cell_text(&Data::Float(3.0)), "3");
        assert_eq!(cell_text(&Data::Int(7)), "7");
        assert_eq!(cell_text(&Data::Bool(true)), "true");
        assert_eq!(cell_text(&Data::String("x".into())), "x");
    }

    #[tokio::test]
    async fn unreadable_workbook_fails_to_connect() {
        let f = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        std::fs::write(f.path(), b"not a zip archive").unwrap();
        let mut adapter = SpreadsheetAdapter::new();
        let err = adapter.connect(f.path().to_str().unwrap()).await.unwrap_err();
        assert_eq!(err.kind(), "connection");
        assert!(adapter.list_tables().await.is_err());
    }
}
