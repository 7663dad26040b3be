//! SQL databases through the sqlx `Any` driver (SQLite and PostgreSQL).
//!
//! Every table and view is a table, sorted by name. Cells are cast to text
//! in the query so any column type reads the same way.

use async_trait::async_trait;
use sqlx::any::{install_default_drivers, AnyPoolOptions, AnyRow};
use sqlx::AnyPool;
use sqlx::Row;
use tracing::{debug, info};

use tabula_core::{ColumnTypes, DiscoveredTable, TableOptions, TabulaError, ValueType};

use crate::adapter::{not_connected, AdapterKind, RawTable, Settings, SourceAdapter};

const DEFAULT_MAX_CONNECTIONS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Sqlite,
    Postgres,
}

impl Backend {
    fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split(':').next()?.to_ascii_lowercase();
        match scheme.as_str() {
            "sqlite" => Some(Backend::Sqlite),
            "postgres" | "postgresql" => Some(Backend::Postgres),
            _ => None,
        }
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Map a declared column type to a value type; unknown types stay strings.
fn declared_type(declared: &str) -> Option<ValueType> {
    let declared = declared.to_ascii_lowercase();
    if declared.contains("interval") {
        Some(ValueType::Duration)
    } else if declared.contains("date") || declared.contains("timestamp") {
        Some(ValueType::Datetime)
    } else if ["int", "real", "floa", "doub", "numeric", "decimal"]
        .iter()
        .any(|t| declared.contains(t))
    {
        Some(ValueType::Float)
    } else {
        None
    }
}

fn query_error(e: sqlx::Error) -> TabulaError {
    TabulaError::Read(e.to_string())
}

fn text(row: &AnyRow, index: usize) -> Result<String, TabulaError> {
    row.try_get::<Option<String>, _>(index)
        .map(Option::unwrap_or_default)
        .map_err(query_error)
}

struct Connection {
    pool: AnyPool,
    backend: Backend,
}

pub struct SqlAdapter {
    max_connections: u32,
    schema: String,
    connection: Option<Connection>,
}

impl SqlAdapter {
    pub fn new(max_connections: u32) -> Self {
        Self {
            max_connections,
            schema: "public".to_string(),
            connection: None,
        }
    }

    /// Reads `max_connections` and `schema` (PostgreSQL only) from the settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, TabulaError> {
        let max_connections = match settings.get("max_connections") {
            None => DEFAULT_MAX_CONNECTIONS,
            Some(v) => v.parse().map_err(|_| {
                TabulaError::Config(format!("max_connections must be a positive integer, got '{}'", v))
            })?,
        };
        let mut adapter = Self::new(max_connections.max(1));
        if let Some(schema) = settings.get("schema") {
            adapter.schema = schema.clone();
        }
        Ok(adapter)
    }

    fn connection(&self) -> Result<&Connection, TabulaError> {
        self.connection
            .as_ref()
            .ok_or_else(|| not_connected(AdapterKind::Sql))
    }

    /// (column name, declared type) in ordinal order.
    async fn columns(&self, table: &str) -> Result<Vec<(String, String)>, TabulaError> {
        let conn = self.connection()?;
        let sql = match conn.backend {
            Backend::Sqlite => format!(
                "SELECT name, CAST(type AS TEXT) FROM pragma_table_info({}) ORDER BY cid",
                quote_literal(table)
            ),
            Backend::Postgres => format!(
                "SELECT CAST(column_name AS TEXT), CAST(data_type AS TEXT) \
                 FROM information_schema.columns \
                 WHERE table_schema = {} AND table_name = {} ORDER BY ordinal_position",
                quote_literal(&self.schema),
                quote_literal(table)
            ),
        };
        let rows = sqlx::query(&sql)
            .fetch_all(&conn.pool)
            .await
            .map_err(query_error)?;
        rows.iter()
            .map(|row| Ok((text(row, 0)?, text(row, 1)?)))
            .collect()
    }

    /// Stable row order for reads. SQLite tables keep insertion order through
    /// `rowid`; views, `WITHOUT ROWID` tables and Postgres relations are
    /// ordered by every selected column.
    async fn order_by(&self, table: &str, width: usize) -> Result<String, TabulaError> {
        let conn = self.connection()?;
        if conn.backend == Backend::Sqlite {
            let sql = format!(
                "SELECT type, COALESCE(sql, '') FROM sqlite_master WHERE name = {}",
                quote_literal(table)
            );
            let row = sqlx::query(&sql)
                .fetch_optional(&conn.pool)
                .await
                .map_err(query_error)?;
            if let Some(row) = row {
                let kind = text(&row, 0)?;
                let definition = text(&row, 1)?.to_ascii_uppercase();
                if kind == "table" && !definition.contains("WITHOUT ROWID") {
                    return Ok("ORDER BY rowid".to_string());
                }
            }
        }
        Ok(ordinal_order(width))
    }
}

fn ordinal_order(width: usize) -> String {
    let ordinals: Vec<String> = (1..=width).map(|i| i.to_string()).collect();
    format!("ORDER BY {}", ordinals.join(", "))
}

#[async_trait]
impl SourceAdapter for SqlAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Sql
    }

    async fn connect(&mut self, locator: &str) -> Result<(), TabulaError> {
        let backend = Backend::from_url(locator).ok_or_else(|| {
            TabulaError::Connection(format!("unsupported database URL '{}'", locator))
        })?;
        install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(locator)
            .await
            .map_err(|e| TabulaError::Connection(e.to_string()))?;
        info!(backend = ?backend, max_connections = self.max_connections, "database connected");
        self.connection = Some(Connection { pool, backend });
        Ok(())
    }

    async fn list_tables(&mut self) -> Result<Vec<DiscoveredTable>, TabulaError> {
        let conn = self.connection()?;
        let sql = match conn.backend {
            Backend::Sqlite => "SELECT name FROM sqlite_master \
                 WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name"
                .to_string(),
            Backend::Postgres => format!(
                "SELECT CAST(table_name AS TEXT) FROM information_schema.tables \
                 WHERE table_schema = {} ORDER BY table_name",
                quote_literal(&self.schema)
            ),
        };
        let names = sqlx::query(&sql)
            .fetch_all(&conn.pool)
            .await
            .map_err(query_error)?
            .iter()
            .map(|row| text(row, 0))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let mut table = DiscoveredTable::named(name.clone());
            table.types = self
                .columns(&name)
                .await?
                .iter()
                .enumerate()
                .filter_map(|(i, (_, declared))| declared_type(declared).map(|t| (i, t)))
                .collect::<ColumnTypes>();
            tables.push(table);
        }
        debug!(tables = tables.len(), "tables listed");
        Ok(tables)
    }

    async fn read_rows(
        &mut self,
        table: &str,
        _options: &TableOptions,
        max_rows: Option<usize>,
    ) -> Result<RawTable, TabulaError> {
        let columns = self.columns(table).await?;
        if columns.is_empty() {
            return Err(TabulaError::Read(format!("no table '{}'", table)));
        }
        let conn = self.connection()?;
        let select = columns
            .iter()
            .map(|(name, _)| format!("CAST({} AS TEXT)", quote_ident(name)))
            .collect::<Vec<_>>()
            .join(", ");
        let qualified = match conn.backend {
            Backend::Sqlite => quote_ident(table),
            Backend::Postgres => format!("{}.{}", quote_ident(&self.schema), quote_ident(table)),
        };
        let order = self.order_by(table, columns.len()).await?;
        let mut sql = format!("SELECT {} FROM {} {}", select, qualified, order);
        if let Some(limit) = max_rows {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let rows = sqlx::query(&sql)
            .fetch_all(&conn.pool)
            .await
            .map_err(query_error)?
            .iter()
            .map(|row| (0..columns.len()).map(|i| text(row, i)).collect())
            .collect::<Result<Vec<Vec<String>>, _>>()?;
        Ok(RawTable {
            header: columns.into_iter().map(|(name, _)| name).collect(),
            rows,
        })
    }

    async fn disconnect(&mut self) -> Result<(), TabulaError> {
        if let Some(conn) = self.connection.take() {
            conn.pool.close().await;
        }
        Ok(())
    }
}
