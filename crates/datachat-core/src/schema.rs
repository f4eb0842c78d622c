//! Schema introspection.
//!
//! Produces a normalized, per-request snapshot of the queryable schema:
//! table names with column names and declared/inferred types. The snapshot
//! is read-only and owned by the compiling stage.

use crate::error::{DataChatError, Result};
use crate::frame::Frame;
use crate::value::ColumnType;
use rusqlite::Connection;
use serde::Serialize;

/// Caps mirror the source behavior: very wide schemas are truncated rather
/// than rejected.
const MAX_TABLES: usize = 50;
const MAX_COLUMNS: usize = 80;

#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub ty: ColumnType,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn numeric_columns(&self) -> Vec<&ColumnInfo> {
        self.columns.iter().filter(|c| c.ty.is_numeric()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

/// Read-only schema snapshot for one request.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableSchema>,
}

impl SchemaSnapshot {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Compact one-line-per-table rendering used in LLM prompts.
    pub fn describe(&self) -> String {
        self.tables
            .iter()
            .map(|t| {
                let cols: Vec<String> = t
                    .columns
                    .iter()
                    .map(|c| format!("{} ({})", c.name, c.ty))
                    .collect();
                format!("{}: [{}]", t.name, cols.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Introspect a SQLite connection into a snapshot.
///
/// Declared column types are mapped through SQLite type affinity; anything
/// unrecognized is treated as text.
pub fn introspect_sqlite(conn: &Connection) -> Result<SchemaSnapshot> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
        .map_err(|e| DataChatError::SchemaUnavailable(format!("cannot list tables: {}", e)))?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| DataChatError::SchemaUnavailable(format!("cannot list tables: {}", e)))?
        .filter_map(|r| r.ok())
        .take(MAX_TABLES)
        .collect();

    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let mut info = conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(&name)))
            .map_err(|e| DataChatError::SchemaUnavailable(format!("cannot describe {}: {}", name, e)))?;
        let columns: Vec<ColumnInfo> = info
            .query_map([], |row| {
                let col: String = row.get(1)?;
                let decl: String = row.get(2)?;
                Ok(ColumnInfo {
                    name: col,
                    ty: affinity(&decl),
                })
            })
            .map_err(|e| DataChatError::SchemaUnavailable(format!("cannot describe {}: {}", name, e)))?
            .filter_map(|r| r.ok())
            .take(MAX_COLUMNS)
            .collect();
        tables.push(TableSchema { name, columns });
    }

    Ok(SchemaSnapshot { tables })
}

/// Snapshot for an in-memory tabular dataset.
pub fn from_frame(frame: &Frame) -> SchemaSnapshot {
    let columns = frame
        .columns
        .iter()
        .zip(frame.types.iter())
        .take(MAX_COLUMNS)
        .map(|(name, ty)| ColumnInfo {
            name: name.clone(),
            ty: *ty,
        })
        .collect();
    SchemaSnapshot {
        tables: vec![TableSchema {
            name: frame.name.clone(),
            columns,
        }],
    }
}

/// SQLite declared type -> affinity, per the SQLite affinity rules.
fn affinity(declared: &str) -> ColumnType {
    let decl = declared.to_uppercase();
    if decl.contains("INT") {
        ColumnType::Integer
    } else if decl.contains("REAL") || decl.contains("FLOA") || decl.contains("DOUB") || decl.contains("NUMERIC") || decl.contains("DECIMAL") {
        ColumnType::Float
    } else if decl.contains("BOOL") {
        ColumnType::Boolean
    } else {
        ColumnType::Text
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
