//! Audit trail for answered and failed requests.
//!
//! Write-only from the engine's perspective: records are appended per
//! request and never read back during compilation. The SQLite-backed sink
//! is the production store; the in-memory sink backs tests.

use crate::engine::CodeKind;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

/// One audit record per completed or failed request.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub question: String,
    /// Redacted datasource descriptor.
    pub datasource: String,
    pub kind: CodeKind,
    pub code: String,
    pub row_count: usize,
    pub summary: String,
    pub ok: bool,
}

impl AuditRecord {
    pub fn new(
        question: &str,
        datasource: &str,
        kind: CodeKind,
        code: &str,
        row_count: usize,
        summary: &str,
        ok: bool,
    ) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            question: question.to_string(),
            datasource: datasource.to_string(),
            kind,
            code: code.to_string(),
            row_count,
            summary: summary.to_string(),
            ok,
        }
    }
}

/// Write-only audit sink.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord) -> anyhow::Result<()>;
}

/// SQLite-backed audit sink.
pub struct SqliteAuditSink {
    conn: Mutex<Connection>,
}

impl SqliteAuditSink {
    pub fn open(path: &Path) -> anyhow::Result<SqliteAuditSink> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let sink = SqliteAuditSink {
            conn: Mutex::new(conn),
        };
        sink.init_schema()?;
        Ok(sink)
    }

    pub fn open_in_memory() -> anyhow::Result<SqliteAuditSink> {
        let sink = SqliteAuditSink {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        sink.init_schema()?;
        Ok(sink)
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS history (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                question TEXT NOT NULL,
                datasource TEXT NOT NULL,
                kind TEXT NOT NULL,
                code TEXT NOT NULL,
                row_count INTEGER NOT NULL,
                summary TEXT NOT NULL,
                ok INTEGER NOT NULL
            )
            "#,
            [],
        )?;
        Ok(())
    }

    /// Number of stored records, for diagnostics.
    pub fn count(&self) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

impl AuditSink for SqliteAuditSink {
    fn record(&self, record: &AuditRecord) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO history (id, timestamp, question, datasource, kind, code, row_count, summary, ok)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                record.id,
                record.timestamp.to_rfc3339(),
                record.question,
                record.datasource,
                record.kind.name(),
                record.code,
                record.row_count as i64,
                record.summary,
                record.ok as i64,
            ],
        )?;
        Ok(())
    }
}

/// In-memory audit sink for tests.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> MemoryAuditSink {
        MemoryAuditSink::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: &AuditRecord) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
