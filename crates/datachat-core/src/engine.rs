//! Request orchestration: question in, answer envelope out.
//!
//! Stateless between requests. Each request resolves a schema snapshot,
//! derives an intent plan (model first, rule-based fallback), compiles for
//! the backend matching the datasource, validates/executes, summarizes,
//! and appends an audit record for both successes and failures.

use crate::audit::{AuditRecord, AuditSink};
use crate::config::EngineConfig;
use crate::error::{DataChatError, Result};
use crate::extract::{extract_plan, unwrap_code_block};
use crate::frame::{Frame, TabularResult};
use crate::llm::LlmClient;
use crate::plan::IntentPlan;
use crate::planner::{normalize, plan_from_rules};
use crate::prompts;
use crate::relational::{self, Dialect};
use crate::safety::{normalize_dialect, sanitize_sql};
use crate::sandbox::Sandbox;
use crate::schema::{self, SchemaSnapshot, TableSchema};
use crate::source::{validate_connection_url, DataSource};
use crate::summarize::{detect_language, summarize, Language};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Which backend produced the generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeKind {
    Relational,
    Tabular,
}

impl CodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            CodeKind::Relational => "sql",
            CodeKind::Tabular => "tabular",
        }
    }
}

/// The generated code artifact, always returned for auditability.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedCode {
    #[serde(rename = "type")]
    pub kind: CodeKind,
    pub code: String,
}

/// Answer envelope handed back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub answer_text: String,
    pub generated: GeneratedCode,
    pub table: TabularResult,
    pub notices: Vec<String>,
}

/// Per-request options supplied by the caller.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Explicit answer language; None infers from the question.
    pub language: Option<Language>,
    pub max_rows: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            language: None,
            max_rows: 200,
        }
    }
}

/// The query engine. Holds configuration and collaborators only; no state
/// crosses requests.
pub struct QueryEngine {
    config: EngineConfig,
    llm: Option<Box<dyn LlmClient>>,
    audit: Option<Box<dyn AuditSink>>,
}

impl QueryEngine {
    pub fn new(config: EngineConfig) -> QueryEngine {
        QueryEngine {
            config,
            llm: None,
            audit: None,
        }
    }

    pub fn with_llm(mut self, llm: Box<dyn LlmClient>) -> QueryEngine {
        self.llm = Some(llm);
        self
    }

    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> QueryEngine {
        self.audit = Some(audit);
        self
    }

    /// Answer a question against a datasource.
    pub fn answer(
        &self,
        question: &str,
        source: &DataSource,
        opts: &QueryOptions,
    ) -> Result<ChatResponse> {
        match source {
            DataSource::Tabular { path } => {
                let frame = Frame::from_csv_path(path)?;
                self.answer_tabular(question, &frame, &source.describe(), opts)
            }
            DataSource::Relational { url } => {
                if !validate_connection_url(url) {
                    return Err(DataChatError::SchemaUnavailable(format!(
                        "connection URL scheme not allowed: {}",
                        source.describe()
                    )));
                }
                let dialect = Dialect::from_url(url);
                match source.sqlite_path() {
                    Some(path) => {
                        // The connection lives exactly as long as this
                        // request scope and is released on every exit path.
                        let conn = Connection::open(&path).map_err(|e| {
                            DataChatError::SchemaUnavailable(format!(
                                "cannot open {}: {}",
                                path.display(),
                                e
                            ))
                        })?;
                        self.answer_relational(question, &conn, dialect, &source.describe(), opts)
                    }
                    None => Err(DataChatError::UnsupportedOperation(format!(
                        "no executor available for dialect: {}",
                        dialect.name()
                    ))),
                }
            }
        }
    }

    /// Answer against an in-memory tabular dataset.
    pub fn answer_tabular(
        &self,
        question: &str,
        frame: &Frame,
        descriptor: &str,
        opts: &QueryOptions,
    ) -> Result<ChatResponse> {
        let snapshot = schema::from_frame(frame);
        let table_schema = &snapshot.tables[0];
        let lang = self.resolve_language(question, opts);
        let mut notices = Vec::new();

        let plan = self.derive_plan(question, table_schema, &mut notices);
        debug!(plan = ?plan, "derived intent plan");

        let code = match crate::tabular::compile_plan(&plan, &frame.name) {
            Ok(code) => code,
            Err(compile_err) => {
                // Last resort, as in the source: ask the model for a direct
                // expression. The sandbox still gates everything it can do.
                match self.model_tabular_expression(question, table_schema) {
                    Some(code) => {
                        notices.push("generated code authored by the model".to_string());
                        code
                    }
                    None => {
                        self.audit(question, descriptor, CodeKind::Tabular, "", 0, "", false);
                        return Err(compile_err);
                    }
                }
            }
        };
        info!(code = %code, "executing tabular artifact");

        let sandbox = Sandbox::new(frame).with_limits(self.config.sandbox.to_limits());
        let output = match sandbox.execute(&code) {
            Ok(output) => output,
            Err(e) => {
                self.audit(question, descriptor, CodeKind::Tabular, &code, 0, "", false);
                return Err(e);
            }
        };

        let total_rows = output.table.row_count();
        let mut table = output.table;
        if output.truncated {
            notices.push("result truncated by the sandbox row cap".to_string());
        }
        if table.rows.len() > opts.max_rows {
            table.rows.truncate(opts.max_rows);
            notices.push(format!("result truncated to {} row(s)", opts.max_rows));
        }

        let answer_text = summarize(&table, total_rows, lang, question);
        self.audit(
            question,
            descriptor,
            CodeKind::Tabular,
            &code,
            table.row_count(),
            &answer_text,
            true,
        );

        Ok(ChatResponse {
            answer_text,
            generated: GeneratedCode {
                kind: CodeKind::Tabular,
                code,
            },
            table,
            notices,
        })
    }

    /// Answer against an open relational connection.
    pub fn answer_relational(
        &self,
        question: &str,
        conn: &Connection,
        dialect: Dialect,
        descriptor: &str,
        opts: &QueryOptions,
    ) -> Result<ChatResponse> {
        let snapshot = schema::introspect_sqlite(conn)?;
        let lang = self.resolve_language(question, opts);
        let mut notices = Vec::new();

        let sql = self.derive_sql(question, &snapshot, dialect, opts, &mut notices)?;
        info!(sql = %sql, "executing relational statement");

        let (table, total_rows) = match self.execute_sql(conn, &sql, opts.max_rows) {
            Ok(out) => out,
            Err(e) => {
                self.audit(question, descriptor, CodeKind::Relational, &sql, 0, "", false);
                return Err(e);
            }
        };

        let answer_text = summarize(&table, total_rows, lang, question);
        self.audit(
            question,
            descriptor,
            CodeKind::Relational,
            &sql,
            table.row_count(),
            &answer_text,
            true,
        );

        Ok(ChatResponse {
            answer_text,
            generated: GeneratedCode {
                kind: CodeKind::Relational,
                code: sql,
            },
            table,
            notices,
        })
    }

    /// Intent plan via the model, rule-based on any failure. Total.
    fn derive_plan(
        &self,
        question: &str,
        table_schema: &TableSchema,
        notices: &mut Vec<String>,
    ) -> IntentPlan {
        if let Some(llm) = &self.llm {
            let prompt = prompts::plan_prompt(&table_schema.column_names(), question);
            match llm
                .generate(prompts::PLAN_SYSTEM, &prompt)
                .map_err(DataChatError::from)
                .and_then(|text| extract_plan(&text))
            {
                Ok(plan) => return plan,
                Err(e) => {
                    warn!("plan extraction failed, using rule-based planner: {}", e);
                    notices.push("plan derived by rules (model unavailable or malformed)".to_string());
                }
            }
        }
        plan_from_rules(question, table_schema)
    }

    /// SQL via the model when available, compiled from a rule-based plan
    /// otherwise. Model output always passes the safety gate; both paths
    /// end with dialect normalization.
    fn derive_sql(
        &self,
        question: &str,
        snapshot: &SchemaSnapshot,
        dialect: Dialect,
        opts: &QueryOptions,
        notices: &mut Vec<String>,
    ) -> Result<String> {
        if let Some(llm) = &self.llm {
            let prompt = prompts::sql_prompt(snapshot, dialect, question);
            match llm.generate(prompts::SQL_SYSTEM, &prompt) {
                Ok(text) => {
                    // Gate rejection is fatal, never downgraded to a fallback.
                    let sql = sanitize_sql(&text, opts.max_rows)?;
                    return Ok(normalize_dialect(&sql, dialect));
                }
                Err(e) => {
                    warn!("model SQL generation failed, compiling from rules: {}", e);
                    notices.push("statement compiled from rules (model unavailable)".to_string());
                }
            }
        }

        let table_schema = pick_table(snapshot, question)?;
        let plan = plan_from_rules(question, table_schema);
        let sql = relational::compile_plan(&plan, &table_schema.name, dialect)?;
        let sql = sanitize_sql(&sql, opts.max_rows)?;
        Ok(normalize_dialect(&sql, dialect))
    }

    fn model_tabular_expression(
        &self,
        question: &str,
        table_schema: &TableSchema,
    ) -> Option<String> {
        let llm = self.llm.as_ref()?;
        let prompt = prompts::tabular_prompt(&table_schema.column_names(), question);
        match llm.generate(prompts::TABULAR_SYSTEM, &prompt) {
            Ok(text) => {
                let code = unwrap_code_block(&text);
                if code.is_empty() {
                    None
                } else {
                    Some(code)
                }
            }
            Err(e) => {
                warn!("model expression generation failed: {}", e);
                None
            }
        }
    }

    fn execute_sql(
        &self,
        conn: &Connection,
        sql: &str,
        max_rows: usize,
    ) -> Result<(TabularResult, usize)> {
        let wrap = |e: rusqlite::Error| DataChatError::RelationalExecution {
            code: sql.to_string(),
            cause: e.to_string(),
        };

        let mut stmt = conn.prepare(sql).map_err(wrap)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let mut out_rows: Vec<Vec<crate::value::Value>> = Vec::new();
        let mut total = 0usize;
        let mut rows = stmt.query([]).map_err(wrap)?;
        while let Some(row) = rows.next().map_err(wrap)? {
            total += 1;
            if out_rows.len() < max_rows {
                let mut out_row = Vec::with_capacity(columns.len());
                for i in 0..columns.len() {
                    out_row.push(sql_value(row.get_ref(i).map_err(wrap)?));
                }
                out_rows.push(out_row);
            }
        }

        Ok((
            TabularResult {
                columns,
                rows: out_rows,
            },
            total,
        ))
    }

    fn resolve_language(&self, question: &str, opts: &QueryOptions) -> Language {
        if let Some(lang) = opts.language {
            return lang;
        }
        if let Some(lang) = self.config.language.as_deref().and_then(Language::parse) {
            return lang;
        }
        detect_language(question)
    }

    fn audit(
        &self,
        question: &str,
        descriptor: &str,
        kind: CodeKind,
        code: &str,
        row_count: usize,
        summary: &str,
        ok: bool,
    ) {
        if let Some(sink) = &self.audit {
            let record = AuditRecord::new(question, descriptor, kind, code, row_count, summary, ok);
            if let Err(e) = sink.record(&record) {
                warn!("audit sink failed: {}", e);
            }
        }
    }
}

/// Choose the table a rule-based plan targets: the one named in the
/// question, or the first table otherwise.
fn pick_table<'a>(snapshot: &'a SchemaSnapshot, question: &str) -> Result<&'a TableSchema> {
    if snapshot.tables.is_empty() {
        return Err(DataChatError::SchemaUnavailable(
            "source has no tables".to_string(),
        ));
    }
    let qnorm = normalize(question);
    Ok(snapshot
        .tables
        .iter()
        .find(|t| qnorm.contains(&normalize(&t.name)))
        .unwrap_or(&snapshot.tables[0]))
}

fn sql_value(value: rusqlite::types::ValueRef<'_>) -> crate::value::Value {
    use crate::value::Value;
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Int(n),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(_) => Value::Text("<blob>".to_string()),
    }
}
