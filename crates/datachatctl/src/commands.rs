//! Command implementations for datachatctl.

use anyhow::{bail, Context, Result};
use datachat_core::audit::SqliteAuditSink;
use datachat_core::config::EngineConfig;
use datachat_core::llm::HttpLlmClient;
use datachat_core::planner::plan_from_rules;
use datachat_core::{
    frame::Frame, relational, schema, tabular, DataSource, Language, QueryEngine, QueryOptions,
    TabularResult,
};
use owo_colors::OwoColorize;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Resolve the --csv / --db pair into a datasource.
fn resolve_source(csv: Option<PathBuf>, db: Option<PathBuf>) -> Result<DataSource> {
    match (csv, db) {
        (Some(path), None) => Ok(DataSource::Tabular { path }),
        (None, Some(path)) => Ok(DataSource::Relational {
            url: format!("sqlite:///{}", path.display()),
        }),
        (Some(_), Some(_)) => bail!("pass either --csv or --db, not both"),
        (None, None) => bail!("a datasource is required: --csv <file> or --db <file>"),
    }
}

pub fn ask(
    config_path: &Path,
    question: &str,
    csv: Option<PathBuf>,
    db: Option<PathBuf>,
    language: Option<String>,
    max_rows: usize,
    no_llm: bool,
) -> Result<()> {
    let source = resolve_source(csv, db)?;
    let config = EngineConfig::load(config_path);

    let mut engine = QueryEngine::new(config.clone());
    if !no_llm && config.llm.enabled {
        let client = HttpLlmClient::new(config.llm.clone())
            .context("failed to initialize the LLM client")?;
        engine = engine.with_llm(Box::new(client));
    }
    if let Some(path) = &config.audit_db {
        let sink = SqliteAuditSink::open(Path::new(path))
            .with_context(|| format!("failed to open audit store at {}", path))?;
        engine = engine.with_audit(Box::new(sink));
    }

    let opts = QueryOptions {
        language: language.as_deref().and_then(Language::parse),
        max_rows,
    };

    match engine.answer(question, &source, &opts) {
        Ok(resp) => {
            println!("{}", resp.answer_text.bold());
            println!();
            println!(
                "{} {}",
                format!("[{}]", resp.generated.kind.name()).dimmed(),
                resp.generated.code.dimmed()
            );
            println!();
            print_table(&resp.table);
            for notice in &resp.notices {
                println!("{} {}", "note:".yellow(), notice);
            }
            Ok(())
        }
        Err(e) => bail!("{}", e.user_message()),
    }
}

pub fn plan(question: &str, csv: Option<PathBuf>, db: Option<PathBuf>) -> Result<()> {
    let source = resolve_source(csv, db)?;
    match &source {
        DataSource::Tabular { path } => {
            let frame = Frame::from_csv_path(path).map_err(|e| anyhow::anyhow!(e.user_message()))?;
            let snapshot = schema::from_frame(&frame);
            let plan = plan_from_rules(question, &snapshot.tables[0]);
            println!("{}", serde_json::to_string_pretty(&plan)?);
            let code = tabular::compile_plan(&plan, &frame.name)
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("\n{} {}", "[tabular]".dimmed(), code);
        }
        DataSource::Relational { .. } => {
            let db_path = source
                .sqlite_path()
                .context("only SQLite databases are supported here")?;
            let conn = Connection::open(&db_path)
                .with_context(|| format!("cannot open {}", db_path.display()))?;
            let snapshot =
                schema::introspect_sqlite(&conn).map_err(|e| anyhow::anyhow!(e.user_message()))?;
            let table = snapshot
                .tables
                .first()
                .context("database has no tables")?;
            let plan = plan_from_rules(question, table);
            println!("{}", serde_json::to_string_pretty(&plan)?);
            let sql = relational::compile_plan(&plan, &table.name, relational::Dialect::Sqlite)
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("\n{} {}", "[sql]".dimmed(), sql);
        }
    }
    Ok(())
}

pub fn schema(csv: Option<PathBuf>, db: Option<PathBuf>) -> Result<()> {
    let source = resolve_source(csv, db)?;
    let snapshot = match &source {
        DataSource::Tabular { path } => {
            let frame = Frame::from_csv_path(path).map_err(|e| anyhow::anyhow!(e.user_message()))?;
            schema::from_frame(&frame)
        }
        DataSource::Relational { .. } => {
            let db_path = source
                .sqlite_path()
                .context("only SQLite databases are supported here")?;
            let conn = Connection::open(&db_path)
                .with_context(|| format!("cannot open {}", db_path.display()))?;
            schema::introspect_sqlite(&conn).map_err(|e| anyhow::anyhow!(e.user_message()))?
        }
    };
    println!("{}", snapshot.describe());
    Ok(())
}

/// Fixed-width table rendering.
fn print_table(table: &TabularResult) {
    if table.columns.is_empty() {
        return;
    }

    let mut widths: Vec<usize> = table.columns.iter().map(|c| c.len()).collect();
    let rendered: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|row| row.iter().map(|v| v.to_string()).collect())
        .collect();
    for row in &rendered {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let header: Vec<String> = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:<width$}", c, width = widths[i]))
        .collect();
    println!("{}", header.join("  ").bold());
    println!(
        "{}",
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  ")
    );
    for row in &rendered {
        let line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
            .collect();
        println!("{}", line.join("  "));
    }
}
