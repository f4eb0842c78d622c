//! DataChat Control - CLI for asking questions over data sources.
//!
//! Thin front-end over datachat-core: resolves the datasource, runs the
//! pipeline, and prints the answer, the generated code, and the table.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser)]
#[command(name = "datachatctl")]
#[command(about = "Ask natural-language questions over SQL databases and CSV files", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "datachat.toml")]
    config: PathBuf,

    /// Verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question and print the answer, code, and table
    Ask {
        /// The natural-language question
        question: String,

        /// CSV file to query
        #[arg(long)]
        csv: Option<PathBuf>,

        /// SQLite database file to query
        #[arg(long)]
        db: Option<PathBuf>,

        /// Answer language (es | en); inferred from the question if omitted
        #[arg(long)]
        language: Option<String>,

        /// Maximum rows in the result
        #[arg(long, default_value_t = 200)]
        max_rows: usize,

        /// Skip the model and use the rule-based planner only
        #[arg(long)]
        no_llm: bool,
    },

    /// Show the derived intent plan and generated code without executing
    Plan {
        /// The natural-language question
        question: String,

        /// CSV file to plan against
        #[arg(long)]
        csv: Option<PathBuf>,

        /// SQLite database file to plan against
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Print the introspected schema of a datasource
    Schema {
        /// CSV file to introspect
        #[arg(long)]
        csv: Option<PathBuf>,

        /// SQLite database file to introspect
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .init();

    match cli.command {
        Commands::Ask {
            question,
            csv,
            db,
            language,
            max_rows,
            no_llm,
        } => commands::ask(&cli.config, &question, csv, db, language, max_rows, no_llm),
        Commands::Plan { question, csv, db } => commands::plan(&question, csv, db),
        Commands::Schema { csv, db } => commands::schema(csv, db),
    }
}
