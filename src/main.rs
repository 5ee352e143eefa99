use anyhow::{bail, Context, Result};
use askdb::assistant::{AnswerMode, AssistantResponse, DataAssistant};
use askdb::catalog;
use askdb::config::Settings;
use askdb::executor::SqliteExecutor;
use askdb::ports::Row;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "askdb")]
#[command(about = "Ask natural-language questions of a SQLite database, safely")]
struct Args {
    /// The question in natural language
    question: String,

    /// Path to the SQLite database (overrides ASKDB_DB)
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// Schema file, DDL or JSON (default: introspect the database)
    #[arg(short, long)]
    schema: Option<PathBuf>,

    /// Force a path instead of routing: simple | investigate
    #[arg(short, long)]
    mode: Option<String>,

    /// Emit the full response as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut settings = Settings::from_env()?;
    if let Some(db) = args.db {
        settings.db_path = db;
    }
    if let Some(schema) = args.schema {
        settings.schema_path = Some(schema);
    }
    settings.validate()?;

    let force_mode = match args.mode.as_deref() {
        None => None,
        Some("simple") => Some(AnswerMode::Simple),
        Some("investigate") => Some(AnswerMode::Investigation),
        Some(other) => bail!("unknown mode '{other}', expected simple or investigate"),
    };

    let executor = SqliteExecutor::open(&settings.db_path)?;
    let schema_source = match &settings.schema_path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading schema file {}", path.display()))?,
        None => executor.schema_ddl()?,
    };
    let catalog = catalog::build_catalog(&schema_source)?;
    info!(tables = catalog.len(), "schema catalog loaded");

    let llm = settings.llm_client();
    let assistant = DataAssistant::new(
        &llm,
        &executor,
        catalog,
        settings.guardrail_policy(),
        settings.router_policy(),
        settings.investigator_config(),
    );

    let response = assistant.answer(&args.question, force_mode).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        render(&response);
    }
    Ok(())
}

fn render(response: &AssistantResponse) {
    if let Some(answer) = &response.answer {
        println!("{answer}");
    }
    if !response.rows.is_empty() {
        print_table(&response.rows);
        if let (Some(sql), Some(limit)) = (&response.sql, response.limit) {
            println!("\n({} rows, limit {limit})  {sql}", response.rows.len());
        }
    }
    if let Some(report) = &response.report {
        println!("\nEvidence trail:");
        for (i, round) in report.rounds.iter().enumerate() {
            println!("  {}. {}", i + 1, round.observation);
            println!("     {}", round.sql);
        }
        if response.answer.is_none() {
            println!("\nThe investigation did not complete; the evidence above is partial.");
        }
    }
}

/// Monospace-aligned rendering of result rows.
fn print_table(rows: &[Row]) {
    let Some(first) = rows.first() else { return };
    let columns: Vec<&String> = first.keys().collect();

    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    let rendered: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .enumerate()
                .map(|(i, col)| {
                    let cell = row
                        .get(col.as_str())
                        .map(render_value)
                        .unwrap_or_default();
                    widths[i] = widths[i].max(cell.len());
                    cell
                })
                .collect()
        })
        .collect();

    let header: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:<width$}", c, width = widths[i]))
        .collect();
    println!("{}", header.join("  "));
    println!("{}", widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("  "));
    for row in rendered {
        let line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
            .collect();
        println!("{}", line.join("  "));
    }
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
