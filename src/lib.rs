//! # Spreadsheet ingestion
//!
//! Loads the first (or a chosen) sheet of an Excel workbook into a DuckDB table that is
//! created on the fly from the sheet itself.
//!
//! ## Pipeline
//!
//! - **Read**: `.xlsx`/`.xlsm` (Office Open XML) and `.xls` (BIFF8) workbooks become a
//!   header row plus loosely typed cells ([`spreadsheet`])
//! - **Analyze**: every header gets a legal, unique column name and every column a type
//!   inferred from a full scan of its values ([`schema`])
//! - **Materialize**: the table is created when missing, then rows are appended by
//!   position with per-batch transactions ([`database::materializer`])
//! - **Record**: a descriptor per table keeps the source file and the running row count
//!   ([`database::catalog`])
//!
//! [`ingest::IngestionService`] ties the steps together; the `sheet-ingest` binary
//! exposes it on the command line.

pub mod cli;
pub mod config;
pub mod database;
pub mod error;
mod helpers;
pub mod ingest;
pub mod schema;
pub mod spreadsheet;

pub use config::IngestConfig;
pub use error::IngestError;
pub use ingest::IngestRequest;
pub use ingest::IngestionOutcome;
pub use ingest::IngestionService;

use std::env;
use std::fs::File;
use std::sync::OnceLock;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use log::info;
use log::LevelFilter;
use serde::Serialize;

use crate::cli::Cli;
use crate::cli::Commands;
use crate::database::DuckDbConnector;
use crate::schema::TypePolicy;

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sheet_ingest", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    match cli.command {
        Commands::Analyze(args) => handle_analyze(config, &args),
        Commands::Ingest(args) => handle_ingest(config, &args),
        Commands::Show(args) => handle_show(config, &args),
        Commands::List => handle_list(config),
        Commands::Drop(args) => handle_drop(config, &args),
    }
}

fn load_config(cli: &Cli) -> Result<IngestConfig> {
    let mut config = match &cli.config {
        Some(path) => IngestConfig::load(path).with_context(|| format!("Loading config from {path:?}"))?,
        None => IngestConfig::default(),
    };
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    Ok(config)
}

fn open_service(config: IngestConfig) -> Result<IngestionService<DuckDbConnector>> {
    let connector = DuckDbConnector::open(&config.database_path)
        .with_context(|| format!("Opening database {:?}", config.database_path))?;
    Ok(IngestionService::new(config, connector)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct SheetAnalysis {
    file: String,
    sheet: String,
    sheets: Vec<String>,
    row_count: usize,
    columns: Vec<schema::AnalyzedColumn>,
}

fn handle_analyze(mut config: IngestConfig, args: &cli::AnalyzeArgs) -> Result<()> {
    if args.name_hints {
        config.type_policy = TypePolicy::NameHints;
    }
    let file_name = file_name_of(&args.file);
    let sheets = spreadsheet::sheet_names(open_file(&args.file)?, &file_name)?;
    let options = config.read_options(args.sheet);
    let rows = spreadsheet::read_sheet(open_file(&args.file)?, &file_name, &options)?;
    let columns = schema::analyze_sheet(&rows, config.type_policy);
    info!("Analyzed {} column(s) of '{}'", columns.len(), file_name);
    print_json(&SheetAnalysis {
        file: file_name,
        sheet: sheets.get(options.sheet_index).cloned().unwrap_or_default(),
        sheets,
        row_count: rows.rows.len(),
        columns,
    })
}

fn handle_ingest(mut config: IngestConfig, args: &cli::IngestArgs) -> Result<()> {
    if args.name_hints {
        config.type_policy = TypePolicy::NameHints;
    }
    let service = open_service(config)?;
    let outcome = service.ingest_path(
        &args.file,
        args.table.as_deref(),
        args.description.as_deref(),
        args.sheet,
    );
    print_json(&outcome)?;
    if !outcome.success {
        bail!(outcome.message);
    }
    Ok(())
}

fn handle_show(config: IngestConfig, args: &cli::ShowArgs) -> Result<()> {
    let service = open_service(config)?;
    let data = service
        .read_back(&args.table, args.limit)
        .with_context(|| format!("Reading table '{}'", args.table))?;
    print_json(&data)
}

fn handle_list(config: IngestConfig) -> Result<()> {
    print_json(&open_service(config)?.tables()?)
}

fn handle_drop(config: IngestConfig, args: &cli::DropArgs) -> Result<()> {
    let dropped = open_service(config)?
        .delete_table(&args.table)
        .with_context(|| format!("Dropping table '{}'", args.table))?;
    info!("Dropped table '{}'", dropped);
    print_json(&serde_json::json!({ "dropped": dropped }))
}

fn open_file(path: &std::path::Path) -> Result<File> {
    File::open(path).with_context(|| format!("Opening {path:?}"))
}

fn file_name_of(path: &std::path::Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
