use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Load spreadsheets into dynamically created DuckDB tables",
    long_about = None
)]
pub struct Cli {
    /// DuckDB database file (`:memory:` for a throwaway database)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,
    /// JSON config file; flags given on the command line take precedence
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load one sheet of a workbook into a table, creating it when needed
    Ingest(IngestArgs),
    /// Show the inferred column names and types without touching the database
    Analyze(AnalyzeArgs),
    /// Print the leading rows of a table
    Show(ShowArgs),
    /// List the tables created by uploads
    List,
    /// Drop a table and forget its descriptor
    Drop(DropArgs),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Workbook to load (.xlsx, .xlsm or .xls)
    pub file: PathBuf,
    /// Target table; defaults to the file name without extension
    #[arg(short, long)]
    pub table: Option<String>,
    /// Free text stored with the table descriptor
    #[arg(short, long)]
    pub description: Option<String>,
    /// Zero-based sheet index
    #[arg(short, long)]
    pub sheet: Option<usize>,
    /// Let headers such as "Tarih" or "Tutar" force date and decimal columns
    #[arg(long)]
    pub name_hints: bool,
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Workbook to analyze
    pub file: PathBuf,
    /// Zero-based sheet index
    #[arg(short, long)]
    pub sheet: Option<usize>,
    /// Let headers such as "Tarih" or "Tutar" force date and decimal columns
    #[arg(long)]
    pub name_hints: bool,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Table to read
    pub table: String,
    /// Maximum number of rows, capped by the configured read-back limit
    #[arg(short, long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct DropArgs {
    /// Table to drop
    pub table: String,
}
