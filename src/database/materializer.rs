//! Creates a dynamic table when needed and loads sheet rows into it.
//!
//! One call walks these states:
//!
//! ```text
//! CheckExists -> FetchExistingColumns ---------------------> Insert -> Done
//!             -> GenerateDdl -> CreateTable ---------------> Insert -> Done
//! ```
//!
//! DDL runs on its own, before any row. Rows are inserted one statement each, by
//! position: the n-th cell of a row goes to the n-th target column. For an existing
//! table the targets come from the catalog, not from the new headers.

use crate::database::convert::convert_cell;
use crate::database::convert::SqlValue;
use crate::database::ddl::create_table_sql;
use crate::database::ddl::find_table;
use crate::database::ddl::insert_sql;
use crate::database::ddl::table_columns;
use crate::database::ddl::TargetColumn;
use crate::error::IngestError;
use crate::schema::AnalyzedColumn;
use crate::spreadsheet::RawCell;
use duckdb::params_from_iter;
use duckdb::Connection;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("Table '{table}' has {expected} column(s) but the sheet has {actual}")]
    ColumnCountMismatch { table: String, expected: usize, actual: usize },

    #[error("Creating table '{table}' failed: {source}")]
    CreateTable {
        table: String,
        #[source]
        source: duckdb::Error,
    },

    #[error("Inserting row {row} into '{table}' failed after {committed} committed row(s): {source}")]
    RowInsert {
        table: String,
        row: usize,
        committed: usize,
        #[source]
        source: duckdb::Error,
    },

    #[error("Table '{0}' cannot be created without columns")]
    NoColumns(String),
}

/// Unit that commits or rolls back together while rows are inserted.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Atomicity {
    /// Every row commits on its own.
    PerRow,
    /// Each batch is one transaction; earlier batches stay when a later one fails.
    #[default]
    PerBatch,
    /// All rows of the upload, or none.
    WholeUpload,
}

#[derive(Copy, Clone, Debug)]
pub struct MaterializeOptions {
    pub batch_size: usize,
    pub atomicity: Atomicity,
    /// Refuse to append when an existing table's column count differs from the sheet.
    pub strict_column_count: bool,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        MaterializeOptions {
            batch_size: 1000,
            atomicity: Atomicity::default(),
            strict_column_count: true,
        }
    }
}

/// What a materialization did.
#[derive(Clone, Debug, PartialEq)]
pub struct Materialized {
    /// Table name as stored in the catalog.
    pub table: String,
    pub created: bool,
    pub rows_inserted: usize,
    pub columns: Vec<TargetColumn>,
}

enum State {
    CheckExists,
    FetchExistingColumns { table: String },
    GenerateDdl,
    CreateTable { ddl: String, columns: Vec<TargetColumn> },
    Insert { table: String, columns: Vec<TargetColumn>, created: bool },
    Done(Materialized),
}

pub struct Materializer<'c> {
    connection: &'c Connection,
    options: MaterializeOptions,
}

impl<'c> Materializer<'c> {
    pub fn new(connection: &'c Connection, options: MaterializeOptions) -> Self {
        Materializer { connection, options }
    }

    /// Makes sure `table` exists and appends `rows` to it.
    ///
    /// `columns` are the analyzed headers; for a new table they give the column names
    /// and types, for an existing one only their count is checked.
    pub fn materialize(&self, table: &str, columns: &[AnalyzedColumn], rows: &[Vec<RawCell>]) -> Result<Materialized, IngestError> {
        let mut state = State::CheckExists;
        loop {
            state = match state {
                State::CheckExists => match find_table(self.connection, table)? {
                    Some(stored) => State::FetchExistingColumns { table: stored },
                    None => State::GenerateDdl,
                },
                State::FetchExistingColumns { table: stored } => {
                    let existing = table_columns(self.connection, &stored)?;
                    if existing.len() != columns.len() {
                        if self.options.strict_column_count {
                            log::warn!(
                                "Table '{}' has {} column(s), sheet has {}",
                                stored,
                                existing.len(),
                                columns.len()
                            );
                            return Err(MaterializeError::ColumnCountMismatch {
                                table: stored,
                                expected: existing.len(),
                                actual: columns.len(),
                            }
                            .into());
                        }
                        log::warn!(
                            "Table '{}' has {} column(s), sheet has {}; inserting by position",
                            stored,
                            existing.len(),
                            columns.len()
                        );
                    }
                    log::info!("Appending to existing table '{}'", stored);
                    State::Insert {
                        table: stored,
                        columns: existing,
                        created: false,
                    }
                }
                State::GenerateDdl => {
                    if columns.is_empty() {
                        Err(MaterializeError::NoColumns(table.to_owned()))?
                    }
                    let columns: Vec<TargetColumn> = columns
                        .iter()
                        .map(|column| TargetColumn::new(&column.name, column.analysis.sql_type))
                        .collect();
                    let ddl = create_table_sql(table, &columns);
                    log::debug!("Generated DDL for '{}':\n{}", table, ddl);
                    State::CreateTable { ddl, columns }
                }
                State::CreateTable { ddl, columns } => {
                    self.connection
                        .execute_batch(&ddl)
                        .map_err(|source| MaterializeError::CreateTable {
                            table: table.to_owned(),
                            source,
                        })?;
                    log::info!("Created table '{}' with {} column(s)", table, columns.len());
                    State::Insert {
                        table: table.to_owned(),
                        columns,
                        created: true,
                    }
                }
                State::Insert { table, columns, created } => {
                    let rows_inserted = self.insert(&table, &columns, rows)?;
                    State::Done(Materialized {
                        table,
                        created,
                        rows_inserted,
                        columns,
                    })
                }
                State::Done(materialized) => return Ok(materialized),
            }
        }
    }

    /// Inserts every row through one prepared statement, committing per the
    /// configured atomicity. The first failing row aborts the rest.
    fn insert(&self, table: &str, columns: &[TargetColumn], rows: &[Vec<RawCell>]) -> Result<usize, IngestError> {
        let sql = insert_sql(table, columns);
        let mut statement = self.connection.prepare(&sql)?;
        let atomicity = self.options.atomicity;
        let batch_size = self.options.batch_size.max(1);
        let total = rows.len();
        let mut committed = 0usize;

        if atomicity == Atomicity::WholeUpload {
            self.begin()?;
        }
        for (batch_index, batch) in rows.chunks(batch_size).enumerate() {
            if atomicity == Atomicity::PerBatch {
                self.begin()?;
            }
            for (offset, row) in batch.iter().enumerate() {
                let values: Vec<SqlValue> = columns
                    .iter()
                    .enumerate()
                    .map(|(index, column)| convert_cell(row.get(index).unwrap_or(&RawCell::Null), column.sql_type))
                    .collect();
                if let Err(source) = statement.execute(params_from_iter(values.iter())) {
                    let row = batch_index * batch_size + offset + 1;
                    if atomicity != Atomicity::PerRow {
                        self.rollback();
                    }
                    log::warn!("Row {} of '{}' failed, {} row(s) committed: {}", row, table, committed, source);
                    Err(MaterializeError::RowInsert {
                        table: table.to_owned(),
                        row,
                        committed,
                        source,
                    })?
                }
                if atomicity == Atomicity::PerRow {
                    committed += 1;
                }
            }
            if atomicity == Atomicity::PerBatch {
                self.commit()?;
                committed += batch.len();
            }
            log::info!(
                "Inserted {}/{} row(s) into '{}'",
                (batch_index * batch_size + batch.len()).min(total),
                total,
                table
            );
        }
        if atomicity == Atomicity::WholeUpload {
            self.commit()?;
            committed = total;
        }
        Ok(committed)
    }

    fn begin(&self) -> Result<(), IngestError> {
        Ok(self.connection.execute_batch("BEGIN TRANSACTION")?)
    }

    fn commit(&self) -> Result<(), IngestError> {
        Ok(self.connection.execute_batch("COMMIT")?)
    }

    fn rollback(&self) {
        if let Err(error) = self.connection.execute_batch("ROLLBACK") {
            log::warn!("Rollback failed: {}", error);
        }
    }
}
