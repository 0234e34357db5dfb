//! The upload pipeline: validate, read, analyze, materialize, record.

use crate::config::IngestConfig;
use crate::database::catalog::Catalog;
use crate::database::catalog::TableData;
use crate::database::catalog::TableDescriptor;
use crate::database::catalog::DESCRIPTOR_TABLE;
use crate::database::connection::ConnectionFactory;
use crate::database::ddl::table_columns;
use crate::database::locks::TableLocks;
use crate::database::materializer::MaterializeError;
use crate::database::materializer::Materializer;
use crate::error::IngestError;
use crate::schema::analyze_sheet;
use crate::schema::clean_name;
use crate::schema::AnalyzedColumn;
use crate::schema::SqlType;
use crate::spreadsheet::read_sheet;
use crate::spreadsheet::SpreadsheetFormat;
use duckdb::Connection;
use serde::Serialize;
use std::fs::File;
use std::io::Cursor;
use std::io::Read;
use std::path::Path;

/// One upload. `stream` is read to the end and released before the call returns.
pub struct IngestRequest<R: Read> {
    pub stream: R,
    pub file_name: String,
    /// Target table; the file stem when absent.
    pub table_name: Option<String>,
    pub description: Option<String>,
    /// Overrides the configured sheet.
    pub sheet_index: Option<usize>,
}

impl<R: Read> IngestRequest<R> {
    pub fn new(stream: R, file_name: &str) -> Self {
        IngestRequest {
            stream,
            file_name: file_name.to_owned(),
            table_name: None,
            description: None,
            sheet_index: None,
        }
    }

    pub fn table(mut self, table_name: &str) -> Self {
        self.table_name = Some(table_name.to_owned());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_owned());
        self
    }

    pub fn sheet(mut self, sheet_index: usize) -> Self {
        self.sheet_index = Some(sheet_index);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub header: String,
    pub name: String,
    pub sql_type: SqlType,
    pub confidence: f64,
    pub non_null_count: usize,
    pub null_count: usize,
}

impl From<&AnalyzedColumn> for ColumnSummary {
    fn from(column: &AnalyzedColumn) -> Self {
        ColumnSummary {
            header: column.header.clone(),
            name: column.name.clone(),
            sql_type: column.analysis.sql_type,
            confidence: column.analysis.confidence,
            non_null_count: column.analysis.non_null_count,
            null_count: column.analysis.null_count,
        }
    }
}

/// Result of one upload as reported to the caller.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IngestionOutcome {
    pub success: bool,
    pub message: String,
    pub table_name: Option<String>,
    pub created: bool,
    pub rows_inserted: usize,
    /// Data rows read from the sheet.
    pub sheet_rows: usize,
    /// Rows recorded for the table across all uploads so far.
    pub table_row_count: i64,
    pub column_count: usize,
    pub columns: Vec<ColumnSummary>,
}

impl IngestionOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        IngestionOutcome {
            success: false,
            message: message.into(),
            table_name: None,
            created: false,
            rows_inserted: 0,
            sheet_rows: 0,
            table_row_count: 0,
            column_count: 0,
            columns: Vec::new(),
        }
    }
}

/// Table an upload goes to: the requested name, else the file stem, cleaned.
///
/// Names that clean to the same identifier land in the same table.
pub fn resolve_table_name(requested: Option<&str>, file_name: &str) -> Result<String, IngestError> {
    let raw = match requested.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => name.to_owned(),
        None => Path::new(file_name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };
    let name = clean_name(&raw);
    if name.eq_ignore_ascii_case(DESCRIPTOR_TABLE) {
        return Err(IngestError::InputRejected {
            reason: format!("table name '{name}' is reserved"),
        });
    }
    Ok(name)
}

/// Runs uploads against one database. Safe to share between threads: uploads to the
/// same table run one after another, other uploads run side by side.
pub struct IngestionService<F: ConnectionFactory> {
    config: IngestConfig,
    factory: F,
    locks: TableLocks,
}

impl<F: ConnectionFactory> IngestionService<F> {
    pub fn new(config: IngestConfig, factory: F) -> Result<Self, IngestError> {
        config.validate()?;
        Catalog::new(&factory.connect()?).ensure_schema()?;
        Ok(IngestionService {
            config,
            factory,
            locks: TableLocks::new(),
        })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// A fresh session on the service's database.
    pub fn connection(&self) -> Result<Connection, IngestError> {
        self.factory.connect()
    }

    /// Runs one upload and reports the result. Failures are part of the outcome.
    pub fn ingest<R: Read>(&self, request: IngestRequest<R>) -> IngestionOutcome {
        let file_name = request.file_name.clone();
        match self.try_ingest(request) {
            Ok(outcome) => outcome,
            Err(error) => {
                log::warn!("Upload of '{}' failed: {}", file_name, error);
                IngestionOutcome::failure(error.to_string())
            }
        }
    }

    pub fn try_ingest<R: Read>(&self, request: IngestRequest<R>) -> Result<IngestionOutcome, IngestError> {
        let IngestRequest {
            stream,
            file_name,
            table_name,
            description,
            sheet_index,
        } = request;

        SpreadsheetFormat::from_file_name(&file_name)?;
        let table = resolve_table_name(table_name.as_deref(), &file_name)?;
        let data = self.read_limited(stream, &file_name)?;
        log::info!("Ingesting '{}' ({} bytes) into '{}'", file_name, data.len(), table);

        let sheet = read_sheet(Cursor::new(data), &file_name, &self.config.read_options(sheet_index))?;
        if sheet.is_empty() {
            log::info!("'{}' has no data, nothing to load", file_name);
            let table_row_count = self.describe(&table)?.map_or(0, |descriptor| descriptor.row_count);
            return Ok(IngestionOutcome {
                success: true,
                message: format!("'{file_name}' contains no data"),
                table_name: Some(table),
                created: false,
                rows_inserted: 0,
                sheet_rows: 0,
                table_row_count,
                column_count: 0,
                columns: Vec::new(),
            });
        }

        let columns = analyze_sheet(&sheet, self.config.type_policy);
        let connection = self.factory.connect()?;
        let catalog = Catalog::new(&connection);
        let materializer = Materializer::new(&connection, self.config.materialize_options());

        let (materialized, descriptor) = self.locks.with_table_lock(&table, || {
            match materializer.materialize(&table, &columns, &sheet.rows) {
                Ok(materialized) => {
                    let descriptor = catalog.upsert(
                        &materialized.table,
                        &file_name,
                        description.as_deref(),
                        materialized.rows_inserted,
                        materialized.columns.len(),
                    )?;
                    Ok((materialized, descriptor))
                }
                Err(error) => {
                    if let IngestError::MaterializeError(MaterializeError::RowInsert { table, committed, .. }) = &error {
                        if *committed > 0 {
                            let column_count = table_columns(&connection, table)?.len();
                            catalog.upsert(table, &file_name, description.as_deref(), *committed, column_count)?;
                        }
                    }
                    Err(error)
                }
            }
        })?;

        let message = format!(
            "Imported {} of {} row(s) into {} table '{}'",
            materialized.rows_inserted,
            sheet.rows.len(),
            if materialized.created { "new" } else { "existing" },
            materialized.table
        );
        log::info!("{}", message);
        Ok(IngestionOutcome {
            success: true,
            message,
            table_name: Some(materialized.table),
            created: materialized.created,
            rows_inserted: materialized.rows_inserted,
            sheet_rows: sheet.rows.len(),
            table_row_count: descriptor.row_count,
            column_count: materialized.columns.len(),
            columns: columns.iter().map(ColumnSummary::from).collect(),
        })
    }

    /// Uploads a file from disk under its own file name.
    pub fn ingest_path(
        &self,
        path: &Path,
        table_name: Option<&str>,
        description: Option<&str>,
        sheet_index: Option<usize>,
    ) -> IngestionOutcome {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(error) => return IngestionOutcome::failure(format!("Opening {path:?} failed: {error}")),
        };
        self.ingest(IngestRequest {
            stream: file,
            file_name,
            table_name: table_name.map(str::to_owned),
            description: description.map(str::to_owned),
            sheet_index,
        })
    }

    /// Leading rows of a table, never more than the configured read-back limit.
    pub fn read_back(&self, table: &str, limit: Option<usize>) -> Result<TableData, IngestError> {
        let limit = limit
            .unwrap_or(self.config.read_back_limit)
            .min(self.config.read_back_limit);
        let connection = self.factory.connect()?;
        Catalog::new(&connection).read_table(table, limit)
    }

    pub fn tables(&self) -> Result<Vec<TableDescriptor>, IngestError> {
        Catalog::new(&self.factory.connect()?).list()
    }

    pub fn describe(&self, table: &str) -> Result<Option<TableDescriptor>, IngestError> {
        Catalog::new(&self.factory.connect()?).get(table)
    }

    /// Drops a dynamic table with its descriptor. Returns the stored name.
    pub fn delete_table(&self, table: &str) -> Result<String, IngestError> {
        let connection = self.factory.connect()?;
        self.locks
            .with_table_lock(table, || Catalog::new(&connection).delete_table(table))
    }

    fn read_limited<R: Read>(&self, stream: R, file_name: &str) -> Result<Vec<u8>, IngestError> {
        let max = self.config.max_file_size;
        let mut data = Vec::new();
        stream.take(max.saturating_add(1)).read_to_end(&mut data)?;
        if data.is_empty() {
            return Err(IngestError::InputRejected {
                reason: format!("'{file_name}' is empty"),
            });
        }
        if data.len() as u64 > max {
            return Err(IngestError::InputRejected {
                reason: format!("'{file_name}' is larger than {max} bytes"),
            });
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::connection::DuckDbConnector;

    fn service(config: IngestConfig) -> IngestionService<DuckDbConnector> {
        IngestionService::new(config, DuckDbConnector::in_memory().unwrap()).unwrap()
    }

    #[test]
    fn table_name_comes_from_request_or_file_stem() {
        assert_eq!(resolve_table_name(Some("Satış 2024"), "x.xlsx").unwrap(), "Satis_2024");
        assert_eq!(resolve_table_name(Some("   "), "Aylık Rapor.xlsx").unwrap(), "Aylik_Rapor");
        assert_eq!(resolve_table_name(None, "2024.xls").unwrap(), "Col_2024");
    }

    #[test]
    fn descriptor_table_name_is_reserved() {
        let error = resolve_table_name(Some("dynamictables"), "x.xlsx").unwrap_err();
        assert!(error.is_input_rejection());
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let outcome = service(IngestConfig::default()).ingest(IngestRequest::new(&b"a,b\n1,2"[..], "data.csv"));
        assert!(!outcome.success);
        assert!(outcome.message.contains("unsupported"));
    }

    #[test]
    fn empty_and_oversized_streams_are_rejected() {
        let service = service(IngestConfig {
            max_file_size: 4,
            ..IngestConfig::default()
        });
        let empty = service.try_ingest(IngestRequest::new(&b""[..], "book.xlsx")).unwrap_err();
        assert!(empty.is_input_rejection());
        let large = service.try_ingest(IngestRequest::new(&b"PK\x03\x04\x00"[..], "book.xlsx")).unwrap_err();
        assert!(large.is_input_rejection());
        assert!(large.to_string().contains("larger than 4 bytes"));
        assert!(service.tables().unwrap().is_empty());
    }

    #[test]
    fn corrupt_workbook_is_a_failed_outcome() {
        let outcome = service(IngestConfig::default()).ingest(IngestRequest::new(&b"not a zip archive"[..], "book.xlsx"));
        assert!(!outcome.success);
        assert_eq!(outcome.rows_inserted, 0);
        assert_eq!(outcome.table_name, None);
    }

    #[test]
    fn read_back_limit_is_capped_by_config() {
        let service = service(IngestConfig {
            read_back_limit: 2,
            ..IngestConfig::default()
        });
        let connection = service.factory.connect().unwrap();
        connection
            .execute_batch("CREATE TABLE Sayilar (Id BIGINT, Deger INTEGER); INSERT INTO Sayilar VALUES (1, 10), (2, 20), (3, 30);")
            .unwrap();
        assert_eq!(service.read_back("Sayilar", None).unwrap().rows.len(), 2);
        assert_eq!(service.read_back("Sayilar", Some(50)).unwrap().rows.len(), 2);
        assert_eq!(service.read_back("Sayilar", Some(1)).unwrap().rows.len(), 1);
    }
}
