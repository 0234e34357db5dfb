//! Bookkeeping for dynamic tables: one descriptor row per table in
//! `DynamicTables`, plus read-back and delete of the tables themselves.

use crate::database::convert::SqlValue;
use crate::database::ddl::all_columns;
use crate::database::ddl::drop_table_sql;
use crate::database::ddl::find_table;
use crate::database::ddl::quote_identifier;
use crate::error::IngestError;
use crate::schema::naming::IDENTITY_COLUMN;
use chrono::NaiveDateTime;
use chrono::Utc;
use duckdb::params;
use duckdb::Connection;
use duckdb::Row;
use serde::Serialize;
use thiserror::Error;

/// Relation holding the descriptors. User tables may not take this name.
pub const DESCRIPTOR_TABLE: &str = "DynamicTables";

const CREATE_DESCRIPTOR_TABLE: &str = r#"
CREATE SEQUENCE IF NOT EXISTS "DynamicTables_id_seq";
CREATE TABLE IF NOT EXISTS "DynamicTables" (
    "Id" BIGINT PRIMARY KEY DEFAULT nextval('DynamicTables_id_seq'),
    "TableName" VARCHAR NOT NULL UNIQUE,
    "FileName" VARCHAR NOT NULL,
    "Description" VARCHAR,
    "UploadedAt" TIMESTAMP NOT NULL,
    "RowCount" BIGINT NOT NULL,
    "ColumnCount" INTEGER NOT NULL,
    "IsProcessed" BOOLEAN NOT NULL,
    "ProcessedAt" TIMESTAMP
);
"#;

const SELECT_DESCRIPTOR: &str = r#"SELECT "Id", "TableName", "FileName", "Description", "UploadedAt", "RowCount", "ColumnCount", "IsProcessed", "ProcessedAt" FROM "DynamicTables""#;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Table '{0}' does not exist")]
    TableNotFound(String),

    #[error("Table name '{0}' is reserved")]
    ReservedName(String),
}

/// Metadata kept for one dynamic table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableDescriptor {
    pub id: i64,
    pub table_name: String,
    pub file_name: String,
    pub description: Option<String>,
    pub uploaded_at: NaiveDateTime,
    /// Rows appended over every upload.
    pub row_count: i64,
    pub column_count: i32,
    pub is_processed: bool,
    pub processed_at: Option<NaiveDateTime>,
}

impl TableDescriptor {
    fn from_row(row: &Row<'_>) -> duckdb::Result<TableDescriptor> {
        Ok(TableDescriptor {
            id: row.get(0)?,
            table_name: row.get(1)?,
            file_name: row.get(2)?,
            description: row.get(3)?,
            uploaded_at: datetime_at(row, 4)?.unwrap_or_default(),
            row_count: row.get(5)?,
            column_count: row.get(6)?,
            is_processed: row.get(7)?,
            processed_at: datetime_at(row, 8)?,
        })
    }
}

fn datetime_at(row: &Row<'_>, index: usize) -> duckdb::Result<Option<NaiveDateTime>> {
    match SqlValue::from_value_ref(row.get_ref(index)?) {
        SqlValue::DateTime(value) => Ok(Some(value)),
        _ => Ok(None),
    }
}

/// Leading rows of a table. NULL cells are [`SqlValue::Null`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableData {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

pub struct Catalog<'c> {
    connection: &'c Connection,
}

impl<'c> Catalog<'c> {
    pub fn new(connection: &'c Connection) -> Self {
        Catalog { connection }
    }

    pub fn ensure_schema(&self) -> Result<(), IngestError> {
        Ok(self.connection.execute_batch(CREATE_DESCRIPTOR_TABLE)?)
    }

    /// Records an upload: a new descriptor for a new table, otherwise the row count
    /// grows and the processing time is refreshed.
    pub fn upsert(
        &self,
        table: &str,
        file_name: &str,
        description: Option<&str>,
        rows_inserted: usize,
        column_count: usize,
    ) -> Result<TableDescriptor, IngestError> {
        let now = SqlValue::DateTime(Utc::now().naive_utc());
        let rows_inserted = rows_inserted as i64;
        let column_count = column_count as i32;
        let updated = self.connection.execute(
            r#"UPDATE "DynamicTables"
               SET "RowCount" = "RowCount" + ?, "ColumnCount" = ?, "IsProcessed" = true, "ProcessedAt" = ?
               WHERE lower("TableName") = lower(?)"#,
            params![rows_inserted, column_count, now, table],
        )?;
        if updated == 0 {
            self.connection.execute(
                r#"INSERT INTO "DynamicTables"
                   ("TableName", "FileName", "Description", "UploadedAt", "RowCount", "ColumnCount", "IsProcessed", "ProcessedAt")
                   VALUES (?, ?, ?, ?, ?, ?, true, ?)"#,
                params![table, file_name, description, now, rows_inserted, column_count, now],
            )?;
        }
        self.get(table)?
            .ok_or_else(|| CatalogError::TableNotFound(table.to_owned()).into())
    }

    pub fn get(&self, table: &str) -> Result<Option<TableDescriptor>, IngestError> {
        let mut statement = self
            .connection
            .prepare(&format!(r#"{SELECT_DESCRIPTOR} WHERE lower("TableName") = lower(?)"#))?;
        let mut rows = statement.query([table])?;
        match rows.next()? {
            Some(row) => Ok(Some(TableDescriptor::from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Every descriptor, oldest upload first.
    pub fn list(&self) -> Result<Vec<TableDescriptor>, IngestError> {
        let mut statement = self
            .connection
            .prepare(&format!(r#"{SELECT_DESCRIPTOR} ORDER BY "UploadedAt", "Id""#))?;
        let descriptors = statement
            .query_map([], TableDescriptor::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(descriptors)
    }

    /// Reads at most `limit` rows of `table` in insertion order, identity included,
    /// with columns in their stored order.
    pub fn read_table(&self, table: &str, limit: usize) -> Result<TableData, IngestError> {
        let stored = find_table(self.connection, table)?
            .ok_or_else(|| CatalogError::TableNotFound(table.to_owned()))?;
        let columns: Vec<String> = all_columns(self.connection, &stored)?
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        let has_identity = columns.iter().any(|name| name.eq_ignore_ascii_case(IDENTITY_COLUMN));
        let order = if has_identity {
            format!(" ORDER BY {}", quote_identifier(IDENTITY_COLUMN))
        } else {
            String::new()
        };
        let sql = format!("SELECT * FROM {}{} LIMIT ?", quote_identifier(&stored), order);

        let mut statement = self.connection.prepare(&sql)?;
        let mut result = statement.query([limit as i64])?;
        let mut rows = Vec::new();
        while let Some(row) = result.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for index in 0..columns.len() {
                values.push(SqlValue::from_value_ref(row.get_ref(index)?));
            }
            rows.push(values);
        }
        Ok(TableData {
            table: stored,
            columns,
            rows,
        })
    }

    /// Drops the table with its identity sequence and forgets its descriptor.
    /// Returns the stored name.
    pub fn delete_table(&self, table: &str) -> Result<String, IngestError> {
        if table.eq_ignore_ascii_case(DESCRIPTOR_TABLE) {
            Err(CatalogError::ReservedName(table.to_owned()))?
        }
        let stored = find_table(self.connection, table)?;
        let descriptor = self.get(table)?;
        let name = match (stored, descriptor) {
            (Some(stored), _) => stored,
            (None, Some(descriptor)) => descriptor.table_name,
            (None, None) => Err(CatalogError::TableNotFound(table.to_owned()))?,
        };

        self.connection.execute_batch("BEGIN TRANSACTION")?;
        let result = self
            .connection
            .execute_batch(&drop_table_sql(&name))
            .and_then(|_| {
                self.connection
                    .execute(r#"DELETE FROM "DynamicTables" WHERE lower("TableName") = lower(?)"#, [&name])
            });
        match result {
            Ok(_) => {
                self.connection.execute_batch("COMMIT")?;
                log::info!("Deleted table '{}'", name);
                Ok(name)
            }
            Err(error) => {
                self.connection.execute_batch("ROLLBACK")?;
                Err(error.into())
            }
        }
    }
}
