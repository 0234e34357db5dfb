//! SQL text for dynamic tables and the catalog lookups that precede it.

use crate::error::IngestError;
use crate::schema::naming::IDENTITY_COLUMN;
use crate::schema::SqlType;
use duckdb::Connection;
use serde::Serialize;

/// Catalog schema that dynamic tables live in.
const SCHEMA: &str = "main";

/// A column rows are inserted into, in table order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TargetColumn {
    pub name: String,
    pub sql_type: SqlType,
    /// Type as the engine spells it, used to cast decimal parameters.
    pub declared: String,
}

impl TargetColumn {
    pub fn new(name: &str, sql_type: SqlType) -> TargetColumn {
        TargetColumn {
            name: name.to_owned(),
            sql_type,
            declared: sql_type.to_duckdb(),
        }
    }
}

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Sequence feeding the identity column of `table`.
pub fn sequence_name(table: &str) -> String {
    format!("{table}_id_seq")
}

/// Sequence plus table with an identity key and one column per target, both guarded
/// by `IF NOT EXISTS`.
pub fn create_table_sql(table: &str, columns: &[TargetColumn]) -> String {
    let sequence = sequence_name(table);
    let mut definitions = vec![format!(
        "{} BIGINT PRIMARY KEY DEFAULT nextval({})",
        quote_identifier(IDENTITY_COLUMN),
        quote_literal(&sequence)
    )];
    definitions.extend(
        columns
            .iter()
            .map(|column| format!("{} {}", quote_identifier(&column.name), column.declared)),
    );
    format!(
        "CREATE SEQUENCE IF NOT EXISTS {};\nCREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
        quote_identifier(&sequence),
        quote_identifier(table),
        definitions.join(",\n    ")
    )
}

/// Single-row insert with one placeholder per target column.
///
/// Decimal parameters arrive as text, so their placeholder casts to the column type.
pub fn insert_sql(table: &str, columns: &[TargetColumn]) -> String {
    let names: Vec<String> = columns.iter().map(|column| quote_identifier(&column.name)).collect();
    let placeholders: Vec<String> = columns
        .iter()
        .map(|column| match column.sql_type {
            SqlType::Decimal => format!("CAST(? AS {})", column.declared),
            _ => "?".to_owned(),
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(table),
        names.join(", "),
        placeholders.join(", ")
    )
}

pub fn drop_table_sql(table: &str) -> String {
    format!(
        "DROP TABLE IF EXISTS {};\nDROP SEQUENCE IF EXISTS {};",
        quote_identifier(table),
        quote_identifier(&sequence_name(table))
    )
}

/// Stored spelling of the table whose name equals `table` ignoring case.
pub fn find_table(connection: &Connection, table: &str) -> Result<Option<String>, IngestError> {
    let mut statement = connection.prepare(
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = ? AND lower(table_name) = lower(?) \
         ORDER BY table_name LIMIT 1",
    )?;
    let mut rows = statement.query([SCHEMA, table])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

/// Every column of `table` in ordinal order with its declared type.
pub fn all_columns(connection: &Connection, table: &str) -> Result<Vec<(String, String)>, IngestError> {
    let mut statement = connection.prepare(
        "SELECT column_name, data_type FROM information_schema.columns \
         WHERE table_schema = ? AND table_name = ? \
         ORDER BY ordinal_position",
    )?;
    let columns = statement
        .query_map([SCHEMA, table], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Insertable columns of an existing table: everything but the identity key.
///
/// A declared type outside the column vocabulary is treated as text and left to the
/// engine's own cast.
pub fn table_columns(connection: &Connection, table: &str) -> Result<Vec<TargetColumn>, IngestError> {
    Ok(all_columns(connection, table)?
        .into_iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case(IDENTITY_COLUMN))
        .map(|(name, declared)| {
            let sql_type = SqlType::parse(&declared).unwrap_or_else(|_| {
                log::warn!("Column '{}' of '{}' has type {}, values are bound as text", name, table, declared);
                SqlType::NVarChar(None)
            });
            TargetColumn {
                name,
                sql_type,
                declared,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<TargetColumn> {
        vec![
            TargetColumn::new("Ad", SqlType::NVarChar(Some(50))),
            TargetColumn::new("Tutar", SqlType::Decimal),
            TargetColumn::new("Tarih", SqlType::DateTime2),
        ]
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_identifier("Ad"), "\"Ad\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn create_table_statement() {
        assert_eq!(
            create_table_sql("Satis", &columns()),
            "CREATE SEQUENCE IF NOT EXISTS \"Satis_id_seq\";\n\
             CREATE TABLE IF NOT EXISTS \"Satis\" (\n    \
             \"Id\" BIGINT PRIMARY KEY DEFAULT nextval('Satis_id_seq'),\n    \
             \"Ad\" VARCHAR(50),\n    \
             \"Tutar\" DECIMAL(18,2),\n    \
             \"Tarih\" TIMESTAMP\n);"
        );
    }

    #[test]
    fn insert_statement_casts_decimals() {
        assert_eq!(
            insert_sql("Satis", &columns()),
            "INSERT INTO \"Satis\" (\"Ad\", \"Tutar\", \"Tarih\") VALUES (?, CAST(? AS DECIMAL(18,2)), ?)"
        );
    }

    #[test]
    fn catalog_lookups_ignore_case_and_skip_identity() {
        let connection = Connection::open_in_memory().unwrap();
        connection.execute_batch(&create_table_sql("Satis", &columns())).unwrap();

        assert_eq!(find_table(&connection, "SATIS").unwrap(), Some("Satis".to_owned()));
        assert_eq!(find_table(&connection, "Other").unwrap(), None);

        let found = table_columns(&connection, "Satis").unwrap();
        let names: Vec<&str> = found.iter().map(|column| column.name.as_str()).collect();
        assert_eq!(names, vec!["Ad", "Tutar", "Tarih"]);
        assert_eq!(found[0].sql_type, SqlType::NVarChar(None));
        assert_eq!(found[1].sql_type, SqlType::Decimal);
        assert_eq!(found[2].sql_type, SqlType::DateTime2);
    }

    #[test]
    fn drop_removes_table_and_sequence() {
        let connection = Connection::open_in_memory().unwrap();
        connection.execute_batch(&create_table_sql("Satis", &columns())).unwrap();
        connection.execute_batch(&drop_table_sql("Satis")).unwrap();
        assert_eq!(find_table(&connection, "Satis").unwrap(), None);
        // The sequence is gone too, so the table can be created again from scratch.
        connection.execute_batch(&create_table_sql("Satis", &columns())).unwrap();
    }
}
