use crate::error::IngestError;
use serde::Serialize;
use serde::Serializer;
use std::fmt::Display;
use thiserror::Error;

/// Widths a string column is rounded up to, before falling back to `max`.
const NVARCHAR_SIZES: [u32; 4] = [10, 50, 255, 1000];

#[derive(Error, Debug)]
pub enum SqlTypeError {
    #[error("Unsupported column type '{0}'")]
    TypeError(String),
}

/// Column type vocabulary produced by inference.
///
/// The names follow the analysis vocabulary (`bit`, `int`, `decimal(18,2)`,
/// `datetime2`, `nvarchar(n)`); [`SqlType::to_duckdb`] gives the DDL spelling.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SqlType {
    Bit,
    Int,
    /// Always `decimal(18,2)`.
    Decimal,
    DateTime2,
    /// `None` is `nvarchar(max)`.
    NVarChar(Option<u32>),
}

impl SqlType {
    /// Fallback for columns without a single non-null value.
    pub const DEFAULT_TEXT: SqlType = SqlType::NVarChar(Some(255));

    pub const DECIMAL_PRECISION: u32 = 18;
    pub const DECIMAL_SCALE: u32 = 2;

    /// Smallest string type that holds `length` characters.
    pub fn nvarchar_for_length(length: usize) -> SqlType {
        NVARCHAR_SIZES
            .iter()
            .find(|size| length <= **size as usize)
            .map(|size| SqlType::NVarChar(Some(*size)))
            .unwrap_or(SqlType::NVarChar(None))
    }

    pub fn to_duckdb(&self) -> String {
        match self {
            SqlType::Bit => "BOOLEAN".to_owned(),
            SqlType::Int => "INTEGER".to_owned(),
            SqlType::Decimal => format!("DECIMAL({},{})", Self::DECIMAL_PRECISION, Self::DECIMAL_SCALE),
            SqlType::DateTime2 => "TIMESTAMP".to_owned(),
            SqlType::NVarChar(Some(size)) => format!("VARCHAR({size})"),
            SqlType::NVarChar(None) => "VARCHAR".to_owned(),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, SqlType::NVarChar(_))
    }

    /// Parses either vocabulary names or DuckDB type names, ignoring case and spaces.
    ///
    /// DuckDB reports `VARCHAR(n)` columns as plain `VARCHAR` in its catalog, so a
    /// string column read back from an existing table is `nvarchar(max)`.
    pub fn parse(name: &str) -> Result<SqlType, IngestError> {
        let normalized: String = name
            .chars()
            .filter(|char| !char.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        let kind = match normalized.as_str() {
            "bit" | "bool" | "boolean" | "logical" => SqlType::Bit,
            "int" | "integer" | "int4" | "signed" => SqlType::Int,
            "decimal" | "numeric" | "decimal(18,2)" | "numeric(18,2)" => SqlType::Decimal,
            "datetime2" | "datetime" | "timestamp" | "timestampwithouttimezone" => SqlType::DateTime2,
            "nvarchar" | "nvarchar(max)" | "varchar" | "varchar(max)" | "text" | "string" => SqlType::NVarChar(None),
            other => {
                let size = other
                    .strip_prefix("nvarchar(")
                    .or_else(|| other.strip_prefix("varchar("))
                    .and_then(|rest| rest.strip_suffix(')'))
                    .and_then(|size| size.parse::<u32>().ok())
                    .filter(|size| *size > 0);
                match size {
                    Some(size) => SqlType::NVarChar(Some(size)),
                    None => Err(SqlTypeError::TypeError(name.to_owned()))?,
                }
            }
        };
        Ok(kind)
    }
}

impl Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlType::Bit => f.write_str("bit"),
            SqlType::Int => f.write_str("int"),
            SqlType::Decimal => write!(f, "decimal({},{})", Self::DECIMAL_PRECISION, Self::DECIMAL_SCALE),
            SqlType::DateTime2 => f.write_str("datetime2"),
            SqlType::NVarChar(Some(size)) => write!(f, "nvarchar({size})"),
            SqlType::NVarChar(None) => f.write_str("nvarchar(max)"),
        }
    }
}

impl Serialize for SqlType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
