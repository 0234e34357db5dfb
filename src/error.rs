use thiserror::Error;

/// Crate-wide error type.
/// Aggregates errors from the standard library, the parsing and database dependencies,
/// and every internal module so `?` works across layer boundaries.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("{0}")]
    WithContextError(String),

    /// Rejected before any storage interaction (extension, size, empty stream, reserved name).
    #[error("Input rejected: {reason}")]
    InputRejected { reason: String },

    // Standard library errors
    #[error("{0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    ParseIntError(#[from] std::num::ParseIntError),

    #[error("{0}")]
    ParseFloatError(#[from] std::num::ParseFloatError),

    #[error("{0}")]
    StringEncodingError(#[from] std::str::Utf8Error),

    // Third-party library errors
    #[error("{0}")]
    DuckDBError(#[from] duckdb::Error),

    #[error("{0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("{0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("{0}")]
    XmlEncodingError(#[from] quick_xml::encoding::EncodingError),

    #[error("{0}")]
    XmlAttributeError(#[from] quick_xml::events::attributes::AttrError),

    #[error("{0}")]
    JsonError(#[from] serde_json::Error),

    // Helper module errors
    #[error("{0}")]
    CfbHelperError(#[from] crate::helpers::cfb::CfbError),

    #[error("{0}")]
    XmlHelperError(#[from] crate::helpers::xml::XmlError),

    #[error("{0}")]
    Biff8HelperError(#[from] crate::helpers::biff8::Biff8Error),

    // Spreadsheet module errors
    #[error("{0}")]
    SpreadsheetError(#[from] crate::spreadsheet::SpreadsheetError),

    #[error("{0}")]
    XlsError(#[from] crate::spreadsheet::xls::XlsError),

    // Schema module errors
    #[error("{0}")]
    SqlTypeError(#[from] crate::schema::sql_type::SqlTypeError),

    // Database module errors
    #[error("{0}")]
    MaterializeError(#[from] crate::database::materializer::MaterializeError),

    #[error("{0}")]
    CatalogError(#[from] crate::database::catalog::CatalogError),

    #[error("{0}")]
    ConfigError(#[from] crate::config::ConfigError),
}

impl IngestError {
    /// True when the failure happened before anything touched storage.
    pub fn is_input_rejection(&self) -> bool {
        matches!(self, IngestError::InputRejected { .. })
    }
}

pub(crate) trait ResultOptionChain {
    fn ok_none_else<F>(self, f: F) -> Self
    where
        F: FnOnce() -> Self;
}

impl<T, E> ResultOptionChain for Result<Option<T>, E> {
    fn ok_none_else<F>(self, f: F) -> Self
    where
        F: FnOnce() -> Self,
    {
        match self {
            Ok(None) => f(),
            _ => self,
        }
    }
}

pub(crate) trait ResultMessage {
    fn with_prefix(self, message: &str) -> Self;
}

impl<T> ResultMessage for Result<T, IngestError> {
    fn with_prefix(self, message: &str) -> Self {
        self.map_err(|e| match e {
            // Keep the variant so callers can still tell a rejection apart.
            IngestError::InputRejected { reason } => IngestError::InputRejected {
                reason: format!("{}: {}", message, reason),
            },
            e => IngestError::WithContextError(format!("{}: {}", message, e)),
        })
    }
}
