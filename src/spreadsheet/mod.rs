//! # Spreadsheet reading
//!
//! Turns an uploaded workbook stream into a header row plus loosely typed data rows.
//! Two container formats are supported, chosen by file-name extension:
//!
//! - `.xlsx` / `.xlsm`: Office Open XML packages (ZIP of SpreadsheetML parts)
//! - `.xls`: Excel 97-2003 BIFF8 workbooks inside an OLE compound file
//!
//! Cells keep the scalar type the container exposes. A number whose number format is
//! a date or time format is returned as [`RawCell::DateTime`], which matters for type
//! inference downstream.

pub(crate) mod cell;
pub(crate) mod excel;
pub(crate) mod grid;
pub(crate) mod reference;
pub(crate) mod xls;
pub(crate) mod xlsx;

use crate::error::IngestError;
use crate::error::ResultMessage;
use crate::spreadsheet::grid::Grid;
use crate::spreadsheet::xls::XlsSpreadsheet;
use crate::spreadsheet::xlsx::XlsxSpreadsheet;
use chrono::NaiveDateTime;
use std::fmt::Display;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Format used when a date-time cell is rendered as text.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum SpreadsheetError {
    #[error("Workbook part '{0}' is missing")]
    FileError(String),

    #[error("Workbook '{0}' is password protected")]
    PasswordProtected(String),

    #[error("Workbook '{0}' contains no worksheets")]
    EmptyWorkbook(String),

    #[error("Sheet index {index} is out of range, workbook has {count} sheet(s)")]
    SheetIndexOutOfRange { index: usize, count: usize },

    #[error("Sheet spans {rows} row(s) by {columns} column(s), more than {limit} cells")]
    SheetTooLarge { rows: usize, columns: usize, limit: usize },
}

/// One loosely typed value read from a spreadsheet cell.
#[derive(Clone, Debug, PartialEq)]
pub enum RawCell {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl RawCell {
    /// Largest magnitude an `f64` represents without losing integer precision.
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

    /// Classifies a number read from a container: integral values become
    /// [`RawCell::Integer`], everything else [`RawCell::Float`].
    pub fn from_number(value: f64) -> RawCell {
        if value.is_finite() && value.fract() == 0.0 && value.abs() <= Self::MAX_SAFE_INTEGER {
            RawCell::Integer(value as i64)
        } else {
            RawCell::Float(value)
        }
    }

    /// True for [`RawCell::Null`] and for text that is empty after trimming.
    pub fn is_blank(&self) -> bool {
        match self {
            RawCell::Null => true,
            RawCell::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }
}

impl Display for RawCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawCell::Null => Ok(()),
            RawCell::Text(text) => f.write_str(text),
            RawCell::Integer(value) => write!(f, "{value}"),
            RawCell::Float(value) => write!(f, "{value}"),
            RawCell::Bool(value) => write!(f, "{value}"),
            RawCell::DateTime(value) => write!(f, "{}", value.format(DATETIME_FORMAT)),
        }
    }
}

/// Header row plus data rows of one sheet. Every row is as wide as the header.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SheetRows {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<RawCell>>,
}

impl SheetRows {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Cells of one column, with short rows padded by [`RawCell::Null`].
    pub fn column(&self, index: usize) -> Vec<RawCell> {
        self.rows
            .iter()
            .map(|row| row.get(index).cloned().unwrap_or(RawCell::Null))
            .collect()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpreadsheetFormat {
    Xls,
    Xlsx,
}

impl SpreadsheetFormat {
    /// Picks the container format from the file extension, ignoring case.
    /// Anything else is rejected before the content is looked at.
    pub fn from_file_name(file_name: &str) -> Result<SpreadsheetFormat, IngestError> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|extension| extension.to_str())
            .map(|extension| extension.to_ascii_lowercase());
        match extension.as_deref() {
            Some("xlsx") | Some("xlsm") => Ok(SpreadsheetFormat::Xlsx),
            Some("xls") => Ok(SpreadsheetFormat::Xls),
            Some(other) => Err(IngestError::InputRejected {
                reason: format!("unsupported file extension '.{other}'"),
            }),
            None => Err(IngestError::InputRejected {
                reason: format!("file '{file_name}' has no extension"),
            }),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct ReadOptions {
    pub sheet_index: usize,
    /// Drop data rows in which every cell is blank.
    pub skip_empty_rows: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            sheet_index: 0,
            skip_empty_rows: true,
        }
    }
}

/// Common surface of the two container readers.
pub(crate) trait Spreadsheet {
    fn sheet_names(&self) -> Vec<String>;

    /// Collects every populated cell of the sheet at `index`.
    fn read_grid(&mut self, index: usize) -> Result<Grid, IngestError>;
}

/// Reads one sheet of a workbook stream.
///
/// The stream is drained into memory and released before this returns. An empty
/// sheet is not an error: it yields empty headers and no rows.
pub fn read_sheet<R: Read>(stream: R, file_name: &str, options: &ReadOptions) -> Result<SheetRows, IngestError> {
    let mut spreadsheet = open(stream, file_name)?;
    let count = spreadsheet.sheet_names().len();
    if options.sheet_index >= count {
        Err(SpreadsheetError::SheetIndexOutOfRange {
            index: options.sheet_index,
            count,
        })?;
    }
    let grid = spreadsheet
        .read_grid(options.sheet_index)
        .with_prefix(file_name)?;
    Ok(grid.into_sheet_rows(options.skip_empty_rows)?)
}

/// Lists worksheet names in workbook order.
pub fn sheet_names<R: Read>(stream: R, file_name: &str) -> Result<Vec<String>, IngestError> {
    Ok(open(stream, file_name)?.sheet_names())
}

fn open<R: Read>(mut stream: R, file_name: &str) -> Result<Box<dyn Spreadsheet>, IngestError> {
    let format = SpreadsheetFormat::from_file_name(file_name)?;
    let mut data = Vec::new();
    stream.read_to_end(&mut data)?;
    let spreadsheet: Box<dyn Spreadsheet> = match format {
        SpreadsheetFormat::Xlsx => Box::new(XlsxSpreadsheet::open(data, file_name).with_prefix(file_name)?),
        SpreadsheetFormat::Xls => Box::new(XlsSpreadsheet::open(data, file_name).with_prefix(file_name)?),
    };
    Ok(spreadsheet)
}
