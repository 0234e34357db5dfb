use crate::error::IngestError;
use crate::error::ResultOptionChain;
use crate::helpers::biff8::Biff8Reader;
use crate::helpers::cfb::Cfb;
use crate::match_biff8_record;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::excel;
use crate::spreadsheet::grid::Grid;
use crate::spreadsheet::reference::index_to_reference;
use crate::spreadsheet::RawCell;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use either::Either;
use std::collections::HashMap;
use thiserror::Error;

// BIFF8 record identifiers
const FORMULA: u16 = 6;
const EOF: u16 = 10;
const DATE1904: u16 = 34;
const FILE_PASS: u16 = 47;
const CODE_PAGE: u16 = 66;
const BOUND_SHEET8: u16 = 133;
const MUL_RK: u16 = 189;
const XF: u16 = 224;
const SST: u16 = 252;
const LABEL_SST: u16 = 253;
const NUMBER: u16 = 515;
const LABEL: u16 = 516;
const BOOL_ERR: u16 = 517;
const STRING: u16 = 519;
const ARRAY: u16 = 545;
const TABLE: u16 = 566;
const RK: u16 = 638;
const FORMAT: u16 = 1054;
const SHR_FMLA: u16 = 1212;
const BOF: u16 = 2057;

/// BOUNDSHEET8 sheet type for ordinary worksheets (charts and macro sheets are skipped).
const WORKSHEET: u8 = 0;

#[derive(Error, Debug)]
pub enum XlsError {
    #[error("Unsupported code page '{0}'")]
    CodePageError(u16),
}

/// How a cell record identifies its type: directly, or through its XF style index.
type CellKind = Either<CellType, usize>;

/// Legacy Excel 97-2003 workbook held in memory.
pub(crate) struct XlsSpreadsheet {
    name: String,
    reader: Biff8Reader,
    shared_strings: Vec<String>,
    number_formats: Vec<CellType>,
    /// `(sheet name, BOF offset in the Workbook stream)`.
    sheets: Vec<(String, usize)>,
}

impl XlsSpreadsheet {
    /// Reads the workbook globals: code page, date system, formats, shared strings and sheet offsets.
    pub(crate) fn open(data: Vec<u8>, file_name: &str) -> Result<XlsSpreadsheet, IngestError> {
        let cfb = Cfb::parse(data)?;
        if cfb.exists("EncryptedPackage") {
            Err(SpreadsheetError::PasswordProtected(file_name.to_owned()))?;
        }
        let mut reader = cfb
            .read("Workbook")
            .ok_none_else(|| cfb.read("Book"))?
            .map(Biff8Reader::new)
            .ok_or_else(|| SpreadsheetError::EmptyWorkbook(file_name.to_owned()))?;
        drop(cfb);

        let mut is_1904 = false;
        let mut shared_strings = Vec::new();
        let mut custom_formats: HashMap<String, CellType> = HashMap::new();
        let mut format_indexes: Vec<String> = Vec::new();
        let mut sheets: Vec<(String, usize)> = Vec::new();
        match_biff8_record!(reader => {
            EOF => break,
            FILE_PASS => Err(SpreadsheetError::PasswordProtected(file_name.to_owned()))?,
            DATE1904 => is_1904 = reader.read_u16()? == 1,
            CODE_PAGE => {
                let code_page = reader.read_u16()?;
                reader.encoding = codepage::to_encoding(code_page).ok_or(XlsError::CodePageError(code_page))?;
            }
            FORMAT => {
                let id = reader.read_u16()?;
                let format = reader.read_xl_unicode_string()?;
                custom_formats.insert(id.to_string(), CellType::parse_custom_number_format(&format, is_1904));
            }
            XF => {
                reader.skip(2)?;
                format_indexes.push(reader.read_u16()?.to_string());
            }
            SST => shared_strings = load_shared_strings(&mut reader)?,
            BOUND_SHEET8 => {
                let pointer = reader.read_usize()?;
                reader.skip(1)?;
                let sheet_type = reader.read_u8()?;
                let sheet_name = reader.read_short_xl_unicode_string()?;
                if sheet_type == WORKSHEET {
                    sheets.push((sheet_name, pointer));
                }
            }
        });
        if sheets.is_empty() {
            Err(SpreadsheetError::EmptyWorkbook(file_name.to_owned()))?
        }

        // FORMAT records may precede DATE1904, so the custom formats are re-dated here.
        if is_1904 {
            for kind in custom_formats.values_mut() {
                if *kind == CellType::NumberDateTime1900 {
                    *kind = CellType::NumberDateTime1904;
                }
            }
        }
        let number_formats = excel::load_number_formats(format_indexes, custom_formats, is_1904);

        Ok(XlsSpreadsheet {
            name: file_name.to_owned(),
            reader,
            shared_strings,
            number_formats,
            sheets,
        })
    }

    /// Applies the style or explicit type to a decoded value and resolves shared strings.
    fn resolve(&self, kind: CellKind, value: RawCell) -> RawCell {
        let kind = match kind {
            Either::Left(kind) => kind,
            Either::Right(index) => excel::number_format(&self.number_formats, index),
        };
        match (kind, value) {
            (CellType::SharedString, RawCell::Integer(index)) => usize::try_from(index)
                .ok()
                .and_then(|index| self.shared_strings.get(index))
                .map(|string| RawCell::Text(string.to_owned()))
                .unwrap_or(RawCell::Null),
            (kind, value) => kind.apply(value),
        }
    }
}

impl Spreadsheet for XlsSpreadsheet {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.to_owned()).collect()
    }

    fn read_grid(&mut self, index: usize) -> Result<Grid, IngestError> {
        let (sheet_name, pointer) = self
            .sheets
            .get(index)
            .cloned()
            .ok_or(SpreadsheetError::SheetIndexOutOfRange { index, count: self.sheets.len() })?;
        self.reader.goto(pointer);
        self.reader.next()?;

        let mut cells = Vec::<(usize, usize, CellKind, RawCell)>::new();
        while let Some(tag) = self.reader.next()? {
            match tag {
                BOF | EOF => break,
                MUL_RK => {
                    let row = self.reader.read_u16()? as usize;
                    let col_lower_bound = self.reader.read_u16()? as usize;
                    let col_upper_bound = self.reader.get_u16_back(2)? as usize;
                    for col in col_lower_bound..=col_upper_bound {
                        let index = self.reader.read_u16()? as usize;
                        let value = self.reader.read_rk_number()?;
                        cells.push((row, col, Either::Right(index), RawCell::from_number(value)));
                    }
                }
                BOOL_ERR | NUMBER | RK | LABEL_SST | LABEL | FORMULA => {
                    let row = self.reader.read_u16()? as usize;
                    let col = self.reader.read_u16()? as usize;
                    let (kind, value) = match tag {
                        BOOL_ERR => read_bool_or_error_cell(&mut self.reader)?,
                        NUMBER => read_number_cell(&mut self.reader)?,
                        RK => read_rk_cell(&mut self.reader)?,
                        LABEL_SST => read_label_sst_cell(&mut self.reader)?,
                        LABEL => read_label_cell(&mut self.reader)?,
                        _ => read_formula_cell(&mut self.reader)?,
                    };
                    if kind == Either::Left(CellType::Error) {
                        log::debug!(
                            "Error value at {}!{} read as NULL",
                            sheet_name,
                            index_to_reference(row, col)
                        );
                    }
                    cells.push((row, col, kind, value));
                }
                _ => (),
            }
        }

        let mut grid = Grid::new();
        for (row, col, kind, value) in cells {
            grid.push(Cell {
                row,
                col,
                value: self.resolve(kind, value),
            });
        }
        log::debug!("Read {} cell(s) from sheet '{}' of '{}'", grid.cells.len(), sheet_name, self.name);
        Ok(grid)
    }
}

fn load_shared_strings(reader: &mut Biff8Reader) -> Result<Vec<String>, IngestError> {
    reader.skip(4)?;
    let count = reader.read_usize()?;
    let mut shared_strings = Vec::with_capacity(count.min(65_536));
    for _ in 0..count {
        shared_strings.push(reader.read_xl_unicode_rich_extended_string()?);
    }
    Ok(shared_strings)
}

fn read_bool_or_error_cell(reader: &mut Biff8Reader) -> Result<(CellKind, RawCell), IngestError> {
    reader.skip(2)?;
    let value = reader.read_u8()?;
    let is_error = reader.read_u8()? != 0;
    if is_error {
        Ok((Either::Left(CellType::Error), RawCell::Null))
    } else {
        Ok((Either::Left(CellType::Boolean), RawCell::Bool(value != 0)))
    }
}

fn read_number_cell(reader: &mut Biff8Reader) -> Result<(CellKind, RawCell), IngestError> {
    let index = reader.read_u16()? as usize;
    let value = reader.read_f64()?;
    Ok((Either::Right(index), RawCell::from_number(value)))
}

fn read_rk_cell(reader: &mut Biff8Reader) -> Result<(CellKind, RawCell), IngestError> {
    let index = reader.read_u16()? as usize;
    let value = reader.read_rk_number()?;
    Ok((Either::Right(index), RawCell::from_number(value)))
}

/// The shared string index travels as an integer until the table is consulted.
fn read_label_sst_cell(reader: &mut Biff8Reader) -> Result<(CellKind, RawCell), IngestError> {
    reader.skip(2)?;
    let index = reader.read_usize()?;
    Ok((Either::Left(CellType::SharedString), RawCell::Integer(index as i64)))
}

fn read_label_cell(reader: &mut Biff8Reader) -> Result<(CellKind, RawCell), IngestError> {
    reader.skip(2)?;
    let value = reader.read_xl_unicode_string()?;
    Ok((Either::Left(CellType::InlineString), RawCell::Text(value)))
}

/// Decodes the cached result of a formula, never the formula itself.
///
/// The 8-byte result field holds a double unless its top two bytes are `0xFFFF`, in
/// which case the low byte tags a string (delivered by the STRING record that
/// follows), a boolean, an error or an empty string. A result that cannot be
/// determined reads as null.
fn read_formula_cell(reader: &mut Biff8Reader) -> Result<(CellKind, RawCell), IngestError> {
    let index = reader.read_u16()? as usize;
    let formula = reader.read_u64()?;
    if (formula & 0xFFFF_0000_0000_0000) != 0xFFFF_0000_0000_0000 {
        return Ok((Either::Right(index), RawCell::from_number(f64::from_bits(formula))));
    }
    match formula & 0xFF {
        0 => {
            while matches!(reader.peek(), Some(SHR_FMLA | ARRAY | TABLE)) {
                reader.next()?;
            }
            if reader.peek() == Some(STRING) {
                reader.next()?;
                let value = reader.read_xl_unicode_string()?;
                Ok((Either::Left(CellType::InlineString), RawCell::Text(value)))
            } else {
                Ok((Either::Left(CellType::InlineString), RawCell::Null))
            }
        }
        1 => Ok((Either::Left(CellType::Boolean), RawCell::Bool((formula >> 16) & 0xFF != 0))),
        2 => Ok((Either::Left(CellType::Error), RawCell::Null)),
        flag => {
            if flag != 3 {
                log::debug!("Formula result type {flag} is unknown, read as NULL");
            }
            Ok((Either::Left(CellType::InlineString), RawCell::Null))
        }
    }
}
