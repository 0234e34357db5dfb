use crate::error::IngestError;
use crate::helpers::xml::XmlAttributeHelper;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::xml::XmlReader;
use crate::helpers::xml::XmlTextContextHelper;
use crate::helpers::zip::ZipHelper;
use crate::match_xml_events;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::excel;
use crate::spreadsheet::excel::load_relationships;
use crate::spreadsheet::grid::Grid;
use crate::spreadsheet::reference::index_to_reference;
use crate::spreadsheet::reference::reference_to_index;
use crate::spreadsheet::RawCell;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use quick_xml::events::Event;
use quick_xml::name::QName;
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::BufRead;
use std::io::Cursor;
use zip::ZipArchive;

const TAG_CUSTOM_FORMATS: QName = QName(b"numFmts");
const TAG_CUSTOM_FORMAT: QName = QName(b"numFmt");
const TAG_FORMAT_INDEXES: QName = QName(b"cellXfs");
const TAG_FORMAT_INDEX: QName = QName(b"xf");
const TAG_SHARED_STRING_ITEM: QName = QName(b"si");
const TAG_PHONETIC_TEXT: QName = QName(b"rPh");
const TAG_TEXT: QName = QName(b"t");
const TAG_WORKBOOK_PROPERTIES: QName = QName(b"workbookPr");
const TAG_SHEET: QName = QName(b"sheet");
const TAG_ROW: QName = QName(b"row");
const TAG_CELL: QName = QName(b"c");
const TAG_INLINE_STRING: QName = QName(b"is");
const TAG_VALUE: QName = QName(b"v");

/// Office Open XML workbook held in memory.
pub(crate) struct XlsxSpreadsheet {
    name: String,
    zip: ZipArchive<Cursor<Vec<u8>>>,
    /// Cell type per style index (`s` attribute).
    number_formats: Vec<CellType>,
    shared_strings: Vec<String>,
    /// `(sheet name, part path)` in workbook order.
    sheets: Vec<(String, String)>,
}

impl XlsxSpreadsheet {
    pub(crate) fn open(data: Vec<u8>, file_name: &str) -> Result<XlsxSpreadsheet, IngestError> {
        if excel::is_password_protected(&data) {
            Err(SpreadsheetError::PasswordProtected(file_name.to_owned()))?;
        }
        let mut zip = ZipArchive::new(Cursor::new(data))?;
        let (sheets, is_1904) = load_workbook(&mut zip)?;
        if sheets.is_empty() {
            Err(SpreadsheetError::EmptyWorkbook(file_name.to_owned()))?
        }
        let number_formats = load_number_formats(&mut zip, is_1904)?;
        let shared_strings = load_shared_strings(&mut zip)?;
        Ok(XlsxSpreadsheet {
            name: file_name.to_owned(),
            zip,
            number_formats,
            shared_strings,
            sheets,
        })
    }

    fn resolve(&self, kind: CellType, value: &str) -> RawCell {
        match kind {
            CellType::SharedString => value
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|index| self.shared_strings.get(index))
                .map(|string| RawCell::Text(string.to_owned()))
                .unwrap_or(RawCell::Null),
            kind => kind.to_raw_cell(value),
        }
    }
}

impl Spreadsheet for XlsxSpreadsheet {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.to_owned()).collect()
    }

    fn read_grid(&mut self, index: usize) -> Result<Grid, IngestError> {
        let (sheet_name, zip_path) = self
            .sheets
            .get(index)
            .cloned()
            .ok_or(SpreadsheetError::SheetIndexOutOfRange { index, count: self.sheets.len() })?;
        let mut cells = Vec::<(usize, usize, CellType, String)>::new();
        {
            let number_formats = &self.number_formats;
            let mut reader = self
                .zip
                .xml_reader(&zip_path)?
                .ok_or_else(|| SpreadsheetError::FileError(zip_path.to_owned()))?;
            let mut row_count = 0usize;
            let mut col_count = 0usize;
            let mut row = 0usize;
            let mut col = 0usize;
            let mut kind = CellType::default();
            let mut value = String::new();
            match_xml_events!(reader => {
                Event::Start(event) if event.name() == TAG_ROW => {
                    if let Some(number) = event.parse_attribute_value::<usize>("r")? {
                        row_count = number.saturating_sub(1);
                    }
                    col_count = 0;
                }
                Event::End(event) if event.name() == TAG_ROW => {
                    row_count += 1;
                }
                Event::Start(event) if event.name() == TAG_CELL => {
                    (row, col) = event
                        .get_attribute_value("r")?
                        .and_then(|reference| reference_to_index(&reference))
                        .unwrap_or((row_count, col_count));
                    col_count = col + 1;
                    let t = event.get_attribute_value("t")?;
                    let style = event.parse_attribute_value::<usize>("s")?;
                    kind = cell_type(number_formats, t.as_deref(), style);
                    value.clear();
                }
                Event::Start(event) if event.name() == TAG_INLINE_STRING => {
                    value = read_string_value(&mut reader, TAG_INLINE_STRING, false)?;
                }
                Event::Start(event) if event.name() == TAG_VALUE => {
                    value = read_string_value(&mut reader, TAG_VALUE, true)?;
                }
                Event::End(event) if event.name() == TAG_CELL => {
                    if kind == CellType::Error {
                        log::debug!(
                            "Error value '{}' at {}!{} read as NULL",
                            value,
                            sheet_name,
                            index_to_reference(row, col)
                        );
                    } else if !value.is_empty() {
                        cells.push((row, col, kind, std::mem::take(&mut value)));
                    }
                    kind = CellType::default();
                }
            });
        }

        let mut grid = Grid::new();
        for (row, col, kind, value) in cells {
            grid.push(Cell {
                row,
                col,
                value: self.resolve(kind, &value),
            });
        }
        log::debug!("Read {} cell(s) from sheet '{}' of '{}'", grid.cells.len(), sheet_name, self.name);
        Ok(grid)
    }
}

/// Maps the `t` and `s` attributes of a `<c>` element to a cell type.
fn cell_type(number_formats: &[CellType], t: Option<&str>, style: Option<usize>) -> CellType {
    match t {
        Some("inlineStr") | Some("str") => CellType::InlineString,
        Some("s") => CellType::SharedString,
        Some("d") => CellType::IsoDateTime,
        Some("b") => CellType::Boolean,
        Some("e") => CellType::Error,
        _ => style
            .map(|index| excel::number_format(number_formats, index))
            .unwrap_or(CellType::Number),
    }
}

/// Reads sheet names with their part paths, and whether the workbook uses the 1904 date system.
fn load_workbook(zip: &mut ZipArchive<Cursor<Vec<u8>>>) -> Result<(Vec<(String, String)>, bool), IngestError> {
    let relationships = load_relationships(zip, "xl/_rels/workbook.xml.rels")?;
    let mut reader = zip
        .xml_reader("xl/workbook.xml")?
        .ok_or_else(|| SpreadsheetError::FileError("xl/workbook.xml".to_string()))?;
    let mut sheets: Vec<(String, String)> = Vec::new();
    let mut is_1904 = false;
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_SHEET => {
            let mut name = None::<Cow<str>>;
            let mut id = None::<Cow<str>>;
            for result in event.attributes() {
                let attribute = result?;
                let key = attribute.key.local_name();
                if key.as_ref() == b"name" {
                    name = Some(attribute.get_value()?);
                } else if key.as_ref() == b"id" {
                    id = Some(attribute.get_value()?);
                }
            }
            if let Some((name, id)) = name.zip(id) {
                if let Some(path) = relationships.get(id.as_ref()) {
                    sheets.push((name.to_string(), path.to_owned()));
                }
            }
        }
        Event::Start(event) if event.name() == TAG_WORKBOOK_PROPERTIES => {
            is_1904 = event
                .get_attribute_value("date1904")?
                .map(|value| value == "1" || value == "true")
                .unwrap_or(false);
        }
    });
    Ok((sheets, is_1904))
}

/// Reads `styles.xml` into a cell type per style index. A package without styles has none.
fn load_number_formats(zip: &mut ZipArchive<Cursor<Vec<u8>>>, is_1904: bool) -> Result<Vec<CellType>, IngestError> {
    let mut reader = match zip.xml_reader("xl/styles.xml")? {
        Some(reader) => reader,
        None => return Ok(Vec::new()),
    };

    let mut custom_formats_context = false;
    let mut custom_formats = HashMap::<String, CellType>::new();
    let mut format_indexes_context = false;
    let mut format_indexes = Vec::<String>::new();

    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_CUSTOM_FORMATS => custom_formats_context = true,
        Event::End(event) if event.name() == TAG_CUSTOM_FORMATS => custom_formats_context = false,
        Event::Start(event) if custom_formats_context && event.name() == TAG_CUSTOM_FORMAT => {
            let id = event.get_attribute_value("numFmtId")?;
            let format = event.get_attribute_value("formatCode")?;
            if let Some((id, format)) = id.zip(format) {
                custom_formats.insert(id.to_string(), CellType::parse_custom_number_format(&format, is_1904));
            }
        }
        Event::Start(event) if event.name() == TAG_FORMAT_INDEXES => format_indexes_context = true,
        Event::End(event) if event.name() == TAG_FORMAT_INDEXES => break,
        Event::Start(event) if format_indexes_context && event.name() == TAG_FORMAT_INDEX => {
            let id = event.get_attribute_value("numFmtId")?.unwrap_or(Cow::Borrowed("0"));
            format_indexes.push(id.to_string());
        }
    });

    Ok(excel::load_number_formats(format_indexes, custom_formats, is_1904))
}

fn load_shared_strings(zip: &mut ZipArchive<Cursor<Vec<u8>>>) -> Result<Vec<String>, IngestError> {
    let mut shared_strings = Vec::<String>::new();
    let mut reader = match zip.xml_reader("xl/sharedStrings.xml")? {
        Some(reader) => reader,
        None => return Ok(shared_strings),
    };
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_SHARED_STRING_ITEM => {
            shared_strings.push(read_string_value(&mut reader, TAG_SHARED_STRING_ITEM, false)?);
        }
    });
    Ok(shared_strings)
}

/// Collects the text up to `end_tag`, skipping phonetic runs.
/// `is_text_content` is set for `<v>`, whose text is not wrapped in `<t>`.
fn read_string_value<R: BufRead>(reader: &mut XmlReader<R>, end_tag: QName, is_text_content: bool) -> Result<String, IngestError> {
    let mut is_phonetic_text = false;
    let mut is_text = is_text_content;
    let mut text = String::new();
    match_xml_events!(reader => {
        Event::End(event) if event.name() == end_tag => break,
        Event::Start(event) if event.name() == TAG_PHONETIC_TEXT => is_phonetic_text = true,
        Event::End(event) if event.name() == TAG_PHONETIC_TEXT => is_phonetic_text = false,
        Event::Start(event) if !is_phonetic_text && event.name() == TAG_TEXT => is_text = true,
        Event::End(event) if is_text && event.name() == TAG_TEXT => is_text = false,
        Event::Text(event) if is_text => text.push_str(&event.xml_content()?),
        Event::CData(event) if is_text => text.push_str(&event.xml_content()?),
        Event::GeneralRef(event) if is_text => text.push_bytes_ref(&event)?,
    });
    Ok(text)
}
