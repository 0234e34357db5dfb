#![allow(dead_code)]

use std::fs;
use std::io::Cursor;
use std::io::Write;
use std::path::PathBuf;

use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// A cell of a generated workbook.
#[derive(Clone, Debug)]
pub enum Value {
    Text(String),
    Number(f64),
    Bool(bool),
    /// Date serial stored with a date number format.
    Date(f64),
    /// Formula text with the result the workbook cached for it.
    Formula(String, Cached),
    Empty,
}

/// Last computed result stored beside a formula.
#[derive(Clone, Debug)]
pub enum Cached {
    Number(f64),
    /// Date serial under a date number format.
    Date(f64),
    Text(String),
    Bool(bool),
    Error,
    Nothing,
}

pub fn text(value: &str) -> Value {
    Value::Text(value.to_owned())
}

pub fn num(value: f64) -> Value {
    Value::Number(value)
}

pub fn boolean(value: bool) -> Value {
    Value::Bool(value)
}

pub fn date(serial: f64) -> Value {
    Value::Date(serial)
}

pub fn formula(expression: &str, cached: Cached) -> Value {
    Value::Formula(expression.to_owned(), cached)
}

pub fn empty() -> Value {
    Value::Empty
}

/// Header row of text cells.
pub fn header(names: &[&str]) -> Vec<Value> {
    names.iter().map(|name| text(name)).collect()
}

pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<Value>>,
}

pub fn sheet(name: &str, rows: Vec<Vec<Value>>) -> Sheet {
    Sheet {
        name: name.to_owned(),
        rows,
    }
}

fn column_letters(mut col: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'A' + (col % 26) as u8) as char);
        if col < 26 {
            break;
        }
        col = col / 26 - 1;
    }
    letters.iter().rev().collect()
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn worksheet_xml(rows: &[Vec<Value>]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (row, cells) in rows.iter().enumerate() {
        xml.push_str(&format!(r#"<row r="{}">"#, row + 1));
        for (col, value) in cells.iter().enumerate() {
            let reference = format!("{}{}", column_letters(col), row + 1);
            match value {
                Value::Text(text) => xml.push_str(&format!(
                    r#"<c r="{reference}" t="inlineStr"><is><t>{}</t></is></c>"#,
                    escape(text)
                )),
                Value::Number(number) => xml.push_str(&format!(r#"<c r="{reference}"><v>{number}</v></c>"#)),
                Value::Bool(value) => xml.push_str(&format!(r#"<c r="{reference}" t="b"><v>{}</v></c>"#, u8::from(*value))),
                Value::Date(serial) => xml.push_str(&format!(r#"<c r="{reference}" s="1"><v>{serial}</v></c>"#)),
                Value::Formula(expression, cached) => {
                    let expression = escape(expression);
                    let (attributes, value) = match cached {
                        Cached::Number(number) => (String::new(), Some(number.to_string())),
                        Cached::Date(serial) => (r#" s="1""#.to_owned(), Some(serial.to_string())),
                        Cached::Text(text) => (r#" t="str""#.to_owned(), Some(escape(text))),
                        Cached::Bool(value) => (r#" t="b""#.to_owned(), Some(u8::from(*value).to_string())),
                        Cached::Error => (r#" t="e""#.to_owned(), Some("#DIV/0!".to_owned())),
                        Cached::Nothing => (String::new(), None),
                    };
                    let value = value.map(|value| format!("<v>{value}</v>")).unwrap_or_default();
                    xml.push_str(&format!(r#"<c r="{reference}"{attributes}><f>{expression}</f>{value}</c>"#));
                }
                Value::Empty => (),
            }
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

/// Office Open XML workbook with inline strings and a date style at index 1.
pub fn xlsx(sheets: &[Sheet]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    let mut content_types = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
    );
    for index in 1..=sheets.len() {
        content_types.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{index}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
        ));
    }
    content_types.push_str("</Types>");
    writer.start_file("[Content_Types].xml", options).unwrap();
    writer.write_all(content_types.as_bytes()).unwrap();

    writer.start_file("_rels/.rels", options).unwrap();
    writer
        .write_all(
            br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#,
        )
        .unwrap();

    let mut workbook = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
    );
    let mut relationships = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    for (index, sheet) in sheets.iter().enumerate() {
        let number = index + 1;
        workbook.push_str(&format!(
            r#"<sheet name="{}" sheetId="{number}" r:id="rId{number}"/>"#,
            escape(&sheet.name)
        ));
        relationships.push_str(&format!(
            r#"<Relationship Id="rId{number}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{number}.xml"/>"#
        ));
    }
    workbook.push_str("</sheets></workbook>");
    relationships.push_str(&format!(
        r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#,
        sheets.len() + 1
    ));

    writer.start_file("xl/workbook.xml", options).unwrap();
    writer.write_all(workbook.as_bytes()).unwrap();
    writer.start_file("xl/_rels/workbook.xml.rels", options).unwrap();
    writer.write_all(relationships.as_bytes()).unwrap();
    writer.start_file("xl/styles.xml", options).unwrap();
    writer
        .write_all(
            br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><cellXfs count="2"><xf numFmtId="0"/><xf numFmtId="14" applyNumberFormat="1"/></cellXfs></styleSheet>"#,
        )
        .unwrap();
    for (index, sheet) in sheets.iter().enumerate() {
        writer
            .start_file(format!("xl/worksheets/sheet{}.xml", index + 1), options)
            .unwrap();
        writer.write_all(worksheet_xml(&sheet.rows).as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn record(kind: u16, payload: &[u8]) -> Vec<u8> {
    let mut bytes = kind.to_le_bytes().to_vec();
    bytes.extend((payload.len() as u16).to_le_bytes());
    bytes.extend(payload);
    bytes
}

fn utf16(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
}

/// XLUnicodeString with a 2-byte count, always stored uncompressed.
fn unicode_string(text: &str) -> Vec<u8> {
    let mut bytes = (text.encode_utf16().count() as u16).to_le_bytes().to_vec();
    bytes.push(1);
    bytes.extend(utf16(text));
    bytes
}

fn bof(kind: u16) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend(0x0600u16.to_le_bytes());
    payload.extend(kind.to_le_bytes());
    payload.extend(0x0DBBu16.to_le_bytes());
    payload.extend(0x07CCu16.to_le_bytes());
    payload.extend(0u32.to_le_bytes());
    payload.extend(6u32.to_le_bytes());
    record(0x0809, &payload)
}

fn xf(format_id: u16) -> Vec<u8> {
    let mut payload = vec![0u8; 20];
    payload[2..4].copy_from_slice(&format_id.to_le_bytes());
    record(0x00E0, &payload)
}

fn workbook_globals(sheets: &[Sheet], offsets: &[usize]) -> Vec<u8> {
    let mut stream = bof(0x0005);
    stream.extend(record(0x0042, &1252u16.to_le_bytes()));
    stream.extend(xf(0));
    stream.extend(xf(14));
    for (sheet, offset) in sheets.iter().zip(offsets) {
        let mut payload = (*offset as u32).to_le_bytes().to_vec();
        payload.push(0);
        payload.push(0);
        payload.push(sheet.name.encode_utf16().count() as u8);
        payload.push(1);
        payload.extend(utf16(&sheet.name));
        stream.extend(record(0x0085, &payload));
    }
    stream.extend(record(0x000A, &[]));
    stream
}

fn cell_prefix(row: usize, col: usize, xf_index: u16) -> Vec<u8> {
    let mut payload = (row as u16).to_le_bytes().to_vec();
    payload.extend((col as u16).to_le_bytes());
    payload.extend(xf_index.to_le_bytes());
    payload
}

/// Non-numeric FORMULA result: type tag, payload byte, `0xFFFF` marker.
fn formula_result(kind: u8, value: u8) -> [u8; 8] {
    [kind, 0, value, 0, 0, 0, 0xFF, 0xFF]
}

fn worksheet_stream(rows: &[Vec<Value>]) -> Vec<u8> {
    let mut stream = bof(0x0010);
    for (row, cells) in rows.iter().enumerate() {
        for (col, value) in cells.iter().enumerate() {
            match value {
                Value::Text(text) => {
                    let mut payload = cell_prefix(row, col, 0);
                    payload.extend(unicode_string(text));
                    stream.extend(record(0x0204, &payload));
                }
                Value::Number(number) if number.fract() == 0.0 && number.abs() < 536_870_912.0 => {
                    let mut payload = cell_prefix(row, col, 0);
                    payload.extend((((*number as i32) << 2) as u32 | 0x02).to_le_bytes());
                    stream.extend(record(0x027E, &payload));
                }
                Value::Number(number) => {
                    let mut payload = cell_prefix(row, col, 0);
                    payload.extend(number.to_le_bytes());
                    stream.extend(record(0x0203, &payload));
                }
                Value::Date(serial) => {
                    let mut payload = cell_prefix(row, col, 1);
                    payload.extend(serial.to_le_bytes());
                    stream.extend(record(0x0203, &payload));
                }
                Value::Bool(value) => {
                    let mut payload = cell_prefix(row, col, 0);
                    payload.push(u8::from(*value));
                    payload.push(0);
                    stream.extend(record(0x0205, &payload));
                }
                Value::Formula(_, cached) => {
                    let xf_index = if matches!(cached, Cached::Date(_)) { 1 } else { 0 };
                    let mut payload = cell_prefix(row, col, xf_index);
                    let (result, string) = match cached {
                        Cached::Number(number) | Cached::Date(number) => (number.to_le_bytes(), None),
                        Cached::Text(text) => (formula_result(0, 0), Some(text)),
                        Cached::Bool(value) => (formula_result(1, u8::from(*value)), None),
                        Cached::Error => (formula_result(2, 0x07), None),
                        Cached::Nothing => (formula_result(3, 0), None),
                    };
                    payload.extend(result);
                    payload.extend(0u16.to_le_bytes());
                    payload.extend(0u32.to_le_bytes());
                    payload.extend(0u16.to_le_bytes());
                    stream.extend(record(0x0006, &payload));
                    if let Some(text) = string {
                        stream.extend(record(0x0207, &unicode_string(text)));
                    }
                }
                Value::Empty => (),
            }
        }
    }
    stream.extend(record(0x000A, &[]));
    stream
}

/// Excel 97-2003 workbook: a BIFF8 `Workbook` stream inside a version 3 compound file.
pub fn xls(sheets: &[Sheet]) -> Vec<u8> {
    let bodies: Vec<Vec<u8>> = sheets.iter().map(|sheet| worksheet_stream(&sheet.rows)).collect();
    let mut offsets = Vec::new();
    let mut offset = workbook_globals(sheets, &vec![0; sheets.len()]).len();
    for body in &bodies {
        offsets.push(offset);
        offset += body.len();
    }
    let mut stream = workbook_globals(sheets, &offsets);
    for body in bodies {
        stream.extend(body);
    }
    compound_file("Workbook", stream)
}

/// Compound file that only holds an `EncryptedPackage` stream, as password-protected
/// Office Open XML workbooks do.
pub fn encrypted_package() -> Vec<u8> {
    compound_file("EncryptedPackage", vec![0x42; 64])
}

const END_OF_CHAIN: u32 = 0xFFFF_FFFE;
const FREE_SECTOR: u32 = 0xFFFF_FFFF;
const FAT_SECTOR: u32 = 0xFFFF_FFFD;
const NO_STREAM: u32 = 0xFFFF_FFFF;

fn directory_entry(name: &str, kind: u8, child: u32, start: u32, size: u64) -> Vec<u8> {
    let mut entry = vec![0u8; 128];
    if !name.is_empty() {
        let encoded = utf16(name);
        entry[..encoded.len()].copy_from_slice(&encoded);
        entry[64..66].copy_from_slice(&((encoded.len() + 2) as u16).to_le_bytes());
        entry[66] = kind;
        entry[67] = 1;
    }
    entry[68..72].copy_from_slice(&NO_STREAM.to_le_bytes());
    entry[72..76].copy_from_slice(&NO_STREAM.to_le_bytes());
    entry[76..80].copy_from_slice(&child.to_le_bytes());
    entry[116..120].copy_from_slice(&start.to_le_bytes());
    entry[120..128].copy_from_slice(&size.to_le_bytes());
    entry
}

/// One-stream compound file with 512-byte sectors: FAT in sector 0, directory in
/// sector 1, the stream from sector 2 on. The stream is padded past the mini stream
/// cutoff so it lives in regular sectors.
fn compound_file(stream_name: &str, mut stream: Vec<u8>) -> Vec<u8> {
    let padded = stream.len().max(4096).div_ceil(512) * 512;
    stream.resize(padded, 0);
    let sector_count = padded / 512;
    assert!(sector_count + 2 <= 128, "fixture stream too large for one FAT sector");

    let mut header = vec![0u8; 512];
    header[0..8].copy_from_slice(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]);
    header[24..26].copy_from_slice(&0x003Eu16.to_le_bytes());
    header[26..28].copy_from_slice(&3u16.to_le_bytes());
    header[28..30].copy_from_slice(&0xFFFEu16.to_le_bytes());
    header[30..32].copy_from_slice(&9u16.to_le_bytes());
    header[32..34].copy_from_slice(&6u16.to_le_bytes());
    header[44..48].copy_from_slice(&1u32.to_le_bytes());
    header[48..52].copy_from_slice(&1u32.to_le_bytes());
    header[56..60].copy_from_slice(&4096u32.to_le_bytes());
    header[60..64].copy_from_slice(&END_OF_CHAIN.to_le_bytes());
    header[68..72].copy_from_slice(&END_OF_CHAIN.to_le_bytes());
    header[76..80].copy_from_slice(&0u32.to_le_bytes());
    for slot in header[80..512].chunks_exact_mut(4) {
        slot.copy_from_slice(&FREE_SECTOR.to_le_bytes());
    }

    let mut fat = vec![FREE_SECTOR; 128];
    fat[0] = FAT_SECTOR;
    fat[1] = END_OF_CHAIN;
    for index in 0..sector_count {
        fat[2 + index] = if index + 1 < sector_count {
            (3 + index) as u32
        } else {
            END_OF_CHAIN
        };
    }

    let mut directory = directory_entry("Root Entry", 5, 1, END_OF_CHAIN, 0);
    directory.extend(directory_entry(stream_name, 2, NO_STREAM, 2, padded as u64));
    directory.extend(directory_entry("", 0, NO_STREAM, 0, 0));
    directory.extend(directory_entry("", 0, NO_STREAM, 0, 0));

    let mut file = header;
    file.extend(fat.iter().flat_map(|entry| entry.to_le_bytes()));
    file.extend(directory);
    file.extend(stream);
    file
}

/// Temporary directory holding workbooks and an on-disk database.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        TestWorkspace {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    pub fn database(&self) -> PathBuf {
        self.path("ingest.duckdb")
    }
}
