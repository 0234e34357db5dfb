//! Pieces shared by the `.xls` and `.xlsx` readers.
use crate::error::IngestError;
use crate::helpers::cfb::Cfb;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::zip::ZipHelper;
use crate::match_xml_events;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::SpreadsheetError;
use quick_xml::events::Event;
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Read;
use std::io::Seek;
use zip::ZipArchive;

const TAG_RELATIONSHIP: &[u8] = b"Relationship";
const CFB_SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Maps relationship ids to worksheet part paths.
pub(super) fn load_relationships<RS: Read + Seek>(zip: &mut ZipArchive<RS>, path: &str) -> Result<HashMap<String, String>, IngestError> {
    let mut reader = zip
        .xml_reader(path)?
        .ok_or_else(|| SpreadsheetError::FileError(path.to_string()))?;
    let mut relationships: HashMap<String, String> = HashMap::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_RELATIONSHIP => {
            let id = event.get_attribute_value("Id")?;
            let kind = event.get_attribute_value("Type")?;
            let target = event.get_attribute_value("Target")?;
            if kind.map(|it| it.ends_with("/worksheet")).unwrap_or(true) {
                if let Some((id, target)) = id.zip(target) {
                    relationships.insert(id.to_string(), to_zip_path(target));
                }
            }
        }
    });
    Ok(relationships)
}

/// Resolves each XF record's number format id to a cell type, custom formats first.
/// The result is indexed by the style index cells carry.
pub(super) fn load_number_formats(format_indexes: Vec<String>, custom_formats: HashMap<String, CellType>, is_1904: bool) -> Vec<CellType> {
    format_indexes
        .iter()
        .map(|id| {
            custom_formats
                .get(id)
                .copied()
                .or_else(|| CellType::parse_builtin_number_format_id(id, is_1904))
                .unwrap_or(CellType::Number)
        })
        .collect()
}

/// Looks up the cell type for a style index. Unknown indexes read as plain numbers.
pub(super) fn number_format(number_formats: &[CellType], index: usize) -> CellType {
    number_formats.get(index).copied().unwrap_or(CellType::Number)
}

/// Normalizes a relationship target to a path inside the package.
pub(crate) fn to_zip_path(path: Cow<'_, str>) -> String {
    if let Some(path) = path.strip_prefix('/') {
        path.to_string()
    } else if path.starts_with("xl/") {
        path.to_string()
    } else {
        format!("xl/{path}")
    }
}

/// Encrypted OOXML workbooks are stored as a compound file holding an `EncryptedPackage` stream.
pub(super) fn is_password_protected(data: &[u8]) -> bool {
    if !data.starts_with(&CFB_SIGNATURE) {
        return false;
    }
    Cfb::parse(data.to_vec())
        .map(|cfb| cfb.exists("EncryptedPackage"))
        .unwrap_or(false)
}
