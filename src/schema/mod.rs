//! # Schema analysis
//!
//! Decides what a sheet becomes in the database: a legal, unique name for every
//! header ([`naming`]) and a column type inferred from a full scan of its values
//! ([`inference`]). Nothing here touches storage.

pub mod inference;
pub mod naming;
pub mod sql_type;

pub use inference::infer_type;
pub use inference::infer_with_policy;
pub use inference::ColumnTypeAnalysis;
pub use inference::TypePolicy;
pub use naming::clean_name;
pub use naming::unique_name;
pub use naming::ColumnNamer;
pub use sql_type::SqlType;

use crate::spreadsheet::SheetRows;
use serde::Serialize;

/// One header with the column name and type chosen for it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalyzedColumn {
    pub header: String,
    pub name: String,
    #[serde(flatten)]
    pub analysis: ColumnTypeAnalysis,
}

/// Names and types every column of a sheet, in header order.
pub fn analyze_sheet(sheet: &SheetRows, policy: TypePolicy) -> Vec<AnalyzedColumn> {
    let mut namer = ColumnNamer::new();
    sheet
        .headers
        .iter()
        .enumerate()
        .map(|(index, header)| {
            let analysis = infer_with_policy(header, &sheet.column(index), policy);
            let name = namer.name(header);
            log::debug!(
                "Column '{}' as {} {} (confidence {:.2}, {} of {} non-null)",
                header,
                name,
                analysis.sql_type,
                analysis.confidence,
                analysis.non_null_count,
                analysis.total_count
            );
            AnalyzedColumn {
                header: header.to_owned(),
                name,
                analysis,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::RawCell;

    #[test]
    fn analyzes_each_column_in_order() {
        let sheet = SheetRows {
            headers: vec!["Ad".to_owned(), "Ad".to_owned(), "Yaş".to_owned()],
            rows: vec![
                vec![RawCell::Text("Ali".to_owned()), RawCell::Text("Veli".to_owned()), RawCell::Integer(30)],
                vec![RawCell::Text("Ayşe".to_owned()), RawCell::Null],
            ],
        };
        let columns = analyze_sheet(&sheet, TypePolicy::ContentOnly);
        let names: Vec<&str> = columns.iter().map(|column| column.name.as_str()).collect();
        assert_eq!(names, vec!["Ad", "Ad_1", "Yas"]);
        assert_eq!(columns[1].analysis.null_count, 1);
        assert_eq!(columns[2].analysis.sql_type, SqlType::Int);
        assert_eq!(columns[2].analysis.total_count, 2);
    }
}
