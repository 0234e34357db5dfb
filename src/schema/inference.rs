use crate::schema::naming::fold_turkish;
use crate::schema::sql_type::SqlType;
use crate::spreadsheet::RawCell;
use chrono::DateTime;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::Serialize;
use std::str::FromStr;

/// A type is chosen only when strictly more than this share of non-null values fits it.
pub const CONFIDENCE_THRESHOLD: f64 = 0.8;

const DATETIME_FORMATS: [&str; 10] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: [&str; 7] = ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%d.%m.%Y", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y"];

const DATE_NAME_HINTS: [&str; 4] = ["tarih", "date", "zaman", "time"];
const DECIMAL_NAME_HINTS: [&str; 8] = ["tutar", "fiyat", "miktar", "ucret", "toplam", "amount", "price", "total"];

/// Whether the header may override what the content says.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypePolicy {
    /// Type follows the values alone.
    #[default]
    ContentOnly,
    /// Date-like headers force `datetime2` and amount-like headers force `decimal(18,2)`.
    NameHints,
}

/// Inferred type of one column, with the counts it was derived from.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColumnTypeAnalysis {
    pub sql_type: SqlType,
    /// Share of non-null values matching `sql_type`, in `[0, 1]`.
    pub confidence: f64,
    pub total_count: usize,
    pub non_null_count: usize,
    pub null_count: usize,
}

/// Per-type tallies. Each non-null value lands in exactly one bucket.
#[derive(Default, Debug)]
struct TypeCounts {
    boolean: usize,
    datetime: usize,
    integer: usize,
    decimal: usize,
    string: usize,
    max_length: usize,
    non_null: usize,
}

impl TypeCounts {
    fn scan(values: &[RawCell]) -> TypeCounts {
        let mut counts = TypeCounts::default();
        for value in values {
            let text = value.to_string();
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            counts.non_null += 1;
            counts.max_length = counts.max_length.max(text.chars().count());
            if is_boolean(text) {
                counts.boolean += 1;
            } else if parse_datetime(text).is_some() {
                counts.datetime += 1;
            } else if text.parse::<i32>().is_ok() {
                counts.integer += 1;
            } else if parse_decimal(text).is_some() {
                counts.decimal += 1;
            } else {
                counts.string += 1;
            }
        }
        counts
    }

    fn ratio(&self, count: usize) -> f64 {
        count as f64 / self.non_null as f64
    }
}

/// Infers a column type from its values alone.
pub fn infer_type(values: &[RawCell]) -> ColumnTypeAnalysis {
    infer_with_policy("", values, TypePolicy::ContentOnly)
}

/// Infers a column type, letting the header decide under [`TypePolicy::NameHints`].
///
/// A column without non-null values is `nvarchar(255)` with confidence 0 under
/// either policy.
pub fn infer_with_policy(header: &str, values: &[RawCell], policy: TypePolicy) -> ColumnTypeAnalysis {
    let counts = TypeCounts::scan(values);
    let total_count = values.len();
    let analysis = |sql_type: SqlType, confidence: f64| ColumnTypeAnalysis {
        sql_type,
        confidence,
        total_count,
        non_null_count: counts.non_null,
        null_count: total_count - counts.non_null,
    };

    if counts.non_null == 0 {
        return analysis(SqlType::DEFAULT_TEXT, 0.0);
    }

    if policy == TypePolicy::NameHints {
        let name = fold_turkish(header).to_lowercase();
        if DATE_NAME_HINTS.iter().any(|hint| name.contains(hint)) {
            return analysis(SqlType::DateTime2, counts.ratio(counts.datetime));
        }
        if DECIMAL_NAME_HINTS.iter().any(|hint| name.contains(hint)) {
            return analysis(SqlType::Decimal, counts.ratio(counts.integer + counts.decimal));
        }
    }

    let candidates = [
        (SqlType::Bit, counts.boolean),
        (SqlType::DateTime2, counts.datetime),
        (SqlType::Int, counts.integer),
        (SqlType::Decimal, counts.decimal),
    ];
    for (sql_type, count) in candidates {
        let ratio = counts.ratio(count);
        if ratio > CONFIDENCE_THRESHOLD {
            return analysis(sql_type, ratio);
        }
    }
    analysis(SqlType::nvarchar_for_length(counts.max_length), counts.ratio(counts.string))
}

fn is_boolean(text: &str) -> bool {
    text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("false")
}

/// Plain decimal notation first, then scientific notation.
pub(crate) fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .ok()
        .or_else(|| Decimal::from_scientific(text).ok())
}

/// Parses a calendar date or date-time written in one of the common layouts.
///
/// Plain numbers are never dates here, even when a layout would accept them;
/// numeric serials are handled by the value converter instead.
pub(crate) fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() || text.parse::<f64>().is_ok() {
        return None;
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|datetime| datetime.naive_utc()))
}
