//! Cell conversion into the value a typed column parameter expects.
//!
//! [`convert_cell`] is a pure function of the source cell and the target column type.
//! It never fails: whatever cannot be represented in the target type becomes
//! [`SqlValue::Null`].

use crate::schema::inference::parse_datetime;
use crate::schema::inference::parse_decimal;
use crate::schema::SqlType;
use crate::spreadsheet::RawCell;
use crate::spreadsheet::DATETIME_FORMAT;
use chrono::DateTime;
use chrono::Duration;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use duckdb::types::TimeUnit;
use duckdb::types::ToSql;
use duckdb::types::ToSqlOutput;
use duckdb::types::Value;
use duckdb::types::ValueRef;
use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;
use serde::Serialize;
use serde::Serializer;
use std::fmt::Display;

const MILLISECONDS_PER_DAY: i64 = 86_400_000;

/// Exclusive bounds of an OLE Automation date, 0100-01-01 to 9999-12-31.
const OA_DATE_MIN: f64 = -657_435.0;
const OA_DATE_MAX: f64 = 2_958_466.0;

/// `10^16`, the first magnitude `decimal(18,2)` cannot hold.
const DECIMAL_LIMIT: i64 = 10_000_000_000_000_000;

const TRUE_TOKENS: [&str; 5] = ["true", "yes", "y", "1", "evet"];
const FALSE_TOKENS: [&str; 6] = ["false", "no", "n", "0", "hayır", "hayir"];

/// A typed value on its way into, or out of, a dynamic table.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Double(f64),
    Decimal(Decimal),
    DateTime(NaiveDateTime),
    Text(String),
}

impl SqlValue {
    /// Copies a value read from a result row. Types outside the column vocabulary
    /// come back as their text rendering.
    pub fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Boolean(value) => SqlValue::Bool(value),
            ValueRef::TinyInt(value) => SqlValue::Int(value as i32),
            ValueRef::SmallInt(value) => SqlValue::Int(value as i32),
            ValueRef::Int(value) => SqlValue::Int(value),
            ValueRef::BigInt(value) => SqlValue::BigInt(value),
            ValueRef::UTinyInt(value) => SqlValue::Int(value as i32),
            ValueRef::USmallInt(value) => SqlValue::Int(value as i32),
            ValueRef::UInt(value) => SqlValue::BigInt(value as i64),
            ValueRef::Float(value) => SqlValue::Double(value as f64),
            ValueRef::Double(value) => SqlValue::Double(value),
            ValueRef::Decimal(value) => SqlValue::Decimal(value),
            ValueRef::Timestamp(unit, value) => timestamp_to_datetime(unit, value)
                .map(SqlValue::DateTime)
                .unwrap_or(SqlValue::Null),
            ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
            other => SqlValue::Text(format!("{other:?}")),
        }
    }
}

impl Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::Null => Ok(()),
            SqlValue::Bool(value) => write!(f, "{value}"),
            SqlValue::Int(value) => write!(f, "{value}"),
            SqlValue::BigInt(value) => write!(f, "{value}"),
            SqlValue::Double(value) => write!(f, "{value}"),
            SqlValue::Decimal(value) => write!(f, "{value}"),
            SqlValue::DateTime(value) => write!(f, "{}", value.format(DATETIME_FORMAT)),
            SqlValue::Text(value) => f.write_str(value),
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SqlValue::Null => serializer.serialize_none(),
            SqlValue::Bool(value) => serializer.serialize_bool(*value),
            SqlValue::Int(value) => serializer.serialize_i32(*value),
            SqlValue::BigInt(value) => serializer.serialize_i64(*value),
            SqlValue::Double(value) => serializer.serialize_f64(*value),
            // Kept as text so no precision is lost on the way to JSON.
            SqlValue::Decimal(_) | SqlValue::DateTime(_) | SqlValue::Text(_) => serializer.collect_str(self),
        }
    }
}

/// Decimals travel as text and are cast by the placeholder, see [`crate::database::ddl::insert_sql`].
impl ToSql for SqlValue {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        let value = match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(value) => Value::Boolean(*value),
            SqlValue::Int(value) => Value::Int(*value),
            SqlValue::BigInt(value) => Value::BigInt(*value),
            SqlValue::Double(value) => Value::Double(*value),
            SqlValue::Decimal(value) => Value::Text(value.to_string()),
            SqlValue::DateTime(value) => Value::Timestamp(TimeUnit::Microsecond, value.and_utc().timestamp_micros()),
            SqlValue::Text(value) => return Ok(ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes()))),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

fn timestamp_to_datetime(unit: TimeUnit, value: i64) -> Option<NaiveDateTime> {
    let micros = match unit {
        TimeUnit::Second => value.checked_mul(1_000_000)?,
        TimeUnit::Millisecond => value.checked_mul(1_000)?,
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    };
    DateTime::from_timestamp_micros(micros).map(|datetime| datetime.naive_utc())
}

/// Converts an OLE Automation date (days since 1899-12-30, time as the fraction)
/// to a calendar date-time, to the millisecond.
///
/// For negative serials the fraction still counts forward from midnight, so -1.25 is
/// 1899-12-29 06:00.
pub fn from_oa_date(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial <= OA_DATE_MIN || serial >= OA_DATE_MAX {
        return None;
    }
    let mut milliseconds = (serial * MILLISECONDS_PER_DAY as f64).round() as i64;
    if milliseconds < 0 {
        milliseconds -= (milliseconds % MILLISECONDS_PER_DAY) * 2;
    }
    NaiveDate::from_ymd_opt(1899, 12, 30)?
        .and_hms_opt(0, 0, 0)?
        .checked_add_signed(Duration::milliseconds(milliseconds))
}

/// Converts a cell into the value a column of type `target` accepts, or NULL.
///
/// | target | accepted |
/// |---|---|
/// | `datetime2` | date-times; numbers and numeric text as serial dates; calendar text |
/// | `int` | integers and floats within range (floats round half to even); integer text |
/// | `decimal(18,2)` | integers, finite floats, decimal or scientific text, below `10^16` |
/// | `bit` | booleans, and `true/yes/y/1/evet`, `false/no/n/0/hayır` in any case |
/// | `nvarchar` | the text of any value |
pub fn convert_cell(cell: &RawCell, target: SqlType) -> SqlValue {
    let value = match target {
        SqlType::DateTime2 => to_datetime(cell).map(SqlValue::DateTime),
        SqlType::Int => to_int(cell).map(SqlValue::Int),
        SqlType::Decimal => to_decimal(cell).map(SqlValue::Decimal),
        SqlType::Bit => to_bool(cell).map(SqlValue::Bool),
        SqlType::NVarChar(_) => match cell {
            RawCell::Null => None,
            cell => Some(SqlValue::Text(cell.to_string())),
        },
    };
    match value {
        Some(value) => value,
        None => {
            if !cell.is_blank() {
                log::debug!("Value '{}' does not convert to {}, stored as NULL", cell, target);
            }
            SqlValue::Null
        }
    }
}

fn to_datetime(cell: &RawCell) -> Option<NaiveDateTime> {
    match cell {
        RawCell::DateTime(value) => Some(*value),
        RawCell::Integer(value) => from_oa_date(*value as f64),
        RawCell::Float(value) => from_oa_date(*value),
        RawCell::Text(text) => match text.trim().parse::<f64>() {
            Ok(serial) => from_oa_date(serial),
            Err(_) => parse_datetime(text),
        },
        RawCell::Null | RawCell::Bool(_) => None,
    }
}

fn to_int(cell: &RawCell) -> Option<i32> {
    match cell {
        RawCell::Integer(value) => i32::try_from(*value).ok(),
        RawCell::Float(value) => {
            let rounded = value.round_ties_even();
            if rounded.is_finite() && (i32::MIN as f64..=i32::MAX as f64).contains(&rounded) {
                Some(rounded as i32)
            } else {
                None
            }
        }
        RawCell::Text(text) => text.trim().parse::<i32>().ok(),
        RawCell::Null | RawCell::Bool(_) | RawCell::DateTime(_) => None,
    }
}

fn to_decimal(cell: &RawCell) -> Option<Decimal> {
    let value = match cell {
        RawCell::Integer(value) => Some(Decimal::from(*value)),
        RawCell::Float(value) => Decimal::try_from(*value).ok(),
        RawCell::Text(text) => parse_decimal(text.trim()),
        RawCell::Null | RawCell::Bool(_) | RawCell::DateTime(_) => None,
    }?;
    let value = value.round_dp_with_strategy(SqlType::DECIMAL_SCALE, RoundingStrategy::MidpointAwayFromZero);
    (value.abs() < Decimal::from(DECIMAL_LIMIT)).then_some(value)
}

fn to_bool(cell: &RawCell) -> Option<bool> {
    match cell {
        RawCell::Bool(value) => Some(*value),
        RawCell::Null => None,
        cell => {
            let token = cell.to_string().trim().to_lowercase();
            if TRUE_TOKENS.contains(&token.as_str()) {
                Some(true)
            } else if FALSE_TOKENS.contains(&token.as_str()) {
                Some(false)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn text(value: &str) -> RawCell {
        RawCell::Text(value.to_owned())
    }

    fn datetime(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap()
    }

    fn decimal(value: &str) -> SqlValue {
        SqlValue::Decimal(Decimal::from_str(value).unwrap())
    }

    #[test]
    fn locale_boolean_tokens() {
        assert_eq!(convert_cell(&text("evet"), SqlType::Bit), SqlValue::Bool(true));
        assert_eq!(convert_cell(&text("Hayır"), SqlType::Bit), SqlValue::Bool(false));
        assert_eq!(convert_cell(&text("HAYIR"), SqlType::Bit), SqlValue::Bool(false));
        assert_eq!(convert_cell(&text(" Y "), SqlType::Bit), SqlValue::Bool(true));
        assert_eq!(convert_cell(&RawCell::Integer(0), SqlType::Bit), SqlValue::Bool(false));
        assert_eq!(convert_cell(&RawCell::Bool(true), SqlType::Bit), SqlValue::Bool(true));
    }

    #[test]
    fn unknown_boolean_token_is_null() {
        assert_eq!(convert_cell(&text("maybe"), SqlType::Bit), SqlValue::Null);
        assert_eq!(convert_cell(&RawCell::Integer(2), SqlType::Bit), SqlValue::Null);
    }

    #[test]
    fn integers_are_range_checked() {
        assert_eq!(convert_cell(&RawCell::Integer(42), SqlType::Int), SqlValue::Int(42));
        assert_eq!(convert_cell(&RawCell::Integer(3_000_000_000), SqlType::Int), SqlValue::Null);
        assert_eq!(convert_cell(&RawCell::Float(2.5), SqlType::Int), SqlValue::Int(2));
        assert_eq!(convert_cell(&RawCell::Float(3.5), SqlType::Int), SqlValue::Int(4));
        assert_eq!(convert_cell(&RawCell::Float(1e12), SqlType::Int), SqlValue::Null);
        assert_eq!(convert_cell(&RawCell::Float(f64::NAN), SqlType::Int), SqlValue::Null);
        assert_eq!(convert_cell(&text(" -17 "), SqlType::Int), SqlValue::Int(-17));
        assert_eq!(convert_cell(&text("abc"), SqlType::Int), SqlValue::Null);
        assert_eq!(convert_cell(&RawCell::Bool(true), SqlType::Int), SqlValue::Null);
    }

    #[test]
    fn decimals_round_to_two_places() {
        assert_eq!(convert_cell(&RawCell::Integer(5), SqlType::Decimal), decimal("5"));
        assert_eq!(convert_cell(&RawCell::Float(0.125), SqlType::Decimal), decimal("0.13"));
        assert_eq!(convert_cell(&text("on iki"), SqlType::Decimal), SqlValue::Null);
        assert_eq!(convert_cell(&text("2.5e2"), SqlType::Decimal), decimal("250"));
        assert_eq!(convert_cell(&text("-0.125"), SqlType::Decimal), decimal("-0.13"));
    }

    #[test]
    fn decimals_beyond_precision_are_null() {
        assert_eq!(convert_cell(&RawCell::Integer(10_000_000_000_000_000), SqlType::Decimal), SqlValue::Null);
        assert_eq!(convert_cell(&RawCell::Float(f64::INFINITY), SqlType::Decimal), SqlValue::Null);
        assert_eq!(convert_cell(&text("9999999999999999.99"), SqlType::Decimal), decimal("9999999999999999.99"));
    }

    #[test]
    fn datetimes_from_serials_and_text() {
        let expected = datetime(2024, 1, 5, 0, 0);
        assert_eq!(convert_cell(&RawCell::DateTime(expected), SqlType::DateTime2), SqlValue::DateTime(expected));
        assert_eq!(convert_cell(&RawCell::Integer(45296), SqlType::DateTime2), SqlValue::DateTime(expected));
        assert_eq!(convert_cell(&text("45296.5"), SqlType::DateTime2), SqlValue::DateTime(datetime(2024, 1, 5, 12, 0)));
        assert_eq!(convert_cell(&text("05.01.2024"), SqlType::DateTime2), SqlValue::DateTime(expected));
        assert_eq!(convert_cell(&text("1e9"), SqlType::DateTime2), SqlValue::Null);
        assert_eq!(convert_cell(&text("not-a-date"), SqlType::DateTime2), SqlValue::Null);
        assert_eq!(convert_cell(&RawCell::Bool(false), SqlType::DateTime2), SqlValue::Null);
    }

    #[test]
    fn oa_dates_match_automation_rules() {
        assert_eq!(from_oa_date(0.0), Some(datetime(1899, 12, 30, 0, 0)));
        assert_eq!(from_oa_date(-0.5), Some(datetime(1899, 12, 30, 12, 0)));
        assert_eq!(from_oa_date(-1.25), Some(datetime(1899, 12, 29, 6, 0)));
        assert_eq!(from_oa_date(2_958_466.0), None);
        assert_eq!(from_oa_date(f64::NAN), None);
    }

    #[test]
    fn text_target_takes_any_value() {
        assert_eq!(convert_cell(&RawCell::Integer(7), SqlType::NVarChar(Some(10))), SqlValue::Text("7".to_owned()));
        assert_eq!(convert_cell(&RawCell::Bool(false), SqlType::NVarChar(None)), SqlValue::Text("false".to_owned()));
        assert_eq!(
            convert_cell(&RawCell::DateTime(datetime(2024, 1, 5, 8, 30)), SqlType::DEFAULT_TEXT),
            SqlValue::Text("2024-01-05 08:30:00".to_owned())
        );
        assert_eq!(convert_cell(&RawCell::Null, SqlType::DEFAULT_TEXT), SqlValue::Null);
    }

    #[test]
    fn null_stays_null_for_every_type() {
        for target in [SqlType::Bit, SqlType::Int, SqlType::Decimal, SqlType::DateTime2, SqlType::DEFAULT_TEXT] {
            assert_eq!(convert_cell(&RawCell::Null, target), SqlValue::Null);
        }
    }

    #[test]
    fn values_serialize_for_display() {
        let row = vec![
            SqlValue::Null,
            SqlValue::Int(3),
            decimal("1.50"),
            SqlValue::DateTime(datetime(2024, 1, 5, 8, 30)),
        ];
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"[null,3,"1.50","2024-01-05 08:30:00"]"#);
    }

    #[test]
    fn timestamps_read_back_in_any_unit() {
        let expected = datetime(2024, 1, 5, 8, 30);
        let micros = expected.and_utc().timestamp_micros();
        assert_eq!(
            SqlValue::from_value_ref(ValueRef::Timestamp(TimeUnit::Microsecond, micros)),
            SqlValue::DateTime(expected)
        );
        assert_eq!(
            SqlValue::from_value_ref(ValueRef::Timestamp(TimeUnit::Second, micros / 1_000_000)),
            SqlValue::DateTime(expected)
        );
        assert_eq!(SqlValue::from_value_ref(ValueRef::Null), SqlValue::Null);
    }
}
