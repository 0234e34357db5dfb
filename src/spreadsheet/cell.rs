use crate::spreadsheet::RawCell;
use chrono::Duration;
use chrono::NaiveDate;
use chrono::NaiveDateTime;

/// How a container says a cell's value should be read.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub(crate) enum CellType {
    #[default]
    Empty,
    Boolean,
    Number,
    /// Date or time serial counted from the 1900 epoch (Lotus leap-year bug included).
    NumberDateTime1900,
    /// Date or time serial counted from 1904-01-01.
    NumberDateTime1904,
    /// ISO 8601 text, used by `t="d"` cells.
    IsoDateTime,
    InlineString,
    SharedString,
    Error,
}

impl CellType {
    /// Resolves the built-in number format ids that render dates or times.
    pub(crate) fn parse_builtin_number_format_id(id: &str, is_1904: bool) -> Option<Self> {
        match id {
            "14" | "15" | "16" | "17" | "18" | "19" | "20" | "21" | "22" | "45" | "46" | "47" => {
                Some(Self::date_time(is_1904))
            }
            _ => None,
        }
    }

    /// Classifies a custom format code. Any unescaped, unquoted date or time token
    /// (`y`, `d`, `h`, `s`) outside a `[...]` section makes it a date-time format.
    pub(crate) fn parse_custom_number_format(format: &str, is_1904: bool) -> Self {
        let mut is_escaped = false;
        let mut is_literal = false;
        let mut is_section = false;
        let mut is_temporal = false;
        for character in format.chars() {
            match character {
                _ if is_escaped => is_escaped = false,
                '_' | '\\' => is_escaped = true,

                '"' if is_literal => is_literal = false,
                '"' if !is_section => is_literal = true,

                ']' if is_section => is_section = false,
                '[' if !is_literal => is_section = true,
                _ if is_literal || is_section => (),

                'Y' | 'y' | 'D' | 'd' | 'H' | 'h' | 'S' | 's' => is_temporal = true,
                _ => (),
            }
        }
        if is_temporal {
            Self::date_time(is_1904)
        } else {
            Self::Number
        }
    }

    fn date_time(is_1904: bool) -> Self {
        if is_1904 {
            Self::NumberDateTime1904
        } else {
            Self::NumberDateTime1900
        }
    }

    /// Applies this format to a value the container already decoded.
    /// Date formats turn numbers into date-times; error cells become null.
    pub(crate) fn apply(self, value: RawCell) -> RawCell {
        match (self, value) {
            (Self::Error, _) => RawCell::Null,
            (Self::NumberDateTime1900 | Self::NumberDateTime1904, RawCell::Integer(serial)) => {
                serial_to_datetime(serial as f64, self == Self::NumberDateTime1904)
                    .map(RawCell::DateTime)
                    .unwrap_or(RawCell::Integer(serial))
            }
            (Self::NumberDateTime1900 | Self::NumberDateTime1904, RawCell::Float(serial)) => {
                serial_to_datetime(serial, self == Self::NumberDateTime1904)
                    .map(RawCell::DateTime)
                    .unwrap_or(RawCell::Float(serial))
            }
            (_, value) => value,
        }
    }

    /// Decodes the text form of a cell value as stored in SpreadsheetML.
    /// Shared string indexes must already be resolved by the caller.
    pub(crate) fn to_raw_cell(self, value: &str) -> RawCell {
        match self {
            Self::Empty | Self::Error => RawCell::Null,
            Self::Boolean => RawCell::Bool(value == "1" || value.eq_ignore_ascii_case("true")),
            Self::Number | Self::NumberDateTime1900 | Self::NumberDateTime1904 => match value.trim().parse::<f64>() {
                Ok(number) => self.apply(RawCell::from_number(number)),
                Err(_) => RawCell::Text(value.to_owned()),
            },
            Self::IsoDateTime => parse_iso_datetime(value)
                .map(RawCell::DateTime)
                .unwrap_or_else(|| RawCell::Text(value.to_owned())),
            Self::InlineString | Self::SharedString => RawCell::Text(value.to_owned()),
        }
    }
}

/// A cell positioned on the sheet, 0-based.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Cell {
    pub(crate) row: usize,
    pub(crate) col: usize,
    pub(crate) value: RawCell,
}

/// Converts a spreadsheet date serial into a calendar date-time, to the millisecond.
///
/// The 1900 system inherits Lotus 1-2-3's phantom 1900-02-29: serials below 60 are
/// shifted one day so 1 is 1900-01-01 and 61 is 1900-03-01.
pub(crate) fn serial_to_datetime(serial: f64, is_1904: bool) -> Option<NaiveDateTime> {
    if !serial.is_finite() || !(0.0..=2_958_465.999_999_99).contains(&serial) {
        return None;
    }
    let base = if is_1904 {
        NaiveDate::from_ymd_opt(1904, 1, 1)?
    } else if serial < 60.0 {
        NaiveDate::from_ymd_opt(1899, 12, 31)?
    } else {
        NaiveDate::from_ymd_opt(1899, 12, 30)?
    };
    let milliseconds = (serial * 86_400_000.0).round() as i64;
    base.and_hms_opt(0, 0, 0)?
        .checked_add_signed(Duration::milliseconds(milliseconds))
}

fn parse_iso_datetime(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datetime(text: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn builtin_formats() {
        assert_eq!(CellType::parse_builtin_number_format_id("14", false), Some(CellType::NumberDateTime1900));
        assert_eq!(CellType::parse_builtin_number_format_id("22", true), Some(CellType::NumberDateTime1904));
        assert_eq!(CellType::parse_builtin_number_format_id("46", false), Some(CellType::NumberDateTime1900));
        assert_eq!(CellType::parse_builtin_number_format_id("0", false), None);
        assert_eq!(CellType::parse_builtin_number_format_id("4", false), None);
    }

    #[test]
    fn custom_formats() {
        assert_eq!(CellType::parse_custom_number_format("yyyy-mm-dd", false), CellType::NumberDateTime1900);
        assert_eq!(CellType::parse_custom_number_format("hh:mm", true), CellType::NumberDateTime1904);
        assert_eq!(CellType::parse_custom_number_format("#,##0.00", false), CellType::Number);
        assert_eq!(CellType::parse_custom_number_format("[Red]0.00", false), CellType::Number);
        assert_eq!(CellType::parse_custom_number_format("0.00\" days\"", false), CellType::Number);
        assert_eq!(CellType::parse_custom_number_format("0\\d", false), CellType::Number);
    }

    #[test]
    fn serials_in_1900_system() {
        assert_eq!(serial_to_datetime(1.0, false), Some(datetime("1900-01-01 00:00:00")));
        assert_eq!(serial_to_datetime(59.0, false), Some(datetime("1900-02-28 00:00:00")));
        assert_eq!(serial_to_datetime(61.0, false), Some(datetime("1900-03-01 00:00:00")));
        assert_eq!(serial_to_datetime(45296.5, false), Some(datetime("2024-01-05 12:00:00")));
        assert_eq!(serial_to_datetime(-1.0, false), None);
        assert_eq!(serial_to_datetime(f64::NAN, false), None);
    }

    #[test]
    fn serials_in_1904_system() {
        assert_eq!(serial_to_datetime(0.0, true), Some(datetime("1904-01-01 00:00:00")));
        assert_eq!(serial_to_datetime(43834.25, true), Some(datetime("2024-01-05 06:00:00")));
    }

    #[test]
    fn date_formats_turn_numbers_into_datetimes() {
        assert_eq!(
            CellType::NumberDateTime1900.to_raw_cell("45296"),
            RawCell::DateTime(datetime("2024-01-05 00:00:00"))
        );
        assert_eq!(CellType::Number.to_raw_cell("45296"), RawCell::Integer(45296));
        assert_eq!(CellType::Number.to_raw_cell("0.125"), RawCell::Float(0.125));
        assert_eq!(CellType::Error.to_raw_cell("#DIV/0!"), RawCell::Null);
        assert_eq!(CellType::Boolean.to_raw_cell("1"), RawCell::Bool(true));
        assert_eq!(
            CellType::IsoDateTime.to_raw_cell("2024-01-05T08:30:00"),
            RawCell::DateTime(datetime("2024-01-05 08:30:00"))
        );
    }
}
