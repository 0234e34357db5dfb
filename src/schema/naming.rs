use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Longest identifier produced for a column or table.
pub const MAX_NAME_LENGTH: usize = 100;

/// Name given to a header that cleans down to nothing.
const EMPTY_NAME: &str = "Column_1";
const PREFIX: &str = "Col_";

/// Name of the synthetic primary key every dynamic table carries.
pub const IDENTITY_COLUMN: &str = "Id";

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("Hardcode regex pattern"));
static ILLEGAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("Hardcode regex pattern"));
static UNDERSCORES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_{2,}").expect("Hardcode regex pattern"));

/// Replaces the Turkish letters with diacritics by their closest ASCII letter.
pub fn fold_turkish(text: &str) -> String {
    text.chars()
        .map(|char| match char {
            'ç' => 'c',
            'Ç' => 'C',
            'ğ' => 'g',
            'Ğ' => 'G',
            'ı' => 'i',
            'İ' => 'I',
            'ö' => 'o',
            'Ö' => 'O',
            'ş' => 's',
            'Ş' => 'S',
            'ü' => 'u',
            'Ü' => 'U',
            other => other,
        })
        .collect()
}

/// Turns a raw header into a legal identifier.
///
/// The output contains only `[A-Za-z0-9_]`, starts with a letter, has no repeated
/// or trailing underscores and is at most [`MAX_NAME_LENGTH`] long, so cleaning it
/// again changes nothing.
pub fn clean_name(raw: &str) -> String {
    let folded = fold_turkish(raw.trim());
    let name = WHITESPACE.replace_all(&folded, "_");
    let name = ILLEGAL.replace_all(&name, "_");
    let name = UNDERSCORES.replace_all(&name, "_");
    let name = name.trim_matches('_');

    let name = if name.is_empty() {
        EMPTY_NAME.to_owned()
    } else if name.starts_with(|char: char| char.is_ascii_digit()) {
        format!("{PREFIX}{name}")
    } else if !name.starts_with(|char: char| char.is_ascii_alphabetic() || char == '_') {
        format!("{PREFIX}{name}")
    } else {
        name.to_owned()
    };
    truncate(&name, MAX_NAME_LENGTH)
}

/// Cuts an ASCII identifier to `length` and drops the underscores the cut may expose.
fn truncate(name: &str, length: usize) -> String {
    name[..name.len().min(length)].trim_end_matches('_').to_owned()
}

/// Cleans `raw` and appends `_1`, `_2`, ... until the name is not in `used`.
///
/// Names are compared case-insensitively; `used` holds lower-cased names and gains
/// the returned one.
pub fn unique_name(raw: &str, used: &mut HashSet<String>) -> String {
    let base = clean_name(raw);
    let mut name = base.clone();
    let mut suffix = 0usize;
    while used.contains(&name.to_ascii_lowercase()) {
        suffix += 1;
        let tail = format!("_{suffix}");
        name = format!("{}{}", truncate(&base, MAX_NAME_LENGTH - tail.len()), tail);
    }
    used.insert(name.to_ascii_lowercase());
    name
}

/// Hands out unique column names for one table, with the identity column reserved.
pub struct ColumnNamer {
    used: HashSet<String>,
}

impl ColumnNamer {
    pub fn new() -> Self {
        ColumnNamer {
            used: HashSet::from([IDENTITY_COLUMN.to_ascii_lowercase()]),
        }
    }

    pub fn name(&mut self, raw: &str) -> String {
        unique_name(raw, &mut self.used)
    }

    /// Names every header in order; earlier headers keep the unsuffixed name.
    pub fn names<S: AsRef<str>>(headers: &[S]) -> Vec<String> {
        let mut namer = ColumnNamer::new();
        headers.iter().map(|header| namer.name(header.as_ref())).collect()
    }
}

impl Default for ColumnNamer {
    fn default() -> Self {
        Self::new()
    }
}

/// True when `name` is a non-empty identifier of at most [`MAX_NAME_LENGTH`]
/// characters from `[A-Za-z0-9_]` starting with a letter or underscore.
pub fn is_legal_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LENGTH
        && name.starts_with(|char: char| char.is_ascii_alphabetic() || char == '_')
        && name.chars().all(|char| char.is_ascii_alphanumeric() || char == '_')
}
