//! A1-style cell references.

/// Parses a reference such as `B3` or `$AA$10` into a 0-based `(row, col)` pair.
pub(crate) fn reference_to_index(reference: &str) -> Option<(usize, usize)> {
    let mut col = 0usize;
    let mut row = 0usize;
    let mut letters = 0usize;
    let mut digits = 0usize;
    for character in reference.chars().filter(|character| *character != '$') {
        match character {
            'A'..='Z' | 'a'..='z' if digits == 0 => {
                let value = character.to_ascii_uppercase() as usize - 'A' as usize + 1;
                col = col.checked_mul(26)?.checked_add(value)?;
                letters += 1;
            }
            '0'..='9' if letters > 0 => {
                row = row.checked_mul(10)?.checked_add(character as usize - '0' as usize)?;
                digits += 1;
            }
            _ => return None,
        }
    }
    if digits == 0 || row == 0 {
        return None;
    }
    Some((row - 1, col - 1))
}

/// Formats a 0-based `(row, col)` pair as an A1-style reference.
pub(crate) fn index_to_reference(row: usize, col: usize) -> String {
    let mut letters = Vec::new();
    let mut col = col + 1;
    while col > 0 {
        col -= 1;
        letters.push((b'A' + (col % 26) as u8) as char);
        col /= 26;
    }
    letters.reverse();
    format!("{}{}", letters.into_iter().collect::<String>(), row + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_references() {
        assert_eq!(reference_to_index("A1"), Some((0, 0)));
        assert_eq!(reference_to_index("b3"), Some((2, 1)));
        assert_eq!(reference_to_index("Z10"), Some((9, 25)));
        assert_eq!(reference_to_index("AA1"), Some((0, 26)));
        assert_eq!(reference_to_index("$XFD$1048576"), Some((1_048_575, 16_383)));
    }

    #[test]
    fn rejects_malformed_references() {
        for reference in ["", "A", "1", "A0", "1A", "A1B", "A-1"] {
            assert_eq!(reference_to_index(reference), None, "{reference}");
        }
    }

    #[test]
    fn formats_references() {
        assert_eq!(index_to_reference(0, 0), "A1");
        assert_eq!(index_to_reference(2, 25), "Z3");
        assert_eq!(index_to_reference(0, 26), "AA1");
        assert_eq!(index_to_reference(1_048_575, 16_383), "XFD1048576");
    }
}
