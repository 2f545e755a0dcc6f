//! A1-style cell references.
//!
//! `B3` is column 1, row 2 (both zero-indexed). Column letters are
//! case-insensitive and `$` absolute markers are accepted and ignored.

use std::fmt;
use std::str::FromStr;

/// A cell position, zero-indexed.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

impl CellRef {
    pub fn new(col: usize, row: usize) -> CellRef {
        CellRef { row, col }
    }

    /// Parse `A1`, `aa10`, `$B$3`. `None` for anything else, including `A0`
    /// and references too large to index.
    pub fn parse(name: &str) -> Option<CellRef> {
        let name = name.strip_prefix('$').unwrap_or(name);
        let split = name.find(|c: char| !c.is_ascii_alphabetic())?;
        let (letters, digits) = name.split_at(split);
        let digits = digits.strip_prefix('$').unwrap_or(digits);
        if letters.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let col = letters
            .bytes()
            .try_fold(0usize, |acc, b| {
                let digit = (b.to_ascii_uppercase() - b'A') as usize + 1;
                acc.checked_mul(26)?.checked_add(digit)
            })?
            .checked_sub(1)?;
        let row = digits.parse::<usize>().ok()?.checked_sub(1)?;
        Some(CellRef::new(col, row))
    }

    /// Bijective base-26 column name: 0 -> A, 25 -> Z, 26 -> AA.
    pub fn col_to_letters(col: usize) -> String {
        let mut letters = Vec::new();
        let mut n = col as u128 + 1;
        while n > 0 {
            n -= 1;
            letters.push(b'A' + (n % 26) as u8);
            n /= 26;
        }
        letters.reverse();
        String::from_utf8(letters).unwrap_or_default()
    }
}

impl FromStr for CellRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CellRef::parse(s).ok_or_else(|| format!("Invalid cell reference: {}", s))
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", CellRef::col_to_letters(self.col), self.row + 1)
    }
}
