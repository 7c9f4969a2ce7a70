use std::cmp::Ordering;
use std::fmt;

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};

/// Collation attached to a text value.
///
/// The kernel only distinguishes the two behaviors the diff engine needs:
/// binary (code-point) ordering and the accent-blind, case-insensitive
/// ordering MySQL defaults to for utf8 columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collation {
    Utf8GeneralCi,
    Binary,
}

impl Collation {
    /// Coercion between two text operands: binary wins.
    pub fn merge(self, other: Collation) -> Collation {
        if self == Collation::Binary || other == Collation::Binary {
            Collation::Binary
        } else {
            Collation::Utf8GeneralCi
        }
    }

    pub fn str_cmp(self, a: &str, b: &str) -> Ordering {
        match self {
            Collation::Binary => a.as_bytes().cmp(b.as_bytes()),
            Collation::Utf8GeneralCi => {
                let fold = |s: &str| s.chars().flat_map(char::to_lowercase).collect::<Vec<_>>();
                fold(a).cmp(&fold(b))
            }
        }
    }
}

/// A typed SQL scalar (or tuple of scalars) as seen by the comparison kernel.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int64(i64),
    Uint64(u64),
    Float64(f64),
    Decimal(BigDecimal),
    Text(Collation, String),
    Binary(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Value {
        Value::Text(Collation::Utf8GeneralCi, s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, Value::Int64(_) | Value::Uint64(_))
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Value::Text(..))
    }

    /// Arity of the operand when it appears on one side of a comparison.
    pub fn column_count(&self) -> usize {
        match self {
            Value::Tuple(items) => items.len(),
            _ => 1,
        }
    }

    /// MySQL "compare as floating-point numbers" coercion: the fallback for
    /// operands of mixed, non-numeric type classes. Strings convert via
    /// their longest numeric prefix; dates and times via their numeric form.
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Int64(i) => *i as f64,
            Value::Uint64(u) => *u as f64,
            Value::Float64(f) => *f,
            Value::Decimal(d) => d.to_f64().unwrap_or(0.0),
            Value::Text(_, s) => float_prefix(s),
            Value::Binary(b) => float_prefix(&String::from_utf8_lossy(b)),
            Value::Date(d) => (d.year() as f64) * 10_000.0 + (d.month() as f64) * 100.0 + d.day() as f64,
            Value::Time(t) => {
                (t.hour() as f64) * 10_000.0 + (t.minute() as f64) * 100.0 + t.second() as f64
            }
            Value::Tuple(_) => 0.0,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int64(i) => write!(f, "{i}"),
            Value::Uint64(u) => write!(f, "{u}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Text(_, s) => write!(f, "'{s}'"),
            Value::Binary(b) => write!(f, "'{}'", String::from_utf8_lossy(b)),
            Value::Date(d) => write!(f, "'{d}'"),
            Value::Time(t) => write!(f, "'{t}'"),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Parse the longest numeric prefix of a string, MySQL-style: leading
/// whitespace is skipped, an empty or non-numeric prefix yields 0.
pub(crate) fn float_prefix(s: &str) -> f64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut pos = 0;
    let mut valid_end = 0;

    if pos < bytes.len() && (bytes[pos] == b'+' || bytes[pos] == b'-') {
        pos += 1;
    }
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
        valid_end = pos;
    }
    if pos < bytes.len() && bytes[pos] == b'.' {
        pos += 1;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
            valid_end = pos;
        }
    }
    // Exponent only counts if at least one digit follows it.
    if valid_end > 0 && pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
        let mut exp_pos = pos + 1;
        if exp_pos < bytes.len() && (bytes[exp_pos] == b'+' || bytes[exp_pos] == b'-') {
            exp_pos += 1;
        }
        let digits_start = exp_pos;
        while exp_pos < bytes.len() && bytes[exp_pos].is_ascii_digit() {
            exp_pos += 1;
        }
        if exp_pos > digits_start {
            valid_end = exp_pos;
        }
    }

    s[..valid_end].parse::<f64>().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_prefix_matches_mysql_string_to_number_rules() {
        assert_eq!(float_prefix("123"), 123.0);
        assert_eq!(float_prefix("  -12.5xyz"), -12.5);
        assert_eq!(float_prefix("1e3"), 1000.0);
        assert_eq!(float_prefix("1e"), 1.0);
        assert_eq!(float_prefix("foo"), 0.0);
        assert_eq!(float_prefix(""), 0.0);
        assert_eq!(float_prefix(".5"), 0.5);
    }

    #[test]
    fn general_ci_folds_case() {
        let c = Collation::Utf8GeneralCi;
        assert_eq!(c.str_cmp("foo", "FOO"), Ordering::Equal);
        assert_eq!(c.str_cmp("foo", "fOo"), Ordering::Equal);
        assert_ne!(c.str_cmp("foo", "bar"), Ordering::Equal);
        assert_eq!(Collation::Binary.str_cmp("foo", "FOO"), Ordering::Greater);
    }
}
