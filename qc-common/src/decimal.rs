//! Exact decimal handling
//!
//! Numeric payload never passes through `f64` on the import path: the mart
//! value is read as text and parsed straight into a `Decimal`.

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::{Error, Result};

/// Parse decimal text, accepting plain and scientific notation
pub fn parse_decimal(raw: &str) -> Result<Decimal> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map(|d| d.normalize())
        .map_err(|_| Error::InvalidInput(format!("not a decimal number: '{}'", raw)))
}

/// Parse an optional decimal column; `None` and empty text stay absent
pub fn parse_optional_decimal(raw: Option<&str>) -> Result<Option<Decimal>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => parse_decimal(text).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_decimal() {
        assert_eq!(parse_decimal("1.25").unwrap(), Decimal::new(125, 2));
    }

    #[test]
    fn test_scientific_notation() {
        assert_eq!(parse_decimal("1.5e-3").unwrap(), Decimal::new(15, 4));
    }

    #[test]
    fn test_trailing_zeros_normalized() {
        // Stored text must be stable across re-imports of the same value
        assert_eq!(parse_decimal("1.2500").unwrap().to_string(), "1.25");
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_decimal("n/a").is_err());
    }

    #[test]
    fn test_optional_variants() {
        assert_eq!(parse_optional_decimal(None).unwrap(), None);
        assert_eq!(parse_optional_decimal(Some(" ")).unwrap(), None);
        assert_eq!(parse_optional_decimal(Some("42")).unwrap(), Some(Decimal::new(42, 0)));
        assert!(parse_optional_decimal(Some("x")).is_err());
    }
}
