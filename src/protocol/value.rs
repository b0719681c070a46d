//! Numeric text as it appears in frames.

use crate::error::{AppError, Result};

/// Exact ratio reported by the camera (framerate, gains).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    pub fn whole(value: i64) -> Self {
        Self { num: value, den: 1 }
    }

    pub fn to_f64(self) -> f64 {
        if self.den == 0 { 0.0 } else { self.num as f64 / self.den as f64 }
    }
}

impl std::fmt::Display for Rational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Parse decimal text or a `"num/den"` rational into a float.
///
/// `"inf"` parses to positive infinity.
pub fn parse_decimal(text: &str) -> Result<f64> {
    let text = text.trim();
    if let Some((num, den)) = text.split_once('/') {
        let num: f64 = num
            .trim()
            .parse()
            .map_err(|_| AppError::protocol(format!("Bad numerator in {text:?}")))?;
        let den: f64 = den
            .trim()
            .parse()
            .map_err(|_| AppError::protocol(format!("Bad denominator in {text:?}")))?;
        if den == 0.0 {
            return Err(AppError::protocol(format!("Zero denominator in {text:?}")));
        }
        return Ok(num / den);
    }
    text.parse()
        .map_err(|_| AppError::protocol(format!("Not a number: {text:?}")))
}

/// Format a number the way the responder puts it on the wire.
pub fn format_number(value: f64) -> String {
    if value.is_infinite() && value > 0.0 {
        "inf".to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rational() {
        assert_eq!(parse_decimal("8/5").unwrap(), 1.6);
        assert_eq!(parse_decimal(" 30/1 ").unwrap(), 30.0);
    }

    #[test]
    fn test_parse_plain_and_inf() {
        assert_eq!(parse_decimal("-42").unwrap(), -42.0);
        assert_eq!(parse_decimal("0.5").unwrap(), 0.5);
        assert!(parse_decimal("inf").unwrap().is_infinite());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_decimal("abc").is_err());
        assert!(parse_decimal("1/0").is_err());
        assert!(parse_decimal("1/x").is_err());
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(50.0), "50");
        assert_eq!(format_number(-100.0), "-100");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(f64::INFINITY), "inf");
    }

    #[test]
    fn test_rational_display() {
        let gain = Rational::new(8, 5);
        assert_eq!(gain.to_string(), "8/5");
        assert_eq!(parse_decimal(&gain.to_string()).unwrap(), gain.to_f64());
    }
}
