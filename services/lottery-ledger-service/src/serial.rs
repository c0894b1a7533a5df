// =============================================================================
// SERIAL MODULE
// =============================================================================
// Parsing and range validation for ticket serial numbers.
//
// Scanners hand us serials as text ("000123") or as JSON numbers. Both are
// normalized to i64 here so range checks are plain integer comparisons.
// =============================================================================

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AppError, AppResult};

/// Longest serial we accept (fits comfortably in i64)
pub const MAX_SERIAL_DIGITS: usize = 18;

/// Largest serial or ticket number: 18 nines
pub const MAX_SERIAL_VALUE: i64 = 999_999_999_999_999_999;

/// Parse a scanned serial.
///
/// Leading zeros are allowed, surrounding whitespace is trimmed, anything
/// other than ASCII digits is rejected.
pub fn parse_serial(raw: &str) -> AppResult<i64> {
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return Err(AppError::Validation("serial number is empty".to_string()));
    }
    if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::Validation(format!(
            "serial number '{}' must contain only digits",
            trimmed
        )));
    }

    let digits = trimmed.trim_start_matches('0');
    if digits.len() > MAX_SERIAL_DIGITS {
        return Err(AppError::Validation(format!(
            "serial number '{}' is longer than {} digits",
            trimmed, MAX_SERIAL_DIGITS
        )));
    }
    if digits.is_empty() {
        return Ok(0);
    }

    digits
        .parse::<i64>()
        .map_err(|e| AppError::Validation(format!("invalid serial number '{}': {}", trimmed, e)))
}

// -----------------------------------------------------------------------------
// SERIAL INPUT (text or number on the wire)
// -----------------------------------------------------------------------------
/// A serial as submitted by a client, already normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SerialInput(pub i64);

impl<'de> Deserialize<'de> for SerialInput {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) if n < 0 => Err(serde::de::Error::custom(format!(
                "serial number {} must not be negative",
                n
            ))),
            Raw::Number(n) if n > MAX_SERIAL_VALUE => Err(serde::de::Error::custom(format!(
                "serial number {} is longer than {} digits",
                n, MAX_SERIAL_DIGITS
            ))),
            Raw::Number(n) => Ok(SerialInput(n)),
            Raw::Text(s) => parse_serial(&s)
                .map(SerialInput)
                .map_err(serde::de::Error::custom),
        }
    }
}

// -----------------------------------------------------------------------------
// SERIAL RANGE
// -----------------------------------------------------------------------------
/// Inclusive range of valid serials for one pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialRange {
    start: i64,
    end: i64,
}

impl SerialRange {
    pub fn new(start: i64, end: i64) -> AppResult<Self> {
        if start < 0 {
            return Err(AppError::Validation(format!(
                "start serial {} must not be negative",
                start
            )));
        }
        if start > end {
            return Err(AppError::Validation(format!(
                "start serial {} is after end serial {}",
                start, end
            )));
        }
        if end > MAX_SERIAL_VALUE {
            return Err(AppError::Validation(format!(
                "end serial {} is longer than {} digits",
                end, MAX_SERIAL_DIGITS
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn contains(&self, serial: i64) -> bool {
        (self.start..=self.end).contains(&serial)
    }

    /// Number of serials in the range, None if it does not fit in i64
    pub fn serial_count(&self) -> Option<i64> {
        self.end.checked_sub(self.start)?.checked_add(1)
    }

    /// Reject serials outside the range with a message naming the bounds
    pub fn check(&self, serial: i64) -> AppResult<()> {
        if self.contains(serial) {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "serial {} is outside the pack range [{}, {}]",
                serial, self.start, self.end
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_zero_padded_serials() {
        assert_eq!(parse_serial("123").unwrap(), 123);
        assert_eq!(parse_serial("000123").unwrap(), 123);
        assert_eq!(parse_serial("  42 \n").unwrap(), 42);
        assert_eq!(parse_serial("0000").unwrap(), 0);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse_serial(""), Err(AppError::Validation(_))));
        assert!(matches!(parse_serial("   "), Err(AppError::Validation(_))));
        assert!(matches!(parse_serial("12a4"), Err(AppError::Validation(_))));
        assert!(matches!(parse_serial("-5"), Err(AppError::Validation(_))));
        assert!(matches!(
            parse_serial("1234567890123456789"),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn leading_zeros_do_not_count_toward_length() {
        let padded = format!("{}{}", "0".repeat(10), "123456789012345678");
        assert_eq!(parse_serial(&padded).unwrap(), 123_456_789_012_345_678);
    }

    #[test]
    fn serial_input_accepts_text_and_numbers() {
        let from_text: SerialInput = serde_json::from_str("\"0007\"").unwrap();
        let from_number: SerialInput = serde_json::from_str("7").unwrap();
        assert_eq!(from_text, SerialInput(7));
        assert_eq!(from_number, SerialInput(7));
        assert!(serde_json::from_str::<SerialInput>("-1").is_err());
        assert!(serde_json::from_str::<SerialInput>("\"abc\"").is_err());
    }

    #[test]
    fn numeric_serials_share_the_digit_cap() {
        let max: SerialInput = serde_json::from_str("999999999999999999").unwrap();
        assert_eq!(max, SerialInput(MAX_SERIAL_VALUE));
        assert!(serde_json::from_str::<SerialInput>("1000000000000000000").is_err());
        assert!(serde_json::from_str::<SerialInput>("9223372036854775807").is_err());
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let range = SerialRange::new(100, 149).unwrap();
        assert!(range.contains(100));
        assert!(range.contains(149));
        assert!(!range.contains(99));
        assert!(!range.contains(150));
        assert_eq!(range.serial_count(), Some(50));
        assert!(range.check(150).is_err());
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(SerialRange::new(10, 9).is_err());
        assert!(SerialRange::new(-1, 9).is_err());
        assert!(SerialRange::new(5, 5).is_ok());
    }

    #[test]
    fn oversized_range_is_rejected() {
        assert!(matches!(
            SerialRange::new(0, i64::MAX),
            Err(AppError::Validation(_))
        ));
        let widest = SerialRange::new(0, MAX_SERIAL_VALUE).unwrap();
        assert_eq!(widest.serial_count(), Some(MAX_SERIAL_VALUE + 1));
    }
}
