use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

use crate::error::ValidationError;

/// NPIs are issued under card issuer prefix 80840, which is prepended before
/// the Luhn check-digit calculation.
const NPI_ISSUER_PREFIX: &str = "80840";

/// Parse a fixed-width CCYYMMDD date. Wrong width, non-numeric content or a
/// calendar-invalid date (month 13, February 30) is a validation error.
pub fn parse_date(value: &str) -> Result<NaiveDate, ValidationError> {
    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::InvalidDate(value.to_string()));
    }
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .map_err(|_| ValidationError::InvalidDate(value.to_string()))
}

/// Parse a fixed-width CCYYMMDDHHMM date-time.
pub fn parse_datetime(value: &str) -> Result<NaiveDateTime, ValidationError> {
    if value.len() != 12 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::InvalidDateTime(value.to_string()));
    }
    NaiveDateTime::parse_from_str(value, "%Y%m%d%H%M")
        .map_err(|_| ValidationError::InvalidDateTime(value.to_string()))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

pub fn format_datetime(stamp: NaiveDateTime) -> String {
    stamp.format("%Y%m%d%H%M").to_string()
}

/// Parse an X12 amount: a signed decimal string with an explicit decimal
/// point, into an exact decimal. Floating point is never involved, so values
/// survive parse/generate round trips without drift.
pub fn parse_amount(value: &str) -> Result<Decimal, ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::InvalidAmount(value.to_string()));
    }
    Decimal::from_str_exact(value).map_err(|_| ValidationError::InvalidAmount(value.to_string()))
}

/// Format an amount for the wire. Normalized so `1.50` and `1.500` emit the
/// same text, keeping serialized output canonical.
pub fn format_amount(amount: Decimal) -> String {
    amount.normalize().to_string()
}

/// Validate a National Provider Identifier: 10 digits whose last digit is the
/// Luhn check digit over "80840" plus the first nine digits. Returns a bool
/// rather than an error so callers can choose to warn or reject.
pub fn npi_is_valid(npi: &str) -> bool {
    let bytes = npi.as_bytes();
    if bytes.len() != 10 || !bytes.iter().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match luhn_check_digit(&npi[..9]) {
        Some(check) => check == (bytes[9] - b'0') as u32,
        None => false,
    }
}

/// Check digit for an NPI given its first nine digits. Used when minting
/// identifiers for sample data.
pub fn npi_check_digit(first_nine: &str) -> Option<u32> {
    if first_nine.len() != 9 || !first_nine.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    luhn_check_digit(first_nine)
}

fn luhn_check_digit(first_nine: &str) -> Option<u32> {
    let payload: Vec<u32> = NPI_ISSUER_PREFIX
        .bytes()
        .chain(first_nine.bytes())
        .map(|b| (b - b'0') as u32)
        .collect();
    let mut sum = 0;
    for (offset, digit) in payload.iter().rev().enumerate() {
        let mut value = *digit;
        if offset % 2 == 0 {
            value *= 2;
            if value > 9 {
                value -= 9;
            }
        }
        sum += value;
    }
    Some((10 - sum % 10) % 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_valid() {
        let date = parse_date("20240229").expect("leap day");
        assert_eq!(format_date(date), "20240229");
    }

    #[test]
    fn test_parse_date_rejects_bad_width_and_content() {
        assert!(matches!(
            parse_date("2024031"),
            Err(ValidationError::InvalidDate(_))
        ));
        assert!(parse_date("2024031X").is_err());
        // Month 13 is numeric and the right width but calendar-invalid.
        assert!(parse_date("20241301").is_err());
        // Non-leap year February 29.
        assert!(parse_date("20230229").is_err());
    }

    #[test]
    fn test_parse_datetime() {
        let stamp = parse_datetime("202403151430").expect("valid");
        assert_eq!(format_datetime(stamp), "202403151430");
        assert!(parse_datetime("20240315").is_err());
        assert!(parse_datetime("202403152560").is_err());
    }

    #[test]
    fn test_amount_round_trip_is_exact() {
        let amount = parse_amount("125.50").expect("valid");
        assert_eq!(format_amount(amount), "125.50".parse::<Decimal>().unwrap().normalize().to_string());
        assert_eq!(parse_amount(&format_amount(amount)).expect("round trip"), amount);
    }

    #[test]
    fn test_amount_accepts_sign_rejects_garbage() {
        assert!(parse_amount("-12.07").is_ok());
        assert!(parse_amount("").is_err());
        assert!(parse_amount("12,50").is_err());
        assert!(parse_amount("abc").is_err());
    }

    #[test]
    fn test_npi_luhn_vectors() {
        // Canonical test NPI from the NPPES checksum example.
        assert!(npi_is_valid("1234567893"));
        assert!(npi_is_valid("1999999984"));
        assert!(!npi_is_valid("1234567890"));
        assert!(!npi_is_valid("123456789"));
        assert!(!npi_is_valid("12345678XX"));
    }

    #[test]
    fn test_npi_check_digit() {
        assert_eq!(npi_check_digit("123456789"), Some(3));
        assert_eq!(npi_check_digit("199999998"), Some(4));
        assert_eq!(npi_check_digit("12345"), None);
    }
}
