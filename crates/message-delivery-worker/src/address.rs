//! Destination address normalization.
//!
//! Destinations arrive as raw digit strings, sometimes with formatting
//! characters or the country prefix already applied. Normalization is a hard
//! precondition before every send.

use thiserror::Error;

/// Country-code prefix prepended to every canonical address.
const COUNTRY_PREFIX: &str = "591";

/// Length of a local mobile number.
const LOCAL_DIGITS: usize = 8;

/// Leading digits assigned to the mobile operators.
const OPERATOR_DIGITS: [char; 2] = ['6', '7'];

/// Address validation error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// The destination cannot be normalized to a valid mobile number
    #[error("invalid destination address: {0}")]
    InvalidAddress(String),
}

/// Normalize a raw destination into canonical `591XXXXXXXX` form.
///
/// Strips all non-digit characters, strips one leading country prefix if
/// present, and requires exactly eight remaining digits with an operator
/// leading digit. Idempotent on canonical input.
pub fn normalize(raw: &str) -> Result<String, AddressError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let local = digits.strip_prefix(COUNTRY_PREFIX).unwrap_or(&digits);

    if local.len() != LOCAL_DIGITS {
        return Err(AddressError::InvalidAddress(format!(
            "expected {} digits after the country code, got {} in {:?}",
            LOCAL_DIGITS,
            local.len(),
            raw
        )));
    }

    if !local.starts_with(OPERATOR_DIGITS) {
        return Err(AddressError::InvalidAddress(format!(
            "mobile numbers start with 6 or 7, got {:?}",
            raw
        )));
    }

    Ok(format!("{}{}", COUNTRY_PREFIX, local))
}
