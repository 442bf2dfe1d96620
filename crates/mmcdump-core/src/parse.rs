//! Command line value parsing.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseClusterError {
    #[error("cluster number is empty")]
    Empty,
    #[error("{0:?} is not a hexadecimal number")]
    InvalidDigit(String),
    #[error("{0:?} does not fit in 32 bits")]
    Overflow(String),
}

/// Parse a cluster number.
///
/// The value is always hexadecimal; a leading `0x` or `0X` is optional, so
/// `"0x2A"` and `"2A"` are both 42 and `"10"` is 16.
pub fn parse_cluster(s: &str) -> Result<u32, ParseClusterError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);

    if digits.is_empty() {
        return Err(ParseClusterError::Empty);
    }
    // from_str_radix would also take a leading '+'.
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ParseClusterError::InvalidDigit(s.to_string()));
    }
    u32::from_str_radix(digits, 16).map_err(|_| ParseClusterError::Overflow(s.to_string()))
}
