use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;

/// Monetary amounts are exact decimals. No rounding is ever applied, so
/// "0.1" + "0.2" is exactly "0.3".
pub type Amount = Decimal;

/// Parse user input into an exact amount.
/// Example: "50" -> 50, "12.345" -> 12.345, " 0.10 " -> 0.10
///
/// Sign is preserved; whether a negative or zero amount is acceptable is
/// decided by the operation that receives it.
pub fn parse_amount(input: &str) -> Result<Amount, ParseAmountError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseAmountError::Empty);
    }
    // Exponent notation and thousand separators are rejected on purpose:
    // "1e3" and "1,000" are ambiguous when typed at a prompt.
    if !input
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == '-' || c == '+')
    {
        return Err(ParseAmountError::InvalidFormat(input.to_string()));
    }
    Decimal::from_str(input).map_err(|_| ParseAmountError::InvalidFormat(input.to_string()))
}

/// True when `amount` is acceptable as the amount of a deposit, withdrawal
/// or transfer.
pub fn is_valid_amount(amount: Amount) -> bool {
    amount > Decimal::ZERO
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseAmountError {
    Empty,
    InvalidFormat(String),
}

impl fmt::Display for ParseAmountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseAmountError::Empty => write!(f, "amount is empty"),
            ParseAmountError::InvalidFormat(s) => write!(f, "invalid amount: {}", s),
        }
    }
}

impl std::error::Error for ParseAmountError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("50"), Ok(dec("50")));
        assert_eq!(parse_amount("12.345"), Ok(dec("12.345")));
        assert_eq!(parse_amount(" 0.10 "), Ok(dec("0.10")));
        assert_eq!(parse_amount("-3.5"), Ok(dec("-3.5")));
    }

    #[test]
    fn test_parse_amount_invalid() {
        assert_eq!(parse_amount(""), Err(ParseAmountError::Empty));
        assert!(parse_amount("abc").is_err());
        assert!(parse_amount("12.34.56").is_err());
        assert!(parse_amount("1e3").is_err());
        assert!(parse_amount("1,000").is_err());
    }

    #[test]
    fn test_decimal_arithmetic_is_exact() {
        let sum = parse_amount("0.1").unwrap() + parse_amount("0.2").unwrap();
        assert_eq!(sum, dec("0.3"));
    }

    #[test]
    fn test_is_valid_amount() {
        assert!(is_valid_amount(dec("0.01")));
        assert!(!is_valid_amount(Decimal::ZERO));
        assert!(!is_valid_amount(dec("-1")));
    }
}
