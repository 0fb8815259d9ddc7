//! Token and text helpers.

use contractfill_core::FillerError;

/// Longest memo stored for transfers, moves and offers.
pub const MAX_MEMO_CHARS: usize = 256;

/// An asset quantity like `"1.50000000 WAX"` in integer base units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAmount {
    /// Base units, without the decimal point (`"150000000"`).
    pub amount: String,
    pub symbol: String,
    pub precision: u8,
}

/// Split an asset string into amount, symbol and precision.
pub fn split_token(quantity: &str) -> Result<TokenAmount, FillerError> {
    let invalid = || FillerError::Other(format!("invalid token quantity '{quantity}'"));
    let (number, symbol) = quantity.trim().split_once(' ').ok_or_else(invalid)?;
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    let digits = format!("{whole}{fraction}");
    if symbol.is_empty() || digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let trimmed = digits.trim_start_matches('0');
    Ok(TokenAmount {
        amount: if trimmed.is_empty() { "0".into() } else { trimmed.into() },
        symbol: symbol.to_string(),
        precision: u8::try_from(fraction.len()).map_err(|_| invalid())?,
    })
}

/// Parse a symbol like `"8,WAX"` into `(precision, symbol)`.
pub fn parse_symbol(sym: &str) -> Result<(u8, String), FillerError> {
    let invalid = || FillerError::Other(format!("invalid token symbol '{sym}'"));
    let (precision, symbol) = sym.split_once(',').ok_or_else(invalid)?;
    let precision = precision.trim().parse::<u8>().map_err(|_| invalid())?;
    Ok((precision, symbol.trim().to_string()))
}

/// Sum two base-unit amounts.
pub fn add_amounts(a: &str, b: &str) -> Result<String, FillerError> {
    let parse = |s: &str| {
        s.parse::<u128>()
            .map_err(|_| FillerError::Other(format!("invalid token amount '{s}'")))
    };
    Ok((parse(a)? + parse(b)?).to_string())
}

pub fn truncate_memo(memo: &str) -> String {
    memo.chars().take(MAX_MEMO_CHARS).collect()
}

/// Numeric value of a `uint64` id, for ordering.
pub fn numeric_id(id: &str) -> u64 {
    id.parse().unwrap_or(u64::MAX)
}
