//! Exchange-rate parsing and droplet formatting.
//!
//! Rates are configured as decimal strings ("0.002", "500") or rational
//! fractions ("1/2"). All arithmetic stays in exact decimals; floats are
//! never used because fraction rates cannot be represented exactly.

use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

/// Droplets per whole MDL.
pub const DROPLETS_PER_MDL: u64 = 1_000_000;

/// Maximum droplet precision the MDL chain accepts.
pub const MAX_DROPLET_PRECISION: u32 = 6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateError {
    #[error("can't convert {0} to decimal")]
    Unparseable(String),

    #[error("rate must be greater than zero")]
    NonPositiveRate,

    #[error("amount must be greater than or equal to 0")]
    NegativeAmount,

    #[error("max decimals {0} is larger than the droplet precision {MAX_DROPLET_PRECISION}")]
    PrecisionTooLarge(u32),

    #[error("droplet amount overflows")]
    Overflow,
}

/// Parse a rate string: a plain decimal, or a rational `a/b`.
///
/// `1/0` and garbage both come back as [`RateError::Unparseable`]; sign
/// checks are left to the caller since negative decimals are legal here
/// (config validation wants to report them differently).
pub fn parse_rate(s: &str) -> Result<Decimal, RateError> {
    let trimmed = s.trim();

    if let Some((num, den)) = trimmed.split_once('/') {
        let num = Decimal::from_str(num.trim()).map_err(|_| RateError::Unparseable(s.into()))?;
        let den = Decimal::from_str(den.trim()).map_err(|_| RateError::Unparseable(s.into()))?;
        return num
            .checked_div(den)
            .ok_or_else(|| RateError::Unparseable(s.into()));
    }

    Decimal::from_str(trimmed).map_err(|_| RateError::Unparseable(s.into()))
}

/// Parse a rate and require it to be strictly positive.
pub fn parse_positive_rate(s: &str) -> Result<Decimal, RateError> {
    let rate = parse_rate(s)?;
    if rate <= Decimal::ZERO {
        return Err(RateError::NonPositiveRate);
    }
    Ok(rate)
}

/// Render a droplet amount as a fixed-point MDL string ("1.500000").
pub fn droplets_to_string(droplets: u64) -> String {
    format!(
        "{}.{:06}",
        droplets / DROPLETS_PER_MDL,
        droplets % DROPLETS_PER_MDL
    )
}
