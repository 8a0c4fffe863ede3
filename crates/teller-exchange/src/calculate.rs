//! MDL payout amount calculation.
//!
//! The whole path is exact decimal arithmetic:
//!
//! ```text
//! droplets = trunc_to(max_decimals, amount_native / scale * rate) * 1e6
//! ```
//!
//! where `scale` is the coin's smallest-unit factor and `rate` is the
//! configured decimal-or-fraction string.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use teller_core::rate::{parse_rate, RateError, DROPLETS_PER_MDL, MAX_DROPLET_PRECISION};
use teller_core::types::CoinType;

/// Convert a native deposit amount into MDL droplets at the given rate.
///
/// Rejects negative amounts, non-positive or unparseable rates, and
/// `max_decimals` beyond the chain's droplet precision. Zero in is zero
/// out; the engine decides whether a zero payout is an error.
pub fn calculate_mdl_value(
    amount: i128,
    coin: CoinType,
    rate: &str,
    max_decimals: u32,
) -> Result<u64, RateError> {
    if amount < 0 {
        return Err(RateError::NegativeAmount);
    }
    if max_decimals > MAX_DROPLET_PRECISION {
        return Err(RateError::PrecisionTooLarge(max_decimals));
    }

    let rate = parse_rate(rate)?;
    if rate <= Decimal::ZERO {
        return Err(RateError::NonPositiveRate);
    }

    let native =
        Decimal::try_from_i128_with_scale(amount, 0).map_err(|_| RateError::Overflow)?;
    let scale = Decimal::try_from_i128_with_scale(coin.native_unit_scale(), 0)
        .map_err(|_| RateError::Overflow)?;

    let coins = native.checked_div(scale).ok_or(RateError::Overflow)?;
    let mdl = coins.checked_mul(rate).ok_or(RateError::Overflow)?;

    mdl.trunc_with_scale(max_decimals)
        .checked_mul(Decimal::from(DROPLETS_PER_MDL))
        .ok_or(RateError::Overflow)?
        .trunc()
        .to_u64()
        .ok_or(RateError::Overflow)
}
