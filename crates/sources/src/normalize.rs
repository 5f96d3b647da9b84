//! Helpers turning wire values into balance records.

use crate::context::SourceContext;
use portfolio_core::{AccountType, BalanceRecord, SourceId, META_PRICE_UNAVAILABLE};
use portfolio_fetch::FetchError;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::warn;

/// Metadata key distinguishing the two legs of a perpetual position.
pub const META_LEG: &str = "leg";

/// Parses a decimal string as sent by exchanges. Empty strings count as zero.
///
/// # Errors
///
/// Returns `Parse` naming `field` for anything else that is not a number.
pub fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, FetchError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|e| FetchError::parse(format!("invalid {field} {raw:?}: {e}")))
}

/// Values `quantity` of `symbol` with the run's pricing collaborator.
///
/// The price is looked up under the canonical symbol, so `WETH` is valued at
/// the `ETH` price. A missing price, or a value too large to represent,
/// degrades the USD value to zero and flags the record.
pub async fn priced_record(
    ctx: &SourceContext,
    source: &SourceId,
    account_type: AccountType,
    symbol: &str,
    quantity: Decimal,
) -> BalanceRecord {
    let canonical = ctx.aliases.canonicalize(symbol);
    let usd_value = match ctx.pricing.price_of(&canonical).await {
        Some(price) => {
            let value = quantity.checked_mul(price);
            if value.is_none() {
                warn!(source = %source, symbol = %canonical, %quantity, %price, "USD value overflows, leaving it unpriced");
            }
            value
        }
        None => None,
    };
    match usd_value {
        Some(usd) => BalanceRecord::new(source.clone(), account_type, symbol, quantity, usd),
        None => BalanceRecord::new(source.clone(), account_type, symbol, quantity, Decimal::ZERO)
            .with_meta(META_PRICE_UNAVAILABLE, "true"),
    }
}

/// Splits a contract multiplier off a perp base, e.g. `1000PEPE` into `PEPE` and 1000.
///
/// Only powers of ten from 1000 up count; `1INCH` stays as it is.
pub fn split_multiplier(base: &str) -> (&str, Decimal) {
    let digits = base.len() - base.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    let (prefix, rest) = base.split_at(digits);
    let is_multiplier = prefix.len() >= 4
        && prefix.starts_with('1')
        && prefix[1..].bytes().all(|b| b == b'0')
        && !rest.is_empty();
    if !is_multiplier {
        return (base, Decimal::ONE);
    }
    match Decimal::from_str(prefix) {
        Ok(multiplier) => (rest, multiplier),
        Err(_) => (base, Decimal::ONE),
    }
}

/// Records a perpetual position as a base leg and an opposite quote leg.
///
/// The base leg carries the signed size and signed notional; the quote leg in
/// the settlement asset carries `-notional` as both quantity and USD value, so
/// the pair adds no USD to the total while keeping the directional exposure.
pub fn perp_legs(
    source: &SourceId,
    base: &str,
    settle: &str,
    signed_size: Decimal,
    notional_usd: Decimal,
) -> [BalanceRecord; 2] {
    let signed_notional = if signed_size < Decimal::ZERO {
        -notional_usd.abs()
    } else {
        notional_usd.abs()
    };
    let side = if signed_size < Decimal::ZERO { "short" } else { "long" };

    [
        BalanceRecord::new(source.clone(), AccountType::Perp, base, signed_size, signed_notional)
            .with_meta(META_LEG, "base")
            .with_meta("side", side),
        BalanceRecord::new(
            source.clone(),
            AccountType::Perp,
            settle,
            -signed_notional,
            -signed_notional,
        )
        .with_meta(META_LEG, "quote")
        .with_meta("side", side),
    ]
}
