//! Fixed-point price and amount utilities.
//!
//! ## Overview
//!
//! All prices, collateral amounts, exposures and leverage values use
//! fixed-point representation to avoid floating-point errors. Values are
//! stored as u128 scaled by 10^8.
//!
//! ## Why Fixed-Point?
//!
//! Floating-point arithmetic can produce different results on different
//! hardware, breaking determinism. In an accounting engine, rounding
//! differences are directly exploitable as value extraction, so every
//! product goes through an exact 256-bit intermediate and floors.
//!
//! ## Scale Factor
//!
//! The scale factor is 10^8 (100,000,000), providing 8 decimal places.
//!
//! ## Examples
//!
//! ```
//! use synthcore::types::price::{to_fixed, from_fixed, mul_div, SCALE};
//!
//! let price = to_fixed("2000.5").unwrap();
//! assert_eq!(price, 200_050_000_000);
//! assert_eq!(from_fixed(price), "2000.50000000");
//!
//! // 3 * 2000.5 computed through the 256-bit intermediate
//! let notional = mul_div(300_000_000, price, SCALE).unwrap();
//! assert_eq!(notional, 600_150_000_000);
//! ```

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::types::huge_uint::HugeUint;

/// Scaling factor for fixed-point arithmetic: 10^8
pub const SCALE: u128 = 100_000_000;

/// Basis-point denominator (1 bps = 0.01%)
pub const BPS_DIVISOR: u128 = 10_000;

/// Seconds per funding day (the funding scale factor is a per-day rate)
pub const SECONDS_PER_DAY: u128 = 86_400;

// ============================================================================
// Conversion Functions
// ============================================================================

/// Convert a decimal string to fixed-point u128
///
/// Only used at the API edge; core math never parses strings.
///
/// # Example
///
/// ```
/// use synthcore::types::price::to_fixed;
///
/// assert_eq!(to_fixed("1.0"), Some(100_000_000));
/// assert_eq!(to_fixed("2000.12345678"), Some(200_012_345_678));
/// assert_eq!(to_fixed("0.00000001"), Some(1));
/// ```
pub fn to_fixed(s: &str) -> Option<u128> {
    let decimal = Decimal::from_str(s).ok()?;
    decimal_to_fixed(decimal)
}

/// Convert a Decimal to fixed-point u128
///
/// Returns `None` for negative or out-of-range values.
pub fn decimal_to_fixed(d: Decimal) -> Option<u128> {
    if d.is_sign_negative() {
        return None;
    }

    let scale = Decimal::from_u128(SCALE)?;
    let scaled = d.checked_mul(scale)?;
    let rounded = scaled.round_dp(0);
    rounded.to_u128()
}

/// Convert fixed-point u128 to a Decimal
///
/// Values beyond the Decimal mantissa range return `None`; this is a
/// display-path limitation only.
pub fn fixed_to_decimal(value: u128) -> Option<Decimal> {
    let d = Decimal::from_u128(value)?;
    let scale = Decimal::from_u128(SCALE)?;
    d.checked_div(scale)
}

/// Convert fixed-point u128 to a string with 8 decimal places
///
/// # Example
///
/// ```
/// use synthcore::types::price::from_fixed;
///
/// assert_eq!(from_fixed(100_000_000), "1.00000000");
/// assert_eq!(from_fixed(200_012_345_678), "2000.12345678");
/// ```
pub fn from_fixed(value: u128) -> String {
    match fixed_to_decimal(value) {
        Some(d) => format!("{:.8}", d),
        None => format!("{}e-8", value),
    }
}

// ============================================================================
// Arithmetic Functions (exact through 256-bit intermediates)
// ============================================================================

/// Compute `a * b / denominator` exactly, flooring once
///
/// The product is taken at full 256-bit width, so the only rounding step
/// is the final floor division. Returns `None` for a zero denominator or
/// a quotient that does not fit in u128.
///
/// # Example
///
/// ```
/// use synthcore::types::price::mul_div;
///
/// // (2^126) * 10 / 5 stays exact even though the product overflows u128
/// let big = 1u128 << 126;
/// assert_eq!(mul_div(big, 10, 5), Some(big * 2));
/// ```
pub fn mul_div(a: u128, b: u128, denominator: u128) -> Option<u128> {
    if denominator == 0 {
        return None;
    }
    HugeUint::mul(a, b).div_scalar(denominator)?.to_u128()
}

/// Multiply two fixed-point values
///
/// `a * b / SCALE`, floored.
pub fn checked_mul(a: u128, b: u128) -> Option<u128> {
    mul_div(a, b, SCALE)
}

/// Divide two fixed-point values
///
/// `a * SCALE / b`, floored. Returns `None` if the divisor is zero.
pub fn checked_div(a: u128, b: u128) -> Option<u128> {
    if b == 0 {
        return None;
    }
    mul_div(a, SCALE, b)
}

/// Add two fixed-point values
pub fn checked_add(a: u128, b: u128) -> Option<u128> {
    a.checked_add(b)
}

/// Subtract two fixed-point values
pub fn checked_sub(a: u128, b: u128) -> Option<u128> {
    a.checked_sub(b)
}

/// Take `bps` basis points of `a`, floored
///
/// # Example
///
/// ```
/// use synthcore::types::price::apply_bps;
///
/// assert_eq!(apply_bps(1_000_000, 25), Some(2_500)); // 0.25%
/// ```
pub fn apply_bps(a: u128, bps: u16) -> Option<u128> {
    mul_div(a, bps as u128, BPS_DIVISOR)
}

// ============================================================================
// Comparison Helpers
// ============================================================================

/// Compare two values with a tolerance (for testing)
pub fn approx_eq(a: u128, b: u128, tolerance: u128) -> bool {
    if a >= b {
        a - b <= tolerance
    } else {
        b - a <= tolerance
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
