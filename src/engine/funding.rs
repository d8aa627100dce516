//! Funding-rate and profit/loss roll-forward.
//!
//! ## Model
//!
//! The protocol holds two sides of one collateral pool: the vault
//! (backing the stable token) and the long side (backing leveraged
//! positions). Every state transition rolls both balances to the new
//! price and timestamp before anything else mutates; this module is the
//! single place that movement happens.
//!
//! Two effects compose in one pass:
//!
//! 1. **Profit/loss**: the long side's availability re-bases through the
//!    entry multiplier: `new_long = total_expo − last_price ×
//!    last_trading_expo / price`. The vault takes the complement of the
//!    (conserved) pool, so collateral-quantity drift from yield accrual
//!    is absorbed without a price signal.
//! 2. **Funding**: an EMA of the exposure imbalance, scaled by the
//!    funding factor and elapsed time, transfers notional between the
//!    sides. The heavier side pays.
//!
//! Both clamps are one-sided: a side's availability floors at zero and
//! the deficit is socialized into the other side, never an error.
//!
//! Calling roll-forward twice at the same timestamp is an exact no-op.

use crate::types::price::{mul_div, SCALE, SECONDS_PER_DAY};
use crate::types::{ProtocolError, ProtocolResult, Timestamp};

// ============================================================================
// Balances
// ============================================================================

/// The shared collateral aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Balances {
    /// Collateral backing the stable token (fixed-point, 10^8)
    pub vault: u128,

    /// Collateral backing open positions (fixed-point, 10^8)
    pub long: u128,

    /// Escrowed collateral of not-yet-validated deposits
    pub pending_vault: u128,

    /// Accrued protocol fees awaiting collection
    pub fees: u128,
}

impl Balances {
    /// Sum of every internal bucket (must never exceed custody)
    pub fn total(&self) -> u128 {
        self.vault
            .saturating_add(self.long)
            .saturating_add(self.pending_vault)
            .saturating_add(self.fees)
    }
}

// ============================================================================
// Imbalance
// ============================================================================

/// Signed exposure imbalance in basis points:
/// `(long_trading_expo − vault) × 10_000 / (long_trading_expo + vault)`.
///
/// Positive means the long side is heavier. Zero when both sides are
/// empty.
pub fn imbalance_bps(long_trading_expo: u128, vault: u128) -> ProtocolResult<i128> {
    let total = long_trading_expo
        .checked_add(vault)
        .ok_or(ProtocolError::ArithmeticOverflow)?;
    if total == 0 {
        return Ok(0);
    }

    let long = i128::try_from(long_trading_expo).map_err(|_| ProtocolError::ArithmeticOverflow)?;
    let vault = i128::try_from(vault).map_err(|_| ProtocolError::ArithmeticOverflow)?;
    let total = i128::try_from(total).map_err(|_| ProtocolError::ArithmeticOverflow)?;

    let diff = long - vault;
    diff.checked_mul(10_000)
        .map(|scaled| scaled / total)
        .ok_or(ProtocolError::ArithmeticOverflow)
}

// ============================================================================
// FundingState
// ============================================================================

/// Time-weighted funding state shared by every mutation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingState {
    /// Price applied by the last roll-forward (fixed-point, 10^8)
    pub last_price: u128,

    /// Timestamp of the last roll-forward
    pub last_update_ts: Timestamp,

    /// EMA of the signed exposure imbalance (fixed-point, 10^8; full
    /// one-sidedness = ±SCALE)
    pub ema: i128,

    /// Funding scale factor: rate per day at full imbalance
    /// (fixed-point, 10^8)
    pub funding_sf: u128,

    /// EMA averaging window in seconds
    pub ema_period: u64,
}

impl FundingState {
    /// Fresh state; the first roll-forward establishes the price basis
    pub fn new(funding_sf: u128, ema_period: u64) -> Self {
        Self {
            last_price: 0,
            last_update_ts: 0,
            ema: 0,
            funding_sf,
            ema_period: ema_period.max(1),
        }
    }

    /// Instantaneous imbalance, scaled to ±SCALE
    fn instant_imbalance(long_trading_expo: u128, vault: u128) -> ProtocolResult<i128> {
        let bps = imbalance_bps(long_trading_expo, vault)?;
        bps.checked_mul(SCALE as i128 / 10_000)
            .ok_or(ProtocolError::ArithmeticOverflow)
    }

    /// Roll both balances forward to (`price`, `now`).
    ///
    /// Zero elapsed time is an exact no-op. Returns the new
    /// (vault, long) pair.
    pub fn roll_forward(
        &mut self,
        balances: &mut Balances,
        total_expo: u128,
        price: u128,
        now: Timestamp,
    ) -> ProtocolResult<(u128, u128)> {
        if price == 0 {
            return Err(ProtocolError::StalePrice);
        }
        if self.last_price != 0 && now <= self.last_update_ts {
            return Ok((balances.vault, balances.long));
        }

        let elapsed = now.saturating_sub(self.last_update_ts);
        let pool = balances
            .long
            .checked_add(balances.vault)
            .ok_or(ProtocolError::ArithmeticOverflow)?;

        // 1. Profit/loss: re-base the long side through the multiplier.
        //    The very first roll has no basis yet and only records one.
        let mut new_long = if self.last_price == 0 {
            balances.long
        } else {
            let old_trading = total_expo.saturating_sub(balances.long);
            let shifted = mul_div(self.last_price, old_trading, price)
                .ok_or(ProtocolError::ArithmeticOverflow)?;
            total_expo.saturating_sub(shifted).min(pool)
        };

        // 2. Funding: EMA of imbalance, heavier side pays
        let new_trading = total_expo.saturating_sub(new_long);
        let vault_side = pool - new_long;
        let inst = Self::instant_imbalance(new_trading, vault_side)?;

        let window = elapsed.min(self.ema_period) as i128;
        self.ema += (inst - self.ema) * window / self.ema_period as i128;

        let rate_abs = self.ema.unsigned_abs();
        let per_day = mul_div(rate_abs, self.funding_sf, SCALE)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        let over_window = mul_div(per_day, elapsed as u128, SECONDS_PER_DAY)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        let funding = mul_div(over_window, new_trading, SCALE)
            .ok_or(ProtocolError::ArithmeticOverflow)?;

        if self.ema > 0 {
            // Long side heavier: long pays vault
            new_long = new_long.saturating_sub(funding);
        } else if self.ema < 0 {
            // Vault side heavier: vault pays long
            new_long = new_long.saturating_add(funding.min(pool - new_long));
        }

        balances.long = new_long;
        balances.vault = pool - new_long;
        self.last_price = price;
        self.last_update_ts = now;

        Ok((balances.vault, balances.long))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
