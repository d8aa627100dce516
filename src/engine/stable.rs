//! Stable-token share ledger and divisor rebase.
//!
//! ## Shares and the Divisor
//!
//! Balances are stored as shares; display units are `shares / divisor`.
//! The divisor starts at 10^18 and only ever decreases, floored at 10^9:
//! a decrease makes every holder's displayed balance grow (the rebase),
//! and the floor bounds the maximum token expansion.
//!
//! ## Rebase
//!
//! `maybe_rebase` fires only when the check interval elapsed, the implied
//! unit price (vault value per token) reached the threshold, and the
//! divisor is above the floor. The new divisor renormalizes the unit
//! price to the target. The external callback runs inside the rebase and
//! a callback failure aborts it atomically (the divisor is restored),
//! but the check timestamp is recorded on every evaluation so a failing
//! callback cannot be retried in a tight loop.

use std::collections::HashMap;

use crate::engine::oracle::RebaseHandler;
use crate::types::price::{mul_div, SCALE};
use crate::types::{ActorId, ProtocolError, ProtocolResult, Timestamp};

/// Starting shares-per-token divisor
pub const MAX_DIVISOR: u128 = 1_000_000_000_000_000_000;

/// Divisor floor; caps total display-unit expansion at 10^9 x
pub const MIN_DIVISOR: u128 = 1_000_000_000;

// ============================================================================
// StableLedger
// ============================================================================

/// Share-denominated balance book for the stable token.
#[derive(Debug, Clone)]
pub struct StableLedger {
    /// Per-account shares
    balances: HashMap<ActorId, u128>,

    /// Shares escrowed by pending withdrawals
    escrow: u128,

    /// All shares in existence (accounts + escrow)
    total_shares: u128,

    /// Current shares-per-token divisor
    divisor: u128,
}

impl StableLedger {
    /// Fresh ledger at the maximum divisor
    pub fn new() -> Self {
        Self {
            balances: HashMap::new(),
            escrow: 0,
            total_shares: 0,
            divisor: MAX_DIVISOR,
        }
    }

    /// Shares held by an account
    #[inline]
    pub fn shares_of(&self, actor: ActorId) -> u128 {
        self.balances.get(&actor).copied().unwrap_or(0)
    }

    /// Shares held in withdrawal escrow
    #[inline]
    pub fn escrowed_shares(&self) -> u128 {
        self.escrow
    }

    /// All shares in existence
    #[inline]
    pub fn total_shares(&self) -> u128 {
        self.total_shares
    }

    /// Current divisor
    #[inline]
    pub fn divisor(&self) -> u128 {
        self.divisor
    }

    /// Display-unit value of a share count under the current divisor
    #[inline]
    pub fn tokens_of(&self, shares: u128) -> u128 {
        shares / self.divisor
    }

    /// Display-unit balance of an account
    #[inline]
    pub fn token_balance_of(&self, actor: ActorId) -> u128 {
        self.tokens_of(self.shares_of(actor))
    }

    /// Total display-unit supply
    #[inline]
    pub fn total_tokens(&self) -> u128 {
        self.total_shares / self.divisor
    }

    /// Mint `tokens` display units to an account
    ///
    /// Returns the share count actually minted.
    pub fn mint_tokens(&mut self, actor: ActorId, tokens: u128) -> ProtocolResult<u128> {
        if tokens == 0 {
            return Err(ProtocolError::InvalidAmount);
        }
        let shares = tokens
            .checked_mul(self.divisor)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        self.total_shares = self
            .total_shares
            .checked_add(shares)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        *self.balances.entry(actor).or_insert(0) += shares;
        Ok(shares)
    }

    /// Move shares from an account into withdrawal escrow
    pub fn move_to_escrow(&mut self, actor: ActorId, shares: u128) -> ProtocolResult<()> {
        if shares == 0 {
            return Err(ProtocolError::InvalidAmount);
        }
        let balance = self
            .balances
            .get_mut(&actor)
            .ok_or(ProtocolError::InsufficientBalance)?;
        if *balance < shares {
            return Err(ProtocolError::InsufficientBalance);
        }
        *balance -= shares;
        if *balance == 0 {
            self.balances.remove(&actor);
        }
        self.escrow += shares;
        Ok(())
    }

    /// Return escrowed shares to an account (refund path)
    pub fn return_from_escrow(&mut self, actor: ActorId, shares: u128) -> ProtocolResult<()> {
        if shares > self.escrow {
            return Err(ProtocolError::InsufficientBalance);
        }
        self.escrow -= shares;
        *self.balances.entry(actor).or_insert(0) += shares;
        Ok(())
    }

    /// Burn escrowed shares (withdrawal settlement)
    pub fn burn_escrowed(&mut self, shares: u128) -> ProtocolResult<()> {
        if shares > self.escrow {
            return Err(ProtocolError::InsufficientBalance);
        }
        self.escrow -= shares;
        self.total_shares = self
            .total_shares
            .checked_sub(shares)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        Ok(())
    }
}

// ============================================================================
// RebaseController
// ============================================================================

/// Divisor-rebase policy and check-interval state.
#[derive(Debug, Clone, Copy)]
pub struct RebaseController {
    /// Minimum seconds between evaluations
    pub interval: u64,

    /// Unit price that arms a rebase (fixed-point, 10^8)
    pub threshold: u128,

    /// Unit price a rebase renormalizes to (fixed-point, 10^8)
    pub target: u128,

    /// Timestamp of the last evaluation (successful or not)
    pub last_check_ts: Timestamp,
}

/// Result of a rebase evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebaseResult {
    pub rebased: bool,
    pub old_divisor: u128,
    pub new_divisor: u128,
}

impl RebaseController {
    pub fn new(interval: u64, threshold: u128, target: u128) -> Self {
        Self {
            interval,
            threshold,
            target,
            last_check_ts: 0,
        }
    }

    /// Implied unit price: vault value per display token.
    ///
    /// Returns `EmptyVault` when there is no supply to price against.
    pub fn unit_price(
        stable: &StableLedger,
        vault_balance: u128,
        asset_price: u128,
    ) -> ProtocolResult<u128> {
        let supply = stable.total_tokens();
        if supply == 0 {
            return Err(ProtocolError::EmptyVault);
        }
        let vault_value = mul_div(vault_balance, asset_price, SCALE)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        mul_div(vault_value, SCALE, supply).ok_or(ProtocolError::ArithmeticOverflow)
    }

    /// Evaluate and possibly perform a rebase.
    ///
    /// The check timestamp advances on every evaluation past the
    /// interval, whether or not a rebase fires or its callback succeeds.
    pub fn maybe_rebase(
        &mut self,
        stable: &mut StableLedger,
        vault_balance: u128,
        asset_price: u128,
        now: Timestamp,
        handler: &mut dyn RebaseHandler,
    ) -> ProtocolResult<RebaseResult> {
        let unchanged = RebaseResult {
            rebased: false,
            old_divisor: stable.divisor,
            new_divisor: stable.divisor,
        };

        if self.last_check_ts != 0 && now.saturating_sub(self.last_check_ts) < self.interval {
            return Ok(unchanged);
        }
        self.last_check_ts = now;

        if stable.total_tokens() == 0 {
            return Ok(unchanged);
        }
        let unit = Self::unit_price(stable, vault_balance, asset_price)?;
        if unit < self.threshold || stable.divisor <= MIN_DIVISOR {
            return Ok(unchanged);
        }

        // Renormalize: divisor scales by target/unit (< 1), clamped at
        // the floor. Monotone non-increase is structural.
        let new_divisor = mul_div(stable.divisor, self.target, unit)
            .ok_or(ProtocolError::ArithmeticOverflow)?
            .max(MIN_DIVISOR);
        if new_divisor >= stable.divisor {
            return Ok(unchanged);
        }

        let old_divisor = stable.divisor;
        stable.divisor = new_divisor;
        if let Err(_callback_err) = handler.on_rebase(old_divisor, new_divisor) {
            stable.divisor = old_divisor;
            return Err(ProtocolError::RebaseCallbackFailed);
        }

        Ok(RebaseResult {
            rebased: true,
            old_divisor,
            new_divisor,
        })
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
