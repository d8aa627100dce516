//! Rebalancer: aggregates small deposits into one leveraged position.
//!
//! ## Versioned Multiplier Accumulation
//!
//! The host keeps a single aggregate position open to correct long/vault
//! imbalance. Each time that position is closed and reopened, the closed
//! version's profit multiplier (`previous_value / previous_amount`, zero
//! when liquidated) is folded into a cumulative multiplier and a new
//! version begins with all pending deposits at 1x.
//!
//! A depositor's live value is computed lazily:
//! `entry_amount × current_multiplier / entry_multiplier`
//! where `entry_multiplier` is the cumulative at the version the deposit
//! joined. No per-depositor storage write is needed when the aggregate
//! position's value changes; the version log is append-only.
//!
//! A liquidated version zeroes the multiplier; the log then starts a new
//! era so later entrants get a fresh 1x basis while every earlier
//! depositor's value is pinned at zero.

use std::collections::HashMap;

use crate::types::price::{mul_div, SCALE};
use crate::types::{ActorId, ProtocolError, ProtocolResult, Timestamp};

// ============================================================================
// Version log
// ============================================================================

/// One aggregate-position version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionVersion {
    /// Cumulative multiplier at the version's creation (fixed-point 10^8)
    pub entry_multiplier: u128,

    /// Aggregate amount the version opened with
    pub amount: u128,

    /// Era counter; bumps when a liquidation zeroes the multiplier
    pub era: u32,
}

/// Lifecycle phase of one depositor record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositPhase {
    /// Deposit announced, not yet validated
    InitiatedDeposit,
    /// Validated; joins the aggregate at the next position refresh
    Validated,
    /// Exit announced, awaiting its own delay
    InitiatedWithdraw,
}

/// Per-depositor record. One per actor at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserDeposit {
    pub amount: u128,
    /// Version index the deposit joins (set at validation)
    pub entry_version: usize,
    pub initiated_at: Timestamp,
    pub phase: DepositPhase,
}

// ============================================================================
// Rebalancer
// ============================================================================

/// Deposit aggregator over the protocol's imbalance-correcting position.
#[derive(Debug, Clone)]
pub struct Rebalancer {
    /// Append-only version log; the last entry is the live version
    versions: Vec<PositionVersion>,

    /// Depositor records
    deposits: HashMap<ActorId, UserDeposit>,

    /// Validated deposits awaiting inclusion at the next refresh
    pending_amount: u128,

    /// Minimum deposit size (fixed-point, 10^8)
    min_deposit: u128,

    /// Seconds between initiate and validate
    validation_delay: u64,
}

impl Rebalancer {
    pub fn new(min_deposit: u128, validation_delay: u64) -> Self {
        Self {
            versions: vec![PositionVersion {
                entry_multiplier: SCALE,
                amount: 0,
                era: 0,
            }],
            deposits: HashMap::new(),
            pending_amount: 0,
            min_deposit,
            validation_delay,
        }
    }

    /// Index of the live version
    #[inline]
    pub fn current_version(&self) -> usize {
        self.versions.len() - 1
    }

    /// Live version data
    #[inline]
    fn current(&self) -> &PositionVersion {
        self.versions.last().expect("version log is never empty")
    }

    /// Cumulative multiplier of the live version
    #[inline]
    pub fn current_multiplier(&self) -> u128 {
        self.current().entry_multiplier
    }

    /// Aggregate amount of the live version
    #[inline]
    pub fn current_amount(&self) -> u128 {
        self.current().amount
    }

    /// Validated deposits awaiting inclusion
    #[inline]
    pub fn pending_amount(&self) -> u128 {
        self.pending_amount
    }

    /// Depositor record, if any
    #[inline]
    pub fn deposit_of(&self, actor: ActorId) -> Option<&UserDeposit> {
        self.deposits.get(&actor)
    }

    // ========================================================================
    // Depositor lifecycle
    // ========================================================================

    /// Announce a deposit
    pub fn initiate_deposit(
        &mut self,
        actor: ActorId,
        amount: u128,
        now: Timestamp,
    ) -> ProtocolResult<()> {
        if self.deposits.contains_key(&actor) {
            return Err(ProtocolError::SlotBusy);
        }
        if amount < self.min_deposit {
            return Err(ProtocolError::AmountOutOfBounds);
        }
        self.deposits.insert(
            actor,
            UserDeposit {
                amount,
                entry_version: 0,
                initiated_at: now,
                phase: DepositPhase::InitiatedDeposit,
            },
        );
        Ok(())
    }

    /// Validate a deposit after the delay; it joins the next version
    pub fn validate_deposit(&mut self, actor: ActorId, now: Timestamp) -> ProtocolResult<()> {
        let next_version = self.versions.len();
        let deposit = self
            .deposits
            .get_mut(&actor)
            .ok_or(ProtocolError::NoPendingAction)?;
        if deposit.phase != DepositPhase::InitiatedDeposit {
            return Err(ProtocolError::ActionKindMismatch);
        }
        if now < deposit.initiated_at.saturating_add(self.validation_delay) {
            return Err(ProtocolError::TooEarly);
        }

        deposit.phase = DepositPhase::Validated;
        deposit.entry_version = next_version;
        self.pending_amount = self
            .pending_amount
            .checked_add(deposit.amount)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Announce an exit (pending or included deposits alike)
    pub fn initiate_withdraw(&mut self, actor: ActorId, now: Timestamp) -> ProtocolResult<()> {
        let deposit = self
            .deposits
            .get_mut(&actor)
            .ok_or(ProtocolError::NoPendingAction)?;
        if deposit.phase != DepositPhase::Validated {
            return Err(ProtocolError::ActionKindMismatch);
        }
        deposit.phase = DepositPhase::InitiatedWithdraw;
        deposit.initiated_at = now;
        Ok(())
    }

    /// Settle an exit after the delay.
    ///
    /// Returns the amount owed to the depositor; the host shrinks the
    /// aggregate position by the same value.
    pub fn validate_withdraw(&mut self, actor: ActorId, now: Timestamp) -> ProtocolResult<u128> {
        let deposit = *self
            .deposits
            .get(&actor)
            .ok_or(ProtocolError::NoPendingAction)?;
        if deposit.phase != DepositPhase::InitiatedWithdraw {
            return Err(ProtocolError::ActionKindMismatch);
        }
        if now < deposit.initiated_at.saturating_add(self.validation_delay) {
            return Err(ProtocolError::TooEarly);
        }

        let amount_out = self.value_of(&deposit)?;
        if deposit.entry_version >= self.versions.len() {
            // Never included: leaves the pending pool
            self.pending_amount = self.pending_amount.saturating_sub(deposit.amount);
        } else {
            // Included: shrink the live aggregate by the exit value
            let current = self.versions.last_mut().expect("version log is never empty");
            current.amount = current.amount.saturating_sub(amount_out);
        }
        self.deposits.remove(&actor);
        Ok(amount_out)
    }

    /// Live value of an actor's deposit (zero if none)
    pub fn withdrawable(&self, actor: ActorId) -> u128 {
        self.deposits
            .get(&actor)
            .and_then(|d| self.value_of(d).ok())
            .unwrap_or(0)
    }

    fn value_of(&self, deposit: &UserDeposit) -> ProtocolResult<u128> {
        if deposit.phase == DepositPhase::InitiatedDeposit
            || deposit.entry_version >= self.versions.len()
        {
            // Not absorbed yet: plain principal
            return Ok(deposit.amount);
        }

        let entry = &self.versions[deposit.entry_version];
        let current = self.current();
        if entry.era != current.era || entry.entry_multiplier == 0 {
            // A liquidation wiped every version of the old era
            return Ok(0);
        }
        mul_div(deposit.amount, current.entry_multiplier, entry.entry_multiplier)
            .ok_or(ProtocolError::ArithmeticOverflow)
    }

    // ========================================================================
    // Aggregate position refresh
    // ========================================================================

    /// Fold the closed aggregate position into the log and start the next
    /// version with all pending deposits.
    ///
    /// `previous_value` is the value the closed position settled at; zero
    /// means it was liquidated and every depositor of the era is wiped.
    pub fn update_position(&mut self, previous_value: u128) -> ProtocolResult<()> {
        let current = *self.current();

        let (multiplier, next_era) = if current.amount == 0 {
            // Empty version closes neutral
            (SCALE, current.era)
        } else if previous_value == 0 {
            (0, current.era)
        } else {
            (
                mul_div(previous_value, SCALE, current.amount)
                    .ok_or(ProtocolError::ArithmeticOverflow)?,
                current.era,
            )
        };

        let next_cum = mul_div(current.entry_multiplier, multiplier, SCALE)
            .ok_or(ProtocolError::ArithmeticOverflow)?;

        let (entry_multiplier, era) = if next_cum == 0 {
            // Fresh era: later entrants get a clean 1x basis while the
            // wiped era stays pinned at zero
            (SCALE, next_era + 1)
        } else {
            (next_cum, next_era)
        };

        self.versions.push(PositionVersion {
            entry_multiplier,
            amount: previous_value
                .checked_add(self.pending_amount)
                .ok_or(ProtocolError::ArithmeticOverflow)?,
            era,
        });
        self.pending_amount = 0;
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: u64 = 60;

    fn rebalancer() -> Rebalancer {
        Rebalancer::new(SCALE / 10, DELAY) // min deposit 0.1
    }

    fn deposit_and_include(r: &mut Rebalancer, actor: ActorId, amount: u128, now: u64) {
        r.initiate_deposit(actor, amount, now).unwrap();
        r.validate_deposit(actor, now + DELAY).unwrap();
        let value = r.current_amount();
        r.update_position(value).unwrap();
    }

    #[test]
    fn test_deposit_lifecycle() {
        let mut r = rebalancer();

        r.initiate_deposit(1, SCALE, 100).unwrap();
        assert_eq!(r.withdrawable(1), SCALE);

        // Too early to validate
        assert_eq!(r.validate_deposit(1, 100), Err(ProtocolError::TooEarly));
        r.validate_deposit(1, 100 + DELAY).unwrap();
        assert_eq!(r.pending_amount(), SCALE);

        // Folded in at the next refresh
        r.update_position(0).unwrap();
        assert_eq!(r.pending_amount(), 0);
        assert_eq!(r.current_amount(), SCALE);
        assert_eq!(r.withdrawable(1), SCALE);
    }

    #[test]
    fn test_one_slot_per_actor() {
        let mut r = rebalancer();
        r.initiate_deposit(1, SCALE, 100).unwrap();
        assert_eq!(
            r.initiate_deposit(1, SCALE, 200),
            Err(ProtocolError::SlotBusy)
        );
    }

    #[test]
    fn test_min_deposit_enforced() {
        let mut r = rebalancer();
        assert_eq!(
            r.initiate_deposit(1, SCALE / 100, 0),
            Err(ProtocolError::AmountOutOfBounds)
        );
    }

    #[test]
    fn test_profit_multiplier_flows_to_depositor() {
        let mut r = rebalancer();
        deposit_and_include(&mut r, 1, 10 * SCALE, 0);
        assert_eq!(r.current_amount(), 10 * SCALE);

        // Position closed at 2x its amount
        r.update_position(20 * SCALE).unwrap();
        assert_eq!(r.current_multiplier(), 2 * SCALE);
        assert_eq!(r.withdrawable(1), 20 * SCALE);
    }

    #[test]
    fn test_lazy_valuation_across_versions() {
        let mut r = rebalancer();
        // Depositor 1 joins version 1
        deposit_and_include(&mut r, 1, 10 * SCALE, 0);

        // Version 1 closes at 2x; depositor 2's pending joins version 2
        r.initiate_deposit(2, 30 * SCALE, 1_000).unwrap();
        r.validate_deposit(2, 1_000 + DELAY).unwrap();
        r.update_position(20 * SCALE).unwrap();

        // Version 2 closes at 1.5x of its 50 total
        r.update_position(75 * SCALE).unwrap();

        // No per-depositor writes happened, yet both are priced right:
        // depositor 1: 10 * 2 * 1.5 = 30, depositor 2: 30 * 1.5 = 45
        assert_eq!(r.withdrawable(1), 30 * SCALE);
        assert_eq!(r.withdrawable(2), 45 * SCALE);
    }

    #[test]
    fn test_liquidation_wipes_era() {
        let mut r = rebalancer();
        deposit_and_include(&mut r, 1, 10 * SCALE, 0);

        // Liquidated: closed at zero value
        r.update_position(0).unwrap();
        assert_eq!(r.withdrawable(1), 0);

        // A later depositor enters the fresh era at 1x
        r.initiate_deposit(2, 5 * SCALE, 2_000).unwrap();
        r.validate_deposit(2, 2_000 + DELAY).unwrap();
        r.update_position(0).unwrap();

        assert_eq!(r.withdrawable(1), 0);
        assert_eq!(r.withdrawable(2), 5 * SCALE);

        // The fresh era compounds normally
        r.update_position(10 * SCALE).unwrap();
        assert_eq!(r.withdrawable(1), 0);
        assert_eq!(r.withdrawable(2), 10 * SCALE);
    }

    #[test]
    fn test_withdraw_before_inclusion_returns_principal() {
        let mut r = rebalancer();
        r.initiate_deposit(1, 5 * SCALE, 0).unwrap();
        r.validate_deposit(1, DELAY).unwrap();
        assert_eq!(r.pending_amount(), 5 * SCALE);

        r.initiate_withdraw(1, 2 * DELAY).unwrap();
        assert_eq!(
            r.validate_withdraw(1, 2 * DELAY),
            Err(ProtocolError::TooEarly)
        );
        let out = r.validate_withdraw(1, 3 * DELAY).unwrap();

        assert_eq!(out, 5 * SCALE);
        assert_eq!(r.pending_amount(), 0);
        assert!(r.deposit_of(1).is_none());
    }

    #[test]
    fn test_withdraw_after_inclusion_takes_multiplied_value() {
        let mut r = rebalancer();
        deposit_and_include(&mut r, 1, 10 * SCALE, 0);
        r.update_position(20 * SCALE).unwrap();

        r.initiate_withdraw(1, 1_000).unwrap();
        let out = r.validate_withdraw(1, 1_000 + DELAY).unwrap();

        assert_eq!(out, 20 * SCALE);
        // The live aggregate shrank by the exit value
        assert_eq!(r.current_amount(), 0);
    }

    #[test]
    fn test_withdraw_requires_validated_phase() {
        let mut r = rebalancer();
        r.initiate_deposit(1, SCALE, 0).unwrap();
        assert_eq!(
            r.initiate_withdraw(1, 10),
            Err(ProtocolError::ActionKindMismatch)
        );
        assert_eq!(
            r.initiate_withdraw(2, 10),
            Err(ProtocolError::NoPendingAction)
        );
    }
}
