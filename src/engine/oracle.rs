//! Collaborator seams: price oracle, liquidation rewards, rebase callback.
//!
//! The engine never fetches prices or moves tokens itself. The host
//! supplies these capabilities through narrow traits; every
//! implementation detail (signature checks, fee markets, token plumbing)
//! stays outside the core.

use crate::types::{ProtocolError, ProtocolResult, Timestamp};

// ============================================================================
// Price oracle
// ============================================================================

/// Which step of which operation a price is requested for.
///
/// Oracles may serve different price streams per step (e.g. a
/// conservative price for mints, an optimistic one for burns).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriceKind {
    InitiateDeposit,
    ValidateDeposit,
    InitiateWithdrawal,
    ValidateWithdrawal,
    InitiateOpenPosition,
    ValidateOpenPosition,
    InitiateClosePosition,
    ValidateClosePosition,
    Liquidation,
}

/// Opaque, host-verified price proof bytes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PriceProof(pub Vec<u8>);

/// A validated price observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OraclePrice {
    /// Collateral asset price (fixed-point, 10^8)
    pub price: u128,

    /// Observation timestamp (host ledger seconds)
    pub timestamp: Timestamp,
}

/// Price source abstraction.
///
/// Implementations verify the proof themselves; the engine only checks
/// freshness against its own clock.
pub trait PriceOracle {
    /// Resolve a proof into a price for the given step
    fn price(&self, kind: PriceKind, proof: &PriceProof) -> ProtocolResult<OraclePrice>;

    /// A price usable synchronously at initiate time, if the oracle has
    /// one. `Some` enables the zero-latency path: the effect applies in
    /// the initiate call and no pending action is queued.
    fn instant_price(&self, _kind: PriceKind, _proof: &PriceProof) -> Option<OraclePrice> {
        None
    }

    /// Fee the caller must attach for this proof to be validated
    fn validation_cost(&self, _kind: PriceKind, _proof: &PriceProof) -> u128 {
        0
    }
}

/// Fixed-price oracle for tests, benches and demos.
///
/// Serves one price for every step; the instant path is opt-in.
#[derive(Debug, Clone, Copy)]
pub struct FixedOracle {
    pub price: u128,
    pub timestamp: Timestamp,
    pub instant: bool,
}

impl FixedOracle {
    /// Oracle serving `price` at `timestamp`, queue path only
    pub fn new(price: u128, timestamp: Timestamp) -> Self {
        Self {
            price,
            timestamp,
            instant: false,
        }
    }

    /// Same, but also serving the zero-latency path
    pub fn instant(price: u128, timestamp: Timestamp) -> Self {
        Self {
            price,
            timestamp,
            instant: true,
        }
    }
}

impl PriceOracle for FixedOracle {
    fn price(&self, _kind: PriceKind, _proof: &PriceProof) -> ProtocolResult<OraclePrice> {
        if self.price == 0 {
            return Err(ProtocolError::StalePrice);
        }
        Ok(OraclePrice {
            price: self.price,
            timestamp: self.timestamp,
        })
    }

    fn instant_price(&self, kind: PriceKind, proof: &PriceProof) -> Option<OraclePrice> {
        if self.instant {
            self.price(kind, proof).ok()
        } else {
            None
        }
    }
}

// ============================================================================
// Liquidation rewards
// ============================================================================

/// Computes the caller reward for a liquidation sweep.
pub trait RewardPolicy {
    /// Reward for a sweep that processed `ticks` buckets and moved
    /// `collateral_freed` to the vault side
    fn liquidation_reward(&self, ticks: u64, collateral_freed: u128) -> u128;
}

/// Flat per-tick payment plus a share of the freed collateral.
#[derive(Debug, Clone, Copy)]
pub struct StandardRewards {
    /// Fixed payment per liquidated bucket (fixed-point, 10^8)
    pub per_tick: u128,

    /// Share of freed collateral, in basis points
    pub freed_bps: u16,
}

impl Default for StandardRewards {
    fn default() -> Self {
        Self {
            per_tick: 1_000_000, // 0.01 per bucket
            freed_bps: 10,       // 0.10%
        }
    }
}

impl RewardPolicy for StandardRewards {
    fn liquidation_reward(&self, ticks: u64, collateral_freed: u128) -> u128 {
        let base = self.per_tick.saturating_mul(ticks as u128);
        let share =
            crate::types::price::apply_bps(collateral_freed, self.freed_bps).unwrap_or(0);
        base.saturating_add(share)
    }
}

// ============================================================================
// Rebase callback
// ============================================================================

/// Invoked inside a divisor rebase; a failure aborts the rebase
/// atomically (the divisor is restored before the error propagates).
pub trait RebaseHandler {
    fn on_rebase(&mut self, old_divisor: u128, new_divisor: u128) -> ProtocolResult<()>;
}

/// Callback that accepts every rebase.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRebaseHandler;

impl RebaseHandler for NoopRebaseHandler {
    fn on_rebase(&mut self, _old_divisor: u128, _new_divisor: u128) -> ProtocolResult<()> {
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
