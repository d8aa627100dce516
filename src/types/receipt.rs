//! SSZ receipts and the ledger state snapshot.
//!
//! Wire-facing summaries the host ledger persists after each call. All
//! fields are u64 for SSZ compatibility; u128 aggregates are stored split
//! into little-endian halves with the same packing the pending-action
//! payloads use, and reassembled by accessor methods.
//!
//! The snapshot's SHA-256 digest lets the host verify engine state
//! without replaying operations.

use sha2::{Digest, Sha256};
use ssz_rs::prelude::*;

use crate::types::huge_uint::HugeUint;
use crate::types::pending::{merge_shares, split_shares};

// ============================================================================
// LiquidationReceipt
// ============================================================================

/// Summary of one liquidation sweep.
///
/// Partial sweeps are normal operation: a receipt with fewer ticks than
/// requested simply means the iteration bound was reached.
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct LiquidationReceipt {
    /// Number of buckets fully liquidated by this sweep
    pub ticks_liquidated: u64,

    /// Number of positions retired with those buckets
    pub positions_liquidated: u64,

    /// Collateral moved to the vault side, low half
    pub collateral_freed_lsb: u64,
    /// Collateral moved to the vault side, high half
    pub collateral_freed_msb: u64,

    /// Caller reward paid out, low half
    pub rewards_lsb: u64,
    /// Caller reward paid out, high half
    pub rewards_msb: u64,

    /// Sweep timestamp (host ledger seconds)
    pub timestamp: u64,
}

impl LiquidationReceipt {
    /// Build a receipt from the wide aggregates
    pub fn new(
        ticks_liquidated: u64,
        positions_liquidated: u64,
        collateral_freed: u128,
        rewards: u128,
        timestamp: u64,
    ) -> Self {
        let (cf_lsb, cf_msb) = split_shares(collateral_freed);
        let (rw_lsb, rw_msb) = split_shares(rewards);
        Self {
            ticks_liquidated,
            positions_liquidated,
            collateral_freed_lsb: cf_lsb,
            collateral_freed_msb: cf_msb,
            rewards_lsb: rw_lsb,
            rewards_msb: rw_msb,
            timestamp,
        }
    }

    /// Collateral moved to the vault side
    #[inline]
    pub fn collateral_freed(&self) -> u128 {
        merge_shares(self.collateral_freed_lsb, self.collateral_freed_msb)
    }

    /// Reward paid to the sweeping caller
    #[inline]
    pub fn rewards(&self) -> u128 {
        merge_shares(self.rewards_lsb, self.rewards_msb)
    }

    /// A sweep that found nothing to do
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ticks_liquidated == 0
    }
}

// ============================================================================
// LedgerSnapshot
// ============================================================================

/// Deterministic summary of every persisted aggregate.
///
/// `highest_tick` is encoded as index + 1, with 0 meaning no populated
/// bucket.
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct LedgerSnapshot {
    /// Vault balance, split halves
    pub balance_vault_lsb: u64,
    pub balance_vault_msb: u64,

    /// Long balance, split halves
    pub balance_long_lsb: u64,
    pub balance_long_msb: u64,

    /// Escrowed collateral awaiting validation, split halves
    pub pending_vault_lsb: u64,
    pub pending_vault_msb: u64,

    /// Aggregate long exposure, split halves
    pub total_expo_lsb: u64,
    pub total_expo_msb: u64,

    /// Accumulator limbs, least significant first
    pub acc_limb0: u64,
    pub acc_limb1: u64,
    pub acc_limb2: u64,
    pub acc_limb3: u64,

    /// Stable-token shares outstanding, split halves
    pub total_shares_lsb: u64,
    pub total_shares_msb: u64,

    /// Current shares divisor, split halves
    pub divisor_lsb: u64,
    pub divisor_msb: u64,

    /// Highest populated bucket, encoded as index + 1 (0 = none)
    pub highest_tick: u64,

    /// Open position count
    pub total_positions: u64,

    /// Snapshot timestamp (host ledger seconds)
    pub timestamp: u64,
}

impl LedgerSnapshot {
    /// Assemble a snapshot from the wide aggregates
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        balance_vault: u128,
        balance_long: u128,
        pending_vault: u128,
        total_expo: u128,
        accumulator: HugeUint,
        total_shares: u128,
        divisor: u128,
        highest_tick: Option<u64>,
        total_positions: u64,
        timestamp: u64,
    ) -> Self {
        let (bv_lsb, bv_msb) = split_shares(balance_vault);
        let (bl_lsb, bl_msb) = split_shares(balance_long);
        let (pv_lsb, pv_msb) = split_shares(pending_vault);
        let (te_lsb, te_msb) = split_shares(total_expo);
        let (a0, a1) = split_shares(accumulator.lo());
        let (a2, a3) = split_shares(accumulator.hi());
        let (ts_lsb, ts_msb) = split_shares(total_shares);
        let (dv_lsb, dv_msb) = split_shares(divisor);

        Self {
            balance_vault_lsb: bv_lsb,
            balance_vault_msb: bv_msb,
            balance_long_lsb: bl_lsb,
            balance_long_msb: bl_msb,
            pending_vault_lsb: pv_lsb,
            pending_vault_msb: pv_msb,
            total_expo_lsb: te_lsb,
            total_expo_msb: te_msb,
            acc_limb0: a0,
            acc_limb1: a1,
            acc_limb2: a2,
            acc_limb3: a3,
            total_shares_lsb: ts_lsb,
            total_shares_msb: ts_msb,
            divisor_lsb: dv_lsb,
            divisor_msb: dv_msb,
            highest_tick: highest_tick.map_or(0, |t| t + 1),
            total_positions,
            timestamp,
        }
    }

    /// Vault balance
    pub fn balance_vault(&self) -> u128 {
        merge_shares(self.balance_vault_lsb, self.balance_vault_msb)
    }

    /// Long balance
    pub fn balance_long(&self) -> u128 {
        merge_shares(self.balance_long_lsb, self.balance_long_msb)
    }

    /// Accumulator reassembled from its limbs
    pub fn accumulator(&self) -> HugeUint {
        HugeUint {
            hi: merge_shares(self.acc_limb2, self.acc_limb3),
            lo: merge_shares(self.acc_limb0, self.acc_limb1),
        }
    }

    /// Highest populated bucket, if any
    pub fn highest_populated_tick(&self) -> Option<u64> {
        self.highest_tick.checked_sub(1)
    }

    /// SHA-256 digest of the SSZ encoding
    ///
    /// Serialization of a fixed-size container cannot fail; a failure here
    /// would be a programming error, so it degrades to hashing nothing.
    pub fn digest(&self) -> [u8; 32] {
        let bytes = ssz_rs::serialize(self).unwrap_or_default();
        compute_hash(&bytes)
    }

    /// Digest rendered as a hex string
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest())
    }
}

/// Compute SHA-256 over arbitrary bytes
pub fn compute_hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();

    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

// ============================================================================
// Unit Tests
// ============================================================================
