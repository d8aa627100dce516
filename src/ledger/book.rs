//! Tick ledger: price-bucketed storage of open positions.
//!
//! ## Architecture
//!
//! The ledger uses a hybrid data structure:
//!
//! - **Slab**: Pre-allocated arena for O(1) position operations
//! - **BTreeMap**: Sorted buckets for efficient highest-tick lookup
//! - **HashMap**: Persistent per-bucket version memory so a liquidated
//!   bucket's generation is never reused
//!
//! ## Price Spaces
//!
//! Buckets are indexed in *unadjusted* price space: a bucket's nominal
//! price is `index × spacing` and never moves. Funding drift is absorbed
//! by the shared accumulator: converting between a real (oracle) price
//! and the unadjusted space multiplies by
//! `accumulator / (asset_price × trading_expo)` (see [`unadjust_price`] /
//! [`adjust_price`]). Because the transform is monotone, the liquidation
//! sweep compares bucket indexes directly against the unadjusted
//! boundary of the current price.
//!
//! ## Accumulator
//!
//! The ledger maintains `Σ (exposure × unadjusted bucket price)` across
//! all positions in a 256-bit [`HugeUint`]. Every open, close and
//! liquidation updates it with the exact integer contribution, so it is
//! always consistent with the live tick set.

use std::collections::{BTreeMap, HashMap};

use slab::Slab;

use crate::ledger::node::PositionNode;
use crate::ledger::tick::{Tick, TickData};
use crate::types::price::mul_div;
use crate::types::{
    ActorId, HugeUint, Position, PositionId, ProtocolError, ProtocolResult, Timestamp,
};

// ============================================================================
// Price-space conversion
// ============================================================================

/// Convert a real price into unadjusted bucket space.
///
/// `price × accumulator / asset_price / trading_expo`, floored once per
/// scalar division (sequential floor division equals division by the
/// product). With no open exposure the transform is the identity.
pub fn unadjust_price(
    price: u128,
    asset_price: u128,
    trading_expo: u128,
    accumulator: HugeUint,
) -> ProtocolResult<u128> {
    if accumulator.is_zero() || trading_expo == 0 || asset_price == 0 {
        return Ok(price);
    }

    accumulator
        .checked_mul_scalar(price)
        .ok_or(ProtocolError::ArithmeticOverflow)?
        .div_scalar(asset_price)
        .ok_or(ProtocolError::ArithmeticOverflow)?
        .div_scalar(trading_expo)
        .ok_or(ProtocolError::ArithmeticOverflow)?
        .to_u128()
        .ok_or(ProtocolError::ArithmeticOverflow)
}

/// Convert an unadjusted bucket price back to a real price.
///
/// `unadjusted × asset_price × trading_expo / accumulator`, floored.
pub fn adjust_price(
    unadjusted: u128,
    asset_price: u128,
    trading_expo: u128,
    accumulator: HugeUint,
) -> ProtocolResult<u128> {
    if accumulator.is_zero() || trading_expo == 0 || asset_price == 0 {
        return Ok(unadjusted);
    }

    HugeUint::mul(unadjusted, asset_price)
        .checked_mul_scalar(trading_expo)
        .ok_or(ProtocolError::ArithmeticOverflow)?
        .checked_div(accumulator)
        .ok_or(ProtocolError::ArithmeticOverflow)?
        .to_u128()
        .ok_or(ProtocolError::ArithmeticOverflow)
}

/// Value of an exposure at `price` against its value-floor price.
///
/// `expo × (price − value_price) / price`, floored; zero when the
/// position is at or under water (the deficit is socialized, never a
/// failure).
pub fn position_value(total_expo: u128, price: u128, value_price: u128) -> u128 {
    if price == 0 || price <= value_price {
        return 0;
    }
    mul_div(total_expo, price - value_price, price).unwrap_or(0)
}

// ============================================================================
// LiquidatedTick
// ============================================================================

/// Aggregate data of a bucket removed by the liquidation sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidatedTick {
    /// Bucket index
    pub index: u64,
    /// New (bumped) version; all prior ids are now stale
    pub version: u64,
    /// Exposure removed with the bucket
    pub total_expo: u128,
    /// Penalty the bucket carried
    pub penalty_bps: u16,
    /// Positions retired
    pub position_count: usize,
}

// ============================================================================
// TickLedger
// ============================================================================

/// Price-bucketed position ledger with generation-checked references.
#[derive(Debug)]
pub struct TickLedger {
    /// Pre-allocated position storage
    positions: Slab<PositionNode>,

    /// Populated buckets, sorted by index
    ticks: BTreeMap<u64, Tick>,

    /// Persistent version memory for every bucket ever liquidated
    tick_versions: HashMap<u64, u64>,

    /// Σ (exposure × unadjusted bucket price) over all open positions
    accumulator: HugeUint,

    /// Aggregate long exposure
    total_expo: u128,

    /// Open position count
    total_positions: u64,

    /// Bucket width in unadjusted price units (fixed-point, 10^8)
    tick_spacing: u128,
}

impl TickLedger {
    /// Create a new empty ledger
    ///
    /// # Panics
    ///
    /// Panics on zero spacing; the bucket width is a construction-time
    /// constant, not a runtime input.
    pub fn new(tick_spacing: u128) -> Self {
        assert!(tick_spacing > 0, "tick spacing must be non-zero");
        Self {
            positions: Slab::new(),
            ticks: BTreeMap::new(),
            tick_versions: HashMap::new(),
            accumulator: HugeUint::ZERO,
            total_expo: 0,
            total_positions: 0,
            tick_spacing,
        }
    }

    /// Create a ledger with pre-allocated position capacity
    pub fn with_capacity(tick_spacing: u128, position_capacity: usize) -> Self {
        let mut ledger = Self::new(tick_spacing);
        ledger.positions = Slab::with_capacity(position_capacity);
        ledger
    }

    // ========================================================================
    // Aggregates
    // ========================================================================

    /// Bucket width in unadjusted price units
    #[inline]
    pub fn tick_spacing(&self) -> u128 {
        self.tick_spacing
    }

    /// Aggregate long exposure across all buckets
    #[inline]
    pub fn total_expo(&self) -> u128 {
        self.total_expo
    }

    /// Number of open positions
    #[inline]
    pub fn total_positions(&self) -> u64 {
        self.total_positions
    }

    /// The shared liquidation accumulator
    #[inline]
    pub fn accumulator(&self) -> HugeUint {
        self.accumulator
    }

    /// Number of populated buckets
    #[inline]
    pub fn tick_count(&self) -> usize {
        self.ticks.len()
    }

    /// Check if the ledger holds no positions
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Pre-allocated arena capacity
    #[inline]
    pub fn capacity(&self) -> usize {
        self.positions.capacity()
    }

    // ========================================================================
    // Bucket addressing
    // ========================================================================

    /// Bucket index for an unadjusted price (rounds down to the spacing)
    #[inline]
    pub fn tick_index_for(&self, unadjusted_price: u128) -> ProtocolResult<u64> {
        let index = unadjusted_price / self.tick_spacing;
        u64::try_from(index).map_err(|_| ProtocolError::InvalidTick)
    }

    /// Nominal price of a bucket
    #[inline]
    pub fn unadjusted_tick_price(&self, index: u64) -> ProtocolResult<u128> {
        (index as u128)
            .checked_mul(self.tick_spacing)
            .ok_or(ProtocolError::InvalidTick)
    }

    /// Live version of a bucket (0 if it was never liquidated)
    #[inline]
    pub fn tick_version(&self, index: u64) -> u64 {
        self.tick_versions.get(&index).copied().unwrap_or(0)
    }

    /// Penalty of a populated bucket
    #[inline]
    pub fn tick_penalty(&self, index: u64) -> Option<u16> {
        self.ticks.get(&index).map(|t| t.penalty_bps)
    }

    /// Aggregate view of a populated bucket
    pub fn get_tick(&self, index: u64) -> Option<TickData> {
        self.ticks.get(&index).map(|t| t.data())
    }

    /// Highest populated bucket index
    #[inline]
    pub fn highest_populated_tick(&self) -> Option<u64> {
        self.ticks.keys().next_back().copied()
    }

    // ========================================================================
    // Position Management
    // ========================================================================

    /// Open a position in the given bucket
    ///
    /// Creates the bucket on first use (inheriting its persistent
    /// version), appends the position FIFO, and adds the exact
    /// `exposure × bucket price` contribution to the accumulator.
    pub fn open_position(
        &mut self,
        owner: ActorId,
        tick_index: u64,
        amount: u128,
        total_expo: u128,
        penalty_bps: u16,
        timestamp: Timestamp,
    ) -> ProtocolResult<PositionId> {
        if amount == 0 || total_expo == 0 {
            return Err(ProtocolError::InvalidAmount);
        }
        let unadjusted = self.unadjusted_tick_price(tick_index)?;

        let version = self.tick_version(tick_index);
        let position = Position::new(owner, amount, total_expo, timestamp, tick_index, version);

        let key = self.positions.insert(PositionNode::new(position));

        let tick = self
            .ticks
            .entry(tick_index)
            .or_insert_with(|| Tick::new(tick_index, version, penalty_bps));
        tick.push_back(key, &mut self.positions);

        let contribution = HugeUint::mul(total_expo, unadjusted);
        self.accumulator = self
            .accumulator
            .checked_add(contribution)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        self.total_expo = self
            .total_expo
            .checked_add(total_expo)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        self.total_positions += 1;

        Ok(PositionId::new(tick_index, version, key))
    }

    /// Fetch a position through its generation-checked reference
    pub fn get(&self, id: &PositionId) -> ProtocolResult<&Position> {
        // Version memory first: a bumped bucket invalidates the id even if
        // the arena slot was since recycled by an unrelated position.
        if self.tick_version(id.tick) != id.version {
            return Err(ProtocolError::StalePosition);
        }

        let node = self
            .positions
            .get(id.index)
            .ok_or(ProtocolError::StalePosition)?;
        if !node.position.matches(id) {
            return Err(ProtocolError::StalePosition);
        }
        Ok(&node.position)
    }

    /// Close a portion (or all) of a position
    ///
    /// `amount`/`expo` are the collateral and exposure to remove; a full
    /// close frees the arena slot and, if the bucket empties, drops the
    /// bucket WITHOUT bumping its version (a close is not a liquidation).
    ///
    /// # Returns
    ///
    /// `true` when the position was fully closed.
    pub fn close_position(
        &mut self,
        id: &PositionId,
        amount: u128,
        expo: u128,
    ) -> ProtocolResult<bool> {
        // Generation check (also proves the node exists)
        let current = self.get(id)?;
        if amount > current.amount || expo > current.total_expo {
            return Err(ProtocolError::AmountOutOfBounds);
        }
        let full = amount == current.amount;
        // A full close must retire the exact remaining exposure, or the
        // accumulator would drift from the live tick set
        if full && expo != current.total_expo {
            return Err(ProtocolError::AmountOutOfBounds);
        }
        let unadjusted = self.unadjusted_tick_price(id.tick)?;

        if full {
            let expo_removed = {
                let tick = self.ticks.get_mut(&id.tick).ok_or(ProtocolError::StalePosition)?;
                tick.remove(id.index, &mut self.positions)
            };
            self.positions.remove(id.index);
            self.total_positions -= 1;

            // expo of the node equals the caller's remaining expo here
            debug_assert_eq!(expo_removed, expo);

            if self.ticks.get(&id.tick).map_or(false, |t| t.is_empty()) {
                self.ticks.remove(&id.tick);
            }
        } else {
            let node = self
                .positions
                .get_mut(id.index)
                .ok_or(ProtocolError::StalePosition)?;
            node.position
                .reduce(amount, expo)
                .ok_or(ProtocolError::AmountOutOfBounds)?;
            let tick = self.ticks.get_mut(&id.tick).ok_or(ProtocolError::StalePosition)?;
            tick.reduce_expo(expo);
        }

        let contribution = HugeUint::mul(expo, unadjusted);
        self.accumulator = self
            .accumulator
            .checked_sub(contribution)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        self.total_expo = self
            .total_expo
            .checked_sub(expo)
            .ok_or(ProtocolError::ArithmeticOverflow)?;

        Ok(full)
    }

    /// Replace a position's exposure (open-validation re-pricing)
    ///
    /// Applies the delta to the bucket aggregate, the ledger aggregate
    /// and the accumulator. The bucket version is unchanged.
    pub fn update_position_expo(&mut self, id: &PositionId, new_expo: u128) -> ProtocolResult<()> {
        let old_expo = self.get(id)?.total_expo;
        if new_expo == 0 || new_expo == old_expo {
            return if new_expo == 0 {
                Err(ProtocolError::InvalidAmount)
            } else {
                Ok(())
            };
        }
        let unadjusted = self.unadjusted_tick_price(id.tick)?;

        let node = self
            .positions
            .get_mut(id.index)
            .ok_or(ProtocolError::StalePosition)?;
        node.position.total_expo = new_expo;

        let tick = self.ticks.get_mut(&id.tick).ok_or(ProtocolError::StalePosition)?;
        if new_expo > old_expo {
            let delta = new_expo - old_expo;
            tick.total_expo = tick
                .total_expo
                .checked_add(delta)
                .ok_or(ProtocolError::ArithmeticOverflow)?;
            self.total_expo = self
                .total_expo
                .checked_add(delta)
                .ok_or(ProtocolError::ArithmeticOverflow)?;
            self.accumulator = self
                .accumulator
                .checked_add(HugeUint::mul(delta, unadjusted))
                .ok_or(ProtocolError::ArithmeticOverflow)?;
        } else {
            let delta = old_expo - new_expo;
            tick.reduce_expo(delta);
            self.total_expo = self
                .total_expo
                .checked_sub(delta)
                .ok_or(ProtocolError::ArithmeticOverflow)?;
            self.accumulator = self
                .accumulator
                .checked_sub(HugeUint::mul(delta, unadjusted))
                .ok_or(ProtocolError::ArithmeticOverflow)?;
        }

        Ok(())
    }

    // ========================================================================
    // Liquidation support
    // ========================================================================

    /// Remove an entire bucket (liquidation)
    ///
    /// Frees every position node, subtracts the bucket's exposure and
    /// accumulator contribution, and bumps the persistent version so all
    /// outstanding references into the bucket become permanently stale.
    pub fn pop_tick(&mut self, index: u64) -> ProtocolResult<LiquidatedTick> {
        let tick = self.ticks.remove(&index).ok_or(ProtocolError::InvalidTick)?;
        let unadjusted = self.unadjusted_tick_price(index)?;

        // Free all nodes in the queue
        let mut cursor = tick.head;
        let mut freed = 0usize;
        while let Some(key) = cursor {
            let node = self.positions.remove(key);
            cursor = node.next;
            freed += 1;
        }
        debug_assert_eq!(freed, tick.position_count);

        let contribution = HugeUint::mul(tick.total_expo, unadjusted);
        self.accumulator = self
            .accumulator
            .checked_sub(contribution)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        self.total_expo = self
            .total_expo
            .checked_sub(tick.total_expo)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        self.total_positions -= freed as u64;

        let new_version = tick.version + 1;
        self.tick_versions.insert(index, new_version);

        Ok(LiquidatedTick {
            index,
            version: new_version,
            total_expo: tick.total_expo,
            penalty_bps: tick.penalty_bps,
            position_count: freed,
        })
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
