//! Tick: one discretized liquidation-price bucket.
//!
//! ## Design
//!
//! A `Tick` aggregates every position whose liquidation threshold falls
//! in the same price bucket (bucket width = configured spacing). The
//! positions form a FIFO doubly-linked list through the arena; the tick
//! itself only holds queue metadata and aggregates.
//!
//! ## Versioning
//!
//! The version counter is bumped when the bucket is liquidated in full,
//! which atomically invalidates every `PositionId` minted under the old
//! version. Partial closes and ordinary full closes never bump it.

use slab::Slab;

use crate::ledger::node::PositionNode;

/// A price bucket holding the positions that share a liquidation bucket.
#[derive(Debug, Clone)]
pub struct Tick {
    /// Bucket index (unadjusted price / spacing)
    pub index: u64,

    /// Current generation; bumped on full liquidation
    pub version: u64,

    /// Sum of position exposures in this bucket (fixed-point, 10^8)
    pub total_expo: u128,

    /// Liquidation penalty captured when the bucket was first populated
    pub penalty_bps: u16,

    /// Head of the position queue (oldest, arena key)
    pub head: Option<usize>,

    /// Tail of the position queue (newest, arena key)
    pub tail: Option<usize>,

    /// Number of positions in this bucket
    pub position_count: usize,
}

/// Read-only aggregate view of a tick, exposed by accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickData {
    pub version: u64,
    pub total_expo: u128,
    pub position_count: usize,
    pub penalty_bps: u16,
}

impl Tick {
    /// Create a new empty tick
    pub fn new(index: u64, version: u64, penalty_bps: u16) -> Self {
        Self {
            index,
            version,
            total_expo: 0,
            penalty_bps,
            head: None,
            tail: None,
            position_count: 0,
        }
    }

    /// Check if the tick holds no positions
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.position_count == 0
    }

    /// Unadjusted (nominal) price of this bucket
    #[inline]
    pub fn unadjusted_price(&self, spacing: u128) -> u128 {
        self.index as u128 * spacing
    }

    /// Aggregate view
    #[inline]
    pub fn data(&self) -> TickData {
        TickData {
            version: self.version,
            total_expo: self.total_expo,
            position_count: self.position_count,
            penalty_bps: self.penalty_bps,
        }
    }

    /// Append a position to the tail of the queue
    ///
    /// # Panics
    ///
    /// Panics if the key doesn't exist in the arena.
    pub fn push_back(&mut self, key: usize, arena: &mut Slab<PositionNode>) {
        let node = arena.get_mut(key).expect("Invalid arena key");
        let expo = node.total_expo();

        node.prev = self.tail;
        node.next = None;

        if let Some(tail_key) = self.tail {
            let tail_node = arena.get_mut(tail_key).expect("Invalid tail key");
            tail_node.next = Some(key);
        } else {
            // Empty list - this is also the head
            self.head = Some(key);
        }

        self.tail = Some(key);
        self.position_count += 1;
        self.total_expo = self.total_expo.saturating_add(expo);
    }

    /// Unlink a position from the queue by arena key
    ///
    /// # Returns
    ///
    /// The exposure of the removed position.
    pub fn remove(&mut self, key: usize, arena: &mut Slab<PositionNode>) -> u128 {
        let node = arena.get(key).expect("Invalid arena key");
        let expo = node.total_expo();
        let prev_key = node.prev;
        let next_key = node.next;

        if let Some(prev) = prev_key {
            let prev_node = arena.get_mut(prev).expect("Invalid prev key");
            prev_node.next = next_key;
        } else {
            // This was the head
            self.head = next_key;
        }

        if let Some(next) = next_key {
            let next_node = arena.get_mut(next).expect("Invalid next key");
            next_node.prev = prev_key;
        } else {
            // This was the tail
            self.tail = prev_key;
        }

        let node = arena.get_mut(key).expect("Invalid arena key");
        node.prev = None;
        node.next = None;

        self.position_count -= 1;
        self.total_expo = self.total_expo.saturating_sub(expo);

        expo
    }

    /// Reduce the aggregate exposure after a partial close
    pub fn reduce_expo(&mut self, expo: u128) {
        self.total_expo = self.total_expo.saturating_sub(expo);
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
