//! Tick ledger module: price-bucketed storage of leveraged positions.
//!
//! ## Architecture
//!
//! The ledger combines:
//!
//! - **Slab-based storage**: O(1) position insertion, removal, and lookup
//! - **Price buckets**: positions grouped by liquidation bucket using BTreeMap
//! - **Generation counters**: a liquidated bucket bumps its version,
//!   invalidating every outstanding reference into it in O(1)
//!
//! ## Components
//!
//! - [`PositionNode`]: Wrapper around `Position` with linked-list pointers
//! - [`Tick`]: Positions sharing one liquidation-price bucket
//! - [`TickLedger`]: Main ledger with the shared accumulator
//!
//! ## Performance
//!
//! | Operation | Complexity |
//! |-----------|------------|
//! | Open position | O(log n) |
//! | Close by reference | O(1) |
//! | Highest populated tick | O(log n) |
//! | Liquidate bucket | O(k) for k positions |
//!
//! ## Example
//!
//! ```
//! use synthcore::ledger::TickLedger;
//! use synthcore::types::price::SCALE;
//!
//! let mut ledger = TickLedger::with_capacity(100 * SCALE, 1_000);
//!
//! // 5.0 collateral, 15.0 exposure in bucket 17
//! let id = ledger.open_position(1, 17, 5 * SCALE, 15 * SCALE, 100, 0).unwrap();
//!
//! assert_eq!(ledger.highest_populated_tick(), Some(17));
//! assert_eq!(ledger.get(&id).unwrap().total_expo, 15 * SCALE);
//! ```

pub mod book;
pub mod node;
pub mod tick;

pub use book::{adjust_price, position_value, unadjust_price, LiquidatedTick, TickLedger};
pub use node::PositionNode;
pub use tick::{Tick, TickData};
