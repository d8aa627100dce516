//! Core data types for synthcore
//!
//! All numeric values use fixed-point representation (u128 scaled by
//! 10^8); the accumulator uses the two-limb [`HugeUint`].
//!
//! ## Types
//!
//! - [`Position`] / [`PositionId`]: a leveraged exposure and its
//!   generation-checked reference
//! - [`PendingAction`] / [`PendingActionKind`]: a queued two-phase action
//! - [`HugeUint`]: 256-bit accumulator arithmetic
//! - [`ProtocolError`]: the typed failure taxonomy
//! - [`LiquidationReceipt`] / [`LedgerSnapshot`]: SSZ wire summaries

mod error;
mod pending;
mod position;
mod receipt;
pub mod huge_uint;
pub mod price;

// Re-export all types at module level
pub use error::{ProtocolError, ProtocolResult};
pub use huge_uint::HugeUint;
pub use pending::{merge_shares, split_shares, PendingAction, PendingActionKind};
pub use position::{ActorId, Position, PositionId, Timestamp};
pub use receipt::{compute_hash, LedgerSnapshot, LiquidationReceipt};
