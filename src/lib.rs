//! # synthcore
//!
//! Leveraged long/short accounting engine for a synthetic stable-value
//! token backed by a yield-bearing collateral asset.
//!
//! ## Architecture
//!
//! The core consists of:
//! - **Types**: fixed-point math, the two-limb accumulator, positions,
//!   pending actions, errors, SSZ receipts
//! - **Ledger**: tick-indexed position storage with generation-checked
//!   references and the shared liquidation accumulator
//! - **Engine**: funding/PnL roll-forward, the liquidation sweep, the
//!   two-phase pending-action machine, stable-token rebase, and the
//!   deposit rebalancer, all behind one authoritative [`Protocol`]
//!
//! ## Design Principles
//!
//! 1. **Determinism**: All operations produce identical results for identical inputs
//! 2. **No Floating Point**: All math uses fixed-point arithmetic (10^8 scaling)
//! 3. **Roll-Forward First**: every mutation re-prices balances before applying effects
//! 4. **Bounded Iteration**: sweeps and batch validation take explicit caller bounds
//!
//! ## Host Model
//!
//! The host ledger serializes all calls; there is no intra-call
//! concurrency. Temporal ordering (validation delays, deadlines,
//! cooldowns) is enforced by comparing stored timestamps against the
//! caller-supplied clock. Price validation, token custody and reward
//! computation are collaborator traits supplied by the host.

// ============================================================================
// Module declarations
// ============================================================================

/// Core data types: positions, pending actions, wide integers, receipts
pub mod types;

/// Tick ledger: price-bucketed position storage
pub mod ledger;

/// Protocol engine: funding, liquidation, validation, rebase
pub mod engine;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use engine::{
    FixedOracle, Outcome, PriceKind, PriceOracle, PriceProof, Protocol, ProtocolParams,
    RebaseHandler, RewardPolicy, Settlement,
};
pub use ledger::{Tick, TickLedger};
pub use types::{
    HugeUint, PendingAction, PendingActionKind, Position, PositionId, ProtocolError,
};
