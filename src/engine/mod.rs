//! Protocol engine for synthcore.
//!
//! ## Design Principles
//!
//! 1. **Determinism**: Same call sequence always produces the same state
//! 2. **Fixed-Point Math**: No floating-point operations anywhere
//! 3. **Roll-Forward First**: every mutation path updates balances to the
//!    new price/timestamp before applying its effect
//! 4. **Bounded Iteration**: liquidation sweeps and batch validation take
//!    explicit caller-supplied bounds and return the short count
//!
//! ## Components
//!
//! - [`Protocol`]: the single authoritative state object and its narrow
//!   mutation API (initiate/validate/liquidate)
//! - [`FundingState`]: funding-rate EMA and profit/loss roll-forward
//! - [`PendingActionQueue`]: per-actor two-phase action slots
//! - [`StableLedger`] / [`RebaseController`]: share accounting and the
//!   divisor rebase
//! - [`Rebalancer`]: deposit aggregation over the imbalance-correcting
//!   position
//! - Collaborator seams: [`PriceOracle`], [`RewardPolicy`],
//!   [`RebaseHandler`]
//!
//! ## Example
//!
//! ```
//! use synthcore::engine::{FixedOracle, PriceProof, Protocol, ProtocolParams};
//! use synthcore::types::price::SCALE;
//!
//! let mut protocol = Protocol::new(ProtocolParams::default()).unwrap();
//! let oracle = FixedOracle::instant(2_000 * SCALE, 100);
//!
//! // Zero-latency deposit of 1.0 collateral at price 2000
//! let outcome = protocol
//!     .initiate_deposit(1, 1, SCALE, SCALE, &PriceProof::default(), &oracle, 100)
//!     .unwrap();
//! assert!(outcome.is_applied());
//! assert!(protocol.stable().token_balance_of(1) > 0);
//! ```

pub mod funding;
pub mod liquidation;
pub mod oracle;
pub mod protocol;
pub mod queue;
pub mod rebalancer;
pub mod stable;

pub use funding::{imbalance_bps, Balances, FundingState};
pub use liquidation::{sweep, SweepOutcome};
pub use oracle::{
    FixedOracle, NoopRebaseHandler, OraclePrice, PriceKind, PriceOracle, PriceProof,
    RebaseHandler, RewardPolicy, StandardRewards,
};
pub use protocol::{
    ActionableReceipt, InitiateReceipt, Outcome, Protocol, ProtocolParams, RefundReceipt,
    Settlement, ValidateReceipt,
};
pub use queue::PendingActionQueue;
pub use rebalancer::{DepositPhase, PositionVersion, Rebalancer, UserDeposit};
pub use stable::{RebaseController, RebaseResult, StableLedger, MAX_DIVISOR, MIN_DIVISOR};
