//! Typed failure taxonomy for the protocol.
//!
//! Three classes of failure are kept distinguishable so callers can tell
//! "parameters rejected" from "retry later" from "state would break":
//!
//! 1. Precondition violations: bad amounts, wrong actors, busy slots.
//! 2. Temporal violations: too early, past a deadline or cooldown.
//! 3. Invariant-risking conditions: failed rebase callbacks, empty-vault
//!    pricing, arithmetic overflow. These abort the whole operation.
//!
//! The fourth outcome class of the protocol (an operation blocked solely
//! by pending liquidations) is deliberately NOT an error; it surfaces as
//! `Outcome::Blocked` from the protocol entry points instead.

use thiserror::Error;

/// Every failure the engine can surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    // ------------------------------------------------------------------
    // Precondition violations
    // ------------------------------------------------------------------
    /// Zero or otherwise meaningless amount
    #[error("amount must be greater than zero")]
    InvalidAmount,

    /// Amount outside the configured bounds for the operation
    #[error("amount outside allowed bounds")]
    AmountOutOfBounds,

    /// Computed leverage outside [min_leverage, max_leverage]
    #[error("leverage outside allowed bounds")]
    LeverageOutOfBounds,

    /// Requested liquidation price is not below the current price
    #[error("liquidation price must be below the current price")]
    InvalidLiquidationPrice,

    /// Caller is not allowed to perform this step
    #[error("caller is not the expected actor for this action")]
    WrongActor,

    /// The actor already has an outstanding pending action
    #[error("a pending action already occupies this actor's slot")]
    SlotBusy,

    /// No pending action exists for the actor
    #[error("no pending action found for this actor")]
    NoPendingAction,

    /// The pending action is of a different kind than the validate call
    #[error("pending action kind does not match the requested validation")]
    ActionKindMismatch,

    /// Actor balance (collateral or shares) insufficient
    #[error("insufficient balance for the requested operation")]
    InsufficientBalance,

    /// Security deposit below the configured minimum
    #[error("security deposit below the required minimum")]
    SecurityDepositTooLow,

    /// The operation would push the long/vault imbalance past its limit
    #[error("exposure imbalance limit reached")]
    ImbalanceLimitReached,

    /// Position reference is stale (bucket liquidated or slot recycled)
    #[error("position reference is stale")]
    StalePosition,

    /// Tick index is outside the representable bucket range
    #[error("invalid tick for this spacing")]
    InvalidTick,

    /// Refund requested for an action that already created a position
    #[error("action created a position and can only be settled, not refunded")]
    PositionAlreadyCreated,

    /// A tunable parameter is outside its sane range
    #[error("parameter outside accepted range")]
    InvalidParameter,

    // ------------------------------------------------------------------
    // Temporal violations
    // ------------------------------------------------------------------
    /// Validation attempted before the minimum delay elapsed
    #[error("validation delay has not elapsed yet")]
    TooEarly,

    /// The designated validator's exclusive window has closed
    #[error("validation deadline has passed")]
    PastDeadline,

    /// The owner's refund cooldown has not elapsed yet
    #[error("action cooldown still active")]
    CooldownActive,

    /// Oracle price is too old for the requested operation
    #[error("oracle price is stale")]
    StalePrice,

    // ------------------------------------------------------------------
    // Invariant-risking conditions (abort atomically)
    // ------------------------------------------------------------------
    /// The external rebase callback reported failure; divisor restored
    #[error("rebase callback failed; rebase aborted")]
    RebaseCallbackFailed,

    /// Pricing against an empty vault or zero supply
    #[error("cannot price against an empty vault")]
    EmptyVault,

    /// A checked arithmetic step overflowed or underflowed
    #[error("arithmetic overflow in fixed-point computation")]
    ArithmeticOverflow,
}

/// Convenience alias used across the engine
pub type ProtocolResult<T> = Result<T, ProtocolError>;

// ============================================================================
// Unit Tests
// ============================================================================
