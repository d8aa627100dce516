//! Pending two-phase actions awaiting price validation.
//!
//! ## Lifecycle
//!
//! Every user operation is split into an initiate step (precondition
//! checks, escrow, security deposit) and a validate step (oracle price
//! applied, effect finalized). Between the two, the action lives in a
//! per-actor slot as a `PendingAction`.
//!
//! ## Payload Packing
//!
//! Kind-specific data rides in two generic numeric fields (`var1`,
//! `var2`) plus an optional position reference:
//!
//! | kind          | var1                  | var2                   |
//! |---------------|-----------------------|------------------------|
//! | Deposit       | escrowed amount (net) | 0                      |
//! | Withdrawal    | share count, low half | share count, high half |
//! | OpenPosition  | collateral (net)      | exposure at initiate   |
//! | ClosePosition | collateral to close   | exposure to close      |
//!
//! The withdrawal share count is stored split into little-endian halves
//! ([`split_shares`] / [`merge_shares`]); the merge reproduces the
//! original exactly for every representable count.

use crate::types::position::{ActorId, PositionId, Timestamp};

// ============================================================================
// Share count packing
// ============================================================================

/// Split a share count into (low, high) 64-bit halves
///
/// # Example
///
/// ```
/// use synthcore::types::{split_shares, merge_shares};
///
/// let shares = 123_456_789_012_345_678_901_234_567u128;
/// let (lsb, msb) = split_shares(shares);
/// assert_eq!(merge_shares(lsb, msb), shares);
/// ```
#[inline]
pub fn split_shares(shares: u128) -> (u64, u64) {
    (shares as u64, (shares >> 64) as u64)
}

/// Reassemble a share count from its (low, high) halves
///
/// `merge_shares(split_shares(x)) == x` for all x.
#[inline]
pub fn merge_shares(lsb: u64, msb: u64) -> u128 {
    ((msb as u128) << 64) | (lsb as u128)
}

// ============================================================================
// PendingActionKind
// ============================================================================

/// The four two-phase user operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingActionKind {
    /// Mint stable tokens against deposited collateral
    Deposit,
    /// Burn stable shares for collateral
    Withdrawal,
    /// Open a leveraged position
    OpenPosition,
    /// Close (part of) a leveraged position
    ClosePosition,
}

// ============================================================================
// PendingAction
// ============================================================================

/// One queued action. A given actor holds at most one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    /// What the action does when validated
    pub kind: PendingActionKind,

    /// The account that initiated (and owns the escrow)
    pub actor: ActorId,

    /// The account expected to validate; may differ from the actor
    pub validator: ActorId,

    /// Native-currency deposit posted at initiation, claimable by a
    /// third-party validator once the action turns actionable
    pub security_deposit: u128,

    /// Initiation timestamp; all delay/deadline/cooldown checks compare
    /// against this
    pub initiated_at: Timestamp,

    /// First generic payload field (see module table)
    pub var1: u128,

    /// Second generic payload field (see module table)
    pub var2: u128,

    /// Position reference for open/close actions
    pub position: Option<PositionId>,
}

impl PendingAction {
    /// Queue a deposit of `amount` collateral (fee already deducted)
    pub fn new_deposit(
        actor: ActorId,
        validator: ActorId,
        amount: u128,
        security_deposit: u128,
        initiated_at: Timestamp,
    ) -> Self {
        Self {
            kind: PendingActionKind::Deposit,
            actor,
            validator,
            security_deposit,
            initiated_at,
            var1: amount,
            var2: 0,
            position: None,
        }
    }

    /// Queue a withdrawal of `shares` stable shares
    pub fn new_withdrawal(
        actor: ActorId,
        validator: ActorId,
        shares: u128,
        security_deposit: u128,
        initiated_at: Timestamp,
    ) -> Self {
        let (lsb, msb) = split_shares(shares);
        Self {
            kind: PendingActionKind::Withdrawal,
            actor,
            validator,
            security_deposit,
            initiated_at,
            var1: lsb as u128,
            var2: msb as u128,
            position: None,
        }
    }

    /// Queue validation of a freshly opened position
    pub fn new_open(
        actor: ActorId,
        validator: ActorId,
        amount: u128,
        total_expo: u128,
        position: PositionId,
        security_deposit: u128,
        initiated_at: Timestamp,
    ) -> Self {
        Self {
            kind: PendingActionKind::OpenPosition,
            actor,
            validator,
            security_deposit,
            initiated_at,
            var1: amount,
            var2: total_expo,
            position: Some(position),
        }
    }

    /// Queue settlement of a (partial) position close
    pub fn new_close(
        actor: ActorId,
        validator: ActorId,
        amount: u128,
        total_expo: u128,
        position: PositionId,
        security_deposit: u128,
        initiated_at: Timestamp,
    ) -> Self {
        Self {
            kind: PendingActionKind::ClosePosition,
            actor,
            validator,
            security_deposit,
            initiated_at,
            var1: amount,
            var2: total_expo,
            position: Some(position),
        }
    }

    /// Withdrawal share count reassembled from the packed halves
    ///
    /// Only meaningful for `Withdrawal` actions.
    #[inline]
    pub fn withdrawal_shares(&self) -> u128 {
        merge_shares(self.var1 as u64, self.var2 as u64)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_split_merge_basic() {
        assert_eq!(split_shares(0), (0, 0));
        assert_eq!(merge_shares(0, 0), 0);

        let x = u128::MAX;
        let (lsb, msb) = split_shares(x);
        assert_eq!(lsb, u64::MAX);
        assert_eq!(msb, u64::MAX);
        assert_eq!(merge_shares(lsb, msb), x);
    }

    #[test]
    fn test_split_at_half_boundary() {
        let x = 1u128 << 64;
        assert_eq!(split_shares(x), (0, 1));
        assert_eq!(merge_shares(0, 1), x);

        let y = (1u128 << 64) - 1;
        assert_eq!(split_shares(y), (u64::MAX, 0));
    }

    #[test]
    fn test_deposit_payload() {
        let action = PendingAction::new_deposit(1, 2, 500_000_000, 10, 1_000);

        assert_eq!(action.kind, PendingActionKind::Deposit);
        assert_eq!(action.actor, 1);
        assert_eq!(action.validator, 2);
        assert_eq!(action.var1, 500_000_000);
        assert_eq!(action.position, None);
    }

    #[test]
    fn test_withdrawal_payload_roundtrip() {
        let shares = 0xdead_beef_cafe_babe_1234_5678_9abc_def0u128;
        let action = PendingAction::new_withdrawal(1, 1, shares, 10, 1_000);

        assert_eq!(action.kind, PendingActionKind::Withdrawal);
        assert_eq!(action.withdrawal_shares(), shares);
    }

    #[test]
    fn test_open_close_carry_position() {
        let id = crate::types::position::PositionId::new(7, 0, 3);
        let open = PendingAction::new_open(1, 1, 100, 300, id, 10, 1_000);
        let close = PendingAction::new_close(1, 1, 50, 150, id, 10, 2_000);

        assert_eq!(open.position, Some(id));
        assert_eq!(close.position, Some(id));
        assert_eq!(close.var1, 50);
        assert_eq!(close.var2, 150);
    }

    proptest! {
        #[test]
        fn prop_split_merge_roundtrip(shares in any::<u128>()) {
            let (lsb, msb) = split_shares(shares);
            prop_assert_eq!(merge_shares(lsb, msb), shares);
        }

        #[test]
        fn prop_halves_are_independent(lsb in any::<u64>(), msb in any::<u64>()) {
            let merged = merge_shares(lsb, msb);
            prop_assert_eq!(split_shares(merged), (lsb, msb));
        }
    }
}
