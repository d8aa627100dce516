//! Per-actor pending-action slots with global FIFO ordering.
//!
//! ## Slots
//!
//! Each actor holds at most one outstanding action: the slot is acquired
//! at initiate and released at validate, refund, or the liquidated
//! settlement. This is the protocol's only exclusive resource.
//!
//! ## FIFO
//!
//! Actions are additionally threaded through a queue ordered by
//! initiation time, so third-party validators can settle the globally
//! oldest overdue actions first. Queue entries are paired with their
//! initiation timestamp and dropped lazily when the slot they refer to
//! was already released or re-acquired.

use std::collections::{HashMap, VecDeque};

use crate::types::{ActorId, PendingAction, ProtocolError, ProtocolResult, Timestamp};

/// Slot map plus FIFO index over pending actions.
#[derive(Debug, Clone, Default)]
pub struct PendingActionQueue {
    /// One slot per actor
    slots: HashMap<ActorId, PendingAction>,

    /// Initiation order; entries are (actor, initiated_at) and are valid
    /// only while the slot still carries the same timestamp
    fifo: VecDeque<(ActorId, Timestamp)>,

    /// Σ outstanding security deposits
    total_security_deposits: u128,
}

impl PendingActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of outstanding actions
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// No outstanding actions
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Σ outstanding security deposits (native currency)
    #[inline]
    pub fn total_security_deposits(&self) -> u128 {
        self.total_security_deposits
    }

    /// The actor's outstanding action, if any
    #[inline]
    pub fn get(&self, actor: ActorId) -> Option<&PendingAction> {
        self.slots.get(&actor)
    }

    /// Acquire the actor's slot
    pub fn insert(&mut self, action: PendingAction) -> ProtocolResult<()> {
        if self.slots.contains_key(&action.actor) {
            return Err(ProtocolError::SlotBusy);
        }
        self.total_security_deposits = self
            .total_security_deposits
            .checked_add(action.security_deposit)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        self.fifo.push_back((action.actor, action.initiated_at));
        self.slots.insert(action.actor, action);
        Ok(())
    }

    /// Release the actor's slot
    pub fn remove(&mut self, actor: ActorId) -> Option<PendingAction> {
        let action = self.slots.remove(&actor)?;
        self.total_security_deposits = self
            .total_security_deposits
            .saturating_sub(action.security_deposit);
        // The FIFO entry is dropped lazily on the next front scan
        Some(action)
    }

    /// Oldest action whose deadline has passed, if any.
    ///
    /// Stale FIFO entries (released or re-acquired slots) are dropped on
    /// the way.
    pub fn front_actionable(&mut self, now: Timestamp, deadline: u64) -> Option<ActorId> {
        while let Some(&(actor, initiated_at)) = self.fifo.front() {
            let live = self
                .slots
                .get(&actor)
                .map_or(false, |a| a.initiated_at == initiated_at);
            if !live {
                self.fifo.pop_front();
                continue;
            }
            if now >= initiated_at.saturating_add(deadline) {
                return Some(actor);
            }
            // Strict FIFO: a fresh head blocks everything behind it
            return None;
        }
        None
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const DEADLINE: u64 = 1_200;

    fn deposit_action(actor: ActorId, initiated_at: Timestamp) -> PendingAction {
        PendingAction::new_deposit(actor, actor, 100, 10, initiated_at)
    }

    #[test]
    fn test_slot_exclusivity() {
        let mut queue = PendingActionQueue::new();

        queue.insert(deposit_action(1, 100)).unwrap();
        assert_eq!(
            queue.insert(deposit_action(1, 200)),
            Err(ProtocolError::SlotBusy)
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_deposit_accounting() {
        let mut queue = PendingActionQueue::new();

        queue.insert(deposit_action(1, 100)).unwrap();
        queue.insert(deposit_action(2, 110)).unwrap();
        assert_eq!(queue.total_security_deposits(), 20);

        queue.remove(1).unwrap();
        assert_eq!(queue.total_security_deposits(), 10);
        assert!(queue.get(1).is_none());
        assert!(queue.get(2).is_some());
    }

    #[test]
    fn test_front_actionable_fifo_order() {
        let mut queue = PendingActionQueue::new();
        queue.insert(deposit_action(1, 100)).unwrap();
        queue.insert(deposit_action(2, 200)).unwrap();

        // Neither is overdue yet
        assert_eq!(queue.front_actionable(150, DEADLINE), None);

        // Both overdue: strictly oldest first
        let now = 200 + DEADLINE;
        assert_eq!(queue.front_actionable(now, DEADLINE), Some(1));

        queue.remove(1);
        assert_eq!(queue.front_actionable(now, DEADLINE), Some(2));
    }

    #[test]
    fn test_fresh_head_blocks_queue() {
        let mut queue = PendingActionQueue::new();
        queue.insert(deposit_action(1, 1_000)).unwrap();
        queue.insert(deposit_action(2, 100)).unwrap();

        // Actor 2 initiated later in FIFO terms (queue order is insertion
        // order); the head is not yet overdue, so nothing is actionable
        assert_eq!(queue.front_actionable(100 + DEADLINE, DEADLINE), None);
    }

    #[test]
    fn test_stale_entries_skipped() {
        let mut queue = PendingActionQueue::new();
        queue.insert(deposit_action(1, 100)).unwrap();
        queue.insert(deposit_action(2, 110)).unwrap();

        // Actor 1 settles and re-initiates much later
        queue.remove(1);
        queue.insert(deposit_action(1, 5_000)).unwrap();

        // The old (1, 100) entry is stale; actor 2 is now the true head
        let now = 110 + DEADLINE;
        assert_eq!(queue.front_actionable(now, DEADLINE), Some(2));
    }
}
