//! System-level scenario and stress tests for the synthcore engine.
//!
//! These tests verify:
//! 1. Conservation holds under arbitrary interleavings of actions
//! 2. Security deposits are always covered by native custody
//! 3. Determinism is preserved across runs (identical digests)
//! 4. Full multi-actor lifecycles settle the way the accounting says
//!
//! ## Running
//!
//! ```bash
//! cargo test --release --test scenarios -- --nocapture
//! ```

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use synthcore::engine::{FixedOracle, Outcome, PriceProof, Protocol, ProtocolParams};
use synthcore::types::price::SCALE;
use synthcore::types::{PendingActionKind, PositionId};

// ============================================================================
// TEST CONSTANTS
// ============================================================================

/// Operations per randomized run
const STRESS_OPS: usize = 5_000;

/// Number of distinct actors
const ACTORS: u64 = 20;

/// Attached security deposit per action
const DEP: u128 = SCALE;

/// Allowed custody slack from conservative flooring (raw 10^-8 units)
const ROUNDING_EPSILON: u128 = 16;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn stress_params() -> ProtocolParams {
    ProtocolParams {
        deposit_imbalance_limit_bps: 10_000,
        withdrawal_imbalance_limit_bps: 10_000,
        open_imbalance_limit_bps: 10_000,
        close_imbalance_limit_bps: 10_000,
        ..ProtocolParams::default()
    }
}

/// Custody minus the sum of the internal buckets; never negative, and
/// bounded by the flooring epsilon
fn custody_slack(p: &Protocol) -> u128 {
    let total = p.balance_vault() + p.balance_long() + p.pending_vault() + p.fees_accrued();
    assert!(
        total <= p.collateral_custody(),
        "conservation violated: buckets {} > custody {}",
        total,
        p.collateral_custody()
    );
    p.collateral_custody() - total
}

struct StressRun {
    protocol: Protocol,
    rng: ChaCha8Rng,
    now: u64,
    price: u128,
    positions: Vec<(u64, PositionId)>,
}

impl StressRun {
    fn new(seed: u64) -> Self {
        Self {
            protocol: Protocol::new(stress_params()).expect("params"),
            rng: ChaCha8Rng::seed_from_u64(seed),
            now: 1_000,
            price: 2_000 * SCALE,
            positions: Vec::new(),
        }
    }

    fn oracle(&mut self) -> FixedOracle {
        if self.rng.gen_bool(0.3) {
            FixedOracle::instant(self.price, self.now)
        } else {
            FixedOracle::new(self.price, self.now)
        }
    }

    /// One random action. Precondition failures are expected and ignored;
    /// the invariants are checked after every step by the caller.
    fn step(&mut self) {
        // Time always advances; price takes a bounded random walk
        self.now += self.rng.gen_range(1..120);
        let drift: i64 = self.rng.gen_range(-40..=40);
        let shifted = (self.price as i128 + (drift as i128) * SCALE as i128).max(SCALE as i128);
        self.price = (shifted as u128).clamp(1_000 * SCALE, 4_000 * SCALE);

        let actor = self.rng.gen_range(1..=ACTORS);
        let proof = PriceProof::default();
        let oracle = self.oracle();

        match self.rng.gen_range(0u8..8) {
            0 => {
                let amount = SCALE * self.rng.gen_range(1..10);
                let _ = self.protocol.initiate_deposit(
                    actor, actor, amount, DEP, &proof, &oracle, self.now,
                );
            }
            1 => {
                let shares = self.protocol.stable().shares_of(actor) / 2;
                if shares > 0 {
                    let _ = self.protocol.initiate_withdrawal(
                        actor, actor, shares, DEP, &proof, &oracle, self.now,
                    );
                }
            }
            2 => {
                let amount = SCALE * self.rng.gen_range(1..5);
                let ratio = self.rng.gen_range(70u128..=95);
                let liq = self.price * ratio / 100;
                if let Ok(Outcome::Applied(receipt)) = self.protocol.initiate_open_position(
                    actor, actor, amount, liq, DEP, &proof, &oracle, self.now,
                ) {
                    if let Some(id) = receipt.position {
                        self.positions.push((actor, id));
                    }
                }
            }
            3 => {
                if !self.positions.is_empty() {
                    let pick = self.rng.gen_range(0..self.positions.len());
                    let (owner, id) = self.positions[pick];
                    let amount = SCALE * self.rng.gen_range(1..3);
                    let result = self.protocol.initiate_close_position(
                        owner, owner, id, amount, DEP, &proof, &oracle, self.now,
                    );
                    if result.is_ok() {
                        self.positions.swap_remove(pick);
                    }
                }
            }
            4 => {
                // Try to validate whatever the actor has pending
                let kind = self
                    .protocol
                    .user_pending_action(actor)
                    .map(|action| action.kind);
                let _ = match kind {
                    Some(PendingActionKind::Deposit) => self
                        .protocol
                        .validate_deposit(actor, actor, &proof, &oracle, self.now),
                    Some(PendingActionKind::Withdrawal) => self
                        .protocol
                        .validate_withdrawal(actor, actor, &proof, &oracle, self.now),
                    Some(PendingActionKind::OpenPosition) => self
                        .protocol
                        .validate_open_position(actor, actor, &proof, &oracle, self.now),
                    Some(PendingActionKind::ClosePosition) => self
                        .protocol
                        .validate_close_position(actor, actor, &proof, &oracle, self.now),
                    None => Ok(Outcome::Blocked),
                };
            }
            5 => {
                let iter = self.rng.gen_range(1..8);
                let _ = self.protocol.liquidate(&proof, &oracle, iter, self.now);
            }
            6 => {
                let proofs = [PriceProof::default(), PriceProof::default()];
                let _ = self.protocol.validate_actionable_pending_actions(
                    2, &proofs, &oracle, self.now,
                );
            }
            _ => {
                let _ = self.protocol.refund_stale_action(actor, self.now);
            }
        }
    }

    fn run(mut self, ops: usize) -> Protocol {
        for i in 0..ops {
            self.step();

            let slack = custody_slack(&self.protocol);
            assert!(
                slack <= ROUNDING_EPSILON * (i as u128 + 1),
                "custody slack {} exceeds epsilon after {} ops",
                slack,
                i + 1
            );
            assert!(
                self.protocol.security_deposits_covered(),
                "security deposits uncovered after {} ops",
                i + 1
            );
        }
        self.protocol
    }
}

// ============================================================================
// STRESS TESTS
// ============================================================================

/// Conservation and deposit coverage under randomized interleavings.
#[test]
fn stress_conservation_under_interleaving() {
    let protocol = StressRun::new(42).run(STRESS_OPS);

    // The run must have actually exercised the system
    assert!(protocol.collateral_custody() > 0);
    println!(
        "final: custody={} vault={} long={} positions={} pending_actions={}",
        protocol.collateral_custody(),
        protocol.balance_vault(),
        protocol.balance_long(),
        protocol.total_long_positions(),
        protocol.user_pending_action(1).is_some() as u8,
    );
}

/// Same seed, same digest; different seed, different digest.
#[test]
fn stress_determinism() {
    let a = StressRun::new(12_345).run(2_000);
    let b = StressRun::new(12_345).run(2_000);
    let c = StressRun::new(54_321).run(2_000);

    let ts = 10_000_000;
    assert_eq!(a.state_digest(ts), b.state_digest(ts));
    assert_ne!(a.state_digest(ts), c.state_digest(ts));
}

/// Divisor only ever decreases across a long randomized run.
#[test]
fn stress_divisor_monotone() {
    let mut run = StressRun::new(7);
    let mut last_divisor = run.protocol.stable().divisor();

    for _ in 0..2_000 {
        run.step();
        let divisor = run.protocol.stable().divisor();
        assert!(divisor <= last_divisor, "divisor increased");
        last_divisor = divisor;
    }
}

// ============================================================================
// LIFECYCLE SCENARIOS
// ============================================================================

/// Deposit, leveraged open, price appreciation, profitable close, exit.
#[test]
fn lifecycle_profit_round_trip() {
    let params = ProtocolParams {
        position_fee_bps: 0,
        vault_fee_bps: 0,
        funding_sf: 0,
        liquidation_penalty_bps: 0,
        deposit_imbalance_limit_bps: 10_000,
        withdrawal_imbalance_limit_bps: 10_000,
        open_imbalance_limit_bps: 10_000,
        close_imbalance_limit_bps: 10_000,
        ..ProtocolParams::default()
    };
    let mut p = Protocol::new(params).expect("params");
    let proof = PriceProof::default();

    // Vault holder enters at 2000
    let o1 = FixedOracle::instant(2_000 * SCALE, 100);
    p.initiate_deposit(1, 1, 100 * SCALE, DEP, &proof, &o1, 100)
        .expect("deposit");

    // Trader opens 10 units, liquidation bucket around 1700
    let id = p
        .initiate_open_position(2, 2, 10 * SCALE, 1_700 * SCALE, DEP, &proof, &o1, 110)
        .expect("open")
        .applied()
        .expect("not blocked")
        .position
        .expect("created");

    // Price appreciates 10%; the trader closes at a profit
    let o2 = FixedOracle::instant(2_200 * SCALE, 500);
    let receipt = p
        .initiate_close_position(2, 2, id, 10 * SCALE, DEP, &proof, &o2, 500)
        .expect("close")
        .applied()
        .expect("not blocked");
    assert!(
        receipt.amount_out > 10 * SCALE,
        "close at +10% must be profitable, got {}",
        receipt.amount_out
    );

    // The long side paid the profit; the vault absorbed the move
    assert_eq!(p.total_long_positions(), 0);
    assert!(p.balance_long() < SCALE);
    assert!(custody_slack(&p) <= ROUNDING_EPSILON);

    // The vault holder can still exit everything that remains
    let shares = p.stable().shares_of(1);
    let out = p
        .initiate_withdrawal(1, 1, shares, DEP, &proof, &o2, 600)
        .expect("withdraw")
        .applied()
        .expect("not blocked");
    assert!(out.fast_path);
    assert!(out.amount_out > 0);
    assert_eq!(p.stable().total_shares(), 0);
}

/// An overdue action settles through the third-party path and the
/// settler collects the security deposit.
#[test]
fn lifecycle_third_party_backstop() {
    let mut p = Protocol::new(stress_params()).expect("params");
    let proof = PriceProof::default();

    let o1 = FixedOracle::instant(2_000 * SCALE, 100);
    p.initiate_deposit(1, 1, 10 * SCALE, DEP, &proof, &o1, 100)
        .expect("deposit");

    // The withdrawal initiator disappears after initiating
    let shares = p.stable().shares_of(1);
    p.initiate_withdrawal(1, 1, shares, DEP, &proof, &FixedOracle::new(2_000 * SCALE, 200), 200)
        .expect("withdraw queued");
    assert!(p.user_pending_action(1).is_some());

    // Long past the deadline, a keeper settles the queue head
    let keeper_now = 200 + p.params().validation_deadline + 60;
    let receipt = p
        .validate_actionable_pending_actions(
            4,
            &[PriceProof::default()],
            &FixedOracle::new(2_000 * SCALE, keeper_now),
            keeper_now,
        )
        .expect("actionable");

    assert_eq!(receipt.validated, 1);
    assert_eq!(receipt.deposits_collected, DEP);
    assert!(p.user_pending_action(1).is_none());
    assert_eq!(p.stable().total_shares(), 0);
    assert!(p.security_deposits_covered());
}
