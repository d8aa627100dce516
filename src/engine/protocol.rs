//! The authoritative protocol state object.
//!
//! ## Single Mutation Path
//!
//! All shared state (tick ledger, balances, stable shares, pending
//! actions) lives behind this struct, and every mutating entry point
//! follows the same sequence: resolve the oracle price, roll the
//! balances forward, run a bounded liquidation sweep, and only then
//! apply the operation's effect. Forgetting to roll forward before
//! mutating is the principal bug class of this design; routing every
//! mutation through [`Protocol`] makes it structurally impossible.
//!
//! ## Blocked Operations
//!
//! When the bounded sweep leaves crossed buckets behind, user operations
//! return [`Outcome::Blocked`] without touching state. That is a routine
//! condition while liquidators catch up, not an error, so callers can
//! distinguish "retry later" from "parameters rejected".
//!
//! ## Two-Phase Actions
//!
//! User operations initiate (escrow, precondition checks, security
//! deposit) and later validate against an oracle price. The designated
//! validator is exclusive during `[validation_delay, validation_deadline)`
//! and remains able to validate until `action_cooldown`; from the
//! deadline on, anyone may settle overdue actions in FIFO order for the
//! security deposits; from the cooldown on, the owner may refund-cancel
//! actions that created no position.

use crate::engine::funding::{imbalance_bps, Balances, FundingState};
use crate::engine::liquidation::{sweep, SweepOutcome};
use crate::engine::oracle::{
    NoopRebaseHandler, OraclePrice, PriceKind, PriceOracle, PriceProof, RebaseHandler,
    RewardPolicy, StandardRewards,
};
use crate::engine::queue::PendingActionQueue;
use crate::engine::rebalancer::Rebalancer;
use crate::engine::stable::{RebaseController, StableLedger};
use crate::ledger::{adjust_price, position_value, unadjust_price, TickData, TickLedger};
use crate::types::price::{apply_bps, mul_div, BPS_DIVISOR, SCALE};
use crate::types::{
    ActorId, HugeUint, LedgerSnapshot, LiquidationReceipt, PendingAction, PendingActionKind,
    PositionId, ProtocolError, ProtocolResult, Timestamp,
};

// ============================================================================
// Parameters
// ============================================================================

/// Every tunable. Host-side role gating guards the setters; the engine
/// only validates ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolParams {
    /// Bucket width in unadjusted price units (fixed-point, 10^8)
    pub tick_spacing: u128,

    /// Leverage bounds (fixed-point, 10^8)
    pub min_leverage: u128,
    pub max_leverage: u128,

    /// Minimum collateral for a leveraged position
    pub min_long_position: u128,

    /// Required native-currency security deposit per pending action
    pub security_deposit_value: u128,

    /// Seconds before the designated validator may validate
    pub validation_delay: u64,

    /// Seconds after which anyone may settle the action (FIFO)
    pub validation_deadline: u64,

    /// Seconds after which the owner may refund-cancel (no position)
    pub action_cooldown: u64,

    /// Maximum accepted oracle price age in seconds
    pub price_max_age: u64,

    /// Penalty captured by new buckets, in basis points
    pub liquidation_penalty_bps: u16,

    /// Liquidation iterations run inside user operations
    pub sweep_iterations: u16,

    /// Funding rate per day at full imbalance (fixed-point, 10^8)
    pub funding_sf: u128,

    /// Funding EMA window in seconds
    pub ema_period: u64,

    /// Fee on position open/close amounts, basis points
    pub position_fee_bps: u16,

    /// Fee on vault deposits/withdrawals, basis points
    pub vault_fee_bps: u16,

    /// Signed imbalance limits per action kind, basis points
    pub deposit_imbalance_limit_bps: i128,
    pub withdrawal_imbalance_limit_bps: i128,
    pub open_imbalance_limit_bps: i128,
    pub close_imbalance_limit_bps: i128,

    /// Divisor rebase: check interval, arm threshold, renorm target
    pub rebase_interval: u64,
    pub rebase_threshold: u128,
    pub rebase_target: u128,

    /// Minimum rebalancer deposit
    pub rebalancer_min_deposit: u128,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            tick_spacing: 100 * SCALE,
            min_leverage: SCALE + SCALE / 10, // 1.1x
            max_leverage: 20 * SCALE,
            min_long_position: SCALE / 2, // 0.5 units
            security_deposit_value: SCALE / 2,
            validation_delay: 24,
            validation_deadline: 1_200,  // 20 min
            action_cooldown: 3_600,      // 1 h
            price_max_age: 3_600,
            liquidation_penalty_bps: 200, // 2%
            sweep_iterations: 10,
            funding_sf: 12_000_000, // 0.12/day at full imbalance
            ema_period: 86_400,
            position_fee_bps: 4,
            vault_fee_bps: 4,
            deposit_imbalance_limit_bps: 2_000,
            withdrawal_imbalance_limit_bps: 2_000,
            open_imbalance_limit_bps: 2_000,
            close_imbalance_limit_bps: 2_000,
            rebase_interval: 43_200,
            rebase_threshold: SCALE + SCALE / 200, // 1.005
            rebase_target: SCALE,
            rebalancer_min_deposit: SCALE / 10,
        }
    }
}

impl ProtocolParams {
    /// Range-check every parameter
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.tick_spacing == 0 {
            return Err(ProtocolError::InvalidParameter);
        }
        if self.min_leverage <= SCALE || self.max_leverage <= self.min_leverage {
            return Err(ProtocolError::InvalidParameter);
        }
        if self.validation_deadline <= self.validation_delay
            || self.action_cooldown <= self.validation_deadline
        {
            return Err(ProtocolError::InvalidParameter);
        }
        if self.liquidation_penalty_bps as u128 >= BPS_DIVISOR
            || self.position_fee_bps as u128 >= BPS_DIVISOR
            || self.vault_fee_bps as u128 >= BPS_DIVISOR
        {
            return Err(ProtocolError::InvalidParameter);
        }
        if self.sweep_iterations == 0 {
            return Err(ProtocolError::InvalidParameter);
        }
        if self.rebase_threshold <= self.rebase_target {
            return Err(ProtocolError::InvalidParameter);
        }
        Ok(())
    }
}

// ============================================================================
// Outcomes and receipts
// ============================================================================

/// Result wrapper distinguishing "applied" from the routine
/// "blocked by pending liquidations" non-error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T> {
    Applied(T),
    Blocked,
}

impl<T> Outcome<T> {
    #[inline]
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }

    #[inline]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Outcome::Blocked)
    }

    /// The applied payload, if any
    pub fn applied(self) -> Option<T> {
        match self {
            Outcome::Applied(value) => Some(value),
            Outcome::Blocked => None,
        }
    }
}

/// How a pending action settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Effect applied in full
    Validated,
    /// The referenced position was liquidated while pending; escrowed
    /// funds settled safely, position effects skipped
    Liquidated,
}

/// Result of an initiate call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitiateReceipt {
    /// Effect applied synchronously (zero-latency path), no slot used
    pub fast_path: bool,

    /// Created position (open only)
    pub position: Option<PositionId>,

    /// Fee charged on the amount
    pub fee: u128,

    /// Collateral paid out synchronously (fast-path settlements)
    pub amount_out: u128,

    /// Security deposit returned immediately (fast path only)
    pub security_deposit_refunded: u128,
}

/// Result of a validate call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidateReceipt {
    pub settlement: Settlement,

    /// Collateral paid out to the actor
    pub amount_out: u128,

    /// Stable tokens minted (deposit settlements)
    pub minted_tokens: u128,

    /// Stable shares minted (deposit settlements)
    pub minted_shares: u128,

    /// Security deposit released by this settlement
    pub security_deposit_refunded: u128,

    /// A divisor rebase fired during settlement
    pub rebased: bool,

    /// The validated position (open settlements)
    pub position: Option<PositionId>,
}

impl ValidateReceipt {
    fn liquidated(security_deposit: u128) -> Self {
        Self {
            settlement: Settlement::Liquidated,
            amount_out: 0,
            minted_tokens: 0,
            minted_shares: 0,
            security_deposit_refunded: security_deposit,
            rebased: false,
            position: None,
        }
    }
}

/// Result of a third-party batch validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionableReceipt {
    /// Actions settled
    pub validated: u64,

    /// Security deposits collected by the caller
    pub deposits_collected: u128,
}

/// Result of a stale-action refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefundReceipt {
    /// Collateral returned to the actor
    pub amount_returned: u128,

    /// Stable shares returned to the actor
    pub shares_returned: u128,

    /// Security deposit returned to the actor
    pub security_deposit_refunded: u128,
}

/// Reward policy used for the sweeps run inside user operations: those
/// sweeps are bookkeeping, only the explicit `liquidate` call pays.
struct InternalSweep;

impl RewardPolicy for InternalSweep {
    fn liquidation_reward(&self, _ticks: u64, _freed: u128) -> u128 {
        0
    }
}

// ============================================================================
// Protocol
// ============================================================================

/// The single authoritative state object behind the narrow mutation API.
pub struct Protocol {
    params: ProtocolParams,
    ledger: TickLedger,
    funding: FundingState,
    balances: Balances,
    queue: PendingActionQueue,
    stable: StableLedger,
    rebase: RebaseController,
    rebalancer: Rebalancer,
    rewards: Box<dyn RewardPolicy>,
    rebase_handler: Box<dyn RebaseHandler>,

    /// Collateral the protocol custodies (escrow + balances + fees)
    collateral_custody: u128,

    /// Native currency held against outstanding security deposits
    native_custody: u128,
}

impl Protocol {
    /// Build with default collaborators
    pub fn new(params: ProtocolParams) -> ProtocolResult<Self> {
        Self::with_collaborators(
            params,
            Box::new(StandardRewards::default()),
            Box::new(NoopRebaseHandler),
        )
    }

    /// Build with explicit reward policy and rebase callback
    pub fn with_collaborators(
        params: ProtocolParams,
        rewards: Box<dyn RewardPolicy>,
        rebase_handler: Box<dyn RebaseHandler>,
    ) -> ProtocolResult<Self> {
        params.validate()?;
        Ok(Self {
            ledger: TickLedger::new(params.tick_spacing),
            funding: FundingState::new(params.funding_sf, params.ema_period),
            balances: Balances::default(),
            queue: PendingActionQueue::new(),
            stable: StableLedger::new(),
            rebase: RebaseController::new(
                params.rebase_interval,
                params.rebase_threshold,
                params.rebase_target,
            ),
            rebalancer: Rebalancer::new(params.rebalancer_min_deposit, params.validation_delay),
            rewards,
            rebase_handler,
            collateral_custody: 0,
            native_custody: 0,
            params,
        })
    }

    // ========================================================================
    // Read accessors
    // ========================================================================

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    pub fn balance_vault(&self) -> u128 {
        self.balances.vault
    }

    pub fn balance_long(&self) -> u128 {
        self.balances.long
    }

    pub fn pending_vault(&self) -> u128 {
        self.balances.pending_vault
    }

    pub fn fees_accrued(&self) -> u128 {
        self.balances.fees
    }

    pub fn total_expo(&self) -> u128 {
        self.ledger.total_expo()
    }

    pub fn total_long_positions(&self) -> u64 {
        self.ledger.total_positions()
    }

    pub fn highest_populated_tick(&self) -> Option<u64> {
        self.ledger.highest_populated_tick()
    }

    pub fn tick_data(&self, index: u64) -> Option<TickData> {
        self.ledger.get_tick(index)
    }

    pub fn tick_version(&self, index: u64) -> u64 {
        self.ledger.tick_version(index)
    }

    pub fn accumulator(&self) -> HugeUint {
        self.ledger.accumulator()
    }

    pub fn user_pending_action(&self, actor: ActorId) -> Option<&PendingAction> {
        self.queue.get(actor)
    }

    pub fn stable(&self) -> &StableLedger {
        &self.stable
    }

    pub fn rebalancer(&self) -> &Rebalancer {
        &self.rebalancer
    }

    pub fn collateral_custody(&self) -> u128 {
        self.collateral_custody
    }

    pub fn native_custody(&self) -> u128 {
        self.native_custody
    }

    /// Conservation invariant: internal buckets never exceed custody
    pub fn conservation_holds(&self) -> bool {
        self.balances.total() <= self.collateral_custody
    }

    /// Deposit-coverage invariant: native custody covers the queue
    pub fn security_deposits_covered(&self) -> bool {
        self.native_custody >= self.queue.total_security_deposits()
    }

    /// Deterministic snapshot of every persisted aggregate
    pub fn snapshot(&self, now: Timestamp) -> LedgerSnapshot {
        LedgerSnapshot::new(
            self.balances.vault,
            self.balances.long,
            self.balances.pending_vault,
            self.ledger.total_expo(),
            self.ledger.accumulator(),
            self.stable.total_shares(),
            self.stable.divisor(),
            self.ledger.highest_populated_tick(),
            self.ledger.total_positions(),
            now,
        )
    }

    /// SHA-256 digest of the snapshot
    pub fn state_digest(&self, now: Timestamp) -> [u8; 32] {
        self.snapshot(now).digest()
    }

    // ========================================================================
    // Parameter setters (host gates the caller)
    // ========================================================================

    pub fn set_leverage_bounds(&mut self, min: u128, max: u128) -> ProtocolResult<()> {
        let mut params = self.params;
        params.min_leverage = min;
        params.max_leverage = max;
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn set_funding_sf(&mut self, funding_sf: u128) -> ProtocolResult<()> {
        if funding_sf > SCALE {
            return Err(ProtocolError::InvalidParameter);
        }
        self.params.funding_sf = funding_sf;
        self.funding.funding_sf = funding_sf;
        Ok(())
    }

    pub fn set_validation_windows(
        &mut self,
        delay: u64,
        deadline: u64,
        cooldown: u64,
    ) -> ProtocolResult<()> {
        let mut params = self.params;
        params.validation_delay = delay;
        params.validation_deadline = deadline;
        params.action_cooldown = cooldown;
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn set_security_deposit_value(&mut self, value: u128) -> ProtocolResult<()> {
        self.params.security_deposit_value = value;
        Ok(())
    }

    pub fn set_fees(&mut self, position_fee_bps: u16, vault_fee_bps: u16) -> ProtocolResult<()> {
        let mut params = self.params;
        params.position_fee_bps = position_fee_bps;
        params.vault_fee_bps = vault_fee_bps;
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn set_imbalance_limits(
        &mut self,
        deposit: i128,
        withdrawal: i128,
        open: i128,
        close: i128,
    ) -> ProtocolResult<()> {
        for limit in [deposit, withdrawal, open, close] {
            if !(0..=BPS_DIVISOR as i128).contains(&limit) {
                return Err(ProtocolError::InvalidParameter);
            }
        }
        self.params.deposit_imbalance_limit_bps = deposit;
        self.params.withdrawal_imbalance_limit_bps = withdrawal;
        self.params.open_imbalance_limit_bps = open;
        self.params.close_imbalance_limit_bps = close;
        Ok(())
    }

    /// Drain accrued fees; the host transfers them out
    pub fn collect_fees(&mut self) -> u128 {
        let fees = self.balances.fees;
        self.balances.fees = 0;
        self.collateral_custody = self.collateral_custody.saturating_sub(fees);
        fees
    }

    // ========================================================================
    // Shared steps
    // ========================================================================

    fn check_price_fresh(&self, price: &OraclePrice, now: Timestamp) -> ProtocolResult<()> {
        if now.saturating_sub(price.timestamp) > self.params.price_max_age {
            return Err(ProtocolError::StalePrice);
        }
        Ok(())
    }

    /// Roll balances forward, then run the bounded internal sweep
    fn roll_and_sweep(&mut self, price: u128, now: Timestamp) -> ProtocolResult<SweepOutcome> {
        self.funding
            .roll_forward(&mut self.balances, self.ledger.total_expo(), price, now)?;
        sweep(
            &mut self.ledger,
            &mut self.balances,
            price,
            self.params.sweep_iterations,
            &InternalSweep,
            now,
        )
    }

    fn try_rebase(&mut self, price: u128, now: Timestamp) -> ProtocolResult<bool> {
        let result = self.rebase.maybe_rebase(
            &mut self.stable,
            self.balances.vault,
            price,
            now,
            self.rebase_handler.as_mut(),
        )?;
        Ok(result.rebased)
    }

    fn check_validate_window(
        &self,
        action: &PendingAction,
        caller: ActorId,
        now: Timestamp,
    ) -> ProtocolResult<()> {
        if caller != action.validator {
            return Err(ProtocolError::WrongActor);
        }
        if now < action.initiated_at.saturating_add(self.params.validation_delay) {
            return Err(ProtocolError::TooEarly);
        }
        if now >= action.initiated_at.saturating_add(self.params.action_cooldown) {
            return Err(ProtocolError::PastDeadline);
        }
        Ok(())
    }

    fn check_initiate_common(
        &self,
        actor: ActorId,
        security_deposit: u128,
    ) -> ProtocolResult<()> {
        if security_deposit < self.params.security_deposit_value {
            return Err(ProtocolError::SecurityDepositTooLow);
        }
        if self.queue.get(actor).is_some() {
            return Err(ProtocolError::SlotBusy);
        }
        Ok(())
    }

    /// Long trading exposure under the current balances
    fn long_trading_expo(&self) -> u128 {
        self.ledger.total_expo().saturating_sub(self.balances.long)
    }

    /// Vault-side exposure used by the imbalance limits
    fn vault_side_expo(&self) -> u128 {
        self.balances.vault.saturating_add(self.balances.pending_vault)
    }

    // ========================================================================
    // Deposit
    // ========================================================================

    /// Initiate a stable-token deposit of `amount` collateral.
    #[allow(clippy::too_many_arguments)]
    pub fn initiate_deposit(
        &mut self,
        actor: ActorId,
        validator: ActorId,
        amount: u128,
        security_deposit: u128,
        proof: &PriceProof,
        oracle: &dyn PriceOracle,
        now: Timestamp,
    ) -> ProtocolResult<Outcome<InitiateReceipt>> {
        if amount == 0 {
            return Err(ProtocolError::InvalidAmount);
        }
        self.check_initiate_common(actor, security_deposit)?;

        let price = oracle.price(PriceKind::InitiateDeposit, proof)?;
        self.check_price_fresh(&price, now)?;
        if self.roll_and_sweep(price.price, now)?.pending_remaining {
            return Ok(Outcome::Blocked);
        }

        let fee = apply_bps(amount, self.params.vault_fee_bps)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        let net = amount - fee;
        // The settlement must be able to mint something
        let projected_tokens =
            mul_div(net, price.price, SCALE).ok_or(ProtocolError::ArithmeticOverflow)?;
        if net == 0 || projected_tokens == 0 {
            return Err(ProtocolError::InvalidAmount);
        }

        // Deposits push the imbalance toward the vault side. With no long
        // exposure at all the ratio is degenerate and the limit is moot.
        let trading = self.long_trading_expo();
        if trading > 0 {
            let vault_total = self
                .vault_side_expo()
                .checked_add(net)
                .ok_or(ProtocolError::ArithmeticOverflow)?;
            let imbalance = imbalance_bps(trading, vault_total)?;
            if imbalance < -self.params.deposit_imbalance_limit_bps {
                return Err(ProtocolError::ImbalanceLimitReached);
            }
        }

        // Fallible mint sizing happens before any custody mutation
        let instant = oracle.instant_price(PriceKind::ValidateDeposit, proof);
        if let Some(ip) = instant {
            let tokens = mul_div(net, ip.price, SCALE).ok_or(ProtocolError::ArithmeticOverflow)?;
            if tokens == 0 {
                return Err(ProtocolError::InvalidAmount);
            }
        }

        self.collateral_custody = self
            .collateral_custody
            .checked_add(amount)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        self.balances.fees += fee;

        if let Some(ip) = instant {
            let (_tokens, _shares) = self.apply_deposit(actor, net, ip.price)?;
            let _ = self.try_rebase(ip.price, now)?;
            return Ok(Outcome::Applied(InitiateReceipt {
                fast_path: true,
                position: None,
                fee,
                amount_out: 0,
                security_deposit_refunded: security_deposit,
            }));
        }

        self.balances.pending_vault += net;
        self.native_custody = self
            .native_custody
            .checked_add(security_deposit)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        self.queue
            .insert(PendingAction::new_deposit(actor, validator, net, security_deposit, now))?;

        Ok(Outcome::Applied(InitiateReceipt {
            fast_path: false,
            position: None,
            fee,
            amount_out: 0,
            security_deposit_refunded: 0,
        }))
    }

    /// Validate an actor's pending deposit.
    pub fn validate_deposit(
        &mut self,
        actor: ActorId,
        caller: ActorId,
        proof: &PriceProof,
        oracle: &dyn PriceOracle,
        now: Timestamp,
    ) -> ProtocolResult<Outcome<ValidateReceipt>> {
        self.validate_kind(
            actor,
            caller,
            PendingActionKind::Deposit,
            PriceKind::ValidateDeposit,
            proof,
            oracle,
            now,
        )
    }

    /// Mint against the vault at the settlement price
    fn apply_deposit(
        &mut self,
        actor: ActorId,
        net: u128,
        price: u128,
    ) -> ProtocolResult<(u128, u128)> {
        let tokens = mul_div(net, price, SCALE).ok_or(ProtocolError::ArithmeticOverflow)?;
        if tokens == 0 {
            return Err(ProtocolError::InvalidAmount);
        }
        let shares = self.stable.mint_tokens(actor, tokens)?;
        self.balances.vault = self
            .balances
            .vault
            .checked_add(net)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        Ok((tokens, shares))
    }

    // ========================================================================
    // Withdrawal
    // ========================================================================

    /// Initiate a withdrawal of `shares` stable shares.
    #[allow(clippy::too_many_arguments)]
    pub fn initiate_withdrawal(
        &mut self,
        actor: ActorId,
        validator: ActorId,
        shares: u128,
        security_deposit: u128,
        proof: &PriceProof,
        oracle: &dyn PriceOracle,
        now: Timestamp,
    ) -> ProtocolResult<Outcome<InitiateReceipt>> {
        if shares == 0 {
            return Err(ProtocolError::InvalidAmount);
        }
        if self.stable.shares_of(actor) < shares {
            return Err(ProtocolError::InsufficientBalance);
        }
        self.check_initiate_common(actor, security_deposit)?;

        let price = oracle.price(PriceKind::InitiateWithdrawal, proof)?;
        self.check_price_fresh(&price, now)?;
        if self.roll_and_sweep(price.price, now)?.pending_remaining {
            return Ok(Outcome::Blocked);
        }
        if self.balances.vault == 0 {
            return Err(ProtocolError::EmptyVault);
        }

        // Withdrawals push the imbalance toward the long side
        let estimate = mul_div(self.balances.vault, shares, self.stable.total_shares())
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        let vault_total = self.vault_side_expo().saturating_sub(estimate);
        let imbalance = imbalance_bps(self.long_trading_expo(), vault_total)?;
        if imbalance > self.params.withdrawal_imbalance_limit_bps {
            return Err(ProtocolError::ImbalanceLimitReached);
        }

        self.stable.move_to_escrow(actor, shares)?;

        if let Some(instant) = oracle.instant_price(PriceKind::ValidateWithdrawal, proof) {
            let amount_out = self.apply_withdrawal(shares)?;
            let _ = self.try_rebase(instant.price, now)?;
            return Ok(Outcome::Applied(InitiateReceipt {
                fast_path: true,
                position: None,
                fee: 0,
                amount_out,
                security_deposit_refunded: security_deposit,
            }));
        }

        self.native_custody = self
            .native_custody
            .checked_add(security_deposit)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        self.queue.insert(PendingAction::new_withdrawal(
            actor,
            validator,
            shares,
            security_deposit,
            now,
        ))?;

        Ok(Outcome::Applied(InitiateReceipt {
            fast_path: false,
            position: None,
            fee: 0,
            amount_out: 0,
            security_deposit_refunded: 0,
        }))
    }

    /// Validate an actor's pending withdrawal.
    pub fn validate_withdrawal(
        &mut self,
        actor: ActorId,
        caller: ActorId,
        proof: &PriceProof,
        oracle: &dyn PriceOracle,
        now: Timestamp,
    ) -> ProtocolResult<Outcome<ValidateReceipt>> {
        self.validate_kind(
            actor,
            caller,
            PendingActionKind::Withdrawal,
            PriceKind::ValidateWithdrawal,
            proof,
            oracle,
            now,
        )
    }

    /// Burn escrowed shares for the pro-rata vault slice
    fn apply_withdrawal(&mut self, shares: u128) -> ProtocolResult<u128> {
        let total_shares = self.stable.total_shares();
        if total_shares == 0 || self.balances.vault == 0 {
            return Err(ProtocolError::EmptyVault);
        }
        let gross = mul_div(self.balances.vault, shares, total_shares)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        let fee =
            apply_bps(gross, self.params.vault_fee_bps).ok_or(ProtocolError::ArithmeticOverflow)?;
        let net_out = gross - fee;

        self.stable.burn_escrowed(shares)?;
        self.balances.vault -= gross;
        self.balances.fees += fee;
        self.collateral_custody = self
            .collateral_custody
            .checked_sub(net_out)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        Ok(net_out)
    }

    // ========================================================================
    // Open position
    // ========================================================================

    /// Initiate a leveraged position: `amount` collateral, liquidation
    /// at (the bucket of) `desired_liq_price`.
    #[allow(clippy::too_many_arguments)]
    pub fn initiate_open_position(
        &mut self,
        actor: ActorId,
        validator: ActorId,
        amount: u128,
        desired_liq_price: u128,
        security_deposit: u128,
        proof: &PriceProof,
        oracle: &dyn PriceOracle,
        now: Timestamp,
    ) -> ProtocolResult<Outcome<InitiateReceipt>> {
        if amount < self.params.min_long_position {
            return Err(ProtocolError::AmountOutOfBounds);
        }
        self.check_initiate_common(actor, security_deposit)?;

        let price = oracle.price(PriceKind::InitiateOpenPosition, proof)?;
        self.check_price_fresh(&price, now)?;
        if self.roll_and_sweep(price.price, now)?.pending_remaining {
            return Ok(Outcome::Blocked);
        }
        let p = price.price;

        let fee = apply_bps(amount, self.params.position_fee_bps)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        let net = amount - fee;
        if net == 0 {
            return Err(ProtocolError::InvalidAmount);
        }

        // Bucket the desired liquidation price in unadjusted space
        let trading = self.long_trading_expo();
        let acc = self.ledger.accumulator();
        let unadjusted = unadjust_price(desired_liq_price, p, trading, acc)?;
        let tick_index = self.ledger.tick_index_for(unadjusted)?;
        let tick_unadjusted = self.ledger.unadjusted_tick_price(tick_index)?;
        if tick_unadjusted == 0 {
            return Err(ProtocolError::InvalidLiquidationPrice);
        }
        let penalty = self
            .ledger
            .tick_penalty(tick_index)
            .unwrap_or(self.params.liquidation_penalty_bps);

        // An instantly-liquidatable bucket is rejected outright
        let liq_price = adjust_price(tick_unadjusted, p, trading, acc)?;
        if liq_price >= p {
            return Err(ProtocolError::InvalidLiquidationPrice);
        }
        let value_price = liq_price.saturating_mul(BPS_DIVISOR - penalty as u128) / BPS_DIVISOR;

        let leverage =
            mul_div(p, SCALE, p - value_price).ok_or(ProtocolError::ArithmeticOverflow)?;
        if leverage < self.params.min_leverage || leverage > self.params.max_leverage {
            return Err(ProtocolError::LeverageOutOfBounds);
        }
        let expo = mul_div(net, p, p - value_price).ok_or(ProtocolError::ArithmeticOverflow)?;

        // Opens push the imbalance toward the long side
        let new_trading = self
            .ledger
            .total_expo()
            .checked_add(expo)
            .ok_or(ProtocolError::ArithmeticOverflow)?
            .saturating_sub(self.balances.long.saturating_add(net));
        let imbalance = imbalance_bps(new_trading, self.vault_side_expo())?;
        if imbalance > self.params.open_imbalance_limit_bps {
            return Err(ProtocolError::ImbalanceLimitReached);
        }

        let id = self
            .ledger
            .open_position(actor, tick_index, net, expo, penalty, now)?;
        self.balances.long += net;
        self.balances.fees += fee;
        self.collateral_custody = self
            .collateral_custody
            .checked_add(amount)
            .ok_or(ProtocolError::ArithmeticOverflow)?;

        // Zero-latency path: the initiate price IS the validation price,
        // so the position needs no re-pricing and no slot
        if oracle
            .instant_price(PriceKind::ValidateOpenPosition, proof)
            .is_some()
        {
            return Ok(Outcome::Applied(InitiateReceipt {
                fast_path: true,
                position: Some(id),
                fee,
                amount_out: 0,
                security_deposit_refunded: security_deposit,
            }));
        }

        self.native_custody = self
            .native_custody
            .checked_add(security_deposit)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        self.queue.insert(PendingAction::new_open(
            actor,
            validator,
            net,
            expo,
            id,
            security_deposit,
            now,
        ))?;

        Ok(Outcome::Applied(InitiateReceipt {
            fast_path: false,
            position: Some(id),
            fee,
            amount_out: 0,
            security_deposit_refunded: 0,
        }))
    }

    /// Validate an actor's pending open.
    pub fn validate_open_position(
        &mut self,
        actor: ActorId,
        caller: ActorId,
        proof: &PriceProof,
        oracle: &dyn PriceOracle,
        now: Timestamp,
    ) -> ProtocolResult<Outcome<ValidateReceipt>> {
        self.validate_kind(
            actor,
            caller,
            PendingActionKind::OpenPosition,
            PriceKind::ValidateOpenPosition,
            proof,
            oracle,
            now,
        )
    }

    // ========================================================================
    // Close position
    // ========================================================================

    /// Initiate closing `amount_to_close` collateral of a position.
    #[allow(clippy::too_many_arguments)]
    pub fn initiate_close_position(
        &mut self,
        actor: ActorId,
        validator: ActorId,
        id: PositionId,
        amount_to_close: u128,
        security_deposit: u128,
        proof: &PriceProof,
        oracle: &dyn PriceOracle,
        now: Timestamp,
    ) -> ProtocolResult<Outcome<InitiateReceipt>> {
        if amount_to_close == 0 {
            return Err(ProtocolError::InvalidAmount);
        }
        self.check_initiate_common(actor, security_deposit)?;

        let price = oracle.price(PriceKind::InitiateClosePosition, proof)?;
        self.check_price_fresh(&price, now)?;
        if self.roll_and_sweep(price.price, now)?.pending_remaining {
            return Ok(Outcome::Blocked);
        }

        let position = self.ledger.get(&id)?.clone();
        if position.owner != actor {
            return Err(ProtocolError::WrongActor);
        }
        if amount_to_close > position.amount {
            return Err(ProtocolError::AmountOutOfBounds);
        }
        let remaining = position.amount - amount_to_close;
        if remaining > 0 && remaining < self.params.min_long_position {
            return Err(ProtocolError::AmountOutOfBounds);
        }
        let expo_to_close = mul_div(position.total_expo, amount_to_close, position.amount)
            .ok_or(ProtocolError::ArithmeticOverflow)?;

        // Closes push the imbalance toward the vault side
        let new_trading = self
            .long_trading_expo()
            .saturating_sub(expo_to_close);
        let imbalance = imbalance_bps(new_trading, self.vault_side_expo())?;
        if imbalance < -self.params.close_imbalance_limit_bps {
            return Err(ProtocolError::ImbalanceLimitReached);
        }

        // Lock the portion out of the ledger; its value stays on the long
        // side until settlement
        self.ledger
            .close_position(&id, amount_to_close, expo_to_close)?;

        if let Some(instant) = oracle.instant_price(PriceKind::ValidateClosePosition, proof) {
            let (_settlement, amount_out) = self.apply_close(&id, expo_to_close, instant.price)?;
            return Ok(Outcome::Applied(InitiateReceipt {
                fast_path: true,
                position: Some(id),
                fee: 0,
                amount_out,
                security_deposit_refunded: security_deposit,
            }));
        }

        self.native_custody = self
            .native_custody
            .checked_add(security_deposit)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        self.queue.insert(PendingAction::new_close(
            actor,
            validator,
            amount_to_close,
            expo_to_close,
            id,
            security_deposit,
            now,
        ))?;

        Ok(Outcome::Applied(InitiateReceipt {
            fast_path: false,
            position: Some(id),
            fee: 0,
            amount_out: 0,
            security_deposit_refunded: 0,
        }))
    }

    /// Validate an actor's pending close.
    pub fn validate_close_position(
        &mut self,
        actor: ActorId,
        caller: ActorId,
        proof: &PriceProof,
        oracle: &dyn PriceOracle,
        now: Timestamp,
    ) -> ProtocolResult<Outcome<ValidateReceipt>> {
        self.validate_kind(
            actor,
            caller,
            PendingActionKind::ClosePosition,
            PriceKind::ValidateClosePosition,
            proof,
            oracle,
            now,
        )
    }

    /// Settle a locked close portion at the given price
    fn apply_close(
        &mut self,
        id: &PositionId,
        expo: u128,
        price: u128,
    ) -> ProtocolResult<(Settlement, u128)> {
        let tick_unadjusted = self.ledger.unadjusted_tick_price(id.tick)?;
        let trading = self.long_trading_expo();
        let acc = self.ledger.accumulator();
        let liq_price = adjust_price(tick_unadjusted, price, trading, acc)?;
        let penalty = self
            .ledger
            .tick_penalty(id.tick)
            .unwrap_or(self.params.liquidation_penalty_bps);
        let value_price = liq_price.saturating_mul(BPS_DIVISOR - penalty as u128) / BPS_DIVISOR;

        if price <= liq_price {
            // The position crossed its threshold while pending: the
            // remaining equity (if any) belongs to the vault side
            let stranded = position_value(expo, price, value_price).min(self.balances.long);
            self.balances.long -= stranded;
            self.balances.vault += stranded;
            return Ok((Settlement::Liquidated, 0));
        }

        let gross = position_value(expo, price, value_price).min(self.balances.long);
        let fee =
            apply_bps(gross, self.params.position_fee_bps).ok_or(ProtocolError::ArithmeticOverflow)?;
        let net_out = gross - fee;

        self.balances.long -= gross;
        self.balances.fees += fee;
        self.collateral_custody = self
            .collateral_custody
            .checked_sub(net_out)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        Ok((Settlement::Validated, net_out))
    }

    // ========================================================================
    // Shared validation path
    // ========================================================================

    #[allow(clippy::too_many_arguments)]
    fn validate_kind(
        &mut self,
        actor: ActorId,
        caller: ActorId,
        expected: PendingActionKind,
        price_kind: PriceKind,
        proof: &PriceProof,
        oracle: &dyn PriceOracle,
        now: Timestamp,
    ) -> ProtocolResult<Outcome<ValidateReceipt>> {
        let action = self
            .queue
            .get(actor)
            .cloned()
            .ok_or(ProtocolError::NoPendingAction)?;
        if action.kind != expected {
            return Err(ProtocolError::ActionKindMismatch);
        }
        self.check_validate_window(&action, caller, now)?;

        let price = oracle.price(price_kind, proof)?;
        self.check_price_fresh(&price, now)?;

        match self.settle_pending(&action, price.price, now)? {
            Outcome::Blocked => Ok(Outcome::Blocked),
            Outcome::Applied(receipt) => {
                self.queue.remove(actor);
                self.native_custody = self.native_custody.saturating_sub(action.security_deposit);
                Ok(Outcome::Applied(receipt))
            }
        }
    }

    /// Apply a pending action's settlement effect. The caller removes the
    /// action from the queue and routes the security deposit.
    fn settle_pending(
        &mut self,
        action: &PendingAction,
        price: u128,
        now: Timestamp,
    ) -> ProtocolResult<Outcome<ValidateReceipt>> {
        if self.roll_and_sweep(price, now)?.pending_remaining {
            return Ok(Outcome::Blocked);
        }

        let receipt = match action.kind {
            PendingActionKind::Deposit => {
                let net = action.var1;
                if self.balances.pending_vault < net {
                    return Err(ProtocolError::ArithmeticOverflow);
                }
                let (tokens, shares) = self.apply_deposit(action.actor, net, price)?;
                self.balances.pending_vault -= net;
                let rebased = self.try_rebase(price, now)?;
                ValidateReceipt {
                    settlement: Settlement::Validated,
                    amount_out: 0,
                    minted_tokens: tokens,
                    minted_shares: shares,
                    security_deposit_refunded: action.security_deposit,
                    rebased,
                    position: None,
                }
            }
            PendingActionKind::Withdrawal => {
                let shares = action.withdrawal_shares();
                let amount_out = self.apply_withdrawal(shares)?;
                let rebased = self.try_rebase(price, now)?;
                ValidateReceipt {
                    settlement: Settlement::Validated,
                    amount_out,
                    minted_tokens: 0,
                    minted_shares: 0,
                    security_deposit_refunded: action.security_deposit,
                    rebased,
                    position: None,
                }
            }
            PendingActionKind::OpenPosition => {
                let id = action.position.ok_or(ProtocolError::NoPendingAction)?;
                // A bumped tick version means the position went down with
                // its bucket while pending
                let live_amount = self.ledger.get(&id).map(|p| p.amount).ok();
                match live_amount {
                    None => ValidateReceipt::liquidated(action.security_deposit),
                    Some(amount) => {
                        // Re-price the exposure against the validated price
                        let tick_unadjusted = self.ledger.unadjusted_tick_price(id.tick)?;
                        let trading = self.long_trading_expo();
                        let acc = self.ledger.accumulator();
                        let liq_price = adjust_price(tick_unadjusted, price, trading, acc)?;
                        let penalty = self
                            .ledger
                            .tick_penalty(id.tick)
                            .unwrap_or(self.params.liquidation_penalty_bps);
                        let value_price =
                            liq_price.saturating_mul(BPS_DIVISOR - penalty as u128) / BPS_DIVISOR;
                        if price > value_price {
                            let new_expo = mul_div(amount, price, price - value_price)
                                .ok_or(ProtocolError::ArithmeticOverflow)?;
                            self.ledger.update_position_expo(&id, new_expo)?;
                        }
                        ValidateReceipt {
                            settlement: Settlement::Validated,
                            amount_out: 0,
                            minted_tokens: 0,
                            minted_shares: 0,
                            security_deposit_refunded: action.security_deposit,
                            rebased: false,
                            position: Some(id),
                        }
                    }
                }
            }
            PendingActionKind::ClosePosition => {
                let id = action.position.ok_or(ProtocolError::NoPendingAction)?;
                let (settlement, amount_out) = self.apply_close(&id, action.var2, price)?;
                ValidateReceipt {
                    settlement,
                    amount_out,
                    minted_tokens: 0,
                    minted_shares: 0,
                    security_deposit_refunded: action.security_deposit,
                    rebased: false,
                    position: Some(id),
                }
            }
        };
        Ok(Outcome::Applied(receipt))
    }

    // ========================================================================
    // Third-party settlement and refunds
    // ========================================================================

    /// Settle up to `max_count` overdue actions in FIFO order; the caller
    /// collects their security deposits. One proof per settled action.
    pub fn validate_actionable_pending_actions(
        &mut self,
        max_count: usize,
        proofs: &[PriceProof],
        oracle: &dyn PriceOracle,
        now: Timestamp,
    ) -> ProtocolResult<ActionableReceipt> {
        let mut receipt = ActionableReceipt::default();

        for index in 0..max_count {
            let actor = match self
                .queue
                .front_actionable(now, self.params.validation_deadline)
            {
                Some(actor) => actor,
                None => break,
            };
            let proof = match proofs.get(index) {
                Some(proof) => proof,
                None => break,
            };
            let action = match self.queue.get(actor) {
                Some(action) => action.clone(),
                None => break,
            };

            let price_kind = match action.kind {
                PendingActionKind::Deposit => PriceKind::ValidateDeposit,
                PendingActionKind::Withdrawal => PriceKind::ValidateWithdrawal,
                PendingActionKind::OpenPosition => PriceKind::ValidateOpenPosition,
                PendingActionKind::ClosePosition => PriceKind::ValidateClosePosition,
            };
            let price = oracle.price(price_kind, proof)?;
            self.check_price_fresh(&price, now)?;

            match self.settle_pending(&action, price.price, now)? {
                Outcome::Blocked => break,
                Outcome::Applied(_) => {
                    self.queue.remove(actor);
                    self.native_custody = self
                        .native_custody
                        .saturating_sub(action.security_deposit);
                    receipt.validated += 1;
                    receipt.deposits_collected += action.security_deposit;
                }
            }
        }

        Ok(receipt)
    }

    /// Refund a stale action after the cooldown (owner only; actions that
    /// created a position must settle through validation instead).
    pub fn refund_stale_action(
        &mut self,
        actor: ActorId,
        now: Timestamp,
    ) -> ProtocolResult<RefundReceipt> {
        let action = self
            .queue
            .get(actor)
            .cloned()
            .ok_or(ProtocolError::NoPendingAction)?;
        if now < action.initiated_at.saturating_add(self.params.action_cooldown) {
            return Err(ProtocolError::CooldownActive);
        }

        let receipt = match action.kind {
            PendingActionKind::Deposit => {
                let net = action.var1;
                if self.balances.pending_vault < net {
                    return Err(ProtocolError::ArithmeticOverflow);
                }
                self.balances.pending_vault -= net;
                self.collateral_custody = self
                    .collateral_custody
                    .checked_sub(net)
                    .ok_or(ProtocolError::ArithmeticOverflow)?;
                RefundReceipt {
                    amount_returned: net,
                    shares_returned: 0,
                    security_deposit_refunded: action.security_deposit,
                }
            }
            PendingActionKind::Withdrawal => {
                let shares = action.withdrawal_shares();
                self.stable.return_from_escrow(actor, shares)?;
                RefundReceipt {
                    amount_returned: 0,
                    shares_returned: shares,
                    security_deposit_refunded: action.security_deposit,
                }
            }
            PendingActionKind::OpenPosition | PendingActionKind::ClosePosition => {
                return Err(ProtocolError::PositionAlreadyCreated);
            }
        };

        self.queue.remove(actor);
        self.native_custody = self.native_custody.saturating_sub(action.security_deposit);
        Ok(receipt)
    }

    // ========================================================================
    // Liquidation
    // ========================================================================

    /// Sweep crossed ticks; the caller earns the reward.
    pub fn liquidate(
        &mut self,
        proof: &PriceProof,
        oracle: &dyn PriceOracle,
        max_iter: u16,
        now: Timestamp,
    ) -> ProtocolResult<LiquidationReceipt> {
        let price = oracle.price(PriceKind::Liquidation, proof)?;
        self.check_price_fresh(&price, now)?;

        self.funding.roll_forward(
            &mut self.balances,
            self.ledger.total_expo(),
            price.price,
            now,
        )?;
        let outcome = sweep(
            &mut self.ledger,
            &mut self.balances,
            price.price,
            max_iter,
            self.rewards.as_ref(),
            now,
        )?;

        if outcome.reward > 0 {
            // The reward leaves custody toward the caller
            self.collateral_custody = self
                .collateral_custody
                .checked_sub(outcome.reward)
                .ok_or(ProtocolError::ArithmeticOverflow)?;
        }

        Ok(LiquidationReceipt::new(
            outcome.ticks,
            outcome.positions,
            outcome.collateral_freed,
            outcome.reward,
            now,
        ))
    }

    // ========================================================================
    // Rebalancer passthrough
    // ========================================================================

    /// Announce a rebalancer deposit
    pub fn rebalancer_initiate_deposit(
        &mut self,
        actor: ActorId,
        amount: u128,
        now: Timestamp,
    ) -> ProtocolResult<()> {
        self.rebalancer.initiate_deposit(actor, amount, now)
    }

    /// Validate a rebalancer deposit after its delay
    pub fn rebalancer_validate_deposit(
        &mut self,
        actor: ActorId,
        now: Timestamp,
    ) -> ProtocolResult<()> {
        self.rebalancer.validate_deposit(actor, now)
    }

    /// Announce a rebalancer exit
    pub fn rebalancer_initiate_withdraw(
        &mut self,
        actor: ActorId,
        now: Timestamp,
    ) -> ProtocolResult<()> {
        self.rebalancer.initiate_withdraw(actor, now)
    }

    /// Settle a rebalancer exit; returns the amount owed
    pub fn rebalancer_validate_withdraw(
        &mut self,
        actor: ActorId,
        now: Timestamp,
    ) -> ProtocolResult<u128> {
        self.rebalancer.validate_withdraw(actor, now)
    }

    /// Fold the closed aggregate position and start the next version
    pub fn update_rebalancer_position(&mut self, previous_value: u128) -> ProtocolResult<()> {
        self.rebalancer.update_position(previous_value)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
