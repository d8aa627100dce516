//! synthcore - Binary Entry Point
//!
//! Small end-to-end walkthrough of the engine: fund the vault, open a
//! leveraged position, crash the price, sweep the liquidation.

use synthcore::engine::{FixedOracle, PriceProof, Protocol, ProtocolParams};
use synthcore::types::price::{from_fixed, SCALE};

fn main() {
    println!("===========================================");
    println!("  synthcore - stable-token accounting core");
    println!("===========================================");
    println!();

    let mut protocol = Protocol::new(ProtocolParams::default()).expect("valid default params");
    let proof = PriceProof::default();
    let deposit = SCALE; // security deposit per action

    // Fund the vault with 100 units of collateral at price 2000
    let oracle = FixedOracle::instant(2_000 * SCALE, 100);
    protocol
        .initiate_deposit(1, 1, 100 * SCALE, deposit, &proof, &oracle, 100)
        .expect("deposit accepted");
    println!("Vault funded:");
    println!("  balance_vault:  {}", from_fixed(protocol.balance_vault()));
    println!(
        "  stable balance: {}",
        from_fixed(protocol.stable().token_balance_of(1))
    );
    println!();

    // Open 5 units with liquidation around 1700
    let outcome = protocol
        .initiate_open_position(2, 2, 5 * SCALE, 1_700 * SCALE, deposit, &proof, &oracle, 110)
        .expect("open accepted")
        .applied()
        .expect("not blocked");
    let id = outcome.position.expect("position created");
    println!("Position opened:");
    println!("  tick:           {}", id.tick);
    println!("  balance_long:   {}", from_fixed(protocol.balance_long()));
    println!("  total_expo:     {}", from_fixed(protocol.total_expo()));
    println!();

    // Price collapses; anyone may sweep
    let crash = FixedOracle::new(1_500 * SCALE, 200);
    let receipt = protocol
        .liquidate(&proof, &crash, 10, 200)
        .expect("sweep runs");
    println!("Liquidation sweep at 1500:");
    println!("  ticks:          {}", receipt.ticks_liquidated);
    println!("  positions:      {}", receipt.positions_liquidated);
    println!("  freed:          {}", from_fixed(receipt.collateral_freed()));
    println!("  caller reward:  {}", from_fixed(receipt.rewards()));
    println!();

    println!("Final state:");
    println!("  balance_vault:  {}", from_fixed(protocol.balance_vault()));
    println!("  balance_long:   {}", from_fixed(protocol.balance_long()));
    println!("  positions:      {}", protocol.total_long_positions());
    println!("  state digest:   {}", protocol.snapshot(200).digest_hex());
}
