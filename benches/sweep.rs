//! Benchmarks for the synthcore tick ledger and liquidation sweep.
//!
//! ## Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench
//!
//! # Run specific benchmark
//! cargo bench -- sweep
//! ```
//!
//! Results are saved to `target/criterion/` with HTML reports.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use std::time::Duration;

use synthcore::engine::{sweep, Balances, FixedOracle, PriceProof, Protocol, ProtocolParams, RewardPolicy};
use synthcore::ledger::TickLedger;
use synthcore::types::price::SCALE;

// ============================================================================
// HELPER FUNCTIONS - Deterministic state construction
// ============================================================================

const SPACING: u128 = 100 * SCALE;

struct NoRewards;
impl RewardPolicy for NoRewards {
    fn liquidation_reward(&self, _ticks: u64, _freed: u128) -> u128 {
        0
    }
}

/// Populate a ledger with one position per bucket across `count` buckets.
/// With a zeroed long balance every bucket above the exposure-weighted
/// average is crossed, so a sweep always has work to do.
fn populate_ledger(count: u64) -> (TickLedger, Balances) {
    let mut ledger = TickLedger::with_capacity(SPACING, count as usize * 2);
    for tick in 0..count {
        ledger
            .open_position(tick, tick + 1, SCALE, 10 * SCALE, 200, 0)
            .expect("open");
    }
    let balances = Balances {
        vault: 10_000 * SCALE,
        long: 0,
        pending_vault: 0,
        fees: 0,
    };
    (ledger, balances)
}

/// A protocol with a funded vault, ready for user operations.
fn funded_protocol() -> Protocol {
    let params = ProtocolParams {
        deposit_imbalance_limit_bps: 10_000,
        open_imbalance_limit_bps: 10_000,
        ..ProtocolParams::default()
    };
    let mut protocol = Protocol::new(params).expect("params");
    let oracle = FixedOracle::instant(2_000 * SCALE, 100);
    protocol
        .initiate_deposit(1, 1, 10_000 * SCALE, SCALE, &PriceProof::default(), &oracle, 100)
        .expect("deposit");
    protocol
}

// ============================================================================
// BENCHMARK: Liquidation Sweep
// ============================================================================

fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep");
    group.measurement_time(Duration::from_secs(10));

    for bucket_count in [10u64, 100, 1_000] {
        group.bench_with_input(
            BenchmarkId::new("crossed_buckets", bucket_count),
            &bucket_count,
            |b, &count| {
                b.iter_batched(
                    || populate_ledger(count),
                    |(mut ledger, mut balances)| {
                        black_box(
                            sweep(
                                &mut ledger,
                                &mut balances,
                                SCALE,
                                u16::MAX,
                                &NoRewards,
                                100,
                            )
                            .expect("sweep"),
                        )
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }

    // Bounded partial sweep: the backpressure path
    group.bench_function("bounded_10_of_1000", |b| {
        b.iter_batched(
            || populate_ledger(1_000),
            |(mut ledger, mut balances)| {
                black_box(
                    sweep(&mut ledger, &mut balances, SCALE, 10, &NoRewards, 100)
                        .expect("sweep"),
                )
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

// ============================================================================
// BENCHMARK: Ledger Operations
// ============================================================================

fn bench_ledger_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_operations");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("open_in_1k_ledger", |b| {
        b.iter_batched(
            || populate_ledger(1_000).0,
            |mut ledger| {
                black_box(
                    ledger
                        .open_position(9_999, 500, SCALE, 10 * SCALE, 200, 0)
                        .expect("open"),
                )
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("close_in_1k_ledger", |b| {
        b.iter_batched(
            || {
                let mut ledger = populate_ledger(1_000).0;
                let id = ledger
                    .open_position(9_999, 500, SCALE, 10 * SCALE, 200, 0)
                    .expect("open");
                (ledger, id)
            },
            |(mut ledger, id)| {
                black_box(ledger.close_position(&id, SCALE, 10 * SCALE).expect("close"))
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

// ============================================================================
// BENCHMARK: Protocol Flows
// ============================================================================

fn bench_protocol_flows(c: &mut Criterion) {
    let mut group = c.benchmark_group("protocol_flows");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("zero_latency_deposit", |b| {
        let oracle = FixedOracle::instant(2_000 * SCALE, 200);
        let proof = PriceProof::default();
        let mut actor = 100u64;

        b.iter_batched(
            funded_protocol,
            |mut protocol| {
                actor += 1;
                black_box(
                    protocol
                        .initiate_deposit(actor, actor, SCALE, SCALE, &proof, &oracle, 200)
                        .expect("deposit"),
                )
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("zero_latency_open", |b| {
        let oracle = FixedOracle::instant(2_000 * SCALE, 200);
        let proof = PriceProof::default();

        b.iter_batched(
            funded_protocol,
            |mut protocol| {
                black_box(
                    protocol
                        .initiate_open_position(
                            2,
                            2,
                            5 * SCALE,
                            1_700 * SCALE,
                            SCALE,
                            &proof,
                            &oracle,
                            200,
                        )
                        .expect("open"),
                )
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("state_digest", |b| {
        let protocol = funded_protocol();
        b.iter(|| black_box(protocol.state_digest(500)));
    });

    group.finish();
}

// ============================================================================
// CRITERION ENTRY POINT
// ============================================================================

criterion_group!(benches, bench_sweep, bench_ledger_operations, bench_protocol_flows);
criterion_main!(benches);
