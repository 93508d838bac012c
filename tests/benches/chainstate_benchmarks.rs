//! # Chain-State Benchmarks
//!
//! | Area | Operation |
//! |------|-----------|
//! | Block index | Ancestor lookup through skip pointers |
//! | Adaptive limit | Lookahead over many full blocks |
//! | cs_main | Reentrant shared acquisition, shared-to-exclusive upgrade |
//! | Pipeline | Connecting a short chain end to end |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use std::time::Duration;

use chainstate::{AblaConfig, AblaState, BlockIndex, ChainstateApi};
use chainstate_tests::fixtures::{genesis, regtest_service, submit_all, ChainBuilder};
use shared_lock::RecursiveSharedMutex;
use shared_types::{BlockHeader, ZERO_HASH};

// ============================================================================
// Block index
// ============================================================================

/// Linear index of `len` headers. Proof of work is not checked by the
/// index, so the headers are not mined.
fn linear_index(len: u64) -> BlockIndex {
    let mut index = BlockIndex::new();
    let mut parent = ZERO_HASH;
    for height in 0..len {
        let header = BlockHeader {
            version: 1,
            parent_hash: parent,
            merkle_root: ZERO_HASH,
            timestamp: 1_600_000_000 + height * 600,
            bits: 0x207f_ffff,
            nonce: height as u32,
        };
        parent = header.hash();
        index.insert(header).expect("linear header links");
    }
    index
}

fn bench_ancestor_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("block-index");

    for len in [1_000u64, 10_000, 100_000] {
        let index = linear_index(len);
        let tip = index.lookup(&tip_hash(&index)).expect("tip indexed");
        let mut rng = rand::thread_rng();
        let heights: Vec<u64> = (0..256).map(|_| rng.gen_range(0..len)).collect();

        group.throughput(Throughput::Elements(heights.len() as u64));
        group.bench_with_input(BenchmarkId::new("ancestor", len), &heights, |b, heights| {
            b.iter(|| {
                for &h in heights {
                    black_box(index.ancestor(tip, h));
                }
            })
        });
    }

    group.finish();
}

fn tip_hash(index: &BlockIndex) -> shared_types::Hash {
    index
        .iter()
        .max_by_key(|(_, entry)| entry.height)
        .map(|(_, entry)| entry.hash)
        .expect("non-empty index")
}

// ============================================================================
// Adaptive limit
// ============================================================================

fn bench_abla_lookahead(c: &mut Criterion) {
    let mut group = c.benchmark_group("abla");
    let config = AblaConfig::make_default(32_000_000, false);
    let state = AblaState::new(&config);

    group.bench_function("next_block_state", |b| {
        b.iter(|| black_box(state.next_block_state(&config, black_box(32_000_000))))
    });

    for blocks in [144u64, 4_032, 52_560] {
        group.bench_with_input(BenchmarkId::new("lookahead", blocks), &blocks, |b, &n| {
            b.iter(|| black_box(state.calc_lookahead_block_size_limit(&config, n, false)))
        });
    }

    group.finish();
}

// ============================================================================
// cs_main
// ============================================================================

fn bench_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("cs-main");
    let lock = RecursiveSharedMutex::new();

    group.bench_function("shared_reentrant", |b| {
        b.iter(|| {
            lock.lock_shared();
            lock.lock_shared();
            lock.unlock_shared();
            lock.unlock_shared();
        })
    });

    group.bench_function("upgrade_from_shared", |b| {
        b.iter(|| {
            lock.lock_shared();
            lock.lock();
            lock.unlock();
            lock.unlock_shared();
        })
    });

    group.finish();
}

// ============================================================================
// Connection pipeline
// ============================================================================

fn bench_activate_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    let g = genesis();
    let blocks = ChainBuilder::on(&g, 0).take(100);

    group.throughput(Throughput::Elements(blocks.len() as u64 + 1));
    group.bench_function("activate_101_blocks", |b| {
        b.iter_with_setup(
            || {
                let chainstate = regtest_service();
                chainstate.accept_block(g.clone()).expect("genesis accepted");
                submit_all(&chainstate, &blocks);
                chainstate
            },
            |chainstate| black_box(chainstate.activate_best_chain().expect("activation")),
        )
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_ancestor_lookup,
    bench_abla_lookahead,
    bench_lock,
    bench_activate_chain,
);
criterion_main!(benches);
