//! # Fixtures
//!
//! Regtest blocks are mined on the spot: the easiest target needs about two
//! attempts per block, [`HEAVY_BITS`] about five hundred.

use std::sync::Arc;

use chain_telemetry::{init_logging, TelemetryConfig};
use chainstate::adapters::{AcceptAllScripts, InMemoryBlockStore, InMemoryUndoStore, UtxoLedgerOracle};
use chainstate::{ChainstateConfig, ChainstateDependencies, ChainstateService, ConsensusParams};
use shared_types::pow::REGTEST_POW_LIMIT_BITS;
use shared_types::{Block, BlockHeader, Hash, OutPoint, Transaction, TxIn, TxOut, ZERO_HASH};

/// Service wired with in-memory stores and a ledger oracle that accepts
/// every script.
pub type TestChainstate =
    ChainstateService<UtxoLedgerOracle<AcceptAllScripts>, InMemoryBlockStore, InMemoryUndoStore>;

pub const GENESIS_TIME: u64 = 1_600_000_000;
pub const BLOCK_SPACING: u64 = 600;
/// Work 2 per block.
pub const LIGHT_BITS: u32 = REGTEST_POW_LIMIT_BITS;
/// Work 512 per block.
pub const HEAVY_BITS: u32 = 0x1f7f_ffff;

/// Install the subscriber once per test binary. `QC_LOG_LEVEL` raises
/// verbosity when a test needs diagnosing.
pub fn init_test_logging() {
    let config = TelemetryConfig {
        service_name: "chainstate-tests".to_string(),
        log_level: std::env::var("QC_LOG_LEVEL").unwrap_or_else(|_| "warn".to_string()),
        ..TelemetryConfig::default()
    };
    // Later calls find the subscriber already installed.
    let _ = init_logging(&config);
}

pub fn service(config: ChainstateConfig) -> TestChainstate {
    init_test_logging();
    ChainstateService::new(ChainstateDependencies {
        oracle: Arc::new(UtxoLedgerOracle::new(AcceptAllScripts)),
        blocks: Arc::new(InMemoryBlockStore::new()),
        undo: Arc::new(InMemoryUndoStore::new()),
        config,
    })
    .expect("valid test configuration")
}

pub fn regtest_service() -> TestChainstate {
    service(ChainstateConfig::default())
}

/// Coinbase paying 50 to `[tag]`. Height and tag keep txids unique across
/// branches.
pub fn coinbase(height: u64, tag: u8) -> Transaction {
    let mut script_sig = height.to_le_bytes().to_vec();
    script_sig.push(tag);
    Transaction {
        version: 1,
        inputs: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig,
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value: 50,
            script_pubkey: vec![tag],
        }],
        lock_time: 0,
    }
}

pub fn spend(prevout: OutPoint, value: u64) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxIn {
            prevout,
            script_sig: Vec::new(),
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value,
            script_pubkey: vec![0xAC],
        }],
        lock_time: 0,
    }
}

/// Fill in the merkle root and grind the nonce until the header meets its
/// own target.
pub fn mine(parent: Hash, timestamp: u64, bits: u32, transactions: Vec<Transaction>) -> Block {
    let mut block = Block {
        header: BlockHeader {
            version: 1,
            parent_hash: parent,
            merkle_root: ZERO_HASH,
            timestamp,
            bits,
            nonce: 0,
        },
        transactions,
    };
    block.header.merkle_root = block.compute_merkle_root();
    let limit = ConsensusParams::regtest().pow_limit;
    while !block.header.check_proof_of_work(&limit) {
        block.header.nonce = block.header.nonce.wrapping_add(1);
    }
    block
}

pub fn genesis() -> Block {
    mine(ZERO_HASH, GENESIS_TIME, LIGHT_BITS, vec![coinbase(0, 0)])
}

/// Extends a chain one mined block at a time.
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    tip: Block,
    height: u64,
    tag: u8,
    bits: u32,
}

impl ChainBuilder {
    /// Builder whose next block is the child of `tip` at `height + 1`.
    pub fn on(tip: &Block, height: u64) -> Self {
        Self {
            tip: tip.clone(),
            height,
            tag: 1,
            bits: LIGHT_BITS,
        }
    }

    pub fn tag(mut self, tag: u8) -> Self {
        self.tag = tag;
        self
    }

    pub fn bits(mut self, bits: u32) -> Self {
        self.bits = bits;
        self
    }

    pub fn tip(&self) -> &Block {
        &self.tip
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    /// Mine the next block with the coinbase followed by `extra`.
    pub fn mine_with(&mut self, extra: Vec<Transaction>) -> Block {
        let height = self.height + 1;
        let mut transactions = vec![coinbase(height, self.tag)];
        transactions.extend(extra);
        let block = mine(
            self.tip.hash(),
            self.tip.header.timestamp + BLOCK_SPACING,
            self.bits,
            transactions,
        );
        self.tip = block.clone();
        self.height = height;
        block
    }

    pub fn mine_next(&mut self) -> Block {
        self.mine_with(Vec::new())
    }

    pub fn take(&mut self, count: usize) -> Vec<Block> {
        (0..count).map(|_| self.mine_next()).collect()
    }
}

/// Feed every block into `chainstate`, panicking on any rejection.
pub fn submit_all(chainstate: &TestChainstate, blocks: &[Block]) {
    use chainstate::ChainstateApi;
    for block in blocks {
        chainstate
            .accept_block(block.clone())
            .expect("fixture block accepted");
    }
}
