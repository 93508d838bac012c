//! # Core Domain Entities
//!
//! Defines the chain entities shared by the chain-state crates.
//!
//! ## Clusters
//!
//! - **Chain**: `BlockHeader`, `Block`
//! - **Ledger**: `Transaction`, `TxIn`, `TxOut`, `OutPoint`, `Coin`
//!
//! Hashes are double SHA-256 over a fixed little-endian wire layout, so the
//! same header or transaction always hashes identically on every node.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::pow;

// Re-export U256 from primitive-types for use across all crates
pub use primitive_types::U256;

// =============================================================================
// CLUSTER A: THE CHAIN
// =============================================================================

/// A 32-byte hash (double SHA-256).
pub type Hash = [u8; 32];

/// The all-zero hash. Used as the parent of the genesis block and as the
/// txid of the null outpoint.
pub const ZERO_HASH: Hash = [0u8; 32];

/// Size in bytes of an encoded block header.
pub const HEADER_SIZE: usize = 84;

/// Compute SHA-256(SHA-256(data)).
pub fn double_sha256(data: &[u8]) -> Hash {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// Render the first bytes of a hash for log lines.
pub fn short_hash(hash: &Hash) -> String {
    hex::encode(&hash[..6])
}

/// The header of a proof-of-work block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockHeader {
    /// Block version field.
    pub version: i32,
    /// Hash of the parent block (creates the chain linkage).
    pub parent_hash: Hash,
    /// Merkle root of all transaction ids in the block.
    pub merkle_root: Hash,
    /// Unix timestamp claimed by the miner.
    pub timestamp: u64,
    /// Compact encoding of the proof-of-work target.
    pub bits: u32,
    /// Miner nonce.
    pub nonce: u32,
}

impl BlockHeader {
    /// Encode the header into its fixed 84-byte wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.parent_hash);
        out.extend_from_slice(&self.merkle_root);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.bits.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Compute the block hash.
    pub fn hash(&self) -> Hash {
        double_sha256(&self.encode())
    }

    /// A header with an all-zero parent hash claims to be a genesis header.
    pub fn is_genesis(&self) -> bool {
        self.parent_hash == ZERO_HASH
    }

    /// Expected number of hashes needed to produce this header.
    pub fn work(&self) -> U256 {
        pow::block_proof(self.bits)
    }

    /// Check that the header hash satisfies its own target and that the
    /// target is no easier than `pow_limit`.
    pub fn check_proof_of_work(&self, pow_limit: &U256) -> bool {
        pow::check_proof_of_work(&self.hash(), self.bits, pow_limit)
    }
}

/// A full block: header plus transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Get the hash of this block.
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Serialized size of the block in bytes. This is the size governed by
    /// the block-size limit.
    pub fn serialized_size(&self) -> u64 {
        let body: usize = self
            .transactions
            .iter()
            .map(Transaction::serialized_size)
            .sum();
        (HEADER_SIZE + compact_size_len(self.transactions.len() as u64) + body) as u64
    }

    /// Merkle root over the transaction ids, Bitcoin style: odd levels
    /// duplicate their last node.
    pub fn compute_merkle_root(&self) -> Hash {
        let mut level: Vec<Hash> = self.transactions.iter().map(Transaction::txid).collect();
        if level.is_empty() {
            return ZERO_HASH;
        }
        while level.len() > 1 {
            if level.len() % 2 == 1 {
                if let Some(last) = level.last().copied() {
                    level.push(last);
                }
            }
            level = level
                .chunks(2)
                .map(|pair| {
                    let mut buf = [0u8; 64];
                    buf[..32].copy_from_slice(&pair[0]);
                    buf[32..].copy_from_slice(&pair[1]);
                    double_sha256(&buf)
                })
                .collect();
        }
        level[0]
    }
}

// =============================================================================
// CLUSTER B: THE LEDGER
// =============================================================================

/// Reference to a specific output of a transaction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct OutPoint {
    pub txid: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: Hash, index: u32) -> Self {
        Self { txid, index }
    }

    /// The outpoint referenced by a coinbase input.
    pub fn null() -> Self {
        Self {
            txid: ZERO_HASH,
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid == ZERO_HASH && self.index == u32::MAX
    }
}

/// A transaction input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TxOut {
    /// Amount in base units.
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

/// A ledger transaction spending outputs and creating new ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    /// Encode the transaction into its wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size());
        out.extend_from_slice(&self.version.to_le_bytes());
        write_compact_size(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            out.extend_from_slice(&input.prevout.txid);
            out.extend_from_slice(&input.prevout.index.to_le_bytes());
            write_compact_size(&mut out, input.script_sig.len() as u64);
            out.extend_from_slice(&input.script_sig);
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_compact_size(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            write_compact_size(&mut out, output.script_pubkey.len() as u64);
            out.extend_from_slice(&output.script_pubkey);
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out
    }

    /// Serialized size in bytes, equal to `encode().len()`.
    pub fn serialized_size(&self) -> usize {
        let inputs: usize = self
            .inputs
            .iter()
            .map(|i| 36 + compact_size_len(i.script_sig.len() as u64) + i.script_sig.len() + 4)
            .sum();
        let outputs: usize = self
            .outputs
            .iter()
            .map(|o| 8 + compact_size_len(o.script_pubkey.len() as u64) + o.script_pubkey.len())
            .sum();
        4 + compact_size_len(self.inputs.len() as u64)
            + inputs
            + compact_size_len(self.outputs.len() as u64)
            + outputs
            + 4
    }

    /// Compute the transaction id.
    pub fn txid(&self) -> Hash {
        double_sha256(&self.encode())
    }

    /// A coinbase has exactly one input, spending the null outpoint.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// Sum of all output values, `None` on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.value))
    }
}

/// An unspent output as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub output: TxOut,
    /// Height of the block that created this output.
    pub height: u64,
    pub is_coinbase: bool,
}

// =============================================================================
// WIRE HELPERS
// =============================================================================

fn compact_size_len(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

fn write_compact_size(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}
