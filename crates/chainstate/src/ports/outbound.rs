//! Driven ports (Outbound dependencies)
//!
//! Script interpretation, block bodies and undo data live outside the
//! chain-state core. The service reaches them only through these traits.

use shared_types::{Block, Coin, Hash, Transaction};

use crate::domain::{BlockUndo, CoinsViewCache, RejectReason, ScriptFlags, TxEffects};

/// Context the ledger oracle needs to judge a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxContext {
    /// Hash of the block being connected.
    pub block_hash: Hash,
    /// Height of the block being connected.
    pub height: u64,
    /// Median-time-past of the parent block.
    pub median_time_past: u64,
    /// Script flags in force for this block.
    pub flags: ScriptFlags,
}

/// Ledger-effect oracle, consulted once per transaction while connecting.
pub trait LedgerOracle: Send + Sync {
    /// Outputs the transaction consumes and produces, or the reason it is
    /// invalid against `view`. Scripts are not checked here.
    fn evaluate(
        &self,
        tx: &Transaction,
        view: &CoinsViewCache<'_>,
        ctx: &TxContext,
    ) -> Result<TxEffects, RejectReason>;

    /// Check every input script of `tx`. `spent[i]` is the coin spent by
    /// input `i`.
    fn verify_scripts(
        &self,
        tx: &Transaction,
        spent: &[Coin],
        ctx: &TxContext,
    ) -> Result<(), RejectReason>;
}

/// Pass/fail script check for a single input.
pub trait ScriptVerifier: Send + Sync {
    fn verify_input(
        &self,
        tx: &Transaction,
        input_index: usize,
        spent: &Coin,
        flags: ScriptFlags,
    ) -> bool;
}

/// Block body storage.
pub trait BlockStore: Send + Sync {
    fn put_block(&self, block: Block) -> Result<(), String>;

    fn get_block(&self, hash: &Hash) -> Result<Option<Block>, String>;

    fn has_block(&self, hash: &Hash) -> bool;
}

/// Per-block undo data, keyed by block hash.
pub trait UndoStore: Send + Sync {
    fn put_undo(&self, hash: Hash, undo: BlockUndo) -> Result<(), String>;

    fn get_undo(&self, hash: &Hash) -> Result<Option<BlockUndo>, String>;

    fn remove_undo(&self, hash: &Hash) -> Result<(), String>;
}
