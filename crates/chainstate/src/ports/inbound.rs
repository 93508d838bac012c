//! Driving ports (Inbound API)
//!
//! The operations external layers (relay, mining, RPC) use to feed and query
//! the chain-state core. Every method takes the chain-state lock itself.

use primitive_types::U256;
use shared_types::{Block, BlockHeader, Coin, Hash, OutPoint};

use crate::domain::{BlockStatus, BlockValidity, ChainstateResult, RejectReason, ScriptFlags, Upgrade};

/// Snapshot of one block-index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSummary {
    pub hash: Hash,
    pub height: u64,
    pub chain_work: U256,
    pub status: BlockStatus,
}

/// What one `activate_best_chain` run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    /// Active tip after the run.
    pub tip: Option<Hash>,
    /// Blocks connected, in connection order.
    pub connected: Vec<Hash>,
    /// Blocks disconnected, in disconnection order.
    pub disconnected: Vec<Hash>,
    /// Blocks rejected during the run, with their reasons.
    pub rejected: Vec<(Hash, RejectReason)>,
}

impl ActivateReport {
    /// True when the run left the active chain untouched.
    pub fn is_noop(&self) -> bool {
        self.connected.is_empty() && self.disconnected.is_empty() && self.rejected.is_empty()
    }
}

/// Primary chain-state API
pub trait ChainstateApi: Send + Sync {
    /// Index a header. Returns its hash.
    ///
    /// A header whose parent is unknown is kept provisionally and
    /// `OrphanHeader` is returned.
    fn accept_header(&self, header: BlockHeader) -> ChainstateResult<Hash>;

    /// Index a block header and store its body.
    fn accept_block(&self, block: Block) -> ChainstateResult<Hash>;

    /// Move the active chain to the best valid candidate.
    fn activate_best_chain(&self) -> ChainstateResult<ActivateReport>;

    /// Operator invalidation of a block and all its descendants.
    fn invalidate_block(&self, hash: &Hash) -> ChainstateResult<ActivateReport>;

    /// Clear invalidity from a block, its descendants and its ancestors.
    fn reconsider_block(&self, hash: &Hash) -> ChainstateResult<ActivateReport>;

    fn active_tip(&self) -> Option<BlockSummary>;

    /// Best entry whose validity is at least `min`.
    fn best_tip(&self, min: BlockValidity) -> Option<BlockSummary>;

    fn block_status(&self, hash: &Hash) -> Option<BlockStatus>;

    fn block_summary(&self, hash: &Hash) -> Option<BlockSummary>;

    /// Block size limit for a child of `tip`.
    fn next_block_size_limit(&self, tip: &Hash) -> ChainstateResult<u64>;

    /// Limit after `blocks_ahead` full blocks on top of `tip`.
    fn lookahead_block_size_limit(&self, tip: &Hash, blocks_ahead: u64) -> ChainstateResult<u64>;

    /// Whether `upgrade` applies to blocks built on `tip`.
    fn is_rule_active(&self, upgrade: Upgrade, tip: &Hash) -> ChainstateResult<bool>;

    /// Height of the first block at which `upgrade` held, on the chain
    /// ending at `tip`.
    fn activation_height(&self, upgrade: Upgrade, tip: &Hash) -> ChainstateResult<Option<u64>>;

    /// Script flags for the block `hash`.
    fn block_script_flags(&self, hash: &Hash) -> ChainstateResult<ScriptFlags>;

    fn is_block_finalized(&self, hash: &Hash) -> bool;

    fn coin(&self, outpoint: &OutPoint) -> Option<Coin>;
}
