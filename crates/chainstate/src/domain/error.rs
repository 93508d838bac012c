//! Error types for the chain-state core

use shared_types::{short_hash, Hash};

/// Why a block was rejected on consensus grounds.
///
/// A rejected block is marked invalid and its descendants are marked as
/// having a failed ancestor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("transaction rejected by ledger oracle: {0}")]
    OracleRejected(String),

    #[error("transaction spends missing or already spent inputs")]
    MissingInputs,

    #[error("transaction overwrites an unspent output")]
    DuplicateOutput,

    #[error("block size {size} exceeds limit {limit}")]
    BlockTooLarge { size: u64, limit: u64 },

    #[error("adaptive block size state is invalid")]
    InvalidAdaptiveLimitState,

    #[error("ancestor block is invalid")]
    BadPrevBlock,

    #[error("block forks below the finalized block")]
    Finalized,

    #[error("merkle root does not match transactions")]
    BadMerkleRoot,

    #[error("first transaction is not a coinbase, or a later one is")]
    BadCoinbase,

    #[error("proof of work does not satisfy the target")]
    HighHash,

    #[error("block timestamp {time} is not after median time past {mtp}")]
    TimeTooOld { time: u64, mtp: u64 },

    #[error("marked invalid by operator")]
    Operator,
}

impl RejectReason {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::OracleRejected(_) => "oracle",
            Self::MissingInputs => "missing_inputs",
            Self::DuplicateOutput => "duplicate_output",
            Self::BlockTooLarge { .. } => "too_large",
            Self::InvalidAdaptiveLimitState => "abla_state",
            Self::BadPrevBlock => "bad_prev",
            Self::Finalized => "finalized",
            Self::BadMerkleRoot => "merkle_root",
            Self::BadCoinbase => "coinbase",
            Self::HighHash => "high_hash",
            Self::TimeTooOld { .. } => "time_too_old",
            Self::Operator => "operator",
        }
    }
}

/// Chain-state error types
#[derive(Debug, thiserror::Error)]
pub enum ChainstateError {
    #[error("orphan header {}: parent {} is unknown", short_hash(.hash), short_hash(.parent))]
    OrphanHeader { hash: Hash, parent: Hash },

    #[error("a genesis header is already indexed")]
    DuplicateGenesis,

    #[error("genesis {} does not match the network genesis", short_hash(.0))]
    UnexpectedGenesis(Hash),

    #[error("the genesis block cannot be invalidated")]
    InvalidateGenesis,

    #[error("unknown block: {}", short_hash(.0))]
    UnknownBlock(Hash),

    #[error("block data not available: {}", short_hash(.0))]
    MissingBlockData(Hash),

    #[error("block {} does not extend the active tip", short_hash(.0))]
    NotOnActiveTip(Hash),

    #[error("undo data missing for block {}", short_hash(.0))]
    UndoDataMissing(Hash),

    #[error("failed to disconnect block {}", short_hash(.0))]
    DisconnectFailed(Hash),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid adaptive block size configuration: {0}")]
    InvalidAblaConfig(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("block {} rejected: {reason}", short_hash(.hash))]
    Rejected { hash: Hash, reason: RejectReason },
}

impl ChainstateError {
    /// The consensus rejection reason, if this error is one.
    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            Self::Rejected { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Result type for chain-state operations
pub type ChainstateResult<T> = Result<T, ChainstateError>;
