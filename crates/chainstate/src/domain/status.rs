//! Validation status of block-index entries.

use serde::{Deserialize, Serialize};

/// How far validation of an entry has progressed.
///
/// Levels only move forward. Failure is tracked separately in
/// [`BlockStatus::failure`] so a level is never lost when an entry fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BlockValidity {
    /// Seen, nothing checked yet.
    Unknown = 0,
    /// Header passed context-free checks (proof of work).
    HeaderValid = 1,
    /// Parent known and valid up to tree level, timestamp and height consistent.
    TreeValid = 2,
    /// Block data available and passed context-free block checks.
    TransactionsValid = 3,
    /// Ledger effects applied without missing inputs or duplicate outputs.
    ChainValid = 4,
    /// Scripts verified. Fully connected at least once.
    ScriptsValid = 5,
}

/// Terminal failure marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockFailure {
    /// This entry itself failed validation.
    Invalid,
    /// Some ancestor failed validation.
    FailedAncestor,
}

/// Validity level plus an optional failure mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockStatus {
    pub validity: BlockValidity,
    pub failure: Option<BlockFailure>,
}

impl Default for BlockStatus {
    fn default() -> Self {
        Self {
            validity: BlockValidity::Unknown,
            failure: None,
        }
    }
}

impl BlockStatus {
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// True when the entry has reached `min` and is not failed.
    pub fn is_valid(&self, min: BlockValidity) -> bool {
        !self.is_failed() && self.validity >= min
    }

    /// Raise the validity level. Returns `true` if it changed.
    ///
    /// Failed entries and lower levels are ignored.
    pub fn raise_validity(&mut self, level: BlockValidity) -> bool {
        if self.is_failed() || level <= self.validity {
            return false;
        }
        self.validity = level;
        true
    }

    pub fn mark_invalid(&mut self) {
        self.failure = Some(BlockFailure::Invalid);
    }

    /// Mark as descending from an invalid entry, unless already invalid itself.
    pub fn mark_failed_ancestor(&mut self) {
        if self.failure.is_none() {
            self.failure = Some(BlockFailure::FailedAncestor);
        }
    }

    pub fn clear_failure(&mut self) {
        self.failure = None;
    }
}
