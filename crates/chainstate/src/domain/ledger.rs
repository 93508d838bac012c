//! # Ledger View
//!
//! The unspent-output set, plus a write-buffering cache layered on top of
//! it. Connecting or disconnecting a block works entirely inside a
//! [`CoinsViewCache`]; its [`ChangeSet`] is applied to the base view only
//! once the whole block succeeded, so a failed block leaves no trace.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use shared_types::{Block, Coin, Hash, OutPoint, Transaction, TxOut};
use tracing::{debug, warn};

use super::error::{ChainstateError, ChainstateResult, RejectReason};

/// Outcome of rolling back a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectResult {
    /// Rolled back cleanly.
    Ok,
    /// Rolled back, but the ledger did not match the undo data.
    Unclean,
    /// Rollback could not complete.
    Failed,
}

/// The unspent-output set as of `best_block`.
///
/// Ordered so that serialized snapshots are byte-for-byte reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinsView {
    coins: BTreeMap<OutPoint, Coin>,
    best_block: Hash,
}

impl CoinsView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_coin(&self, outpoint: &OutPoint) -> Option<&Coin> {
        self.coins.get(outpoint)
    }

    pub fn have_coin(&self, outpoint: &OutPoint) -> bool {
        self.coins.contains_key(outpoint)
    }

    pub fn best_block(&self) -> Hash {
        self.best_block
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &Coin)> {
        self.coins.iter()
    }

    /// Apply a buffered change set.
    pub fn apply(&mut self, changes: ChangeSet) {
        for (outpoint, coin) in changes.coins {
            match coin {
                Some(coin) => {
                    self.coins.insert(outpoint, coin);
                }
                None => {
                    self.coins.remove(&outpoint);
                }
            }
        }
        if let Some(best) = changes.best_block {
            self.best_block = best;
        }
    }

    /// Deterministic serialized form of the whole view.
    pub fn snapshot(&self) -> ChainstateResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ChainstateError::Storage(e.to_string()))
    }
}

/// Buffered modifications to a [`CoinsView`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// `None` marks a spent output.
    pub coins: BTreeMap<OutPoint, Option<Coin>>,
    pub best_block: Option<Hash>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.coins.is_empty() && self.best_block.is_none()
    }
}

/// Read-through, write-buffering view over a base [`CoinsView`].
#[derive(Debug)]
pub struct CoinsViewCache<'a> {
    base: &'a CoinsView,
    changes: ChangeSet,
}

impl<'a> CoinsViewCache<'a> {
    pub fn new(base: &'a CoinsView) -> Self {
        Self {
            base,
            changes: ChangeSet::default(),
        }
    }

    pub fn get_coin(&self, outpoint: &OutPoint) -> Option<&Coin> {
        match self.changes.coins.get(outpoint) {
            Some(entry) => entry.as_ref(),
            None => self.base.get_coin(outpoint),
        }
    }

    pub fn have_coin(&self, outpoint: &OutPoint) -> bool {
        self.get_coin(outpoint).is_some()
    }

    /// Add an unspent output. Without `overwrite`, an existing unspent
    /// output at the same outpoint is an error.
    pub fn add_coin(
        &mut self,
        outpoint: OutPoint,
        coin: Coin,
        overwrite: bool,
    ) -> Result<(), RejectReason> {
        if !overwrite && self.have_coin(&outpoint) {
            return Err(RejectReason::DuplicateOutput);
        }
        self.changes.coins.insert(outpoint, Some(coin));
        Ok(())
    }

    /// Spend an output, returning it if it was unspent.
    pub fn spend_coin(&mut self, outpoint: &OutPoint) -> Option<Coin> {
        let coin = self.get_coin(outpoint).cloned()?;
        self.changes.coins.insert(*outpoint, None);
        Some(coin)
    }

    pub fn best_block(&self) -> Hash {
        self.changes.best_block.unwrap_or_else(|| self.base.best_block())
    }

    pub fn set_best_block(&mut self, hash: Hash) {
        self.changes.best_block = Some(hash);
    }

    /// Consume the cache, yielding the buffered changes.
    pub fn into_changes(self) -> ChangeSet {
        self.changes
    }
}

/// Reversal data for one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxUndo {
    /// Outputs the transaction created.
    pub created: Vec<(OutPoint, TxOut)>,
    /// Outputs the transaction spent, with their full coin records.
    pub spent: Vec<(OutPoint, Coin)>,
}

/// Reversal data for one block, one [`TxUndo`] per transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockUndo {
    pub txs: Vec<TxUndo>,
}

/// Consumed and produced outputs reported by the ledger oracle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxEffects {
    pub spent: Vec<OutPoint>,
    pub created: Vec<(OutPoint, TxOut)>,
}

impl TxEffects {
    /// Effects of a transaction that spends all its inputs and creates all
    /// its outputs.
    pub fn from_transaction(tx: &Transaction) -> Self {
        let txid = tx.txid();
        let spent = if tx.is_coinbase() {
            Vec::new()
        } else {
            tx.inputs.iter().map(|i| i.prevout).collect()
        };
        let created = tx
            .outputs
            .iter()
            .enumerate()
            .map(|(n, out)| (OutPoint::new(txid, n as u32), out.clone()))
            .collect();
        Self { spent, created }
    }
}

/// Apply one transaction's effects to `cache`, returning its undo record.
pub fn apply_tx_effects(
    cache: &mut CoinsViewCache<'_>,
    tx: &Transaction,
    effects: TxEffects,
    height: u64,
) -> Result<TxUndo, RejectReason> {
    let mut undo = TxUndo::default();
    for outpoint in effects.spent {
        let coin = cache
            .spend_coin(&outpoint)
            .ok_or(RejectReason::MissingInputs)?;
        undo.spent.push((outpoint, coin));
    }

    let is_coinbase = tx.is_coinbase();
    for (outpoint, output) in effects.created {
        let coin = Coin {
            output: output.clone(),
            height,
            is_coinbase,
        };
        cache.add_coin(outpoint, coin, false)?;
        undo.created.push((outpoint, output));
    }
    Ok(undo)
}

/// Roll back `block` inside `cache` using `undo`.
///
/// Transactions are reverted last to first. Outputs the block created are
/// removed and outputs it spent are restored. Mismatches between the ledger
/// and the undo data make the result `Unclean`; a structurally unusable undo
/// record makes it `Failed`.
pub fn disconnect_block(
    block: &Block,
    undo: &BlockUndo,
    cache: &mut CoinsViewCache<'_>,
) -> DisconnectResult {
    if undo.txs.len() != block.transactions.len() {
        warn!(
            expected = block.transactions.len(),
            found = undo.txs.len(),
            "undo data does not match block transaction count"
        );
        return DisconnectResult::Failed;
    }

    let mut clean = true;
    for (tx, tx_undo) in block.transactions.iter().zip(&undo.txs).rev() {
        let txid = tx.txid();
        for (outpoint, output) in tx_undo.created.iter().rev() {
            if outpoint.txid != txid {
                return DisconnectResult::Failed;
            }
            match cache.spend_coin(outpoint) {
                Some(coin) if coin.output == *output => {}
                Some(_) => {
                    debug!(index = outpoint.index, "created output differs from undo data");
                    clean = false;
                }
                None => {
                    debug!(index = outpoint.index, "created output already missing");
                    clean = false;
                }
            }
        }

        for (outpoint, coin) in tx_undo.spent.iter().rev() {
            if cache.have_coin(outpoint) {
                clean = false;
            }
            if cache.add_coin(*outpoint, coin.clone(), true).is_err() {
                return DisconnectResult::Failed;
            }
        }
    }

    cache.set_best_block(block.header.parent_hash);
    if clean {
        DisconnectResult::Ok
    } else {
        DisconnectResult::Unclean
    }
}
