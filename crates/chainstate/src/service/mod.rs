//! Chain-State Service - connection pipeline and boundary queries
//!
//! # Architecture
//! - One [`ChainState`] context (index, active chain, ledger, finalization
//!   point) behind the reentrant `cs_main` lock
//! - Mutations take `cs_main` exclusively, one indivisible step at a time
//! - Queries take `cs_main` shared and may run concurrently
//!
//! # Pipeline
//!
//! ```text
//! accept_header ──→ HEADER_VALID ──→ TREE_VALID
//! accept_block  ──→ TRANSACTIONS_VALID
//! activate_best_chain:
//!     while best candidate != active tip:
//!         tip not an ancestor of candidate → disconnect tip
//!         otherwise                        → connect next block toward candidate
//! connect success ──→ SCRIPTS_VALID
//! connect failure ──→ INVALID (descendants FAILED_ANCESTOR)
//! ```
//!
//! Every connect and disconnect runs inside a ledger cache whose changes are
//! applied only when the whole block succeeded.

use std::collections::HashMap;
use std::sync::Arc;

use chain_telemetry::{log_block_event, log_event, subsystem_span};
use parking_lot::RwLock;
use shared_lock::RecursiveSharedMutex;
use shared_types::{short_hash, Block, BlockHeader, Coin, Hash, OutPoint};
use tracing::{debug, error, info, warn};

use crate::domain::{
    apply_tx_effects, block_script_flags, disconnect_block, AblaState, ActivationPredicate,
    ActivationTracker, ActiveChain, BlockIndex, BlockStatus, BlockUndo, BlockValidity, ChangeSet,
    ChainstateConfig, ChainstateError, ChainstateResult, CoinsView, CoinsViewCache,
    ConsensusParams, DisconnectResult, EntryId, RejectReason, ScriptFlags, Upgrade,
};
use crate::metrics;
use crate::ports::{
    ActivateReport, BlockStore, BlockSummary, ChainstateApi, LedgerOracle, TxContext, UndoStore,
};

const SUBSYSTEM: &str = "chainstate";

/// Everything `cs_main` protects.
#[derive(Debug, Default)]
struct ChainState {
    index: BlockIndex,
    active: ActiveChain,
    ledger: CoinsView,
    /// Deepest block that can no longer be reorganized away.
    finalized: Option<EntryId>,
    /// Why each invalid entry was rejected.
    rejections: HashMap<EntryId, RejectReason>,
}

/// What the ledger stage of a connect produces.
struct ConnectChecks {
    changes: ChangeSet,
    undo: BlockUndo,
    /// Adaptive limit state to store on the entry.
    abla: Option<AblaState>,
    ctx: TxContext,
}

/// Dependencies for ChainstateService
pub struct ChainstateDependencies<O, B, U> {
    pub oracle: Arc<O>,
    pub blocks: Arc<B>,
    pub undo: Arc<U>,
    pub config: ChainstateConfig,
}

/// Chain-State Service
pub struct ChainstateService<O, B, U>
where
    O: LedgerOracle,
    B: BlockStore,
    U: UndoStore,
{
    oracle: Arc<O>,
    blocks: Arc<B>,
    undo: Arc<U>,
    cs_main: RecursiveSharedMutex,
    state: RwLock<ChainState>,
    params: ConsensusParams,
    config: ChainstateConfig,
    /// One tracker per upgrade, indexed by `Upgrade as usize`.
    trackers: [ActivationTracker<Upgrade>; Upgrade::ALL.len()],
}

impl<O, B, U> ChainstateService<O, B, U>
where
    O: LedgerOracle,
    B: BlockStore,
    U: UndoStore,
{
    /// Create a service with an empty index.
    ///
    /// Fails if the configuration, including the adaptive limit parameters,
    /// does not validate.
    pub fn new(deps: ChainstateDependencies<O, B, U>) -> ChainstateResult<Self> {
        let params = deps.config.into_params()?;
        info!(
            network = params.network.name(),
            max_reorg_depth = deps.config.max_reorg_depth,
            finalization = deps.config.finalization_enabled,
            "chain-state service created"
        );
        Ok(Self {
            oracle: deps.oracle,
            blocks: deps.blocks,
            undo: deps.undo,
            cs_main: RecursiveSharedMutex::new(),
            state: RwLock::new(ChainState::default()),
            params,
            config: deps.config,
            trackers: Upgrade::ALL.map(ActivationTracker::new),
        })
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn config(&self) -> &ChainstateConfig {
        &self.config
    }

    /// The lock guarding all chain state.
    ///
    /// Callers may hold it across several queries to observe one consistent
    /// state; every method re-enters it.
    pub fn cs_main(&self) -> &RecursiveSharedMutex {
        &self.cs_main
    }

    fn tracker(&self, upgrade: Upgrade) -> &ActivationTracker<Upgrade> {
        &self.trackers[upgrade as usize]
    }

    fn with_read<R>(&self, f: impl FnOnce(&ChainState) -> R) -> R {
        let _guard = self.cs_main.read();
        let state = self.state.read();
        f(&state)
    }

    fn with_write<R>(&self, f: impl FnOnce(&mut ChainState) -> R) -> R {
        let _guard = self.cs_main.write();
        let mut state = self.state.write();
        f(&mut state)
    }

    fn lookup(state: &ChainState, hash: &Hash) -> ChainstateResult<EntryId> {
        state
            .index
            .lookup(hash)
            .ok_or(ChainstateError::UnknownBlock(*hash))
    }

    fn summary(state: &ChainState, id: EntryId) -> BlockSummary {
        let entry = state.index.get(id);
        BlockSummary {
            hash: entry.hash,
            height: entry.height,
            chain_work: entry.chain_work,
            status: entry.status,
        }
    }

    // === HEADERS AND BLOCKS ===

    fn accept_header_locked(
        &self,
        state: &mut ChainState,
        header: BlockHeader,
    ) -> ChainstateResult<EntryId> {
        let hash = header.hash();
        if let Some(id) = state.index.lookup(&hash) {
            let entry = state.index.get(id);
            if entry.linked {
                return Ok(id);
            }
            return Err(ChainstateError::OrphanHeader {
                hash,
                parent: entry.header.parent_hash,
            });
        }

        // Headers without valid work are never indexed.
        if !header.check_proof_of_work(&self.params.pow_limit) {
            metrics::record_block_rejected(RejectReason::HighHash.label());
            return Err(ChainstateError::Rejected {
                hash,
                reason: RejectReason::HighHash,
            });
        }
        if header.is_genesis() && self.params.genesis_hash.is_some_and(|g| g != hash) {
            return Err(ChainstateError::UnexpectedGenesis(hash));
        }

        match state.index.insert(header) {
            Ok(id) => {
                state.index.get_mut(id).status.raise_validity(BlockValidity::HeaderValid);
                match self.promote_linked(state, id) {
                    Some(reason) => Err(ChainstateError::Rejected { hash, reason }),
                    None => Ok(id),
                }
            }
            Err(ChainstateError::OrphanHeader { hash, parent }) => {
                if let Some(id) = state.index.lookup(&hash) {
                    state.index.get_mut(id).status.raise_validity(BlockValidity::HeaderValid);
                }
                debug!(
                    hash = %short_hash(&hash),
                    parent = %short_hash(&parent),
                    "header stored unlinked until its parent arrives"
                );
                Err(ChainstateError::OrphanHeader { hash, parent })
            }
            Err(e) => Err(e),
        }
    }

    /// Run tree-level checks on `root` and every descendant that has not
    /// passed them yet. Returns the rejection of `root`, if any.
    fn promote_linked(&self, state: &mut ChainState, root: EntryId) -> Option<RejectReason> {
        let mut root_reason = None;
        let mut pending = vec![root];
        pending.extend(state.index.descendants(root));

        for id in pending {
            let entry = state.index.get(id);
            if entry.status.is_failed() || entry.status.validity >= BlockValidity::TreeValid {
                continue;
            }
            let (time, parent) = (entry.time(), entry.parent);

            if let Some(parent) = parent {
                if state.index.get(parent).status.is_failed() {
                    state.index.get_mut(id).status.mark_failed_ancestor();
                    if id == root {
                        root_reason = Some(RejectReason::BadPrevBlock);
                    }
                    continue;
                }
                let mtp = state.index.median_time_past(parent);
                if time <= mtp {
                    let reason = RejectReason::TimeTooOld { time, mtp };
                    self.reject(state, id, reason.clone());
                    if id == root {
                        root_reason = Some(reason);
                    }
                    continue;
                }
            }

            let status = &mut state.index.get_mut(id).status;
            status.raise_validity(BlockValidity::HeaderValid);
            status.raise_validity(BlockValidity::TreeValid);
        }
        root_reason
    }

    fn accept_block_locked(&self, state: &mut ChainState, block: Block) -> ChainstateResult<EntryId> {
        let hash = block.hash();
        let id = self.accept_header_locked(state, block.header.clone())?;

        let entry = state.index.get(id);
        if let Some(reason) = Self::failure_reason(state, id) {
            return Err(ChainstateError::Rejected { hash, reason });
        }
        if entry.has_data {
            return Ok(id);
        }

        // A body that does not match its header says nothing about the header.
        if block.compute_merkle_root() != block.header.merkle_root {
            metrics::record_block_rejected(RejectReason::BadMerkleRoot.label());
            return Err(ChainstateError::Rejected {
                hash,
                reason: RejectReason::BadMerkleRoot,
            });
        }
        if !has_valid_coinbase_layout(&block) {
            let reason = RejectReason::BadCoinbase;
            self.reject(state, id, reason.clone());
            return Err(ChainstateError::Rejected { hash, reason });
        }

        let size = block.serialized_size();
        let tx_count = block.transactions.len();
        // Rebuilds feed stored bodies back in.
        if !self.blocks.has_block(&hash) {
            self.blocks.put_block(block).map_err(ChainstateError::Storage)?;
        }
        state.index.set_have_data(id, size);
        let entry = state.index.get_mut(id);
        entry.status.raise_validity(BlockValidity::TransactionsValid);
        debug!(
            height = entry.height,
            hash = %short_hash(&hash),
            size,
            txs = tx_count,
            "block data stored"
        );
        Ok(id)
    }

    fn failure_reason(state: &ChainState, id: EntryId) -> Option<RejectReason> {
        let status = state.index.get(id).status;
        if !status.is_failed() {
            return None;
        }
        Some(
            state
                .rejections
                .get(&id)
                .cloned()
                .unwrap_or(RejectReason::BadPrevBlock),
        )
    }

    /// Mark `id` invalid, infect its descendants and record why.
    fn reject(&self, state: &mut ChainState, id: EntryId, reason: RejectReason) {
        let infected = state.index.mark_invalid(id);
        let entry = state.index.get(id);
        metrics::record_block_rejected(reason.label());
        log_block_event!(
            warn,
            SUBSYSTEM,
            "block marked invalid",
            entry.height,
            short_hash(&entry.hash),
            reason = %reason,
            descendants = infected.len()
        );
        state.rejections.insert(id, reason);
    }

    // === ADAPTIVE LIMIT ===

    /// Adaptive limit state governing a child of `parent`, or `None` while
    /// the legacy fixed limit applies.
    fn child_abla_state(
        &self,
        index: &BlockIndex,
        parent: EntryId,
    ) -> Result<Option<AblaState>, RejectReason> {
        if !Upgrade::Upgrade10.is_active(&self.params, index, parent) {
            return Ok(None);
        }
        let config = &self.params.abla;
        let state = match index.get(parent).abla_state {
            Some(prev) => prev.next_block_state(config, prev.block_size),
            None if self
                .tracker(Upgrade::Upgrade10)
                .get_activation_entry(&self.params, index, parent)
                == parent =>
            {
                AblaState::new(config)
            }
            // Post-activation parent that was never connected.
            None => return Err(RejectReason::InvalidAdaptiveLimitState),
        };
        if !state.is_valid(config) {
            return Err(RejectReason::InvalidAdaptiveLimitState);
        }
        Ok(Some(state))
    }

    fn block_size_limit(&self, abla: Option<&AblaState>) -> u64 {
        match abla {
            Some(state) => state.block_size_limit(self.config.disable_2gb_cap),
            None => self.params.legacy_max_block_size,
        }
    }

    // === CONNECT / DISCONNECT ===

    /// Ledger stage of connecting `block` as the child of the active tip:
    /// size limit, spendable inputs and balanced values. Nothing is written.
    fn check_connect(
        &self,
        state: &ChainState,
        id: EntryId,
        block: &Block,
    ) -> Result<ConnectChecks, RejectReason> {
        let index = &state.index;
        let entry = index.get(id);
        let parent = entry.parent;

        let abla = match parent {
            Some(parent) => self.child_abla_state(index, parent)?,
            None => None,
        };
        let size = block.serialized_size();
        let limit = self.block_size_limit(abla.as_ref());
        if size > limit {
            return Err(RejectReason::BlockTooLarge { size, limit });
        }

        let ctx = TxContext {
            block_hash: entry.hash,
            height: entry.height,
            median_time_past: parent.map_or(0, |p| index.median_time_past(p)),
            flags: block_script_flags(&self.params, index, parent),
        };

        let mut cache = CoinsViewCache::new(&state.ledger);
        let mut undo = BlockUndo::default();
        for tx in &block.transactions {
            let effects = self.oracle.evaluate(tx, &cache, &ctx)?;
            undo.txs.push(apply_tx_effects(&mut cache, tx, effects, entry.height)?);
        }
        cache.set_best_block(entry.hash);

        Ok(ConnectChecks {
            changes: cache.into_changes(),
            undo,
            abla: abla.map(|s| s.with_block_size(size)),
            ctx,
        })
    }

    /// Script stage: every input of every non-coinbase transaction against
    /// the coin it spends, as recorded in `undo`.
    fn check_scripts(
        &self,
        block: &Block,
        undo: &BlockUndo,
        ctx: &TxContext,
    ) -> Result<(), RejectReason> {
        for (tx, tx_undo) in block.transactions.iter().zip(&undo.txs) {
            if tx.is_coinbase() {
                continue;
            }
            let spent = tx
                .inputs
                .iter()
                .map(|input| {
                    tx_undo
                        .spent
                        .iter()
                        .find(|(outpoint, _)| *outpoint == input.prevout)
                        .map(|(_, coin)| coin.clone())
                        .ok_or(RejectReason::MissingInputs)
                })
                .collect::<Result<Vec<_>, _>>()?;
            self.oracle.verify_scripts(tx, &spent, ctx)?;
        }
        Ok(())
    }

    /// Connect `id`, whose parent must be the active tip.
    ///
    /// The entry reaches `ChainValid` once its ledger effects check out and
    /// `ScriptsValid` once its scripts do.
    fn connect_locked(&self, state: &mut ChainState, id: EntryId) -> ChainstateResult<()> {
        let (hash, height, parent) = {
            let entry = state.index.get(id);
            (entry.hash, entry.height, entry.parent)
        };
        if parent != state.active.tip() {
            return Err(ChainstateError::NotOnActiveTip(hash));
        }
        let block = self
            .blocks
            .get_block(&hash)
            .map_err(ChainstateError::Storage)?
            .ok_or(ChainstateError::MissingBlockData(hash))?;

        let checked = self
            .check_connect(state, id, &block)
            .and_then(|checked| {
                state
                    .index
                    .get_mut(id)
                    .status
                    .raise_validity(BlockValidity::ChainValid);
                self.check_scripts(&block, &checked.undo, &checked.ctx)?;
                Ok(checked)
            });
        let ConnectChecks {
            changes, undo, abla, ..
        } = match checked {
            Ok(checked) => checked,
            Err(reason) => {
                self.reject(state, id, reason.clone());
                return Err(ChainstateError::Rejected { hash, reason });
            }
        };

        self.undo.put_undo(hash, undo).map_err(ChainstateError::Storage)?;
        state.ledger.apply(changes);
        let entry = state.index.get_mut(id);
        entry.status.raise_validity(BlockValidity::ScriptsValid);
        entry.abla_state = abla;
        state.active.push(id);
        self.update_finalization(state);

        metrics::record_block_connected();
        log_block_event!(
            info,
            SUBSYSTEM,
            "block connected",
            height,
            short_hash(&hash),
            txs = block.transactions.len(),
            limit = self.block_size_limit(abla.as_ref())
        );
        Ok(())
    }

    /// Disconnect `id`, which must be the active tip.
    fn disconnect_locked(
        &self,
        state: &mut ChainState,
        id: EntryId,
    ) -> ChainstateResult<DisconnectResult> {
        let (hash, height) = {
            let entry = state.index.get(id);
            (entry.hash, entry.height)
        };
        if state.active.tip() != Some(id) {
            return Err(ChainstateError::NotOnActiveTip(hash));
        }
        let block = self
            .blocks
            .get_block(&hash)
            .map_err(ChainstateError::Storage)?
            .ok_or(ChainstateError::MissingBlockData(hash))?;
        let undo = self
            .undo
            .get_undo(&hash)
            .map_err(ChainstateError::Storage)?
            .ok_or(ChainstateError::UndoDataMissing(hash))?;

        let mut cache = CoinsViewCache::new(&state.ledger);
        let result = disconnect_block(&block, &undo, &mut cache);
        match result {
            DisconnectResult::Failed => {
                error!(
                    subsystem = SUBSYSTEM,
                    block_height = height,
                    block_hash = %short_hash(&hash),
                    "disconnect failed, ledger left at the block; operator intervention required"
                );
                return Err(ChainstateError::DisconnectFailed(hash));
            }
            DisconnectResult::Unclean => {
                log_block_event!(
                    warn,
                    SUBSYSTEM,
                    "undo data inconsistent with ledger, rolled back best-effort",
                    height,
                    short_hash(&hash)
                );
            }
            DisconnectResult::Ok => {}
        }
        let changes = cache.into_changes();

        // Nothing after this point can fail.
        self.undo.remove_undo(&hash).map_err(ChainstateError::Storage)?;
        state.ledger.apply(changes);
        state.active.pop();

        metrics::record_block_disconnected();
        log_block_event!(info, SUBSYSTEM, "block disconnected", height, short_hash(&hash));
        Ok(result)
    }

    fn update_finalization(&self, state: &mut ChainState) {
        if !self.config.finalization_enabled {
            return;
        }
        let Some(target) = state
            .active
            .height()
            .and_then(|h| h.checked_sub(self.config.max_reorg_depth))
        else {
            return;
        };
        if let Some(current) = state.finalized {
            if state.index.get(current).height >= target {
                return;
            }
        }
        if let Some(id) = state.active.at(target) {
            state.finalized = Some(id);
            debug!(height = target, hash = %short_hash(&state.index.get(id).hash), "block finalized");
        }
    }

    // === CHAIN SELECTION ===

    /// Best entry that could become the active tip: body available for it
    /// and all ancestors, transactions checked, nothing failed.
    fn find_candidate(index: &BlockIndex) -> Option<EntryId> {
        index.best_tip_where(|e| {
            e.chain_data_complete && e.status.is_valid(BlockValidity::TransactionsValid)
        })
    }

    /// One indivisible step toward the best candidate. Returns `false` once
    /// the active tip is the best candidate.
    fn activation_step(
        &self,
        state: &mut ChainState,
        report: &mut ActivateReport,
    ) -> ChainstateResult<bool> {
        let Some(candidate) = Self::find_candidate(&state.index) else {
            return Ok(false);
        };
        let tip = state.active.tip();
        if tip == Some(candidate) {
            return Ok(false);
        }

        if let Some(finalized) = state.finalized {
            if !state.index.is_ancestor(finalized, candidate) {
                let Some(fork) = state.index.common_ancestor(finalized, candidate) else {
                    return Ok(false);
                };
                let fork_height = state.index.get(fork).height;
                let Some(branch) = state.index.ancestor(candidate, fork_height + 1) else {
                    // The candidate sits below the finalized block.
                    return Ok(false);
                };
                let reason = RejectReason::Finalized;
                self.reject(state, branch, reason.clone());
                report.rejected.push((state.index.get(branch).hash, reason));
                return Ok(true);
            }
        }

        match tip {
            Some(tip) if !state.index.is_ancestor(tip, candidate) => {
                let hash = state.index.get(tip).hash;
                self.disconnect_locked(state, tip)?;
                report.disconnected.push(hash);
            }
            _ => {
                let next_height = tip.map_or(0, |t| state.index.get(t).height + 1);
                let Some(next) = state.index.ancestor(candidate, next_height) else {
                    return Ok(false);
                };
                match self.connect_locked(state, next) {
                    Ok(()) => report.connected.push(state.index.get(next).hash),
                    Err(ChainstateError::Rejected { hash, reason }) => {
                        report.rejected.push((hash, reason));
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(true)
    }

    fn finish_report(state: &ChainState, report: &mut ActivateReport) {
        report.tip = state.active.tip().map(|id| state.index.get(id).hash);
    }

    // === OPERATIONS OUTSIDE THE API TRAIT ===

    /// Connect a block whose parent is the active tip.
    pub fn connect_block(&self, hash: &Hash) -> ChainstateResult<()> {
        self.with_write(|state| -> ChainstateResult<()> {
            let id = Self::lookup(state, hash)?;
            self.connect_locked(state, id)
        })
    }

    /// Disconnect the active tip. `Failed` rollbacks surface as
    /// [`ChainstateError::DisconnectFailed`].
    ///
    /// The block stays a candidate, so the next `activate_best_chain` may
    /// reconnect it.
    pub fn disconnect_tip(&self) -> ChainstateResult<Option<DisconnectResult>> {
        self.with_write(|state| match state.active.tip() {
            Some(tip) => self.disconnect_locked(state, tip).map(Some),
            None => Ok(None),
        })
    }

    /// Adaptive limit state recorded when `hash` was connected.
    pub fn abla_state(&self, hash: &Hash) -> Option<AblaState> {
        self.with_read(|state| {
            let id = state.index.lookup(hash)?;
            state.index.get(id).abla_state
        })
    }

    pub fn finalized_block(&self) -> Option<BlockSummary> {
        self.with_read(|state| state.finalized.map(|id| Self::summary(state, id)))
    }

    /// Reason recorded when `hash` was marked invalid.
    pub fn rejection_reason(&self, hash: &Hash) -> Option<RejectReason> {
        self.with_read(|state| {
            let id = state.index.lookup(hash)?;
            Self::failure_reason(state, id)
        })
    }

    /// Hashes of the active chain from genesis to tip.
    pub fn active_chain(&self) -> Vec<Hash> {
        self.with_read(|state| {
            state
                .active
                .iter()
                .map(|id| state.index.get(id).hash)
                .collect()
        })
    }

    /// Whether `upgrade` applies to the block after the active-chain entry
    /// at `height`. `None` if the active chain is shorter.
    pub fn is_rule_active_at_height(&self, upgrade: Upgrade, height: u64) -> Option<bool> {
        self.with_read(|state| {
            let id = state.active.at(height)?;
            Some(upgrade.is_active(&self.params, &state.index, id))
        })
    }

    /// Serialized ledger view, byte-identical for identical ledgers.
    pub fn ledger_snapshot(&self) -> ChainstateResult<Vec<u8>> {
        self.with_read(|state| state.ledger.snapshot())
    }

    pub fn ledger_len(&self) -> usize {
        self.with_read(|state| state.ledger.len())
    }

    pub fn index_len(&self) -> usize {
        self.with_read(|state| state.index.len())
    }

    /// Drop all in-memory state and forget every activation cache.
    ///
    /// Stored blocks and undo records are left in place.
    pub fn reset(&self) {
        self.with_write(|state| {
            *state = ChainState::default();
            for tracker in &self.trackers {
                tracker.reset_cache();
            }
        });
        log_event!(info, SUBSYSTEM, "chain state cleared");
    }

    /// Rebuild from scratch: clear, re-index `headers` (parents first),
    /// attach stored bodies, then activate the best chain.
    pub fn rebuild<I>(&self, headers: I) -> ChainstateResult<ActivateReport>
    where
        I: IntoIterator<Item = BlockHeader>,
    {
        self.reset();
        self.with_write(|state| -> ChainstateResult<()> {
            for header in headers {
                let hash = header.hash();
                let outcome = match self.blocks.get_block(&hash).map_err(ChainstateError::Storage)? {
                    Some(block) => self.accept_block_locked(state, block),
                    None => self.accept_header_locked(state, header),
                };
                match outcome {
                    Ok(_) => {}
                    Err(
                        e @ (ChainstateError::Rejected { .. }
                        | ChainstateError::OrphanHeader { .. }),
                    ) => debug!(error = %e, "entry skipped during rebuild"),
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })?;
        self.activate_best_chain()
    }
}

impl<O, B, U> ChainstateApi for ChainstateService<O, B, U>
where
    O: LedgerOracle,
    B: BlockStore,
    U: UndoStore,
{
    fn accept_header(&self, header: BlockHeader) -> ChainstateResult<Hash> {
        self.with_write(|state| -> ChainstateResult<Hash> {
            let id = self.accept_header_locked(state, header)?;
            Ok(state.index.get(id).hash)
        })
    }

    fn accept_block(&self, block: Block) -> ChainstateResult<Hash> {
        self.with_write(|state| -> ChainstateResult<Hash> {
            let id = self.accept_block_locked(state, block)?;
            Ok(state.index.get(id).hash)
        })
    }

    fn activate_best_chain(&self) -> ChainstateResult<ActivateReport> {
        let _span = subsystem_span!("activate_best_chain", subsystem = SUBSYSTEM).entered();
        let mut report = ActivateReport::default();
        loop {
            let progressed = self.with_write(|state| -> ChainstateResult<bool> {
                let progressed = self.activation_step(state, &mut report)?;
                if !progressed {
                    Self::finish_report(state, &mut report);
                }
                Ok(progressed)
            })?;
            if !progressed {
                break;
            }
        }

        if !report.disconnected.is_empty() {
            metrics::record_reorg(report.disconnected.len() as u64);
            log_event!(
                info,
                SUBSYSTEM,
                "reorg complete",
                disconnected = report.disconnected.len(),
                connected = report.connected.len()
            );
        }
        Ok(report)
    }

    fn invalidate_block(&self, hash: &Hash) -> ChainstateResult<ActivateReport> {
        let disconnected = self.with_write(|state| -> ChainstateResult<Vec<Hash>> {
            let id = Self::lookup(state, hash)?;
            if state.index.get(id).is_genesis() {
                return Err(ChainstateError::InvalidateGenesis);
            }
            self.reject(state, id, RejectReason::Operator);

            if let Some(finalized) = state.finalized {
                if state.index.is_ancestor(id, finalized) {
                    state.finalized = state.index.get(id).parent;
                    warn!(hash = %short_hash(hash), "invalidated block was finalized");
                }
            }

            let mut disconnected = Vec::new();
            while let Some(tip) = state.active.tip() {
                if !state.index.get(tip).status.is_failed() {
                    break;
                }
                disconnected.push(state.index.get(tip).hash);
                self.disconnect_locked(state, tip)?;
            }
            Ok(disconnected)
        })?;

        let mut report = self.activate_best_chain()?;
        report.disconnected.splice(0..0, disconnected);
        Ok(report)
    }

    fn reconsider_block(&self, hash: &Hash) -> ChainstateResult<ActivateReport> {
        self.with_write(|state| -> ChainstateResult<()> {
            let id = Self::lookup(state, hash)?;
            state.index.reconsider(id);
            let index = &state.index;
            state.rejections.retain(|e, _| index.get(*e).status.is_failed());
            if let Some(genesis) = state.index.genesis() {
                self.promote_linked(state, genesis);
            }
            info!(hash = %short_hash(hash), "block reconsidered");
            Ok(())
        })?;
        self.activate_best_chain()
    }

    fn active_tip(&self) -> Option<BlockSummary> {
        self.with_read(|state| state.active.tip().map(|id| Self::summary(state, id)))
    }

    fn best_tip(&self, min: BlockValidity) -> Option<BlockSummary> {
        self.with_read(|state| state.index.best_tip(min).map(|id| Self::summary(state, id)))
    }

    fn block_status(&self, hash: &Hash) -> Option<BlockStatus> {
        self.with_read(|state| state.index.lookup(hash).map(|id| state.index.get(id).status))
    }

    fn block_summary(&self, hash: &Hash) -> Option<BlockSummary> {
        self.with_read(|state| state.index.lookup(hash).map(|id| Self::summary(state, id)))
    }

    fn next_block_size_limit(&self, tip: &Hash) -> ChainstateResult<u64> {
        self.with_read(|state| -> ChainstateResult<u64> {
            let id = Self::lookup(state, tip)?;
            let abla = self
                .child_abla_state(&state.index, id)
                .map_err(|reason| ChainstateError::Rejected { hash: *tip, reason })?;
            Ok(self.block_size_limit(abla.as_ref()))
        })
    }

    fn lookahead_block_size_limit(&self, tip: &Hash, blocks_ahead: u64) -> ChainstateResult<u64> {
        self.with_read(|state| -> ChainstateResult<u64> {
            let id = Self::lookup(state, tip)?;
            let config = &self.params.abla;
            let start = self
                .child_abla_state(&state.index, id)
                .map_err(|reason| ChainstateError::Rejected { hash: *tip, reason })?
                .unwrap_or_else(|| AblaState::new(config));
            Ok(start.calc_lookahead_block_size_limit(
                config,
                blocks_ahead,
                self.config.disable_2gb_cap,
            ))
        })
    }

    fn is_rule_active(&self, upgrade: Upgrade, tip: &Hash) -> ChainstateResult<bool> {
        self.with_read(|state| -> ChainstateResult<bool> {
            let id = Self::lookup(state, tip)?;
            Ok(upgrade.is_active(&self.params, &state.index, id))
        })
    }

    fn activation_height(&self, upgrade: Upgrade, tip: &Hash) -> ChainstateResult<Option<u64>> {
        self.with_read(|state| -> ChainstateResult<Option<u64>> {
            let id = Self::lookup(state, tip)?;
            Ok(self
                .tracker(upgrade)
                .activation_height(&self.params, &state.index, id))
        })
    }

    fn block_script_flags(&self, hash: &Hash) -> ChainstateResult<ScriptFlags> {
        self.with_read(|state| -> ChainstateResult<ScriptFlags> {
            let id = Self::lookup(state, hash)?;
            let parent = state.index.get(id).parent;
            Ok(block_script_flags(&self.params, &state.index, parent))
        })
    }

    fn is_block_finalized(&self, hash: &Hash) -> bool {
        self.with_read(|state| {
            match (state.index.lookup(hash), state.finalized) {
                (Some(id), Some(finalized)) => state.index.is_ancestor(id, finalized),
                _ => false,
            }
        })
    }

    fn coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.with_read(|state| state.ledger.get_coin(outpoint).cloned())
    }
}

/// Exactly one coinbase, in first position.
fn has_valid_coinbase_layout(block: &Block) -> bool {
    match block.transactions.split_first() {
        Some((first, rest)) => first.is_coinbase() && !rest.iter().any(|tx| tx.is_coinbase()),
        None => false,
    }
}
