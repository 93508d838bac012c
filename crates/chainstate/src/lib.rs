//! # chainstate
//!
//! Validation and chain-selection core of a proof-of-work node.
//!
//! ## Architecture
//!
//! - **Block index**: arena of every header seen, with skip-list ancestry,
//!   cumulative work and first-seen ordering for best-tip selection.
//! - **Connection pipeline**: connect, disconnect and reorg with
//!   commit-or-discard ledger updates and infectious invalidity.
//! - **Activation tracker**: one generic mechanism answering "since which
//!   block has this upgrade been active" for every protocol upgrade.
//! - **Adaptive block size limit**: the per-tip controller producing the
//!   maximum size of the next block once Upgrade 10 is active.
//!
//! All state sits behind one reentrant shared/exclusive lock (`cs_main`).
//! Script interpretation, block bodies and undo data are reached through
//! the ports in [`ports`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chainstate::{ChainstateApi, ChainstateConfig, ChainstateDependencies, ChainstateService};
//! use chainstate::adapters::{AcceptAllScripts, InMemoryBlockStore, InMemoryUndoStore, UtxoLedgerOracle};
//!
//! let service = ChainstateService::new(ChainstateDependencies {
//!     oracle: Arc::new(UtxoLedgerOracle::new(AcceptAllScripts)),
//!     blocks: Arc::new(InMemoryBlockStore::new()),
//!     undo: Arc::new(InMemoryUndoStore::new()),
//!     config: ChainstateConfig::from_env(),
//! })?;
//!
//! service.accept_block(block)?;
//! let report = service.activate_best_chain()?;
//! ```

pub mod adapters;
pub mod domain;
pub mod metrics;
pub mod ports;
pub mod service;

// Re-export main types
pub use domain::{
    AblaConfig, AblaState, ActivationTracker, BlockIndex, BlockStatus, BlockValidity,
    ChainstateConfig, ChainstateError, ChainstateResult, ConsensusParams, DisconnectResult,
    Network, RejectReason, ScriptFlags, Upgrade,
};
pub use ports::{ActivateReport, BlockSummary, ChainstateApi, LedgerOracle, ScriptVerifier};
pub use service::{ChainstateDependencies, ChainstateService};
