//! Domain layer for the chain-state core
//!
//! - block_index: header tree, ancestry, best-tip selection
//! - active_chain: the currently selected chain by height
//! - activation: rule predicates and the activation tracker
//! - abla: adaptive block size limit controller
//! - ledger: unspent-output view, undo data, block rollback
//! - params: consensus parameters and operator configuration

mod abla;
mod activation;
mod active_chain;
mod block_index;
mod error;
mod ledger;
mod params;
mod status;

pub use abla::*;
pub use activation::*;
pub use active_chain::*;
pub use block_index::*;
pub use error::*;
pub use ledger::*;
pub use params::*;
pub use status::*;
