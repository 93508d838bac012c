//! # Shared Types Crate
//!
//! Chain entities shared by every crate in the workspace: block headers,
//! blocks, transactions and the proof-of-work arithmetic used to weigh them.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: Header and transaction layouts are defined
//!   once here, so every crate hashes them identically.
//! - **Pure Data**: Nothing in this crate touches storage or locks.

pub mod entities;
pub mod pow;

pub use entities::*;
pub use pow::{block_proof, check_proof_of_work, decode_compact, encode_compact, CompactTarget};
