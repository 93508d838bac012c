//! # Integration Tests
//!
//! Cross-crate checks: `chainstate` driven through its public API with
//! blocks from `shared-types` and the lock from `shared-lock`.

pub mod concurrency;
pub mod properties;
pub mod scenarios;
