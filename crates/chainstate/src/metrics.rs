//! # Chain-State Metrics
//!
//! Prometheus metrics for monitoring block connection and reorgs.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! chainstate = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `chainstate_blocks_connected_total` - Counter of connected blocks
//! - `chainstate_blocks_disconnected_total` - Counter of disconnected blocks
//! - `chainstate_blocks_rejected_total` - Counter of rejected blocks (by reason)
//! - `chainstate_reorg_depth` - Histogram of blocks disconnected per reorg

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};

#[cfg(feature = "metrics")]
lazy_static! {
    /// Total blocks connected to the active chain
    pub static ref BLOCKS_CONNECTED: IntCounter = register_int_counter!(
        "chainstate_blocks_connected_total",
        "Total number of blocks connected to the active chain"
    )
    .expect("Failed to create BLOCKS_CONNECTED metric");

    /// Total blocks disconnected from the active chain
    pub static ref BLOCKS_DISCONNECTED: IntCounter = register_int_counter!(
        "chainstate_blocks_disconnected_total",
        "Total number of blocks disconnected from the active chain"
    )
    .expect("Failed to create BLOCKS_DISCONNECTED metric");

    /// Total blocks rejected, labeled by rejection reason
    pub static ref BLOCKS_REJECTED: IntCounterVec = register_int_counter_vec!(
        "chainstate_blocks_rejected_total",
        "Total number of blocks rejected",
        &["reason"]
    )
    .expect("Failed to create BLOCKS_REJECTED metric");

    /// Blocks disconnected by each reorg
    pub static ref REORG_DEPTH: Histogram = register_histogram!(
        "chainstate_reorg_depth",
        "Number of blocks disconnected by a reorg",
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 10.0, 20.0, 50.0]
    )
    .expect("Failed to create REORG_DEPTH metric");
}

/// Record a connected block
#[cfg(feature = "metrics")]
pub fn record_block_connected() {
    BLOCKS_CONNECTED.inc();
}

/// Record a disconnected block
#[cfg(feature = "metrics")]
pub fn record_block_disconnected() {
    BLOCKS_DISCONNECTED.inc();
}

/// Record a rejected block with reason
#[cfg(feature = "metrics")]
pub fn record_block_rejected(reason: &str) {
    BLOCKS_REJECTED.with_label_values(&[reason]).inc();
}

/// Record the depth of a completed reorg
#[cfg(feature = "metrics")]
pub fn record_reorg(depth: u64) {
    REORG_DEPTH.observe(depth as f64);
}

// No-op implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub fn record_block_connected() {}

#[cfg(not(feature = "metrics"))]
pub fn record_block_disconnected() {}

#[cfg(not(feature = "metrics"))]
pub fn record_block_rejected(_reason: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_reorg(_depth: u64) {}
