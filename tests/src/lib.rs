//! # Chain-State Test Suite
//!
//! Unified test crate for the workspace.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs       # Block mining and service wiring shared by all tests
//! └── integration/      # Cross-crate scenarios
//!     ├── scenarios.rs  # Genesis, reorg, invalid block, adaptive limit
//!     ├── concurrency.rs# cs_main shared by several threads
//!     └── properties.rs # Randomized chain selection checks
//! tests/benches/        # Criterion benchmarks
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p chainstate-tests
//!
//! # By category
//! cargo test -p chainstate-tests integration::scenarios
//! cargo test -p chainstate-tests integration::properties
//!
//! # Benchmarks
//! cargo bench -p chainstate-tests
//! ```

pub mod fixtures;
pub mod integration;
