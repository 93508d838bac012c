//! Adapters layer (Hexagonal Architecture)

mod memory;
mod oracle;

pub use memory::*;
pub use oracle::*;
