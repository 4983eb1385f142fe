//! Store adapters implementing the delegate contract.

mod memory;
mod seaorm;

pub use memory::{IdStrategy, MemoryStore, TableSchema};
pub use seaorm::{SeaOrmDelegate, SeaOrmStore};
