//! Cell elevation persistence.
//!
//! The [`CellStore`] trait is the contract the external graph store
//! implements in production; [`MemoryCellStore`] is the in-process
//! implementation used by tests and the CLI.

mod memory;
mod traits;

pub use memory::MemoryCellStore;
pub use traits::{BoxFuture, CellStore, StoreError};
