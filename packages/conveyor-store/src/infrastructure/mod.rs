//! Infrastructure adapters for the [`StateStore`](crate::StateStore) port.

pub mod fs;
pub mod memory;

pub use fs::FsStateStore;
pub use memory::MemoryStateStore;
