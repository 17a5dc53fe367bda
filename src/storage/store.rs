//! The built-in stores.

mod directory;
mod memory;
mod temp;

pub use directory::{DirectoryStore, DirectoryStoreCreateError};
pub use memory::MemoryStore;
pub use temp::TempStore;
