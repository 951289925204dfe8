//! Version-store implementations.

mod directory;
mod memory;
mod postgres;

pub use directory::DirectoryVersionStore;
pub use memory::MemoryVersionStore;
pub use postgres::PgVersionStore;
