//! In-process stand-ins for external stores.

mod directory;

pub use directory::MemoryDirectory;
