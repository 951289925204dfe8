pub mod db;
pub mod migrations;
pub mod registry;
pub mod runner;
pub mod testing;
pub mod version_store;

pub use db::Database;
pub use migrations::register_builtin;
pub use registry::{MigrationRegistry, UnitEntry, UnitFn};
pub use runner::MigrationRunner;
pub use testing::MemoryDirectory;
pub use version_store::{DirectoryVersionStore, MemoryVersionStore, PgVersionStore};
