//! Storage backends
//!
//! `MemoryStore` keeps everything in a DashMap and is used for tests and
//! throwaway sessions. `SqliteStore` persists to an embedded SQLite file.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{MemoryStore, MemoryStoreFactory};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteStore, SqliteStoreFactory};
