//! Stash Core Library
//!
//! An in-process object store that caches tables in memory and persists
//! whole-table snapshots to an asynchronous key-value store. Concurrent
//! writers are coalesced into a single physical write, queries resolve in
//! submission order, and identifiers are allocated sequentially per table.

// Re-export pure types from stash-types
pub use stash_types::*;

pub mod allocator;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod flush;
pub mod model;
pub mod ports;
pub mod query;
pub mod storage;
pub mod table;
pub mod testing;

pub use allocator::IdAllocator;
pub use cache::TableCache;
pub use config::{Backend, StashConfig};
pub use database::{Database, Registry};
pub use error::{Result, StashError};
pub use events::{EventTarget, ListenerId};
pub use flush::{FlushEngine, FlushOutcome};
pub use model::{Model, ModelState, Repository};
pub use ports::{KvStore, StoreFactory};
pub use query::{QuerySerializer, QueryTicket};
pub use table::Table;
