//! # Scrumbot Store
//!
//! [`JobStore`](scrumbot_core::JobStore) implementations:
//! - [`SqliteStore`]: durable, single file, survives restarts
//! - [`MemoryStore`]: process-local, for tests and dry runs

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
