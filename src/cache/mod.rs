//! Named response caches for offline support.
//!
//! This module provides the cache store the agent owns:
//! - Caches are named by version tag and listed in creation order
//! - Entries are keyed by request URL and honour the response's `Vary` header
//! - Backends: SQLite for persistence, memory for ephemeral use

mod storage;
mod traits;

pub use storage::{CacheHit, CacheStorage, MemoryStorage, SqliteStorage};
pub use traits::{CacheEntry, QueryKey};
