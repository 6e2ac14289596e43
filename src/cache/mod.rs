//! Versioned cache namespaces over a pluggable storage backend.
//!
//! This module provides:
//! - A registry mapping each logical purpose to one versioned physical cache
//! - Ordered key-value storage (SQLite on disk, or in memory)
//! - An insertion-order entry bound for namespaces that must not grow forever

mod eviction;
mod namespace;
mod storage;

pub use eviction::{EvictionPolicy, DEFAULT_MAX_ENTRIES};
pub use namespace::{CacheHandle, NamespaceRegistry, Purpose};
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
