//! PVC Viewer Storage - Persisted unit state
//!
//! This crate provides:
//! - KVStore trait for storage abstraction
//! - redb-based implementation used by the charm
//! - In-memory implementation for tests

pub mod error;
pub mod kv;
pub mod memory;
pub mod redb_backend;

// Re-export commonly used types
pub use error::{Result, StorageError};
pub use kv::KVStore;
pub use memory::MemoryStore;
pub use redb_backend::RedbBackend;
