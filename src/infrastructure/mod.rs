//! Adapters implementing the domain ports.

pub mod in_memory;
pub mod keys;
pub mod mock;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
