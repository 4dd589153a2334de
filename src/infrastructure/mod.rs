//! Adapters implementing the domain ports.

pub mod assets;
pub mod gateways;
pub mod in_memory;
pub mod providers;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
