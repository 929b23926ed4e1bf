//! DSSB Store - durable server records
//!
//! - `record`: the persisted `ServerRecord` and its listing order
//! - `store`: RocksDB-backed `ServerStore` with per-key serialized mutation

pub mod record;
pub mod store;

pub use record::{listing_order, ServerRecord};
pub use store::{ServerStore, StoreHandle, StoreStats};
