//! Storage and configuration adapters for Parley.

pub mod config_service;
pub mod memory_store;
pub mod paths;
pub mod storage;

pub use config_service::ConfigService;
pub use memory_store::{MemoryStore, StoreSnapshot};
pub use paths::ParleyPaths;
