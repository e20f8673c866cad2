//! codekeep Storage - Code Store Client and Read-Through Cache
//!
//! - [`CodeStore`]: capability trait for field-level access to code records
//! - [`RedisCodeStore`]: Redis implementation (direct or sentinel topology)
//! - [`InMemoryCodeStore`]: in-process implementation for tests
//! - [`CodeCache`]: read-through cache validated by a hash-only round-trip

pub mod cache;
pub mod health;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use cache::{CacheConfig, CacheEntry, CacheRead, CacheStats, CodeCache};
pub use health::check_store;
pub use memory::{InMemoryCodeStore, StoreCallCounts};
pub use redis_store::{
    ConnectionEvent, ConnectionObserver, ConnectionState, ObserverRegistry, RedisCodeStore,
    TracingObserver,
};
pub use store::CodeStore;
