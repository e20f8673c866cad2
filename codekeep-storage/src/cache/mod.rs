//! Read-through cache for code objects.
//!
//! [`CodeCache`] keeps caller-built entries in a local map and validates
//! each one against the remote `hash` field before serving it. The check
//! transfers only the hash; the full record moves only when the hash is
//! missing or has changed.
//!
//! # Example
//!
//! ```ignore
//! let cache = CodeCache::new(Arc::new(store));
//!
//! let read = cache.lookup("tenantA", "42", compile).await?;
//! if let Some(read) = read {
//!     if read.was_cache_hit() {
//!         tracing::debug!(age = ?read.staleness(), "served compiled code from cache");
//!     }
//! }
//! ```

pub mod entry;
pub mod read;
pub mod read_through;

pub use entry::CacheEntry;
pub use read::CacheRead;
pub use read_through::{CacheConfig, CacheStats, CodeCache};
