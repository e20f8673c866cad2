//! codekeep Test Utilities
//!
//! Shared test infrastructure for the codekeep workspace:
//! - Proptest generators for keys and payloads
//! - A sample cache entry type and a transform that counts its calls
//! - Store fixtures for common scenarios

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub use codekeep_core::{CodeKey, CodeObject, CodePayload, StoreError, StoreResult};
pub use codekeep_storage::{
    CacheConfig, CacheEntry, CodeCache, CodeStore, InMemoryCodeStore, StoreCallCounts,
};

use proptest::prelude::*;

// ============================================================================
// FIXTURES
// ============================================================================

/// Cache entry holding an upper-cased "compiled" form of the code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledCode {
    pub compiled: String,
    pub hash: String,
}

impl CacheEntry for CompiledCode {
    fn hash(&self) -> &str {
        &self.hash
    }
}

/// The reference transform: upper-cases the code and keeps its hash.
pub fn compile(object: &CodeObject) -> CompiledCode {
    CompiledCode {
        compiled: object.code.to_uppercase(),
        hash: object.hash.clone(),
    }
}

/// Wraps [`compile`] and counts how often it runs.
#[derive(Debug, Clone, Default)]
pub struct CountingTransform {
    calls: Arc<AtomicUsize>,
}

impl CountingTransform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// A transform closure sharing this counter.
    pub fn transform(&self) -> impl FnOnce(&CodeObject) -> CompiledCode + Send + 'static {
        let calls = Arc::clone(&self.calls);
        move |object: &CodeObject| {
            calls.fetch_add(1, Ordering::SeqCst);
            compile(object)
        }
    }
}

/// An empty in-memory store and a cache over it.
pub fn empty_cache() -> (Arc<InMemoryCodeStore>, CodeCache<InMemoryCodeStore, CompiledCode>) {
    cache_with_config(CacheConfig::default())
}

pub fn cache_with_config(
    config: CacheConfig,
) -> (Arc<InMemoryCodeStore>, CodeCache<InMemoryCodeStore, CompiledCode>) {
    let store = Arc::new(InMemoryCodeStore::new());
    let cache = CodeCache::with_config(Arc::clone(&store), config);
    (store, cache)
}

/// Payload of the `tenantA/42` scenario.
pub fn scenario_payload() -> CodePayload {
    CodePayload::new("print(1)", "h1")
}

// ============================================================================
// GENERATORS
// ============================================================================

/// Namespace segment without the `/` separator.
pub fn namespace_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_-]{0,15}"
}

pub fn code_id_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,16}"
}

pub fn code_key_strategy() -> impl Strategy<Value = CodeKey> {
    (namespace_strategy(), code_id_strategy()).prop_map(|(ns, id)| CodeKey::new(ns, id))
}

/// Payload fingerprinted with SHA-256, so equal hashes mean equal code.
pub fn payload_strategy() -> impl Strategy<Value = CodePayload> {
    "[ -~]{0,64}".prop_map(|code| CodePayload::with_sha256(code))
}

/// A store operation generated for coherence properties.
#[derive(Debug, Clone)]
pub enum StoreOp {
    Put(CodePayload),
    Delete,
    Lookup,
}

pub fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        2 => payload_strategy().prop_map(StoreOp::Put),
        1 => Just(StoreOp::Delete),
        3 => Just(StoreOp::Lookup),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_uppercases_and_keeps_hash() {
        let object = CodeObject::from_payload(&CodeKey::new("tenantA", "42"), scenario_payload());
        assert_eq!(
            compile(&object),
            CompiledCode {
                compiled: "PRINT(1)".to_string(),
                hash: "h1".to_string(),
            }
        );
    }

    #[test]
    fn test_counting_transform_shares_counter() {
        let counter = CountingTransform::new();
        let object = CodeObject::from_payload(&CodeKey::new("ns", "1"), scenario_payload());

        counter.transform()(&object);
        counter.clone().transform()(&object);
        assert_eq!(counter.calls(), 2);
    }
}
