//! Cache entry trait.

use std::sync::Arc;

/// A caller-defined, pre-processed form of a code object.
///
/// The coordinator treats entries as opaque except for the hash they were
/// built from, which it compares against the remote `hash` field.
///
/// # Implementation Requirements
///
/// - `hash()` must return the hash of the code object the entry was built
///   from, unchanged
/// - Implementations must be `Send + Sync + 'static` so entries can be
///   shared across tasks
pub trait CacheEntry: Send + Sync + 'static {
    fn hash(&self) -> &str;
}

impl<E: CacheEntry + ?Sized> CacheEntry for Arc<E> {
    fn hash(&self) -> &str {
        (**self).hash()
    }
}

impl<E: CacheEntry + ?Sized> CacheEntry for Box<E> {
    fn hash(&self) -> &str {
        (**self).hash()
    }
}

impl CacheEntry for codekeep_core::CodeObject {
    fn hash(&self) -> &str {
        &self.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codekeep_core::{CodeKey, CodeObject, CodePayload};

    #[test]
    fn test_code_object_is_its_own_entry() {
        let object =
            CodeObject::from_payload(&CodeKey::new("ns", "1"), CodePayload::new("x", "hx"));
        assert_eq!(CacheEntry::hash(&object), "hx");
        assert_eq!(Arc::new(object).hash(), "hx");
    }
}
