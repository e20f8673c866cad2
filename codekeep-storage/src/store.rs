//! Code store capability trait.
//!
//! Everything the read-through cache needs from the remote store. The Redis
//! client implements it for production; [`crate::InMemoryCodeStore`]
//! implements it for tests and single-process embedding.

use std::sync::Arc;

use async_trait::async_trait;
use codekeep_core::{CodeObject, CodePayload, StoreResult};

/// Field-level access to code records keyed by `(namespace, id)`.
///
/// Every operation touches exactly one record. Absence is reported as
/// `Ok(None)` and is never an error.
#[async_trait]
pub trait CodeStore: Send + Sync {
    /// Check that the store is reachable.
    async fn ping(&self) -> StoreResult<()>;

    /// Write `code` and `hash` as a single record, replacing any previous one.
    async fn put_code(&self, namespace: &str, id: &str, payload: &CodePayload)
        -> StoreResult<()>;

    /// Fetch the full record.
    async fn get_code(&self, namespace: &str, id: &str) -> StoreResult<Option<CodeObject>>;

    /// Fetch only the `hash` field.
    async fn get_code_hash(&self, namespace: &str, id: &str) -> StoreResult<Option<String>>;

    /// Remove the record. Deleting an absent record succeeds.
    async fn delete_code(&self, namespace: &str, id: &str) -> StoreResult<()>;
}

#[async_trait]
impl<S: CodeStore + ?Sized> CodeStore for Arc<S> {
    async fn ping(&self) -> StoreResult<()> {
        (**self).ping().await
    }

    async fn put_code(
        &self,
        namespace: &str,
        id: &str,
        payload: &CodePayload,
    ) -> StoreResult<()> {
        (**self).put_code(namespace, id, payload).await
    }

    async fn get_code(&self, namespace: &str, id: &str) -> StoreResult<Option<CodeObject>> {
        (**self).get_code(namespace, id).await
    }

    async fn get_code_hash(&self, namespace: &str, id: &str) -> StoreResult<Option<String>> {
        (**self).get_code_hash(namespace, id).await
    }

    async fn delete_code(&self, namespace: &str, id: &str) -> StoreResult<()> {
        (**self).delete_code(namespace, id).await
    }
}
