//! Redis-backed code store.
//!
//! Each code record is a Redis hash at `{prefix}code:{namespace}/{id}` with
//! the fields `code` and `hash`:
//!
//! - `put_code` issues one `HSET` carrying both fields
//! - `get_code` issues `HGETALL`
//! - `get_code_hash` issues `HGET key hash`
//! - `delete_code` issues `DEL`
//!
//! Direct and sentinel topologies are chosen through [`StoreConfig`].

mod connection;
pub mod events;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use codekeep_core::{
    CodeKey, CodeObject, CodePayload, CodekeepResult, StoreConfig, StoreResult, CODE_FIELD,
    HASH_FIELD,
};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisError, RedisResult};
use tokio::sync::watch;

use crate::store::CodeStore;
use connection::{map_redis_error, SharedConnection};
pub use events::{
    ConnectionEvent, ConnectionObserver, ConnectionState, ObserverRegistry, TracingObserver,
};

/// [`CodeStore`] over a shared Redis connection.
pub struct RedisCodeStore {
    connection: Arc<SharedConnection>,
    observers: Arc<ObserverRegistry>,
    key_prefix: String,
}

impl RedisCodeStore {
    /// Connect with the default [`TracingObserver`] registered.
    pub async fn connect(config: StoreConfig) -> CodekeepResult<Self> {
        Self::connect_with_observers(config, ObserverRegistry::with_tracing()).await
    }

    /// Connect with a caller-built observer registry.
    ///
    /// Observers in `observers` see the initial `Ready` event; observers
    /// added later through [`Self::register_observer`] only see subsequent
    /// transitions.
    pub async fn connect_with_observers(
        config: StoreConfig,
        observers: ObserverRegistry,
    ) -> CodekeepResult<Self> {
        let observers = Arc::new(observers);
        let connection = SharedConnection::establish(&config, Arc::clone(&observers)).await?;
        Ok(Self {
            connection,
            observers,
            key_prefix: config.key_prefix,
        })
    }

    pub fn register_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.observers.register(observer);
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Watch connection state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn key(&self, namespace: &str, id: &str) -> String {
        CodeKey::new(namespace, id).store_key(&self.key_prefix)
    }

    async fn run<T, F, Fut>(&self, command: &'static str, f: F) -> StoreResult<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut + Send,
        Fut: Future<Output = RedisResult<T>> + Send,
        T: Send,
    {
        let lease = self.connection.acquire().await.map_err(|e| {
            tracing::error!(command, error = %e, "Redis command not sent");
            e
        })?;
        let generation = lease.generation;

        match f(lease.conn).await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.connection.report(generation, &err);
                let mapped = map_redis_error(command, err);
                if mapped.is_connection_error() {
                    tracing::error!(command, error = %mapped, "Redis command failed");
                } else {
                    tracing::warn!(command, error = %mapped, "Redis command rejected");
                }
                Err(mapped)
            }
        }
    }
}

/// A record exists only when both fields are present. Empty strings are
/// present values.
fn payload_from_fields(mut fields: HashMap<String, String>) -> Option<CodePayload> {
    let code = fields.remove(CODE_FIELD)?;
    let hash = fields.remove(HASH_FIELD)?;
    Some(CodePayload { code, hash })
}

impl fmt::Debug for RedisCodeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCodeStore")
            .field("state", &self.state())
            .field("key_prefix", &self.key_prefix)
            .field("observers", &self.observers)
            .finish()
    }
}

#[async_trait]
impl CodeStore for RedisCodeStore {
    async fn ping(&self) -> StoreResult<()> {
        self.run("PING", |mut conn| async move {
            let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<(), RedisError>(())
        })
        .await
    }

    async fn put_code(
        &self,
        namespace: &str,
        id: &str,
        payload: &CodePayload,
    ) -> StoreResult<()> {
        let key = self.key(namespace, id);
        let items = [
            (CODE_FIELD, payload.code.clone()),
            (HASH_FIELD, payload.hash.clone()),
        ];
        self.run("HSET", |mut conn| async move {
            let _: () = conn.hset_multiple(&key, &items).await?;
            Ok::<(), RedisError>(())
        })
        .await
    }

    async fn get_code(&self, namespace: &str, id: &str) -> StoreResult<Option<CodeObject>> {
        let key = self.key(namespace, id);
        let fields: HashMap<String, String> = self
            .run("HGETALL", |mut conn| async move { conn.hgetall(&key).await })
            .await?;

        Ok(payload_from_fields(fields)
            .map(|payload| CodeObject::from_payload(&CodeKey::new(namespace, id), payload)))
    }

    async fn get_code_hash(&self, namespace: &str, id: &str) -> StoreResult<Option<String>> {
        let key = self.key(namespace, id);
        self.run("HGET", |mut conn| async move {
            conn.hget(&key, HASH_FIELD).await
        })
        .await
    }

    async fn delete_code(&self, namespace: &str, id: &str) -> StoreResult<()> {
        let key = self.key(namespace, id);
        self.run("DEL", |mut conn| async move {
            let _removed: i64 = conn.del(&key).await?;
            Ok::<(), RedisError>(())
        })
        .await
    }
}
