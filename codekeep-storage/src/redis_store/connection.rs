//! Shared multiplexed connection with background reconnect.
//!
//! One [`MultiplexedConnection`] serves every caller. A drop is noticed
//! either by a failing command or by the heartbeat ping on an idle
//! connection. The connection is then discarded, observers hear `Lost`, and
//! a background task re-establishes it (re-resolving the primary in sentinel
//! mode). The failed command is never retried here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use codekeep_core::{StoreConfig, StoreError, StoreResult, Topology};
use redis::aio::MultiplexedConnection;
use redis::sentinel::{Sentinel, SentinelNodeConnectionInfo};
use redis::{Client, RedisConnectionInfo, RedisError, RedisResult};
use tokio::sync::{watch, Mutex};

use super::events::{ConnectionEvent, ConnectionState, ObserverRegistry};

/// Opens connections for one topology.
pub(crate) enum Connector {
    Direct(Client),
    Sentinel {
        sentinel: Mutex<Sentinel>,
        group_name: String,
        node_info: SentinelNodeConnectionInfo,
    },
}

impl Connector {
    pub(crate) fn from_topology(topology: &Topology) -> StoreResult<Self> {
        match topology {
            Topology::Direct { url } => Client::open(url.as_str())
                .map(Self::Direct)
                .map_err(|e| map_redis_error("CONNECT", e)),
            Topology::Sentinel {
                sentinels,
                group_name,
                password,
            } => {
                let sentinel = Sentinel::build(sentinels.iter().map(String::as_str).collect::<Vec<_>>())
                    .map_err(|e| map_redis_error("CONNECT", e))?;
                let node_info = SentinelNodeConnectionInfo {
                    redis_connection_info: Some(RedisConnectionInfo {
                        password: password.clone(),
                        ..Default::default()
                    }),
                    ..Default::default()
                };
                Ok(Self::Sentinel {
                    sentinel: Mutex::new(sentinel),
                    group_name: group_name.clone(),
                    node_info,
                })
            }
        }
    }

    async fn open(&self) -> RedisResult<MultiplexedConnection> {
        match self {
            Self::Direct(client) => client.get_multiplexed_async_connection().await,
            Self::Sentinel {
                sentinel,
                group_name,
                node_info,
            } => {
                let client = sentinel
                    .lock()
                    .await
                    .async_master_for(group_name, Some(node_info))
                    .await?;
                client.get_multiplexed_async_connection().await
            }
        }
    }

    /// Open a connection, bounded by `timeout`.
    pub(crate) async fn connect(&self, timeout: Duration) -> StoreResult<MultiplexedConnection> {
        match tokio::time::timeout(timeout, self.open()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(map_redis_error("CONNECT", e)),
            Err(_) => Err(StoreError::ConnectTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

/// A connection handed to one command, tagged with the generation it
/// belongs to.
pub(crate) struct Lease {
    pub(crate) generation: u64,
    pub(crate) conn: MultiplexedConnection,
}

pub(crate) struct SharedConnection {
    connector: Connector,
    current: RwLock<Option<(u64, MultiplexedConnection)>>,
    generation: AtomicU64,
    state: watch::Sender<ConnectionState>,
    observers: Arc<ObserverRegistry>,
    offline_queue: bool,
    connect_timeout: Duration,
    reconnect_interval: Duration,
}

impl SharedConnection {
    /// Connect once and fail if the store is unreachable.
    pub(crate) async fn establish(
        config: &StoreConfig,
        observers: Arc<ObserverRegistry>,
    ) -> StoreResult<Arc<Self>> {
        let connector = Connector::from_topology(&config.topology)?;
        let conn = match connector.connect(config.connect_timeout).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(error = %e, "Failed to connect to redis");
                return Err(e);
            }
        };

        let (state, _) = watch::channel(ConnectionState::Ready);
        let shared = Arc::new(Self {
            connector,
            current: RwLock::new(Some((0, conn))),
            generation: AtomicU64::new(0),
            state,
            observers,
            offline_queue: config.enable_offline_queue,
            connect_timeout: config.connect_timeout,
            reconnect_interval: config.reconnect_interval,
        });
        shared.observers.notify(&ConnectionEvent::Ready);
        tokio::spawn(heartbeat_loop(
            Arc::downgrade(&shared),
            config.heartbeat_interval,
        ));
        Ok(shared)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn snapshot(&self) -> Option<Lease> {
        let guard = match self.current.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.as_ref().map(|(generation, conn)| Lease {
            generation: *generation,
            conn: conn.clone(),
        })
    }

    /// Get the live connection.
    ///
    /// While reconnecting, waits for `Ready` when the offline queue is
    /// enabled and fails with [`StoreError::Offline`] otherwise.
    pub(crate) async fn acquire(&self) -> StoreResult<Lease> {
        if let Some(lease) = self.snapshot() {
            return Ok(lease);
        }
        if !self.offline_queue {
            return Err(StoreError::Offline);
        }

        let mut rx = self.state.subscribe();
        loop {
            if let Some(lease) = self.snapshot() {
                return Ok(lease);
            }
            if rx.changed().await.is_err() {
                return Err(StoreError::connection("connection handle closed"));
            }
        }
    }

    /// Record a command failure on the connection of `generation`.
    ///
    /// Only connection-level failures on the current generation drop the
    /// connection; later reports for the same generation are ignored.
    pub(crate) fn report(self: &Arc<Self>, generation: u64, err: &RedisError) {
        if is_connection_failure(err) {
            self.mark_lost(generation, err.to_string());
        }
    }

    fn mark_lost(self: &Arc<Self>, generation: u64, reason: String) {
        let dropped = {
            let mut guard = match self.current.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match guard.as_ref() {
                Some((current, _)) if *current == generation => guard.take(),
                _ => None,
            }
        };
        if dropped.is_none() {
            return;
        }

        self.state.send_replace(ConnectionState::Reconnecting);
        self.observers.notify(&ConnectionEvent::Lost { reason });

        let weak = Arc::downgrade(self);
        tokio::spawn(reconnect_loop(weak, self.reconnect_interval));
    }

    fn install(&self, conn: MultiplexedConnection) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut guard = match self.current.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = Some((generation, conn));
        }
        self.state.send_replace(ConnectionState::Ready);
        self.observers.notify(&ConnectionEvent::Ready);
    }
}

/// Reconnect until it succeeds or the store is dropped.
async fn reconnect_loop(weak: Weak<SharedConnection>, interval: Duration) {
    let mut attempt: u64 = 0;
    loop {
        tokio::time::sleep(interval).await;
        let Some(shared) = weak.upgrade() else {
            return;
        };
        attempt += 1;
        match shared.connector.connect(shared.connect_timeout).await {
            Ok(conn) => {
                tracing::debug!(attempt, "Reconnected to redis");
                shared.install(conn);
                return;
            }
            Err(e) if e.is_connection_error() => {
                tracing::debug!(attempt, error = %e, "Reconnect attempt failed");
            }
            Err(e) => {
                tracing::error!(attempt, error = %e, "Reconnect attempt rejected by redis");
            }
        }
    }
}

/// Ping the live connection every `interval` so a drop on an idle
/// connection is noticed without waiting for the next command.
async fn heartbeat_loop(weak: Weak<SharedConnection>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let Some(shared) = weak.upgrade() else {
            return;
        };
        let Some(Lease {
            generation,
            mut conn,
        }) = shared.snapshot()
        else {
            continue;
        };

        let ping = async {
            let pong: RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
            pong
        };
        let outcome = tokio::time::timeout(shared.connect_timeout, ping).await;
        match outcome {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Heartbeat ping failed");
                shared.report(generation, &e);
            }
            Err(_) => {
                let reason = format!(
                    "heartbeat ping timed out after {}ms",
                    shared.connect_timeout.as_millis()
                );
                shared.mark_lost(generation, reason);
            }
        }
    }
}

fn is_connection_failure(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout()
}

/// Translate a client error into the store taxonomy.
pub(crate) fn map_redis_error(command: &str, err: RedisError) -> StoreError {
    if is_connection_failure(&err) {
        StoreError::connection(err.to_string())
    } else {
        StoreError::Command {
            command: command.to_string(),
            reason: err.to_string(),
        }
    }
}
