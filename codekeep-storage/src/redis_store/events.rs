//! Connection liveness events.
//!
//! The Redis client reports its transitions through registered observers
//! instead of logging implicitly. [`TracingObserver`] is installed by
//! default and produces the usual log lines.

use std::fmt;
use std::sync::{Arc, RwLock};

/// Connection state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Commands are sent on a live connection.
    Ready,
    /// The connection dropped and a reconnect is in progress.
    Reconnecting,
}

/// A liveness transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection is established and able to receive commands.
    Ready,
    /// The live connection was lost.
    Lost { reason: String },
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Lost { reason } => write!(f, "connection lost: {}", reason),
        }
    }
}

/// Receives connection transitions.
///
/// Called synchronously from the connection path; implementations must not
/// block.
pub trait ConnectionObserver: Send + Sync {
    fn on_event(&self, event: &ConnectionEvent);
}

/// Logs transitions through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ConnectionObserver for TracingObserver {
    fn on_event(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Ready => {
                tracing::info!("Redis is ready to receive calls");
            }
            ConnectionEvent::Lost { reason } => {
                tracing::error!(
                    error = %reason,
                    "The connection with redis has been lost. Performance issues may happen"
                );
            }
        }
    }
}

/// Set of registered observers.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<Arc<dyn ConnectionObserver>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with [`TracingObserver`] already registered.
    pub fn with_tracing() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(TracingObserver));
        registry
    }

    pub fn register(&self, observer: Arc<dyn ConnectionObserver>) {
        match self.observers.write() {
            Ok(mut observers) => observers.push(observer),
            Err(poisoned) => poisoned.into_inner().push(observer),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self.observers.read() {
            Ok(observers) => observers.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn notify(&self, event: &ConnectionEvent) {
        let observers = match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for observer in observers {
            observer.on_event(event);
        }
    }
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.len())
            .finish()
    }
}
