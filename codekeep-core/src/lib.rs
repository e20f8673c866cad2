//! codekeep Core - Code Object Types
//!
//! Pure data structures shared by the store client and the read-through
//! cache. This crate contains no I/O.

pub mod config;
pub mod error;
pub mod health;

pub use config::{RawStoreConfig, StoreConfig, Topology};
pub use error::{CodekeepError, CodekeepResult, ConfigError, StoreError, StoreResult};
pub use health::{HealthCheck, HealthStatus};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Fixed namespace of every code record in the remote store.
pub const CODE_KEY_PREFIX: &str = "code:";

/// Field holding the snippet payload.
pub const CODE_FIELD: &str = "code";

/// Field holding the caller-supplied fingerprint.
pub const HASH_FIELD: &str = "hash";

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Composite identifier of a code record.
///
/// Renders to `code:{namespace}/{id}` in the remote store and doubles as the
/// key of the local cache map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CodeKey {
    namespace: String,
    id: String,
}

impl CodeKey {
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Render the remote store key, with the configured prefix in front.
    ///
    /// The prefix is applied verbatim, so `"app:"` yields
    /// `app:code:{namespace}/{id}`.
    pub fn store_key(&self, prefix: &str) -> String {
        format!(
            "{}{}{}/{}",
            prefix, CODE_KEY_PREFIX, self.namespace, self.id
        )
    }
}

impl fmt::Display for CodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", CODE_KEY_PREFIX, self.namespace, self.id)
    }
}

// ============================================================================
// CODE RECORDS
// ============================================================================

/// The two fields a writer stores for a snippet.
///
/// `hash` is chosen by the writer; equal hashes must mean equal code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodePayload {
    pub code: String,
    pub hash: String,
}

impl CodePayload {
    pub fn new(code: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            hash: hash.into(),
        }
    }

    /// Build a payload fingerprinted with the hex SHA-256 of `code`.
    pub fn with_sha256(code: impl Into<String>) -> Self {
        let code = code.into();
        let hash = compute_code_hash(code.as_bytes());
        Self { code, hash }
    }
}

/// A stored snippet as returned by a full fetch.
///
/// `namespace` and `id` echo the lookup arguments; the store only persists
/// `code` and `hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeObject {
    pub namespace: String,
    pub id: String,
    pub code: String,
    pub hash: String,
}

impl CodeObject {
    pub fn from_payload(key: &CodeKey, payload: CodePayload) -> Self {
        Self {
            namespace: key.namespace.clone(),
            id: key.id.clone(),
            code: payload.code,
            hash: payload.hash,
        }
    }

    pub fn key(&self) -> CodeKey {
        CodeKey::new(self.namespace.clone(), self.id.clone())
    }

    pub fn payload(&self) -> CodePayload {
        CodePayload::new(self.code.clone(), self.hash.clone())
    }
}

/// Hex-encoded SHA-256 of `content`.
pub fn compute_code_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================
