//! Record lookups against the key-value store.
//!
//! Records live under `a:<fqdn>` (an address string) and `cname:<fqdn>`
//! (a target name). Backends report a three-way [`Lookup`] so failures can
//! be logged with their cause, but every outcome other than
//! [`Lookup::Found`] is answered the same way: as no record.

pub mod memory_backend;
pub mod redis_backend;

use async_trait::async_trait;
use thiserror::Error;

pub use memory_backend::MemoryStore;
pub use redis_backend::RedisStore;

pub const A_KEY_PREFIX: &str = "a:";
pub const CNAME_KEY_PREFIX: &str = "cname:";

/// Store key holding the address for `name`.
pub fn a_key(name: &str) -> String {
    format!("{}{}", A_KEY_PREFIX, name)
}

/// Store key holding the alias target for `name`.
pub fn cname_key(name: &str) -> String {
    format!("{}{}", CNAME_KEY_PREFIX, name)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Timeouts, dropped or refused connections
    #[error("Store unavailable: {0}")]
    Transient(String),

    /// Everything else, including values of the wrong type
    #[error("Store error: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error()
        {
            StoreError::Transient(e.to_string())
        } else {
            StoreError::Fatal(e.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(String),
    Absent,
    Failed(StoreError),
}

impl Lookup {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

/// A source of A and CNAME record values.
///
/// Implementations must be safe to share across every request task; one
/// call is one store round-trip, with no retries or caching.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, key: &str) -> Lookup;

    async fn lookup_a(&self, name: &str) -> Lookup {
        self.get(&a_key(name)).await
    }

    async fn lookup_cname(&self, name: &str) -> Lookup {
        self.get(&cname_key(name)).await
    }
}
