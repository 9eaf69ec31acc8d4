//! Coordination-store client interface
//!
//! The framework talks to a strongly consistent key-value store with watch
//! semantics (etcd or similar). The store client itself is an external
//! collaborator; this trait names the operations the framework relies on.
//! Leases (TTLs) on owner records drive failure detection: a node that stops
//! refreshing its lease is eventually reported dead through an `Expire`
//! watch event.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::common::Result;

/// What happened to a watched key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// Key was created or its value replaced
    Put,
    /// Key was removed
    Delete,
    /// The key's lease ran out without a refresh
    Expire,
}

/// A single event on a watched key. `value` carries the value after a `Put`,
/// and the last known value on `Delete`/`Expire`.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub value: Option<String>,
}

/// Stream of events for one watched key.
pub type WatchStream = mpsc::UnboundedReceiver<WatchEvent>;

/// Operations the framework requires from the coordination store.
///
/// Implementations must be linearizable per key: a successful
/// `compare_and_swap` observed by one caller is observed by every later
/// `get`. Watch streams begin with a synthetic `Put` carrying the current
/// value when the key already exists, so a subscriber never misses a value
/// written before the watch was installed.
#[async_trait]
pub trait CoordStore: Send + Sync {
    /// Create a key. Fails with [`crate::Error::KeyExists`] when present.
    /// A `ttl` attaches a lease to the key.
    async fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Atomically replace `expect` with `new`. Returns `Ok(false)` when the
    /// current value differs (lost race); errors only on store failures or a
    /// missing key. A successful swap installs `ttl` as the key's lease, or
    /// clears the lease when `ttl` is `None`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expect: &str,
        new: &str,
        ttl: Option<Duration>,
    ) -> Result<bool>;

    /// Read a key. `Ok(None)` when absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Re-arm the lease on a key (keepalive). Fails when the key is gone or
    /// its lease already expired.
    async fn refresh(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Recursively delete every key under `prefix`. Returns the number of
    /// keys removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;

    /// Watch a single key for changes.
    async fn watch(&self, key: &str) -> Result<WatchStream>;
}
