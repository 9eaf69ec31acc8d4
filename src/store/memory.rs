//! In-process coordination store
//!
//! A [`CoordStore`] kept entirely in memory, used by the integration tests
//! and the local demo cluster. Honors the full contract: atomic
//! compare-and-swap, per-key watch fanout with initial-value delivery, and
//! leases driven by a background sweeper.
//!
//! Expiry does not remove a key. The sweeper emits an `Expire` event and
//! leaves the last value in place; rewriting a dead owner back to `"empty"`
//! is the failure detector's job, so exactly one component re-arms a slot.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::common::{Error, Result};
use crate::store::client::{CoordStore, WatchEvent, WatchEventKind, WatchStream};

const SWEEP_INTERVAL: Duration = Duration::from_millis(50);

struct Entry {
    value: String,
    deadline: Option<Instant>,
    expired: bool,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    watchers: HashMap<String, Vec<mpsc::UnboundedSender<WatchEvent>>>,
}

impl State {
    fn notify(&mut self, key: &str, event: WatchEvent) {
        if let Some(senders) = self.watchers.get_mut(key) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
            if senders.is_empty() {
                self.watchers.remove(key);
            }
        }
    }
}

/// In-memory [`CoordStore`]. Must be created inside a tokio runtime; the
/// lease sweeper stops once every clone has been dropped.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let shared = Arc::new(Mutex::new(State::default()));
        tokio::spawn(sweep_leases(Arc::downgrade(&shared)));
        Self { shared }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

async fn sweep_leases(shared: Weak<Mutex<State>>) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let now = Instant::now();
        let mut state = shared.lock().unwrap();
        let due: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| !e.expired && e.deadline.is_some_and(|d| d <= now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in due {
            let value = {
                let entry = state.entries.get_mut(&key).unwrap();
                entry.expired = true;
                entry.deadline = None;
                entry.value.clone()
            };
            tracing::debug!(key = %key, "lease expired");
            state.notify(
                &key,
                WatchEvent {
                    kind: WatchEventKind::Expire,
                    value: Some(value),
                },
            );
        }
    }
}

fn deadline_for(ttl: Option<Duration>) -> Option<Instant> {
    ttl.map(|ttl| Instant::now() + ttl)
}

#[async_trait]
impl CoordStore for MemoryStore {
    async fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut state = self.shared.lock().unwrap();
        if state.entries.contains_key(key) {
            return Err(Error::KeyExists(key.to_string()));
        }
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                deadline: deadline_for(ttl),
                expired: false,
            },
        );
        state.notify(
            key,
            WatchEvent {
                kind: WatchEventKind::Put,
                value: Some(value.to_string()),
            },
        );
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expect: &str,
        new: &str,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let mut state = self.shared.lock().unwrap();
        let Some(entry) = state.entries.get_mut(key) else {
            return Err(Error::KeyNotFound(key.to_string()));
        };
        if entry.value != expect {
            return Ok(false);
        }
        entry.value = new.to_string();
        entry.deadline = deadline_for(ttl);
        entry.expired = false;
        state.notify(
            key,
            WatchEvent {
                kind: WatchEventKind::Put,
                value: Some(new.to_string()),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let state = self.shared.lock().unwrap();
        Ok(state.entries.get(key).map(|e| e.value.clone()))
    }

    async fn refresh(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut state = self.shared.lock().unwrap();
        let Some(entry) = state.entries.get_mut(key) else {
            return Err(Error::KeyNotFound(key.to_string()));
        };
        if entry.expired {
            return Err(Error::LeaseExpired(key.to_string()));
        }
        entry.deadline = Some(Instant::now() + ttl);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let mut state = self.shared.lock().unwrap();
        let keys: Vec<String> = state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            let entry = state.entries.remove(key).unwrap();
            state.notify(
                key,
                WatchEvent {
                    kind: WatchEventKind::Delete,
                    value: Some(entry.value),
                },
            );
        }
        Ok(keys.len() as u64)
    }

    async fn watch(&self, key: &str) -> Result<WatchStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.shared.lock().unwrap();
        if let Some(entry) = state.entries.get(key) {
            let _ = tx.send(WatchEvent {
                kind: WatchEventKind::Put,
                value: Some(entry.value.clone()),
            });
        }
        state.watchers.entry(key.to_string()).or_default().push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_conflict() {
        let store = MemoryStore::new();
        store.create("/a", "1", None).await.unwrap();
        assert!(matches!(
            store.create("/a", "2", None).await,
            Err(Error::KeyExists(_))
        ));
        assert_eq!(store.get("/a").await.unwrap().unwrap(), "1");
    }

    #[tokio::test]
    async fn test_cas() {
        let store = MemoryStore::new();
        store.create("/a", "empty", None).await.unwrap();

        assert!(store
            .compare_and_swap("/a", "empty", "host:1", None)
            .await
            .unwrap());
        // second claimant loses
        assert!(!store
            .compare_and_swap("/a", "empty", "host:2", None)
            .await
            .unwrap());
        assert_eq!(store.get("/a").await.unwrap().unwrap(), "host:1");

        assert!(matches!(
            store.compare_and_swap("/missing", "x", "y", None).await,
            Err(Error::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_watch_initial_value() {
        let store = MemoryStore::new();
        store.create("/a", "1", None).await.unwrap();

        let mut rx = store.watch("/a").await.unwrap();
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, WatchEventKind::Put);
        assert_eq!(ev.value.as_deref(), Some("1"));

        store.compare_and_swap("/a", "1", "2", None).await.unwrap();
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.value.as_deref(), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expiry_keeps_value() {
        let store = MemoryStore::new();
        store.create("/slot", "empty", None).await.unwrap();
        store
            .compare_and_swap("/slot", "empty", "host:1", Some(Duration::from_millis(100)))
            .await
            .unwrap();

        let mut rx = store.watch("/slot").await.unwrap();
        rx.recv().await.unwrap(); // initial value

        tokio::time::sleep(Duration::from_millis(300)).await;
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, WatchEventKind::Expire);
        assert_eq!(ev.value.as_deref(), Some("host:1"));

        // value stays until somebody rewrites it
        assert_eq!(store.get("/slot").await.unwrap().unwrap(), "host:1");
        assert!(matches!(
            store.refresh("/slot", Duration::from_millis(100)).await,
            Err(Error::LeaseExpired(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_extends_lease() {
        let store = MemoryStore::new();
        store
            .create("/slot", "host:1", Some(Duration::from_millis(100)))
            .await
            .unwrap();

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(60)).await;
            store
                .refresh("/slot", Duration::from_millis(100))
                .await
                .unwrap();
        }
        assert_eq!(store.get("/slot").await.unwrap().unwrap(), "host:1");
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let store = MemoryStore::new();
        store.create("/job/a", "1", None).await.unwrap();
        store.create("/job/b", "2", None).await.unwrap();
        store.create("/other", "3", None).await.unwrap();

        let mut rx = store.watch("/job/a").await.unwrap();
        rx.recv().await.unwrap();

        assert_eq!(store.delete_prefix("/job").await.unwrap(), 2);
        assert!(store.get("/job/a").await.unwrap().is_none());
        assert_eq!(store.get("/other").await.unwrap().unwrap(), "3");

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, WatchEventKind::Delete);
    }
}
