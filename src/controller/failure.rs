//! Failure detection
//!
//! One watcher per owner record. The coordination store's leases signal
//! liveness loss: when an owner's lease runs out (or the record is removed
//! outside a teardown) while the value is not `"empty"`, the detector
//! rewrites the record to `"empty"`, re-arming the slot for any standby.
//! Detection goes through the store only; the detector never probes nodes.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::store::{CoordStore, StoreLayout, WatchEventKind, EMPTY_OWNER};

pub struct FailureDetector {
    store: Arc<dyn CoordStore>,
    layout: StoreLayout,
    num_tasks: u64,
    cancel: CancellationToken,
}

impl FailureDetector {
    pub fn new(store: Arc<dyn CoordStore>, layout: StoreLayout, num_tasks: u64) -> Self {
        Self {
            store,
            layout,
            num_tasks,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops every watcher when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn one watcher per slot; the returned handles end when the token
    /// fires or the store goes away.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        (0..self.num_tasks)
            .map(|slot| {
                tokio::spawn(watch_slot(
                    self.store.clone(),
                    self.layout.clone(),
                    slot,
                    self.cancel.clone(),
                ))
            })
            .collect()
    }
}

async fn watch_slot(
    store: Arc<dyn CoordStore>,
    layout: StoreLayout,
    slot: u64,
    cancel: CancellationToken,
) {
    let key = layout.owner_key(slot);
    let mut rx = match store.watch(&key).await {
        Ok(rx) => rx,
        Err(e) => {
            tracing::warn!(slot, "failure detector watch failed: {}", e);
            return;
        }
    };
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            event = rx.recv() => {
                let Some(event) = event else { return };
                let Some(owner) = event.value else { continue };
                if owner == EMPTY_OWNER {
                    continue;
                }
                match event.kind {
                    WatchEventKind::Expire => {
                        rearm(&*store, &key, slot, &owner).await;
                    }
                    // deletion outside a teardown: re-create the record so
                    // the slot stays claimable
                    WatchEventKind::Delete => {
                        if cancel.is_cancelled() {
                            return;
                        }
                        match store.create(&key, EMPTY_OWNER, None).await {
                            Ok(()) => tracing::info!(slot, "re-created owner record"),
                            Err(e) => tracing::debug!(slot, "owner re-create skipped: {}", e),
                        }
                    }
                    WatchEventKind::Put => {}
                }
            }
        }
    }
}

async fn rearm(store: &dyn CoordStore, key: &str, slot: u64, owner: &str) {
    match store.compare_and_swap(key, owner, EMPTY_OWNER, None).await {
        Ok(true) => tracing::info!(slot, dead = %owner, "owner gone, slot re-armed"),
        Ok(false) => tracing::debug!(slot, "owner changed before re-arm"),
        Err(e) => tracing::warn!(slot, "slot re-arm failed: {}", e),
    }
}
