//! Slot address map
//!
//! Snapshot of `slot -> host:port` built from the owner records. Read-mostly:
//! data requests resolve targets here on every attempt, while only the
//! owner-watch tasks write. Slots with an `"empty"` owner are absent.

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
pub(crate) struct AddressMap {
    inner: RwLock<HashMap<u64, String>>,
}

impl AddressMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: u64) -> Option<String> {
        self.inner.read().unwrap().get(&slot).cloned()
    }

    pub fn set(&self, slot: u64, addr: String) {
        self.inner.write().unwrap().insert(slot, addr);
    }

    pub fn remove(&self, slot: u64) {
        self.inner.write().unwrap().remove(&slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let map = AddressMap::new();
        assert!(map.get(0).is_none());
        map.set(0, "127.0.0.1:4000".into());
        assert_eq!(map.get(0).unwrap(), "127.0.0.1:4000");
        map.remove(0);
        assert!(map.get(0).is_none());
    }
}
