//! Tree topology
//!
//! Slots form a complete n-ary tree rooted at slot 0. Slot `i > 0` has
//! parent `(i - 1) / fanout`; the children of `i` are
//! `fanout * i + k` for `1 <= k <= fanout`, bounded by the slot count.

use super::{LinkType, Topology};

const LINK_TYPES: &[LinkType] = &[LinkType::Parent, LinkType::Child];

#[derive(Debug, Clone)]
pub struct TreeTopology {
    fanout: u64,
    num_tasks: u64,
    slot: Option<u64>,
}

impl TreeTopology {
    pub fn new(fanout: u64, num_tasks: u64) -> Self {
        Self {
            fanout,
            num_tasks,
            slot: None,
        }
    }

    fn parent(&self, slot: u64) -> Vec<u64> {
        if slot == 0 {
            return Vec::new();
        }
        vec![(slot - 1) / self.fanout]
    }

    fn children(&self, slot: u64) -> Vec<u64> {
        (1..=self.fanout)
            .map(|k| self.fanout * slot + k)
            .take_while(|&c| c < self.num_tasks)
            .collect()
    }
}

impl Topology for TreeTopology {
    fn num_tasks(&self) -> u64 {
        self.num_tasks
    }

    fn link_types(&self) -> &'static [LinkType] {
        LINK_TYPES
    }

    fn set_slot(&mut self, slot: u64) {
        self.slot = Some(slot);
    }

    fn neighbors(&self, link: LinkType, _epoch: u64) -> Vec<u64> {
        let Some(slot) = self.slot else {
            return Vec::new();
        };
        match link {
            LinkType::Parent => self.parent(slot),
            LinkType::Child => self.children(slot),
            _ => Vec::new(),
        }
    }

    fn validate(&self) -> crate::Result<()> {
        if self.fanout == 0 {
            return Err(crate::Error::InvalidConfig("tree fanout must be >= 1".into()));
        }
        if self.num_tasks == 0 {
            return Err(crate::Error::InvalidConfig(
                "tree needs at least one task".into(),
            ));
        }
        Ok(())
    }
}
