//! Map-reduce topology
//!
//! Three layers in slot order: `M` mappers, `S` shufflers, `R` reducers.
//! Every shuffler consumes from all mappers; shufflers are divided across
//! reducers as evenly as possible, contiguously in shuffler-slot order.
//! `Prefix` points upstream (toward producers), `Suffix` downstream.
//!
//! With `q = S / R` and `rem = S % R`, the first `rem` reducers consume
//! `q + 1` shufflers each and the remaining `R - rem` consume `q`.

use super::{LinkType, Topology};

const LINK_TYPES: &[LinkType] = &[LinkType::Prefix, LinkType::Suffix];

#[derive(Debug, Clone)]
pub struct MapReduceTopology {
    mappers: u64,
    shufflers: u64,
    reducers: u64,
    slot: Option<u64>,
}

impl MapReduceTopology {
    pub fn new(mappers: u64, shufflers: u64, reducers: u64) -> Self {
        Self {
            mappers,
            shufflers,
            reducers,
            slot: None,
        }
    }

    fn split(&self) -> (u64, u64) {
        (self.shufflers / self.reducers, self.shufflers % self.reducers)
    }

    /// Reducer index fed by shuffler `j` (zero-based within the layer).
    fn reducer_for(&self, j: u64) -> u64 {
        let (q, rem) = self.split();
        if j < rem * (q + 1) {
            j / (q + 1)
        } else {
            rem + (j - rem * (q + 1)) / q
        }
    }

    /// Shuffler slots assigned to reducer `k` (zero-based within the layer).
    fn shufflers_for(&self, k: u64) -> Vec<u64> {
        let (q, rem) = self.split();
        let (start, len) = if k < rem {
            (k * (q + 1), q + 1)
        } else {
            (rem * (q + 1) + (k - rem) * q, q)
        };
        (start..start + len).map(|j| self.mappers + j).collect()
    }

    fn prefix(&self, slot: u64) -> Vec<u64> {
        if slot < self.mappers {
            Vec::new()
        } else if slot < self.mappers + self.shufflers {
            (0..self.mappers).collect()
        } else {
            self.shufflers_for(slot - self.mappers - self.shufflers)
        }
    }

    fn suffix(&self, slot: u64) -> Vec<u64> {
        if slot < self.mappers {
            (self.mappers..self.mappers + self.shufflers).collect()
        } else if slot < self.mappers + self.shufflers {
            let target = self.reducer_for(slot - self.mappers);
            vec![self.mappers + self.shufflers + target]
        } else {
            Vec::new()
        }
    }
}

impl Topology for MapReduceTopology {
    fn num_tasks(&self) -> u64 {
        self.mappers + self.shufflers + self.reducers
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
            LinkType::Prefix => self.prefix(slot),
            LinkType::Suffix => self.suffix(slot),
            _ => Vec::new(),
        }
    }

    fn validate(&self) -> crate::Result<()> {
        if self.mappers == 0 || self.shufflers == 0 || self.reducers == 0 {
            return Err(crate::Error::InvalidConfig(
                "map-reduce layers must each hold at least one task".into(),
            ));
        }
        Ok(())
    }
}
