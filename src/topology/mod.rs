//! Task topologies
//!
//! A topology is a pure function from a task slot to its neighbor sets, one
//! set per link-type. The framework reads neighbor sets to decide which meta
//! keys to watch and which peers may exchange data; topologies never touch
//! the network or the store.

pub mod mapreduce;
pub mod tree;

use std::fmt;

pub use mapreduce::MapReduceTopology;
pub use tree::TreeTopology;

/// Directed relation class between neighboring slots. The name appears in
/// coordination-store meta keys, so variants are stable identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    Parent,
    Child,
    Prefix,
    Suffix,
}

impl LinkType {
    /// The same relation seen from the other endpoint.
    pub fn dual(self) -> LinkType {
        match self {
            LinkType::Parent => LinkType::Child,
            LinkType::Child => LinkType::Parent,
            LinkType::Prefix => LinkType::Suffix,
            LinkType::Suffix => LinkType::Prefix,
        }
    }

    /// Whether the link points at upstream slots (data producers this slot
    /// consumes from). Upstream links deliver through the parent-flavored
    /// task hooks, downstream links through the child-flavored ones.
    pub fn is_upstream(self) -> bool {
        matches!(self, LinkType::Parent | LinkType::Prefix)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LinkType::Parent => "Parent",
            LinkType::Child => "Child",
            LinkType::Prefix => "Prefix",
            LinkType::Suffix => "Suffix",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Neighbor computation for one slot of a job.
///
/// Implementations are deterministic in `(slot, epoch, configuration)`,
/// never include the slot itself in a neighbor set, keep every returned slot
/// inside `[0, num_tasks)`, and allocate a fresh vector per call. The
/// iteration order of a neighbor set is part of the contract; callers may
/// rely on it.
pub trait Topology: Send + 'static {
    /// Total number of slots in the job.
    fn num_tasks(&self) -> u64;

    /// The link-types this topology defines.
    fn link_types(&self) -> &'static [LinkType];

    /// Install the slot this instance computes neighbors for.
    fn set_slot(&mut self, slot: u64);

    /// Current neighbors on `link`. The tree and map-reduce topologies are
    /// time-invariant; `epoch` is threaded through for topologies that
    /// reshape between iterations.
    fn neighbors(&self, link: LinkType, epoch: u64) -> Vec<u64>;

    /// Reject impossible configurations before any slot is claimed.
    fn validate(&self) -> crate::Result<()>;
}
