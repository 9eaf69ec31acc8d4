//! Coordination-store layer
//!
//! Holds the client interface the framework programs against, the key
//! schema for a job's namespace, and an in-process store implementation
//! for tests and local clusters.

pub mod client;
pub mod layout;
pub mod memory;

pub use client::{CoordStore, WatchEvent, WatchEventKind, WatchStream};
pub use layout::{StoreLayout, EMPTY_OWNER, LAYOUT_VERSION};
pub use memory::MemoryStore;
