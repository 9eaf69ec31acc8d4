//! # taskmesh
//!
//! A coordination framework for running a fixed set of cooperating tasks
//! arranged in an application-defined topology across a cluster:
//! - slot acquisition and standby promotion through a strongly consistent
//!   coordination store (compare-and-swap on owner records, leases for
//!   liveness),
//! - neighbor discovery from pure topology functions (tree, map-reduce),
//! - meta-notifications propagated through store watches,
//! - bulk payloads fetched on demand between peers over HTTP,
//! - epochs fencing one logical iteration from the next.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            Coordination store            │
//! │   /taskmesh/<job>/epoch                  │
//! │   /taskmesh/<job>/slots/<i>/owner        │
//! │   /taskmesh/<job>/slots/<i>/meta/...     │
//! └────┬────────────┬────────────┬───────────┘
//!      │ CAS/watch  │            │
//! ┌────▼──────┐ ┌───▼───────┐ ┌──▼────────────┐
//! │ Node 0    │ │ Node 1    │ │ Controller    │
//! │ slot 0    │ │ slot 1    │ │  - layout     │
//! │ user task │ │ user task │ │  - epochs     │
//! └────┬──────┘ └───▲───────┘ │  - failure    │
//!      │  HTTP GET  │         │    detection  │
//!      └────────────┘         └───────────────┘
//!         /datareq
//! ```
//!
//! ## Usage
//!
//! A node embeds the framework with a user [`Task`] implementation:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use taskmesh::{Framework, FrameworkOptions, JobConfig, MemoryStore};
//! # use taskmesh::{NodeConfig, RuntimeConfig, TreeTopology};
//! # async fn run(task: Box<dyn taskmesh::Task>) -> taskmesh::Result<()> {
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
//! let node = Framework::start(FrameworkOptions {
//!     job: JobConfig::new("train", 4),
//!     node: NodeConfig::default(),
//!     runtime: RuntimeConfig::default(),
//!     store: Arc::new(MemoryStore::new()),
//!     topology: Box::new(TreeTopology::new(2, 4)),
//!     task,
//!     listener,
//! })
//! .await?;
//! let slot = node.wait_for_slot().await?;
//! # let _ = slot;
//! node.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! The controller runs once per job on a coordinator node; see
//! [`Controller`].

pub mod common;
pub mod controller;
pub mod framework;
pub mod store;
pub mod topology;
pub mod transport;

// Re-export commonly used types
pub use common::{Config, Error, JobConfig, NodeConfig, Result, RuntimeConfig};
pub use controller::{Controller, FailureDetector};
pub use framework::{Framework, FrameworkHandle, FrameworkOptions, Task};
pub use store::{CoordStore, MemoryStore, StoreLayout};
pub use topology::{LinkType, MapReduceTopology, Topology, TreeTopology};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
