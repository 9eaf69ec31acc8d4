//! Per-node task framework
//!
//! The framework is the runtime each node embeds:
//! - claims a task slot (or stands by for one),
//! - resolves peer addresses from the owner records,
//! - watches the meta keys its topology depends on,
//! - serves and issues data requests,
//! - drives the user task through a serialized callback queue.

pub mod address;
pub mod event;
pub mod runtime;
pub mod task;

pub use runtime::{Framework, FrameworkHandle, FrameworkOptions};
pub use task::Task;
