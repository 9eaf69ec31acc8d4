//! Job controller and failure detection
//!
//! The controller owns a job's lifecycle in the coordination store:
//! - layout creation (epoch, owner records) at job start,
//! - failure detection while the job runs,
//! - epoch advancement between iterations,
//! - recursive teardown of the job namespace at the end.

pub mod failure;
pub mod job;

pub use failure::FailureDetector;
pub use job::Controller;
