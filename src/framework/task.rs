//! User task interface
//!
//! The framework drives one [`Task`] per node through these callbacks. All
//! callbacks from one framework instance run on a single dispatch queue, so
//! implementations never see two hooks at once and need not be reentrant.
//! Hooks may call back into the [`FrameworkHandle`] they received in
//! `init`; those calls enqueue work and return immediately.
//!
//! `Prefix` links deliver through the parent-flavored hooks and `Suffix`
//! links through the child-flavored ones.

use crate::common::{Error, Result};
use crate::framework::runtime::FrameworkHandle;

pub trait Task: Send + 'static {
    /// Called once a slot is claimed. `handle` is how the task talks back to
    /// the framework; it stays valid for the life of the node.
    fn init(&mut self, slot: u64, handle: FrameworkHandle);

    /// Called on shutdown or slot loss. `init` runs again if the node
    /// re-acquires a slot.
    fn exit(&mut self);

    /// The job moved to `epoch`. Delivered after the epoch fence: no
    /// callback from an earlier epoch arrives afterward.
    fn set_epoch(&mut self, epoch: u64);

    /// An upstream neighbor published a meta-notification.
    fn parent_meta_ready(&mut self, from: u64, meta: &str);

    /// A downstream neighbor published a meta-notification.
    fn child_meta_ready(&mut self, from: u64, meta: &str);

    /// Produce the payload for a data request from a downstream neighbor.
    fn serve_as_parent(&mut self, from: u64, req: &str) -> Result<Vec<u8>>;

    /// Produce the payload for a data request from an upstream neighbor.
    fn serve_as_child(&mut self, from: u64, req: &str) -> Result<Vec<u8>>;

    /// A data request against an upstream neighbor completed.
    fn parent_data_ready(&mut self, from: u64, req: &str, data: Vec<u8>);

    /// A data request against a downstream neighbor completed.
    fn child_data_ready(&mut self, from: u64, req: &str, data: Vec<u8>);

    /// A data request exhausted its retries. Epoch-mismatch responses never
    /// surface here; they are dropped at the fence.
    fn data_failed(&mut self, to: u64, req: &str, err: &Error) {
        let _ = (to, req, err);
    }
}
