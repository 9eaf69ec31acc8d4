//! Dispatcher events
//!
//! Everything that may touch the user task funnels into one FIFO queue:
//! watch fires, data responses, serve requests, slot transitions, and the
//! handle's outgoing calls. The dispatcher consumes the queue alone, which
//! is what serializes task callbacks.

use crate::common::Error;
use crate::topology::LinkType;
use crate::transport::ServeRequest;

#[derive(Debug)]
pub(crate) enum Event {
    /// The acquisition loop claimed a slot at the given epoch.
    SlotAcquired { slot: u64, epoch: u64 },

    /// The claimed slot was lost (lease expired or owner rewritten).
    SlotLost,

    /// The job epoch key changed.
    EpochChanged { epoch: u64 },

    /// A neighbor's meta key fired. `link` is this slot's link toward the
    /// sender; `epoch` is the epoch the watch was installed for.
    MetaReady {
        from: u64,
        link: LinkType,
        epoch: u64,
        meta: String,
    },

    /// A data fetch completed. `epoch` is the epoch the request was issued
    /// in; stale responses are dropped at the fence.
    DataResponse {
        from: u64,
        link: LinkType,
        epoch: u64,
        req: String,
        data: Vec<u8>,
    },

    /// A data fetch exhausted its retries.
    DataFailed {
        to: u64,
        epoch: u64,
        req: String,
        error: Error,
    },

    /// An inbound data request awaiting a payload.
    Serve(ServeRequest),

    /// Handle call: publish a meta-notification on an outgoing link.
    FlagMeta { upstream: bool, meta: String },

    /// Handle call: fetch data from a neighbor.
    DataRequest { to: u64, req: String },
}
