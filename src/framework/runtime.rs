//! Per-node framework runtime
//!
//! One [`Framework`] per process: it serves the data-transport endpoint,
//! claims a task slot through the coordination store (or stands by until one
//! frees up), keeps the slot alive with lease refreshes, watches the meta
//! keys its topology depends on, and drives the user task.
//!
//! Concurrency layout:
//! - the HTTP server, one watcher task per installed watch, the acquisition
//!   loop, and one task per outgoing data request all run concurrently;
//! - everything that touches the user task funnels into a single FIFO event
//!   queue consumed by the dispatcher, which owns the `Box<dyn Task>`
//!   outright, so the task sees a single-threaded world.
//!
//! Cancellation cascades through scoped tokens: stopping the node cancels
//! everything; an epoch change cancels the epoch scope (outstanding data
//! requests and the old epoch's meta watchers); slot loss does the same and
//! additionally re-enters acquisition.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::common::{Error, JobConfig, NodeConfig, Result, RuntimeConfig};
use crate::framework::address::AddressMap;
use crate::framework::event::Event;
use crate::framework::task::Task;
use crate::store::{CoordStore, StoreLayout, WatchEventKind, EMPTY_OWNER};
use crate::topology::{LinkType, Topology};
use crate::transport::{DataClient, ServeReply, ServeRequest};

/// Construction inputs for a node. No slot is supplied; acquisition is
/// dynamic.
pub struct FrameworkOptions {
    pub job: JobConfig,
    pub node: NodeConfig,
    pub runtime: RuntimeConfig,
    pub store: Arc<dyn CoordStore>,
    pub topology: Box<dyn Topology>,
    pub task: Box<dyn Task>,
    /// Pre-bound listener for the data-transport server.
    pub listener: TcpListener,
}

/// Cheap handle the user task (or embedding code) uses to talk to the
/// framework. All methods enqueue work and return immediately; they are safe
/// to call from inside task callbacks.
#[derive(Clone)]
pub struct FrameworkHandle {
    events: mpsc::UnboundedSender<Event>,
}

impl FrameworkHandle {
    /// Publish a meta-notification toward downstream neighbors (children or
    /// suffix slots) at the current epoch. Idempotent within an epoch.
    pub fn flag_child_meta_ready(&self, meta: impl Into<String>) {
        let _ = self.events.send(Event::FlagMeta {
            upstream: false,
            meta: meta.into(),
        });
    }

    /// Publish a meta-notification toward upstream neighbors (parent or
    /// prefix slots) at the current epoch. Idempotent within an epoch.
    pub fn flag_parent_meta_ready(&self, meta: impl Into<String>) {
        let _ = self.events.send(Event::FlagMeta {
            upstream: true,
            meta: meta.into(),
        });
    }

    /// Fetch data from a neighbor. The response arrives through
    /// `parent_data_ready` / `child_data_ready`, or `data_failed` after
    /// exhausted retries.
    pub fn data_request(&self, to: u64, req: impl Into<String>) {
        let _ = self.events.send(Event::DataRequest {
            to,
            req: req.into(),
        });
    }
}

/// A running node.
pub struct Framework {
    handle: FrameworkHandle,
    cancel: CancellationToken,
    local_addr: SocketAddr,
    slot_rx: watch::Receiver<Option<u64>>,
    dispatcher: JoinHandle<()>,
}

impl Framework {
    /// Bind the transport server and spawn the runtime. Returns as soon as
    /// the node is serving; slot acquisition proceeds in the background
    /// (see [`Framework::wait_for_slot`]).
    pub async fn start(opts: FrameworkOptions) -> Result<Framework> {
        opts.job.validate()?;
        opts.node.validate()?;
        opts.topology.validate()?;
        if opts.topology.num_tasks() != opts.job.num_tasks {
            return Err(Error::InvalidConfig(format!(
                "topology covers {} tasks, job declares {}",
                opts.topology.num_tasks(),
                opts.job.num_tasks
            )));
        }

        let local_addr = opts.listener.local_addr()?;
        let addr = local_addr.to_string();
        let layout = StoreLayout::new(&opts.job.name);
        let cancel = CancellationToken::new();
        let addresses = Arc::new(AddressMap::new());
        let client = DataClient::new(opts.runtime.request_timeout)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (serve_tx, mut serve_rx) = mpsc::unbounded_channel();
        let (owner_tx, owner_rx) = mpsc::unbounded_channel();
        let (slot_tx, slot_rx) = watch::channel(None);

        tracing::info!(job = %opts.job.name, %addr, "starting framework node");

        // transport server
        {
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                if let Err(e) = crate::transport::serve(opts.listener, serve_tx, cancel).await {
                    tracing::error!("data server error: {}", e);
                }
            });
        }

        // inbound data requests join the dispatch queue
        {
            let events = events_tx.clone();
            tokio::spawn(async move {
                while let Some(request) = serve_rx.recv().await {
                    if events.send(Event::Serve(request)).is_err() {
                        break;
                    }
                }
            });
        }

        // one owner watcher per slot keeps the address map fresh and feeds
        // the acquisition loop
        for slot in 0..opts.job.num_tasks {
            tokio::spawn(watch_owner(
                opts.store.clone(),
                layout.owner_key(slot),
                slot,
                addresses.clone(),
                owner_tx.clone(),
                cancel.child_token(),
            ));
        }

        // epoch watcher
        tokio::spawn(watch_epoch(
            opts.store.clone(),
            layout.epoch_key(),
            events_tx.clone(),
            cancel.clone(),
        ));

        // acquisition loop
        let acquirer = Acquirer {
            store: opts.store.clone(),
            layout: layout.clone(),
            num_tasks: opts.job.num_tasks,
            addr: addr.clone(),
            ttl: opts.node.owner_ttl(),
            standby_interval: opts.node.standby_interval(),
            events: events_tx.clone(),
            owner_rx,
            cancel: cancel.clone(),
        };
        tokio::spawn(acquirer.run());

        let handle = FrameworkHandle {
            events: events_tx.clone(),
        };
        let dispatcher = Dispatcher {
            job: opts.job,
            layout,
            store: opts.store,
            topology: opts.topology,
            task: opts.task,
            addresses,
            client,
            runtime: opts.runtime,
            events_tx,
            handle: handle.clone(),
            slot_tx,
            addr,
            slot: None,
            epoch: 0,
            epoch_scope: cancel.child_token(),
            seen_meta: HashSet::new(),
            cancel: cancel.clone(),
        };
        let dispatcher = tokio::spawn(dispatcher.run(events_rx));

        Ok(Framework {
            handle,
            cancel,
            local_addr,
            slot_rx,
            dispatcher,
        })
    }

    pub fn handle(&self) -> FrameworkHandle {
        self.handle.clone()
    }

    /// Address the transport server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The currently held slot, if any.
    pub fn slot(&self) -> Option<u64> {
        *self.slot_rx.borrow()
    }

    /// Wait until this node holds a slot and its task has been initialized.
    pub async fn wait_for_slot(&self) -> Result<u64> {
        let mut rx = self.slot_rx.clone();
        loop {
            if let Some(slot) = *rx.borrow_and_update() {
                return Ok(slot);
            }
            if rx.changed().await.is_err() {
                return Err(Error::Internal("framework stopped".into()));
            }
        }
    }

    /// See [`FrameworkHandle::flag_child_meta_ready`].
    pub fn flag_child_meta_ready(&self, meta: impl Into<String>) {
        self.handle.flag_child_meta_ready(meta);
    }

    /// See [`FrameworkHandle::flag_parent_meta_ready`].
    pub fn flag_parent_meta_ready(&self, meta: impl Into<String>) {
        self.handle.flag_parent_meta_ready(meta);
    }

    /// See [`FrameworkHandle::data_request`].
    pub fn data_request(&self, to: u64, req: impl Into<String>) {
        self.handle.data_request(to, req);
    }

    /// Cancel all watches and in-flight work, release the slot, stop the
    /// transport server, and run the task's `exit` hook.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.dispatcher.await;
    }
}

// === owner and epoch watchers ===

#[derive(Debug)]
struct OwnerChange {
    slot: u64,
    kind: WatchEventKind,
    value: Option<String>,
}

async fn watch_owner(
    store: Arc<dyn CoordStore>,
    key: String,
    slot: u64,
    addresses: Arc<AddressMap>,
    notify: mpsc::UnboundedSender<OwnerChange>,
    cancel: CancellationToken,
) {
    let mut rx = match store.watch(&key).await {
        Ok(rx) => rx,
        Err(e) => {
            tracing::warn!(slot, "owner watch failed: {}", e);
            return;
        }
    };
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            event = rx.recv() => {
                let Some(event) = event else { return };
                match (&event.kind, event.value.as_deref()) {
                    (WatchEventKind::Put, Some(v)) if v != EMPTY_OWNER => {
                        addresses.set(slot, v.to_string());
                    }
                    _ => addresses.remove(slot),
                }
                if notify
                    .send(OwnerChange { slot, kind: event.kind, value: event.value })
                    .is_err()
                {
                    return;
                }
            }
        }
    }
}

async fn watch_epoch(
    store: Arc<dyn CoordStore>,
    key: String,
    events: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
) {
    let mut rx = match store.watch(&key).await {
        Ok(rx) => rx,
        Err(e) => {
            tracing::warn!("epoch watch failed: {}", e);
            return;
        }
    };
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            event = rx.recv() => {
                let Some(event) = event else { return };
                match event.kind {
                    WatchEventKind::Put => {
                        let Some(value) = event.value else { continue };
                        match value.trim().parse::<u64>() {
                            Ok(epoch) => {
                                if events.send(Event::EpochChanged { epoch }).is_err() {
                                    return;
                                }
                            }
                            Err(_) => {
                                // invariant violation: stop the node, never panic
                                tracing::error!(value = %value, "unparseable epoch value");
                                cancel.cancel();
                                return;
                            }
                        }
                    }
                    WatchEventKind::Delete => {
                        tracing::info!("job namespace removed, stopping node");
                        cancel.cancel();
                        return;
                    }
                    WatchEventKind::Expire => {}
                }
            }
        }
    }
}

// === slot acquisition ===

enum HoldEnd {
    Cancelled,
    Lost,
}

struct Acquirer {
    store: Arc<dyn CoordStore>,
    layout: StoreLayout,
    num_tasks: u64,
    addr: String,
    ttl: std::time::Duration,
    standby_interval: std::time::Duration,
    events: mpsc::UnboundedSender<Event>,
    owner_rx: mpsc::UnboundedReceiver<OwnerChange>,
    cancel: CancellationToken,
}

impl Acquirer {
    async fn run(mut self) {
        loop {
            let Some(slot) = self.acquire().await else {
                return;
            };
            let epoch = match self.read_epoch().await {
                Ok(epoch) => epoch,
                Err(e) => {
                    tracing::error!(slot, "cannot read job epoch: {}", e);
                    self.cancel.cancel();
                    return;
                }
            };
            if self
                .events
                .send(Event::SlotAcquired { slot, epoch })
                .is_err()
            {
                return;
            }
            match self.hold(slot).await {
                HoldEnd::Cancelled => return,
                HoldEnd::Lost => {
                    if self.events.send(Event::SlotLost).is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Sweep slots in ascending order, CAS `"empty"` into our address. A
    /// full sweep without a win means standby: wait for an owner change or
    /// the fallback tick and try again.
    async fn acquire(&mut self) -> Option<u64> {
        let mut standby = false;
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            match self.sweep().await {
                Ok(Some(slot)) => return Some(slot),
                Ok(None) => {
                    if !standby {
                        standby = true;
                        tracing::info!("no free slot, standing by");
                    }
                }
                Err(e) => tracing::warn!("slot sweep failed: {}", e),
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.standby_interval) => {}
                change = self.owner_rx.recv() => {
                    if change.is_none() {
                        return None;
                    }
                    // any owner movement is worth a fresh sweep
                }
            }
        }
    }

    async fn sweep(&self) -> Result<Option<u64>> {
        for slot in 0..self.num_tasks {
            let key = self.layout.owner_key(slot);
            match self.store.get(&key).await? {
                Some(value) if value == EMPTY_OWNER => {
                    if self
                        .store
                        .compare_and_swap(&key, EMPTY_OWNER, &self.addr, Some(self.ttl))
                        .await?
                    {
                        tracing::info!(slot, addr = %self.addr, "claimed slot");
                        return Ok(Some(slot));
                    }
                    // lost the race, keep sweeping
                }
                _ => {}
            }
        }
        Ok(None)
    }

    async fn read_epoch(&self) -> Result<u64> {
        let value = self
            .store
            .get(&self.layout.epoch_key())
            .await?
            .ok_or_else(|| Error::Internal("job epoch key missing".into()))?;
        value
            .trim()
            .parse::<u64>()
            .map_err(|_| Error::Internal(format!("unparseable epoch value: {}", value)))
    }

    /// Keep the lease fresh and monitor the owner record. Watch events can
    /// be stale (queued before our claim), so a suspicious event is
    /// confirmed against the store before declaring the slot lost.
    async fn hold(&mut self, slot: u64) -> HoldEnd {
        let key = self.layout.owner_key(slot);
        let mut ticker = tokio::time::interval(self.ttl / 3);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // immediate first tick

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return HoldEnd::Cancelled,
                _ = ticker.tick() => {
                    if let Err(e) = self.store.refresh(&key, self.ttl).await {
                        tracing::warn!(slot, "lease refresh failed: {}", e);
                        return HoldEnd::Lost;
                    }
                }
                change = self.owner_rx.recv() => {
                    let Some(change) = change else { return HoldEnd::Cancelled };
                    if change.slot != slot {
                        continue;
                    }
                    match change.kind {
                        WatchEventKind::Put
                            if change.value.as_deref() == Some(self.addr.as_str()) => {}
                        WatchEventKind::Put => {
                            match self.store.get(&key).await {
                                Ok(Some(v)) if v == self.addr => {} // stale event
                                _ => {
                                    tracing::warn!(slot, "owner record rewritten, slot lost");
                                    return HoldEnd::Lost;
                                }
                            }
                        }
                        WatchEventKind::Expire | WatchEventKind::Delete => {
                            if self.store.refresh(&key, self.ttl).await.is_err() {
                                tracing::warn!(slot, "lease gone, slot lost");
                                return HoldEnd::Lost;
                            }
                        }
                    }
                }
            }
        }
    }
}

// === dispatcher ===

struct Dispatcher {
    job: JobConfig,
    layout: StoreLayout,
    store: Arc<dyn CoordStore>,
    topology: Box<dyn Topology>,
    task: Box<dyn Task>,
    addresses: Arc<AddressMap>,
    client: DataClient,
    runtime: RuntimeConfig,
    events_tx: mpsc::UnboundedSender<Event>,
    handle: FrameworkHandle,
    slot_tx: watch::Sender<Option<u64>>,
    addr: String,
    slot: Option<u64>,
    epoch: u64,
    epoch_scope: CancellationToken,
    seen_meta: HashSet<(u64, LinkType, String)>,
    cancel: CancellationToken,
}

impl Dispatcher {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    self.handle_event(event).await;
                }
            }
        }
        self.shutdown().await;
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::SlotAcquired { slot, epoch } => {
                self.slot = Some(slot);
                // the epoch watcher may already have seen a later value than
                // the acquirer's read
                self.epoch = epoch.max(self.epoch);
                let epoch = self.epoch;
                self.topology.set_slot(slot);
                self.epoch_scope = self.cancel.child_token();
                self.seen_meta.clear();
                tracing::info!(slot, epoch, "task starting");
                self.task.init(slot, self.handle.clone());
                self.task.set_epoch(epoch);
                self.install_meta_watches();
                self.slot_tx.send_replace(Some(slot));
            }

            Event::SlotLost => {
                if self.slot.take().is_some() {
                    self.epoch_scope.cancel();
                    self.seen_meta.clear();
                    tracing::warn!("slot lost, stopping task");
                    self.task.exit();
                    self.slot_tx.send_replace(None);
                }
            }

            Event::EpochChanged { epoch } => {
                if self.slot.is_none() {
                    self.epoch = epoch;
                    return;
                }
                if epoch <= self.epoch {
                    return;
                }
                // the fence: cancel work from the old epoch before the task
                // hears about the new one
                self.epoch_scope.cancel();
                self.epoch_scope = self.cancel.child_token();
                self.seen_meta.clear();
                self.epoch = epoch;
                self.install_meta_watches();
                tracing::debug!(epoch, "epoch advanced");
                self.task.set_epoch(epoch);
            }

            Event::MetaReady {
                from,
                link,
                epoch,
                meta,
            } => {
                if self.slot.is_none() || epoch != self.epoch {
                    return;
                }
                if !self.seen_meta.insert((from, link, meta.clone())) {
                    return; // re-published value, already delivered
                }
                if link.is_upstream() {
                    self.task.parent_meta_ready(from, &meta);
                } else {
                    self.task.child_meta_ready(from, &meta);
                }
            }

            Event::DataResponse {
                from,
                link,
                epoch,
                req,
                data,
            } => {
                if self.slot.is_none() || epoch != self.epoch {
                    tracing::debug!(from, req = %req, "dropping stale data response");
                    return;
                }
                if link.is_upstream() {
                    self.task.parent_data_ready(from, &req, data);
                } else {
                    self.task.child_data_ready(from, &req, data);
                }
            }

            Event::DataFailed {
                to,
                epoch,
                req,
                error,
            } => {
                if self.slot.is_none() || epoch != self.epoch {
                    return;
                }
                tracing::warn!(to, req = %req, "data request failed: {}", error);
                self.task.data_failed(to, &req, &error);
            }

            Event::Serve(request) => self.serve(request),

            Event::FlagMeta { upstream, meta } => self.publish_meta(upstream, meta).await,

            Event::DataRequest { to, req } => self.spawn_data_request(to, req),
        }
    }

    fn serve(&mut self, request: ServeRequest) {
        let ServeRequest {
            from,
            epoch,
            req,
            reply,
        } = request;

        let response = if self.slot.is_none() {
            ServeReply::Internal("no slot held".into())
        } else if epoch != self.epoch {
            ServeReply::EpochMismatch {
                current: self.epoch,
            }
        } else if from >= self.job.num_tasks {
            ServeReply::BadRequest(format!("slot {} out of range", from))
        } else {
            match self.link_toward(from) {
                // an upstream requester sees us as its child
                Some(link) if link.is_upstream() => match self.task.serve_as_child(from, &req) {
                    Ok(data) => ServeReply::Data(data),
                    Err(e) => ServeReply::Internal(e.to_string()),
                },
                Some(_) => match self.task.serve_as_parent(from, &req) {
                    Ok(data) => ServeReply::Data(data),
                    Err(e) => ServeReply::Internal(e.to_string()),
                },
                None => ServeReply::BadRequest(format!("slot {} is not a neighbor", from)),
            }
        };
        let _ = reply.send(response);
    }

    /// This slot's link toward `other`, if they are neighbors.
    fn link_toward(&self, other: u64) -> Option<LinkType> {
        self.topology
            .link_types()
            .iter()
            .copied()
            .find(|&link| self.topology.neighbors(link, self.epoch).contains(&other))
    }

    fn outgoing_link(&self, upstream: bool) -> Option<LinkType> {
        self.topology
            .link_types()
            .iter()
            .copied()
            .find(|link| link.is_upstream() == upstream)
    }

    async fn publish_meta(&mut self, upstream: bool, meta: String) {
        let Some(slot) = self.slot else {
            tracing::warn!("meta publish without a slot, dropped");
            return;
        };
        let Some(link) = self.outgoing_link(upstream) else {
            tracing::warn!(upstream, "topology defines no such link, meta dropped");
            return;
        };
        let key = self.layout.meta_key(slot, link, self.epoch);
        match self.store.create(&key, &meta, None).await {
            Ok(()) => {}
            Err(Error::KeyExists(_)) => {
                // idempotent within an epoch: same value is a no-op
                match self.store.get(&key).await {
                    Ok(Some(current)) if current == meta => {}
                    Ok(Some(current)) => {
                        tracing::warn!(%key, "meta rewritten within epoch");
                        let _ = self
                            .store
                            .compare_and_swap(&key, &current, &meta, None)
                            .await;
                    }
                    Ok(None) | Err(_) => {
                        tracing::warn!(%key, "meta publish race, value unknown");
                    }
                }
            }
            Err(e) => tracing::warn!(%key, "meta publish failed: {}", e),
        }
    }

    fn spawn_data_request(&mut self, to: u64, req: String) {
        let Some(slot) = self.slot else {
            tracing::warn!(to, "data request without a slot, dropped");
            return;
        };
        let Some(link) = self.link_toward(to) else {
            tracing::warn!(to, "data request to a non-neighbor, dropped");
            self.task
                .data_failed(to, &req, &Error::NotNeighbor { from: to });
            return;
        };
        tokio::spawn(fetch_data(FetchJob {
            store: self.store.clone(),
            layout: self.layout.clone(),
            addresses: self.addresses.clone(),
            client: self.client.clone(),
            events: self.events_tx.clone(),
            runtime: self.runtime.clone(),
            from_slot: slot,
            to,
            link,
            epoch: self.epoch,
            req,
            scope: self.epoch_scope.clone(),
        }));
    }

    fn install_meta_watches(&self) {
        for &link in self.topology.link_types() {
            for neighbor in self.topology.neighbors(link, self.epoch) {
                // the neighbor publishes on its own side of the relation
                let key = self.layout.meta_key(neighbor, link.dual(), self.epoch);
                tokio::spawn(watch_meta(
                    self.store.clone(),
                    key,
                    neighbor,
                    link,
                    self.epoch,
                    self.events_tx.clone(),
                    self.epoch_scope.clone(),
                ));
            }
        }
    }

    async fn shutdown(&mut self) {
        self.epoch_scope.cancel();
        if let Some(slot) = self.slot.take() {
            self.task.exit();
            let key = self.layout.owner_key(slot);
            match self
                .store
                .compare_and_swap(&key, &self.addr, EMPTY_OWNER, None)
                .await
            {
                Ok(true) => tracing::info!(slot, "released slot"),
                Ok(false) => tracing::debug!(slot, "owner record already rewritten"),
                Err(e) => tracing::debug!(slot, "slot release skipped: {}", e),
            }
            self.slot_tx.send_replace(None);
        }
        tracing::info!("framework node stopped");
    }
}

async fn watch_meta(
    store: Arc<dyn CoordStore>,
    key: String,
    from: u64,
    link: LinkType,
    epoch: u64,
    events: mpsc::UnboundedSender<Event>,
    scope: CancellationToken,
) {
    let mut rx = tokio::select! {
        _ = scope.cancelled() => return,
        result = store.watch(&key) => match result {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!(%key, "meta watch failed: {}", e);
                return;
            }
        }
    };
    loop {
        tokio::select! {
            _ = scope.cancelled() => return,
            event = rx.recv() => {
                let Some(event) = event else { return };
                if event.kind != WatchEventKind::Put {
                    continue;
                }
                let Some(meta) = event.value else { continue };
                if events
                    .send(Event::MetaReady { from, link, epoch, meta })
                    .is_err()
                {
                    return;
                }
            }
        }
    }
}

// === outgoing data requests ===

struct FetchJob {
    store: Arc<dyn CoordStore>,
    layout: StoreLayout,
    addresses: Arc<AddressMap>,
    client: DataClient,
    events: mpsc::UnboundedSender<Event>,
    runtime: RuntimeConfig,
    from_slot: u64,
    to: u64,
    link: LinkType,
    epoch: u64,
    req: String,
    scope: CancellationToken,
}

async fn fetch_data(job: FetchJob) {
    let outcome = tokio::select! {
        _ = job.scope.cancelled() => return, // epoch fence or shutdown
        outcome = try_fetch(&job) => outcome,
    };
    let event = match outcome {
        Ok(data) => Event::DataResponse {
            from: job.to,
            link: job.link,
            epoch: job.epoch,
            req: job.req,
            data,
        },
        Err(Error::EpochMismatch { current }) => {
            // the fence will deliver the new epoch; nothing to surface
            tracing::debug!(to = job.to, current, "peer at different epoch, response dropped");
            return;
        }
        Err(error) => Event::DataFailed {
            to: job.to,
            epoch: job.epoch,
            req: job.req,
            error,
        },
    };
    let _ = job.events.send(event);
}

/// Bounded retries with address re-resolution: the owner may have moved
/// between attempts.
async fn try_fetch(job: &FetchJob) -> Result<Vec<u8>> {
    let mut last_err = Error::AddressUnknown(job.to);
    for attempt in 0..job.runtime.max_retries {
        if attempt > 0 {
            tokio::time::sleep(job.runtime.retry_delay).await;
        }
        let addr = match resolve_addr(job).await {
            Ok(addr) => addr,
            Err(e) => {
                last_err = e;
                continue;
            }
        };
        match job
            .client
            .fetch(&addr, job.from_slot, job.epoch, &job.req)
            .await
        {
            Ok(data) => return Ok(data),
            Err(e @ Error::EpochMismatch { .. }) => return Err(e),
            Err(e) if e.is_retryable() => {
                tracing::debug!(to = job.to, attempt, "data fetch retry: {}", e);
                last_err = e;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err)
}

async fn resolve_addr(job: &FetchJob) -> Result<String> {
    if let Some(addr) = job.addresses.get(job.to) {
        return Ok(addr);
    }
    // the map can lag; fall back to the owner record
    match job.store.get(&job.layout.owner_key(job.to)).await? {
        Some(value) if value != EMPTY_OWNER => Ok(value),
        _ => Err(Error::AddressUnknown(job.to)),
    }
}
