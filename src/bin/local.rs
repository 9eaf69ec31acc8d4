//! Single-process demo cluster
//!
//! Spins an in-memory coordination store, a controller, and N framework
//! nodes running a sample tree task. Each epoch the root pushes a
//! "params-ready" meta-notification down the tree, every node fetches
//! parameters from its parent, and gradients flow back up as data requests.
//! Real deployments embed the library and bring their own store client;
//! this binary exists to watch the full stack work.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskmesh::{
    Controller, Framework, FrameworkHandle, FrameworkOptions, JobConfig, LinkType, MemoryStore,
    NodeConfig, RuntimeConfig, Task, Topology, TreeTopology,
};

#[derive(Parser)]
#[command(name = "taskmesh-local")]
#[command(about = "taskmesh single-process demo cluster")]
struct Cli {
    /// Job name
    #[arg(long, default_value = "local")]
    job: String,

    /// Number of task slots (and nodes)
    #[arg(long, default_value = "3")]
    tasks: u64,

    /// Tree fanout
    #[arg(long, default_value = "2")]
    fanout: u64,

    /// Epochs to run after the initial one
    #[arg(long, default_value = "3")]
    epochs: u64,

    /// Pause between epoch advances
    #[arg(long, default_value = "500")]
    interval_ms: u64,
}

/// Sample task: parameters flow down the tree, gradients flow back up.
struct DemoTask {
    topo: TreeTopology,
    slot: u64,
    epoch: u64,
    pending_children: usize,
    handle: Option<FrameworkHandle>,
}

impl DemoTask {
    fn new(fanout: u64, num_tasks: u64) -> Self {
        Self {
            topo: TreeTopology::new(fanout, num_tasks),
            slot: 0,
            epoch: 0,
            pending_children: 0,
            handle: None,
        }
    }

    fn handle(&self) -> &FrameworkHandle {
        self.handle.as_ref().expect("init not called")
    }

    fn children(&self) -> Vec<u64> {
        self.topo.neighbors(LinkType::Child, self.epoch)
    }

    fn is_root(&self) -> bool {
        self.slot == 0
    }

    /// Parameters are in hand; push the ready signal down, or start the
    /// gradient flow at the leaves.
    fn params_ready(&mut self) {
        self.pending_children = self.children().len();
        if self.pending_children > 0 {
            self.handle().flag_child_meta_ready(format!("params-ready@{}", self.epoch));
        } else if self.is_root() {
            tracing::info!(epoch = self.epoch, "single-node epoch complete");
        } else {
            self.handle().flag_parent_meta_ready(format!("grad-ready@{}", self.epoch));
        }
    }

    fn child_done(&mut self) {
        self.pending_children = self.pending_children.saturating_sub(1);
        if self.pending_children > 0 {
            return;
        }
        if self.is_root() {
            tracing::info!(epoch = self.epoch, "epoch complete at root");
        } else {
            self.handle().flag_parent_meta_ready(format!("grad-ready@{}", self.epoch));
        }
    }
}

impl Task for DemoTask {
    fn init(&mut self, slot: u64, handle: FrameworkHandle) {
        self.slot = slot;
        self.topo.set_slot(slot);
        self.handle = Some(handle);
        tracing::info!(slot, "demo task ready");
    }

    fn exit(&mut self) {
        tracing::info!(slot = self.slot, "demo task exiting");
    }

    fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
        if self.is_root() {
            self.params_ready();
        }
    }

    fn parent_meta_ready(&mut self, from: u64, meta: &str) {
        tracing::debug!(slot = self.slot, from, meta, "parent meta");
        self.handle().data_request(from, "parameters");
    }

    fn child_meta_ready(&mut self, from: u64, meta: &str) {
        tracing::debug!(slot = self.slot, from, meta, "child meta");
        self.handle().data_request(from, "gradient");
    }

    fn serve_as_parent(&mut self, _from: u64, _req: &str) -> taskmesh::Result<Vec<u8>> {
        Ok(format!("params:{}:{}", self.slot, self.epoch).into_bytes())
    }

    fn serve_as_child(&mut self, _from: u64, _req: &str) -> taskmesh::Result<Vec<u8>> {
        Ok(format!("grad:{}:{}", self.slot, self.epoch).into_bytes())
    }

    fn parent_data_ready(&mut self, from: u64, _req: &str, data: Vec<u8>) {
        tracing::info!(
            slot = self.slot,
            from,
            payload = %String::from_utf8_lossy(&data),
            "parameters received"
        );
        self.params_ready();
    }

    fn child_data_ready(&mut self, from: u64, _req: &str, data: Vec<u8>) {
        tracing::info!(
            slot = self.slot,
            from,
            payload = %String::from_utf8_lossy(&data),
            "gradient received"
        );
        self.child_done();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let job = JobConfig::new(&cli.job, cli.tasks);
    let store = Arc::new(MemoryStore::new());

    let mut controller = Controller::new(job.clone(), store.clone());
    controller.start().await?;

    let mut nodes = Vec::new();
    for _ in 0..cli.tasks {
        let node_cfg = NodeConfig::default();
        let listener = tokio::net::TcpListener::bind(node_cfg.bind_addr).await?;
        let node = Framework::start(FrameworkOptions {
            job: job.clone(),
            node: node_cfg,
            runtime: RuntimeConfig::default(),
            store: store.clone(),
            topology: Box::new(TreeTopology::new(cli.fanout, cli.tasks)),
            task: Box::new(DemoTask::new(cli.fanout, cli.tasks)),
            listener,
        })
        .await?;
        nodes.push(node);
    }

    for node in &nodes {
        let slot = node.wait_for_slot().await?;
        tracing::info!(slot, addr = %node.local_addr(), "node up");
    }

    for _ in 0..cli.epochs {
        tokio::time::sleep(Duration::from_millis(cli.interval_ms)).await;
        controller.advance_epoch().await?;
    }
    tokio::time::sleep(Duration::from_millis(cli.interval_ms)).await;

    for node in nodes {
        node.stop().await;
    }
    controller.stop().await?;
    Ok(())
}
