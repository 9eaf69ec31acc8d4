//! End-to-end framework tests
//!
//! Two-node scenarios over real sockets and the in-memory coordination
//! store: meta round-trips, data fetches, the slot-acquisition race, and
//! the epoch fence. A capture task forwards every callback to the test over
//! a channel so delivery order and payloads can be asserted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use taskmesh::{
    Controller, Error, Framework, FrameworkHandle, FrameworkOptions, JobConfig, MemoryStore,
    NodeConfig, RuntimeConfig, Task, TreeTopology,
};

#[derive(Debug, PartialEq)]
enum TaskEvent {
    Init { slot: u64 },
    Exit,
    Epoch(u64),
    ParentMeta { from: u64, meta: String },
    ChildMeta { from: u64, meta: String },
    ServedAsParent { from: u64, req: String },
    ServedAsChild { from: u64, req: String },
    ParentData { from: u64, req: String, data: Vec<u8> },
    ChildData { from: u64, req: String, data: Vec<u8> },
    Failed { to: u64, req: String },
}

/// Forwards every callback to the test for inspection; serves payloads out
/// of a fixed request → bytes map.
struct CaptureTask {
    events: mpsc::UnboundedSender<TaskEvent>,
    data: HashMap<String, Vec<u8>>,
}

impl CaptureTask {
    fn new(events: mpsc::UnboundedSender<TaskEvent>) -> Self {
        Self {
            events,
            data: HashMap::new(),
        }
    }

    fn with_data(events: mpsc::UnboundedSender<TaskEvent>, data: &[(&str, &[u8])]) -> Self {
        Self {
            events,
            data: data
                .iter()
                .map(|(req, bytes)| (req.to_string(), bytes.to_vec()))
                .collect(),
        }
    }

    fn send(&self, event: TaskEvent) {
        let _ = self.events.send(event);
    }
}

impl Task for CaptureTask {
    fn init(&mut self, slot: u64, _handle: FrameworkHandle) {
        self.send(TaskEvent::Init { slot });
    }

    fn exit(&mut self) {
        self.send(TaskEvent::Exit);
    }

    fn set_epoch(&mut self, epoch: u64) {
        self.send(TaskEvent::Epoch(epoch));
    }

    fn parent_meta_ready(&mut self, from: u64, meta: &str) {
        self.send(TaskEvent::ParentMeta {
            from,
            meta: meta.to_string(),
        });
    }

    fn child_meta_ready(&mut self, from: u64, meta: &str) {
        self.send(TaskEvent::ChildMeta {
            from,
            meta: meta.to_string(),
        });
    }

    fn serve_as_parent(&mut self, from: u64, req: &str) -> taskmesh::Result<Vec<u8>> {
        self.send(TaskEvent::ServedAsParent {
            from,
            req: req.to_string(),
        });
        self.data
            .get(req)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no payload for {}", req)))
    }

    fn serve_as_child(&mut self, from: u64, req: &str) -> taskmesh::Result<Vec<u8>> {
        self.send(TaskEvent::ServedAsChild {
            from,
            req: req.to_string(),
        });
        self.data
            .get(req)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no payload for {}", req)))
    }

    fn parent_data_ready(&mut self, from: u64, req: &str, data: Vec<u8>) {
        self.send(TaskEvent::ParentData {
            from,
            req: req.to_string(),
            data,
        });
    }

    fn child_data_ready(&mut self, from: u64, req: &str, data: Vec<u8>) {
        self.send(TaskEvent::ChildData {
            from,
            req: req.to_string(),
            data,
        });
    }

    fn data_failed(&mut self, to: u64, req: &str, _err: &Error) {
        self.send(TaskEvent::Failed {
            to,
            req: req.to_string(),
        });
    }
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<TaskEvent>) -> TaskEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for task event")
        .expect("task event channel closed")
}

async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<TaskEvent>, for_ms: u64) {
    if let Ok(event) = timeout(Duration::from_millis(for_ms), rx.recv()).await {
        panic!("unexpected task event: {:?}", event.unwrap());
    }
}

async fn start_node(
    store: Arc<MemoryStore>,
    job: &JobConfig,
    fanout: u64,
    task: CaptureTask,
    runtime: RuntimeConfig,
) -> Framework {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    Framework::start(FrameworkOptions {
        job: job.clone(),
        node: NodeConfig::default(),
        runtime,
        store,
        topology: Box::new(TreeTopology::new(fanout, job.num_tasks)),
        task: Box::new(task),
        listener,
    })
    .await
    .unwrap()
}

/// Wait for init and the first epoch, returning the claimed slot.
async fn expect_started(rx: &mut mpsc::UnboundedReceiver<TaskEvent>) -> u64 {
    let TaskEvent::Init { slot } = recv(rx).await else {
        panic!("expected init first");
    };
    assert_eq!(recv(rx).await, TaskEvent::Epoch(0));
    slot
}

/// Two-node tree: slot 0 is parent, slot 1 is child. Meta-notifications
/// cross in both directions, a re-published value is not re-delivered, and
/// later values supersede earlier ones.
#[tokio::test]
async fn test_meta_round_trip() {
    let store = Arc::new(MemoryStore::new());
    let job = JobConfig::new("meta-roundtrip", 2);
    let mut controller = Controller::new(job.clone(), store.clone());
    controller.start().await.unwrap();

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    let node_a = start_node(
        store.clone(),
        &job,
        1,
        CaptureTask::new(tx_a),
        RuntimeConfig::default(),
    )
    .await;
    let node_b = start_node(
        store.clone(),
        &job,
        1,
        CaptureTask::new(tx_b),
        RuntimeConfig::default(),
    )
    .await;

    // sort the pair by claimed slot
    let slot_a = expect_started(&mut rx_a).await;
    let slot_b = expect_started(&mut rx_b).await;
    let (parent, child, rx_parent, rx_child) = if slot_a == 0 {
        assert_eq!(slot_b, 1);
        (&node_a, &node_b, &mut rx_a, &mut rx_b)
    } else {
        assert_eq!(slot_a, 1);
        assert_eq!(slot_b, 0);
        (&node_b, &node_a, &mut rx_b, &mut rx_a)
    };

    for (child_meta, parent_meta) in [("parent", "child"), ("ParamReady", "GradientReady")] {
        parent.flag_child_meta_ready(child_meta);
        assert_eq!(
            recv(rx_child).await,
            TaskEvent::ParentMeta {
                from: 0,
                meta: child_meta.to_string()
            }
        );

        child.flag_parent_meta_ready(parent_meta);
        assert_eq!(
            recv(rx_parent).await,
            TaskEvent::ChildMeta {
                from: 1,
                meta: parent_meta.to_string()
            }
        );
    }

    // re-publishing the last value is a no-op for the receiver
    parent.flag_child_meta_ready("ParamReady");
    assert_quiet(rx_child, 300).await;

    node_a.stop().await;
    node_b.stop().await;
    controller.stop().await.unwrap();
}

/// Two-node tree data fetches in both directions; payload bytes arrive
/// verbatim and the serving side sees the requester's slot.
#[tokio::test]
async fn test_data_request() {
    let payloads: &[(&str, &[u8])] = &[
        ("request", b"response"),
        ("parameters", &[1, 2, 3]),
        ("gradient", &[4, 5, 6]),
    ];

    let store = Arc::new(MemoryStore::new());
    let job = JobConfig::new("data-request", 2);
    let mut controller = Controller::new(job.clone(), store.clone());
    controller.start().await.unwrap();

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    let node_a = start_node(
        store.clone(),
        &job,
        1,
        CaptureTask::with_data(tx_a, payloads),
        RuntimeConfig::default(),
    )
    .await;
    let node_b = start_node(
        store.clone(),
        &job,
        1,
        CaptureTask::with_data(tx_b, payloads),
        RuntimeConfig::default(),
    )
    .await;

    let slot_a = expect_started(&mut rx_a).await;
    let slot_b = expect_started(&mut rx_b).await;
    let (parent, child, rx_parent, rx_child) = if slot_a == 0 {
        assert_eq!(slot_b, 1);
        (&node_a, &node_b, &mut rx_a, &mut rx_b)
    } else {
        assert_eq!(slot_a, 1);
        assert_eq!(slot_b, 0);
        (&node_b, &node_a, &mut rx_b, &mut rx_a)
    };

    for (req, resp) in payloads {
        // parent fetches from child
        parent.data_request(1, *req);
        assert_eq!(
            recv(rx_child).await,
            TaskEvent::ServedAsChild {
                from: 0,
                req: req.to_string()
            }
        );
        assert_eq!(
            recv(rx_parent).await,
            TaskEvent::ChildData {
                from: 1,
                req: req.to_string(),
                data: resp.to_vec()
            }
        );

        // child fetches from parent
        child.data_request(0, *req);
        assert_eq!(
            recv(rx_parent).await,
            TaskEvent::ServedAsParent {
                from: 1,
                req: req.to_string()
            }
        );
        assert_eq!(
            recv(rx_child).await,
            TaskEvent::ParentData {
                from: 0,
                req: req.to_string(),
                data: resp.to_vec()
            }
        );
    }

    node_a.stop().await;
    node_b.stop().await;
    controller.stop().await.unwrap();
}

/// Three nodes race for a two-slot job: exactly two win, the third stands
/// by without crashing and claims a slot once its owner releases it.
#[tokio::test]
async fn test_slot_acquisition_race() {
    let store = Arc::new(MemoryStore::new());
    let job = JobConfig::new("slot-race", 2);
    let mut controller = Controller::new(job.clone(), store.clone());
    controller.start().await.unwrap();

    let mut nodes = Vec::new();
    let mut rxs = Vec::new();
    for _ in 0..3 {
        let (tx, rx) = mpsc::unbounded_channel();
        nodes.push(
            start_node(
                store.clone(),
                &job,
                1,
                CaptureTask::new(tx),
                RuntimeConfig::default(),
            )
            .await,
        );
        rxs.push(rx);
    }

    // exactly two nodes claim, and they cover slots {0, 1}
    let mut claimed = Vec::new();
    let mut standby = None;
    for (i, node) in nodes.iter().enumerate() {
        match timeout(Duration::from_secs(2), node.wait_for_slot()).await {
            Ok(Ok(slot)) => claimed.push((i, slot)),
            _ => {
                assert!(standby.is_none(), "two nodes in standby");
                standby = Some(i);
            }
        }
    }
    let standby = standby.expect("one node should stand by");
    let mut slots: Vec<u64> = claimed.iter().map(|&(_, s)| s).collect();
    slots.sort_unstable();
    assert_eq!(slots, vec![0, 1]);
    for &(i, slot) in &claimed {
        assert_eq!(expect_started(&mut rxs[i]).await, slot);
    }

    // release slot 1: the standby claims it and runs init
    let (owner_of_1, _) = *claimed.iter().find(|&&(_, s)| s == 1).unwrap();
    let released = nodes.remove(owner_of_1);
    released.stop().await;
    assert_eq!(recv(&mut rxs[owner_of_1]).await, TaskEvent::Exit);

    let slot = timeout(Duration::from_secs(5), async {
        expect_started(&mut rxs[standby]).await
    })
    .await
    .expect("standby never claimed the freed slot");
    assert_eq!(slot, 1);

    for node in nodes {
        node.stop().await;
    }
    controller.stop().await.unwrap();
}

/// Epoch fence: a data request still in flight when the epoch advances is
/// cancelled; the task hears about the new epoch and never sees a stale
/// response or failure.
#[tokio::test]
async fn test_epoch_fence_drops_stale_request() {
    let store = Arc::new(MemoryStore::new());
    let job = JobConfig::new("epoch-fence", 2);
    let mut controller = Controller::new(job.clone(), store.clone());
    controller.start().await.unwrap();

    // slow retries keep the request pending across the epoch advance
    let runtime = RuntimeConfig {
        max_retries: 3,
        retry_delay: Duration::from_millis(500),
        ..Default::default()
    };

    // only one node: slot 1 stays unassigned, so the fetch keeps retrying
    let (tx, mut rx) = mpsc::unbounded_channel();
    let node = start_node(store.clone(), &job, 1, CaptureTask::new(tx), runtime).await;
    assert_eq!(expect_started(&mut rx).await, 0);

    node.data_request(1, "x");
    tokio::time::sleep(Duration::from_millis(100)).await;
    controller.advance_epoch().await.unwrap();

    assert_eq!(recv(&mut rx).await, TaskEvent::Epoch(1));
    // the cancelled request surfaces nothing, not even a failure
    assert_quiet(&mut rx, 2_000).await;

    node.stop().await;
    controller.stop().await.unwrap();
}

/// Meta-notifications keep flowing after an epoch advance: watches are
/// reinstalled against the new epoch's keys.
#[tokio::test]
async fn test_meta_after_epoch_advance() {
    let store = Arc::new(MemoryStore::new());
    let job = JobConfig::new("epoch-meta", 2);
    let mut controller = Controller::new(job.clone(), store.clone());
    controller.start().await.unwrap();

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    let node_a = start_node(
        store.clone(),
        &job,
        1,
        CaptureTask::new(tx_a),
        RuntimeConfig::default(),
    )
    .await;
    let node_b = start_node(
        store.clone(),
        &job,
        1,
        CaptureTask::new(tx_b),
        RuntimeConfig::default(),
    )
    .await;

    let slot_a = expect_started(&mut rx_a).await;
    let slot_b = expect_started(&mut rx_b).await;
    let (parent, rx_parent, rx_child) = if slot_a == 0 {
        (&node_a, &mut rx_a, &mut rx_b)
    } else {
        assert_eq!(slot_b, 0);
        (&node_b, &mut rx_b, &mut rx_a)
    };

    controller.advance_epoch().await.unwrap();
    assert_eq!(recv(rx_parent).await, TaskEvent::Epoch(1));
    assert_eq!(recv(rx_child).await, TaskEvent::Epoch(1));

    parent.flag_child_meta_ready("round-two");
    assert_eq!(
        recv(rx_child).await,
        TaskEvent::ParentMeta {
            from: 0,
            meta: "round-two".to_string()
        }
    );

    node_a.stop().await;
    node_b.stop().await;
    controller.stop().await.unwrap();
}
