//! Shared fixtures for the integration suites: a transport that records the
//! ops the server performs, a stream sink that counts what the core reports
//! back, and a deferrable listener.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use confab::{
    Completion, CompletionDetail, CompletionQueue, Connection, Listener, MetadataBatch,
    MetadataContext, NewCall, Server, ServerConfig, ServerTransport, StreamSink, Task,
    TransportOp,
};

/// What one performed op looked like, flattened for assertions.
pub struct OpRecord {
    pub bound_queue: bool,
    pub goaway: Option<String>,
    pub disconnect: bool,
}

/// Records every op the server performs against it and consumes them
/// immediately.
#[derive(Default)]
pub struct MockTransport {
    pub ops: Mutex<Vec<OpRecord>>,
}

impl MockTransport {
    pub fn goaways(&self) -> Vec<String> {
        self.ops
            .lock()
            .unwrap()
            .iter()
            .filter_map(|op| op.goaway.clone())
            .collect()
    }

    pub fn disconnects(&self) -> usize {
        self.ops.lock().unwrap().iter().filter(|op| op.disconnect).count()
    }

    pub fn queue_bindings(&self) -> usize {
        self.ops.lock().unwrap().iter().filter(|op| op.bound_queue).count()
    }
}

impl ServerTransport for MockTransport {
    fn perform(&self, op: TransportOp) {
        self.ops.lock().unwrap().push(OpRecord {
            bound_queue: op.bind_queue.is_some(),
            goaway: op
                .goaway
                .as_ref()
                .map(|g| String::from_utf8_lossy(&g.message).into_owned()),
            disconnect: op.disconnect,
        });
        if let Some(done) = op.on_consumed {
            done();
        }
    }
}

/// Counts receive delegations and zombie destructions.
#[derive(Default)]
pub struct TestSink {
    pub recv_count: AtomicUsize,
    pub closed_count: AtomicUsize,
}

impl TestSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn recvs(&self) -> usize {
        self.recv_count.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed_count.load(Ordering::SeqCst)
    }
}

impl StreamSink for TestSink {
    fn recv_done(&self, _success: bool) {
        self.recv_count.fetch_add(1, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.closed_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Listener that can either acknowledge destruction immediately or park the
/// done task until the test releases it.
pub struct TestListener {
    pub started: AtomicUsize,
    pub destroy_calls: AtomicUsize,
    defer: bool,
    parked: Mutex<Option<Task>>,
}

impl TestListener {
    pub fn immediate() -> Arc<Self> {
        Arc::new(Self {
            started: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
            defer: false,
            parked: Mutex::new(None),
        })
    }

    pub fn deferred() -> Arc<Self> {
        Arc::new(Self {
            started: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
            defer: true,
            parked: Mutex::new(None),
        })
    }

    /// Release a parked done task, completing this listener's teardown.
    pub fn finish(&self) {
        if let Some(done) = self.parked.lock().unwrap().take() {
            done();
        }
    }
}

impl Listener for TestListener {
    fn start(&self, _server: &Arc<Server>, _queues: &[Arc<CompletionQueue>]) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn destroy(&self, done: Task) {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        if self.defer {
            *self.parked.lock().unwrap() = Some(done);
        } else {
            done();
        }
    }
}

pub struct Harness {
    pub server: Arc<Server>,
    pub cq: Arc<CompletionQueue>,
    pub transport: Arc<MockTransport>,
    pub connection: Arc<Connection>,
}

/// Server + one queue + one bound mock transport, started.
pub fn harness() -> Harness {
    harness_with(ServerConfig::default())
}

pub fn harness_with(config: ServerConfig) -> Harness {
    let server = Server::create(config);
    let cq = CompletionQueue::new();
    server.register_completion_queue(&cq);
    server.start();
    let transport = Arc::new(MockTransport::default());
    let connection = server.setup_transport(transport.clone(), MetadataContext::new());
    Harness {
        server,
        cq,
        transport,
        connection,
    }
}

/// A routing header batch interned in the connection's context.
pub fn headers(connection: &Connection, path: &str, authority: &str) -> MetadataBatch {
    let ctx = connection.context();
    let mut batch = MetadataBatch::new();
    batch.push(ctx.intern(":path"), ctx.intern(path));
    batch.push(ctx.intern(":authority"), ctx.intern(authority));
    batch
}

pub fn next(cq: &CompletionQueue) -> Completion {
    cq.next(Duration::from_secs(2)).expect("completion within deadline")
}

pub fn expect_new_call(completion: Completion) -> NewCall {
    match completion.detail {
        CompletionDetail::NewCall(call) => call,
        CompletionDetail::Empty => panic!("completion carried no call"),
    }
}
