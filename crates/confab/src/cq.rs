//! Completion queues: where the server publishes application-visible events.
//!
//! The application consumes with [`CompletionQueue::next`] (blocking, with a
//! timeout) or [`CompletionQueue::try_next`]. Internal bookkeeping attached
//! to a completion (returning a request slot to the free-list, releasing a
//! server reference) runs when the event is dequeued, not when it is posted;
//! until then the slot counts as in-flight.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::call::ServerCall;
use crate::metadata::MetadataBatch;
use crate::task::Task;

/// Application-chosen correlation tag, echoed back on the completion.
pub type Tag = u64;

/// What a completion carries beyond (tag, success).
pub enum CompletionDetail {
    /// Shutdown notifications and failed requests carry no call.
    Empty,
    /// A matched incoming call.
    NewCall(NewCall),
}

/// The call handed to the application when a request matches.
///
/// For a batch request `method` and `host` are filled in; for a registered
/// request the application already knows them and gets the optional first
/// message payload instead.
pub struct NewCall {
    pub call: Arc<ServerCall>,
    pub method: Option<String>,
    pub host: Option<String>,
    pub deadline: Option<Instant>,
    /// Initial metadata minus the routing headers the core consumed.
    pub metadata: MetadataBatch,
    pub payload: Option<Bytes>,
}

pub struct Completion {
    pub tag: Tag,
    pub success: bool,
    pub detail: CompletionDetail,
}

struct QueuedCompletion {
    completion: Completion,
    on_done: Option<Task>,
}

#[derive(Default)]
struct CqInner {
    events: VecDeque<QueuedCompletion>,
}

/// A queue of completions, consumable from any thread.
pub struct CompletionQueue {
    inner: Mutex<CqInner>,
    ready: Condvar,
    pending_ops: AtomicUsize,
    server_queue: AtomicBool,
}

impl CompletionQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(CqInner::default()),
            ready: Condvar::new(),
            pending_ops: AtomicUsize::new(0),
            server_queue: AtomicBool::new(false),
        })
    }

    /// Number of operations begun but not yet consumed.
    pub fn pending_ops(&self) -> usize {
        self.pending_ops.load(Ordering::Acquire)
    }

    /// Block until a completion is available or the timeout elapses.
    pub fn next(&self, timeout: Duration) -> Option<Completion> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(queued) = inner.events.pop_front() {
                drop(inner);
                return Some(self.consume(queued));
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, result) = self.ready.wait_timeout(inner, deadline - now).unwrap();
            inner = guard;
            if result.timed_out() && inner.events.is_empty() {
                return None;
            }
        }
    }

    /// Dequeue a completion without blocking.
    pub fn try_next(&self) -> Option<Completion> {
        let queued = self.inner.lock().unwrap().events.pop_front()?;
        Some(self.consume(queued))
    }

    fn consume(&self, queued: QueuedCompletion) -> Completion {
        if let Some(done) = queued.on_done {
            done();
        }
        self.pending_ops.fetch_sub(1, Ordering::AcqRel);
        queued.completion
    }

    /// Account for a completion that will be posted later. Called by the
    /// server before any path that ends in `post`.
    pub(crate) fn begin_op(&self) {
        self.pending_ops.fetch_add(1, Ordering::AcqRel);
    }

    /// Publish a completion. `on_done` runs when the application dequeues
    /// the event.
    pub(crate) fn post(&self, completion: Completion, on_done: Option<Task>) {
        let mut inner = self.inner.lock().unwrap();
        inner.events.push_back(QueuedCompletion { completion, on_done });
        drop(inner);
        self.ready.notify_one();
    }

    pub(crate) fn mark_server_queue(&self) {
        self.server_queue.store(true, Ordering::Release);
    }

    pub(crate) fn is_server_queue(&self) -> bool {
        self.server_queue.load(Ordering::Acquire)
    }
}
