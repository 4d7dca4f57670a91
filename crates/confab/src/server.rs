//! The server: slot pool, registry, queues, connections, listeners, and the
//! shutdown coordinator.
//!
//! Locking is layered: the global lock guards connection/listener/shutdown
//! state, each matcher's pending lock guards its parked calls, and each call
//! guards its own stage. The order is global, then pending, then call state;
//! slot and queue locks are leaves only ever taken in deferred tasks. Work
//! produced under any lock is deferred onto a task list and run once every
//! lock is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broadcast::ChannelBroadcaster;
use crate::call::ServerCall;
use crate::channel::Connection;
use crate::config::ServerConfig;
use crate::cq::{Completion, CompletionDetail, CompletionQueue, NewCall, Tag};
use crate::error::CallError;
use crate::intern::MetadataContext;
use crate::matcher::RequestMatcher;
use crate::registry::{MethodHandle, RegisteredMethod};
use crate::stack::IndexStack;
use crate::task::TaskList;
use crate::transport::{Listener, ServerTransport, TransportOp};

pub(crate) enum RequestKind {
    /// Any-method request: the completion reports method, host, deadline.
    Batch,
    /// The application pre-declared the method; the completion reports the
    /// deadline and the optional first payload.
    Registered { method: Arc<RegisteredMethod> },
}

/// One outstanding application request, as copied into a pool slot.
pub(crate) struct RequestedCall {
    pub kind: RequestKind,
    pub cq_bind: Arc<CompletionQueue>,
    pub cq_notify: Arc<CompletionQueue>,
    pub tag: Tag,
}

struct GlobalState {
    queues: Vec<Arc<CompletionQueue>>,
    registry: Vec<Arc<RegisteredMethod>>,
    connections: HashMap<Uuid, Arc<Connection>>,
    listeners: Vec<Arc<dyn Listener>>,
    listeners_destroyed: usize,
    shutdown_tags: Vec<(Arc<CompletionQueue>, Tag)>,
    shutdown_published: bool,
    last_progress_log: Instant,
}

pub struct Server {
    config: ServerConfig,
    started: AtomicBool,
    /// Monotonic 0 -> 1; acquire loads let transport threads short-circuit
    /// new RPCs without any lock.
    shutdown_flag: AtomicBool,
    unregistered: RequestMatcher,
    /// Pool of `max_requested_calls` request slots, indexed by the ids that
    /// circulate through the free-list and the matchers' request stacks.
    slots: Box<[Mutex<Option<RequestedCall>>]>,
    free_slots: IndexStack,
    global: Mutex<GlobalState>,
}

impl Server {
    pub fn create(config: ServerConfig) -> Arc<Self> {
        let capacity = config.max_requested_calls;
        let free_slots = IndexStack::new(capacity);
        for id in (0..capacity).rev() {
            free_slots.push(id);
        }
        Arc::new(Self {
            unregistered: RequestMatcher::new(capacity),
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
            free_slots,
            started: AtomicBool::new(false),
            shutdown_flag: AtomicBool::new(false),
            global: Mutex::new(GlobalState {
                queues: Vec::new(),
                registry: Vec::new(),
                connections: HashMap::new(),
                listeners: Vec::new(),
                listeners_destroyed: 0,
                shutdown_tags: Vec::new(),
                shutdown_published: false,
                last_progress_log: Instant::now(),
            }),
            config,
        })
    }

    /// The channel args this server was created with.
    pub fn channel_args(&self) -> &ServerConfig {
        &self.config
    }

    /// Mark `cq` as one of this server's queues. Idempotent; must happen
    /// before a request names it as the notification queue.
    pub fn register_completion_queue(&self, cq: &Arc<CompletionQueue>) {
        cq.mark_server_queue();
        let mut global = self.global.lock().unwrap();
        if !global.queues.iter().any(|q| Arc::ptr_eq(q, cq)) {
            global.queues.push(Arc::clone(cq));
        }
    }

    /// Declare a (method, host) pair ahead of start. `None` host is the
    /// wildcard. Duplicates and post-start registration return None.
    pub fn register_method(&self, method: &str, host: Option<&str>) -> Option<MethodHandle> {
        if self.started.load(Ordering::Acquire) {
            error!(%method, "method registration after start is ignored");
            return None;
        }
        let mut global = self.global.lock().unwrap();
        if global
            .registry
            .iter()
            .any(|m| m.method == method && m.host.as_deref() == host)
        {
            error!(%method, ?host, "duplicate method registration");
            return None;
        }
        let registered = Arc::new(RegisteredMethod::new(
            method.to_string(),
            host.map(str::to_string),
            self.config.max_requested_calls,
        ));
        global.registry.push(Arc::clone(&registered));
        Some(MethodHandle(registered))
    }

    /// Must be called before `start`.
    pub fn add_listener(&self, listener: Arc<dyn Listener>) {
        self.global.lock().unwrap().listeners.push(listener);
    }

    /// Start every listener against the registered queues.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("start called more than once");
            return;
        }
        let (queues, listeners) = {
            let global = self.global.lock().unwrap();
            (global.queues.clone(), global.listeners.clone())
        };
        info!(
            queues = queues.len(),
            listeners = listeners.len(),
            "server started"
        );
        for listener in listeners {
            listener.start(self, &queues);
        }
    }

    /// Bind a transport: build the connection's routing table from the
    /// registry, link it into the server, and issue the setup ops. If the
    /// server is already shutting down the transport is told to disconnect
    /// straight away.
    pub fn setup_transport(
        self: &Arc<Self>,
        transport: Arc<dyn ServerTransport>,
        context: MetadataContext,
    ) -> Arc<Connection> {
        let (connection, queues) = {
            let mut global = self.global.lock().unwrap();
            let connection = Connection::new(
                Arc::clone(self),
                Arc::clone(&transport),
                context,
                &global.registry,
            );
            global
                .connections
                .insert(connection.id(), Arc::clone(&connection));
            (connection, global.queues.clone())
        };
        info!(connection = %connection.id(), "transport bound");
        for cq in queues {
            transport.perform(TransportOp {
                bind_queue: Some(cq),
                ..TransportOp::default()
            });
        }
        if self.shutting_down() {
            transport.perform(TransportOp {
                disconnect: true,
                ..TransportOp::default()
            });
        }
        connection
    }

    /// Ask for the next call on any method. The completion carries method,
    /// host, deadline, and the remaining initial metadata.
    pub fn request_call(
        self: &Arc<Self>,
        cq_bind: &Arc<CompletionQueue>,
        cq_notify: &Arc<CompletionQueue>,
        tag: Tag,
    ) -> Result<(), CallError> {
        if !cq_notify.is_server_queue() {
            return Err(CallError::NotServerCompletionQueue);
        }
        cq_notify.begin_op();
        self.queue_call_request(RequestedCall {
            kind: RequestKind::Batch,
            cq_bind: Arc::clone(cq_bind),
            cq_notify: Arc::clone(cq_notify),
            tag,
        });
        Ok(())
    }

    /// Ask for the next call on a pre-registered method.
    pub fn request_registered_call(
        self: &Arc<Self>,
        handle: &MethodHandle,
        cq_bind: &Arc<CompletionQueue>,
        cq_notify: &Arc<CompletionQueue>,
        tag: Tag,
    ) -> Result<(), CallError> {
        if !cq_notify.is_server_queue() {
            return Err(CallError::NotServerCompletionQueue);
        }
        cq_notify.begin_op();
        self.queue_call_request(RequestedCall {
            kind: RequestKind::Registered {
                method: Arc::clone(&handle.0),
            },
            cq_bind: Arc::clone(cq_bind),
            cq_notify: Arc::clone(cq_notify),
            tag,
        });
        Ok(())
    }

    /// Slot the request and offer it to the right matcher. Shutdown and an
    /// exhausted pool both fail the request asynchronously.
    fn queue_call_request(self: &Arc<Self>, rc: RequestedCall) {
        let mut tasks = TaskList::new();
        if self.shutting_down() {
            Self::fail_call_unslotted(rc, &mut tasks);
        } else {
            match self.free_slots.pop() {
                None => {
                    warn!("request slot pool exhausted");
                    Self::fail_call_unslotted(rc, &mut tasks);
                }
                Some(slot) => {
                    let target = match &rc.kind {
                        RequestKind::Registered { method } => Some(Arc::clone(method)),
                        RequestKind::Batch => None,
                    };
                    *self.slots[slot as usize].lock().unwrap() = Some(rc);
                    match &target {
                        Some(method) => method.matcher().enqueue_request(self, slot, &mut tasks),
                        None => self.unregistered.enqueue_request(self, slot, &mut tasks),
                    }
                }
            }
        }
        tasks.run();
    }

    /// Fail a request that never reached a slot; the allocation dies with
    /// the completion.
    fn fail_call_unslotted(rc: RequestedCall, tasks: &mut TaskList) {
        tasks.add(move || {
            rc.cq_notify.post(
                Completion {
                    tag: rc.tag,
                    success: false,
                    detail: CompletionDetail::Empty,
                },
                None,
            );
        });
    }

    /// Fail a slotted request (shutdown drain). The slot returns to the
    /// free-list when the application consumes the completion.
    pub(crate) fn fail_request_slot(self: &Arc<Self>, slot: u32) {
        let rc = self.slots[slot as usize]
            .lock()
            .unwrap()
            .take()
            .expect("failing an unoccupied request slot");
        let server = Arc::clone(self);
        rc.cq_notify.post(
            Completion {
                tag: rc.tag,
                success: false,
                detail: CompletionDetail::Empty,
            },
            Some(Box::new(move || {
                server.free_slots.push(slot);
            })),
        );
    }

    /// Publish an activated call against the request in `slot`. Runs as a
    /// deferred task; the matcher has already marked the call ACTIVATED.
    pub(crate) fn begin_call(self: &Arc<Self>, call: Arc<ServerCall>, slot: u32) {
        let rc = self.slots[slot as usize]
            .lock()
            .unwrap()
            .take()
            .expect("publishing from an unoccupied request slot");
        let detail = {
            let mut state = call.lock_state();
            state.bound_queue = Some(Arc::clone(&rc.cq_bind));
            match &rc.kind {
                RequestKind::Batch => NewCall {
                    call: Arc::clone(&call),
                    method: state.path.as_ref().map(|s| s.text().to_string()),
                    host: state.host.as_ref().map(|s| s.text().to_string()),
                    deadline: state.deadline,
                    metadata: std::mem::take(&mut state.metadata),
                    payload: None,
                },
                RequestKind::Registered { .. } => NewCall {
                    call: Arc::clone(&call),
                    method: None,
                    host: None,
                    deadline: state.deadline,
                    metadata: std::mem::take(&mut state.metadata),
                    payload: state.payload.take(),
                },
            }
        };
        debug!(tag = rc.tag, "publishing matched call");
        let server = Arc::clone(self);
        rc.cq_notify.post(
            Completion {
                tag: rc.tag,
                success: true,
                detail: CompletionDetail::NewCall(detail),
            },
            Some(Box::new(move || {
                server.free_slots.push(slot);
            })),
        );
    }

    /// Begin shutdown and arrange for a completion with `tag` on `cq` once
    /// every connection and listener is gone. Each invocation gets its own
    /// completion; only the first drives the actual teardown.
    pub fn shutdown_and_notify(self: &Arc<Self>, cq: &Arc<CompletionQueue>, tag: Tag) {
        let mut tasks = TaskList::new();
        let mut broadcaster = None;
        let mut to_destroy = Vec::new();
        {
            let mut global = self.global.lock().unwrap();
            cq.begin_op();
            if global.shutdown_published {
                let cq = Arc::clone(cq);
                let server = Arc::clone(self);
                tasks.add(move || {
                    cq.post(
                        Completion {
                            tag,
                            success: true,
                            detail: CompletionDetail::Empty,
                        },
                        Some(Box::new(move || drop(server))),
                    );
                });
            } else {
                global.shutdown_tags.push((Arc::clone(cq), tag));
                // when the flag is already set, the in-flight shutdown
                // publishes this tag too
                if !self.shutting_down() {
                    info!("shutdown requested");
                    global.last_progress_log = Instant::now();
                    broadcaster = Some(ChannelBroadcaster::new(
                        global.connections.values().cloned().collect(),
                    ));
                    self.kill_pending_work(&global, &mut tasks);
                    self.shutdown_flag.store(true, Ordering::Release);
                    self.maybe_finish_shutdown(&mut global, &mut tasks);
                    to_destroy = global.listeners.clone();
                }
            }
        }
        for listener in to_destroy {
            let server = Arc::clone(self);
            listener.destroy(Box::new(move || server.listener_destroyed()));
        }
        if let Some(broadcaster) = broadcaster {
            broadcaster.shutdown(true, false);
        }
        tasks.run();
    }

    /// Force-disconnect every live connection. Does not affect shutdown
    /// state.
    pub fn cancel_all_calls(&self) {
        let broadcaster = {
            let global = self.global.lock().unwrap();
            ChannelBroadcaster::new(global.connections.values().cloned().collect())
        };
        broadcaster.shutdown(false, true);
    }

    pub fn has_open_connections(&self) -> bool {
        !self.global.lock().unwrap().connections.is_empty()
    }

    pub(crate) fn shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::Acquire)
    }

    pub(crate) fn unregistered_matcher(&self) -> &RequestMatcher {
        &self.unregistered
    }

    /// Unlink a dead connection and reevaluate shutdown progress.
    pub(crate) fn drop_connection(self: &Arc<Self>, id: Uuid, tasks: &mut TaskList) {
        let mut global = self.global.lock().unwrap();
        if global.connections.remove(&id).is_some() {
            self.maybe_finish_shutdown(&mut global, tasks);
        }
    }

    fn listener_destroyed(self: &Arc<Self>) {
        let mut tasks = TaskList::new();
        {
            let mut global = self.global.lock().unwrap();
            global.listeners_destroyed += 1;
            self.maybe_finish_shutdown(&mut global, &mut tasks);
        }
        tasks.run();
    }

    /// Drain every matcher: fail waiting requests, zombify parked calls.
    fn kill_pending_work(self: &Arc<Self>, global: &GlobalState, tasks: &mut TaskList) {
        self.unregistered.kill_requests(self, tasks);
        self.unregistered.zombify_all_pending(tasks);
        for method in &global.registry {
            method.matcher().kill_requests(self, tasks);
            method.matcher().zombify_all_pending(tasks);
        }
    }

    /// Publish shutdown once the world is quiet. Called under the global
    /// lock whenever a connection or listener dies and when shutdown begins.
    fn maybe_finish_shutdown(self: &Arc<Self>, global: &mut GlobalState, tasks: &mut TaskList) {
        if !self.shutting_down() || global.shutdown_published {
            return;
        }
        // a straggler may have parked between the first drain and the flag
        self.kill_pending_work(global, tasks);
        if global.connections.is_empty() && global.listeners_destroyed == global.listeners.len() {
            global.shutdown_published = true;
            info!(tags = global.shutdown_tags.len(), "shutdown complete");
            for (cq, tag) in global.shutdown_tags.drain(..) {
                let server = Arc::clone(self);
                tasks.add(move || {
                    cq.post(
                        Completion {
                            tag,
                            success: true,
                            detail: CompletionDetail::Empty,
                        },
                        Some(Box::new(move || drop(server))),
                    );
                });
            }
        } else if global.last_progress_log.elapsed() >= Duration::from_secs(1) {
            global.last_progress_log = Instant::now();
            info!(
                connections = global.connections.len(),
                listeners_pending = global.listeners.len() - global.listeners_destroyed,
                "waiting for shutdown"
            );
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let global = self.global.get_mut().unwrap();
        if !global.listeners.is_empty() {
            assert!(
                global.shutdown_published,
                "server dropped before shutdown completed"
            );
            assert_eq!(
                global.listeners_destroyed,
                global.listeners.len(),
                "server dropped before every listener reported destruction"
            );
        }
    }
}
