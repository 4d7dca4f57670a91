//! Per-call state and the server's interception of the first receive.
//!
//! A call is born NOT_STARTED when its stream is accepted. The first receive
//! completion carries the routing metadata; once both `:authority` and
//! `:path` are in hand the call is routed, and either ACTIVATES against a
//! waiting request or parks PENDING in a matcher. Stream closure and server
//! shutdown push the call to ZOMBIED instead; a PENDING zombie stays linked
//! in its matcher and is discarded when the drain loop reaches it, because
//! unlinking in place would need the matcher lock the closer does not hold.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use bytes::Bytes;
use tracing::debug;

use crate::channel::Connection;
use crate::cq::CompletionQueue;
use crate::intern::Symbol;
use crate::metadata::MetadataBatch;
use crate::server::Server;
use crate::task::TaskList;
use crate::transport::{StreamDisposition, StreamSink};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CallStage {
    NotStarted,
    Pending,
    Activated,
    Zombied,
}

pub(crate) struct CallState {
    pub stage: CallStage,
    pub host: Option<Symbol>,
    pub path: Option<Symbol>,
    pub deadline: Option<Instant>,
    pub got_initial_metadata: bool,
    /// Initial metadata minus the routing headers, held until publication.
    pub metadata: MetadataBatch,
    /// First message payload, captured for registered methods.
    pub payload: Option<Bytes>,
    pub bound_queue: Option<Arc<CompletionQueue>>,
}

/// One stream's worth of server-side call state.
pub struct ServerCall {
    server: Arc<Server>,
    channel: Arc<Connection>,
    sink: Arc<dyn StreamSink>,
    state: Mutex<CallState>,
}

impl ServerCall {
    pub(crate) fn new(
        server: Arc<Server>,
        channel: Arc<Connection>,
        sink: Arc<dyn StreamSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            server,
            channel,
            sink,
            state: Mutex::new(CallState {
                stage: CallStage::NotStarted,
                host: None,
                path: None,
                deadline: None,
                got_initial_metadata: false,
                metadata: MetadataBatch::new(),
                payload: None,
                bound_queue: None,
            }),
        })
    }

    /// The transport reports a receive completion on this stream.
    ///
    /// The core peels the routing headers out of the batch, routes the call
    /// once both are present, reacts to the stream disposition, and finally
    /// delegates to the sink with the transport's original success flag.
    ///
    /// `payload` is the optional first message for registered methods; it
    /// must arrive no later than the completion that finishes the routing
    /// metadata, or publication will not carry it.
    pub fn on_recv(
        self: &Arc<Self>,
        batch: Option<MetadataBatch>,
        payload: Option<Bytes>,
        stream: StreamDisposition,
        success: bool,
    ) {
        let mut tasks = TaskList::new();
        let mut route = false;
        if success {
            let mut state = self.state.lock().unwrap();
            if !state.got_initial_metadata {
                if let Some(mut batch) = batch {
                    let (path_key, authority_key) = self.channel.routing_keys();
                    if let Some(path) = batch.extract(path_key) {
                        state.path = Some(path);
                    }
                    if let Some(host) = batch.extract(authority_key) {
                        state.host = Some(host);
                    }
                    if batch.deadline.is_some() {
                        state.deadline = batch.deadline;
                    }
                    state.metadata.items.append(&mut batch.items);
                    if state.host.is_some() && state.path.is_some() {
                        state.got_initial_metadata = true;
                        route = true;
                    }
                }
                if let Some(payload) = payload {
                    state.payload = Some(payload);
                }
            }
        }
        if route {
            self.start_new_rpc(&mut tasks);
        }
        self.observe_stream(stream, &mut tasks);
        self.sink.recv_done(success);
        tasks.run();
    }

    /// Route a call whose metadata is complete: zombify under shutdown,
    /// otherwise hand it to the registered bucket or the unregistered one.
    fn start_new_rpc(self: &Arc<Self>, tasks: &mut TaskList) {
        if self.server.shutting_down() {
            self.state.lock().unwrap().stage = CallStage::Zombied;
            self.schedule_kill_zombie(tasks);
            return;
        }
        let (host, path) = {
            let state = self.state.lock().unwrap();
            match (state.host.clone(), state.path.clone()) {
                (Some(host), Some(path)) => (host, path),
                _ => return,
            }
        };
        match self.channel.route(&host, &path) {
            Some(method) => {
                debug!(path = %path, host = %host, "dispatching to registered bucket");
                method.matcher().match_or_park(&self.server, self, tasks);
            }
            None => {
                debug!(path = %path, host = %host, "dispatching to unregistered bucket");
                self.server
                    .unregistered_matcher()
                    .match_or_park(&self.server, self, tasks);
            }
        }
    }

    /// Stream disposition checks run after routing: a batch that both routes
    /// and closes must park the call before the closed check can see it.
    fn observe_stream(self: &Arc<Self>, stream: StreamDisposition, tasks: &mut TaskList) {
        match stream {
            StreamDisposition::Open | StreamDisposition::SendClosed => {}
            StreamDisposition::RecvClosed => {
                let mut state = self.state.lock().unwrap();
                if state.stage == CallStage::NotStarted {
                    state.stage = CallStage::Zombied;
                    drop(state);
                    self.schedule_kill_zombie(tasks);
                }
            }
            StreamDisposition::Closed => {
                let mut state = self.state.lock().unwrap();
                match state.stage {
                    CallStage::NotStarted => {
                        state.stage = CallStage::Zombied;
                        drop(state);
                        self.schedule_kill_zombie(tasks);
                    }
                    CallStage::Pending => {
                        // stays linked in its matcher; the drain loop drops it
                        state.stage = CallStage::Zombied;
                    }
                    CallStage::Activated | CallStage::Zombied => {}
                }
            }
        }
    }

    pub(crate) fn schedule_kill_zombie(self: &Arc<Self>, tasks: &mut TaskList) {
        let call = Arc::clone(self);
        tasks.add(move || {
            debug!("destroying zombie call");
            call.sink.closed();
        });
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, CallState> {
        self.state.lock().unwrap()
    }

    /// The connection this stream arrived on.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.channel
    }

    pub fn method(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .path
            .as_ref()
            .map(|s| s.text().to_string())
    }

    pub fn host(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .host
            .as_ref()
            .map(|s| s.text().to_string())
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.state.lock().unwrap().deadline
    }

    /// The queue the call was bound to at publication, if it got that far.
    pub fn bound_queue(&self) -> Option<Arc<CompletionQueue>> {
        self.state.lock().unwrap().bound_queue.clone()
    }
}

impl Drop for ServerCall {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            debug_assert!(
                state.stage != CallStage::Pending,
                "call destroyed while parked"
            );
        }
    }
}
