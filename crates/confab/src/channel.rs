//! A connection: one bound transport and the state the server keeps for it.
//!
//! Created by `Server::setup_transport`, destroyed when the transport
//! reports `FatalFailure`: the connection is unlinked from the server,
//! shutdown progress is reevaluated, and the transport reference dropped.
//! Everything routing-related on the connection is immutable after setup -
//! the interned routing keys and the frozen method table - so the accept
//! path takes no connection-level locks.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};
use uuid::Uuid;

use crate::call::ServerCall;
use crate::intern::{MetadataContext, Symbol};
use crate::registry::{MethodTable, RegisteredMethod};
use crate::server::Server;
use crate::task::TaskList;
use crate::transport::{Connectivity, ServerTransport, StreamSink, TransportOp};

pub struct Connection {
    id: Uuid,
    server: Arc<Server>,
    /// Dropped on fatal failure; ops performed after that are discarded.
    transport: Mutex<Option<Arc<dyn ServerTransport>>>,
    context: MetadataContext,
    path_key: Symbol,
    authority_key: Symbol,
    table: Option<MethodTable>,
    connectivity: Mutex<Connectivity>,
}

impl Connection {
    pub(crate) fn new(
        server: Arc<Server>,
        transport: Arc<dyn ServerTransport>,
        context: MetadataContext,
        methods: &[Arc<RegisteredMethod>],
    ) -> Arc<Self> {
        let path_key = context.intern(":path");
        let authority_key = context.intern(":authority");
        let table = MethodTable::build(methods, &context);
        Arc::new(Self {
            id: Uuid::new_v4(),
            server,
            transport: Mutex::new(Some(transport)),
            context,
            path_key,
            authority_key,
            table,
            connectivity: Mutex::new(Connectivity::Idle),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The interning context shared with the transport. Header symbols
    /// delivered to [`ServerCall::on_recv`] must come from here.
    pub fn context(&self) -> &MetadataContext {
        &self.context
    }

    pub fn connectivity(&self) -> Connectivity {
        *self.connectivity.lock().unwrap()
    }

    /// The transport accepted a new stream; returns the call that will
    /// track it.
    pub fn accept_stream(self: &Arc<Self>, sink: Arc<dyn StreamSink>) -> Arc<ServerCall> {
        debug!(connection = %self.id, "stream accepted");
        ServerCall::new(Arc::clone(&self.server), Arc::clone(self), sink)
    }

    /// The transport reports a connectivity change. `FatalFailure` unlinks
    /// the connection and releases the transport.
    pub fn connectivity_changed(self: &Arc<Self>, state: Connectivity) {
        *self.connectivity.lock().unwrap() = state;
        if state != Connectivity::FatalFailure {
            return;
        }
        info!(connection = %self.id, "connection failed fatally, unlinking");
        let mut tasks = TaskList::new();
        self.server.drop_connection(self.id, &mut tasks);
        self.transport.lock().unwrap().take();
        tasks.run();
    }

    pub(crate) fn routing_keys(&self) -> (&Symbol, &Symbol) {
        (&self.path_key, &self.authority_key)
    }

    pub(crate) fn route(&self, host: &Symbol, path: &Symbol) -> Option<Arc<RegisteredMethod>> {
        self.table.as_ref()?.lookup(host, path)
    }

    /// Hand an op to the transport. After fatal failure the op is dropped,
    /// but its consumed-callback still runs exactly once.
    pub(crate) fn perform(&self, op: TransportOp) {
        let transport = self.transport.lock().unwrap().clone();
        match transport {
            Some(transport) => transport.perform(op),
            None => {
                if let Some(done) = op.on_consumed {
                    done();
                }
            }
        }
    }
}
