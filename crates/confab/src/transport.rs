//! Contracts between the core and its external collaborators: transports,
//! stream consumers, and listeners.
//!
//! The core never blocks in these interfaces. A transport's `perform` must
//! enqueue the op on its own runloop and return; a listener's `destroy` must
//! invoke the done task exactly once, from any thread.

use std::sync::Arc;

use bytes::Bytes;

use crate::cq::CompletionQueue;
use crate::server::Server;
use crate::task::Task;

/// Stream lifecycle as the transport reports it alongside a receive
/// completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamDisposition {
    Open,
    /// Our send side closed; the stream can still deliver and match.
    SendClosed,
    /// The peer finished sending. A call that has not produced its routing
    /// metadata by now can never start.
    RecvClosed,
    /// Both directions closed.
    Closed,
}

/// Connection health as the transport reports it. `FatalFailure` is terminal:
/// the server unlinks the connection and drops its transport reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Connectivity {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    FatalFailure,
}

/// A graceful-close notice. The core only ever sends these with an OK
/// status; the message is an owned buffer the transport may hold until its
/// consumed-callback runs.
pub struct GoAway {
    pub message: Bytes,
}

/// One batch of instructions for a transport. Unset fields mean "no change".
#[derive(Default)]
pub struct TransportOp {
    /// Associate the transport's polling with this completion queue.
    pub bind_queue: Option<Arc<CompletionQueue>>,
    pub goaway: Option<GoAway>,
    /// Drop the connection without grace.
    pub disconnect: bool,
    /// Runs exactly once after the transport has consumed the op.
    pub on_consumed: Option<Task>,
}

/// The server side of a multiplexed transport. Implementations deliver
/// inbound events through the [`Connection`](crate::Connection) handle they
/// receive from `setup_transport`.
pub trait ServerTransport: Send + Sync + 'static {
    fn perform(&self, op: TransportOp);
}

/// Downstream consumer of a stream, captured when the stream is accepted.
/// The core interposes on the first receive and then delegates here.
pub trait StreamSink: Send + Sync + 'static {
    /// The receive completion, forwarded with the transport's original
    /// success flag after the core has inspected the batch.
    fn recv_done(&self, success: bool);

    /// The stream was destroyed without ever reaching the application.
    fn closed(&self);
}

/// An acceptor of new transports (e.g. a TCP/TLS accept loop). `start` is
/// called exactly once, from [`Server::start`](crate::Server::start).
pub trait Listener: Send + Sync + 'static {
    fn start(&self, server: &Arc<Server>, queues: &[Arc<CompletionQueue>]);

    /// Begin teardown. Must invoke `done` exactly once when the listener no
    /// longer touches the server.
    fn destroy(&self, done: Task);
}
