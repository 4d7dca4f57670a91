//! confab - RPC server core
//!
//! This crate is the piece of an RPC server that sits between the transport
//! layer and the application: it accepts incoming streams arriving over
//! already-established multiplexed connections, routes each stream to a
//! waiting application handler by its (host, method) coordinates, and
//! coordinates lifecycle across concurrent connections, calls, and consumers.
//!
//! The moving parts:
//!
//! - [`Server`] - owns the request slot pool, the registered-method registry,
//!   completion queues, live connections, and listeners.
//! - A per-bucket matcher pairs waiting calls with waiting application
//!   requests; calls are served FIFO, requests LIFO.
//! - A per-call state machine (not-started / pending / activated / zombied)
//!   arbitrates between the stream's first metadata batch, stream closure,
//!   and a matching application request.
//! - A two-phase shutdown drains pending work, broadcasts GOAWAY across all
//!   connections, and publishes one completion per caller-supplied tag once
//!   every listener and connection has died.
//!
//! What this crate deliberately does not do: wire framing, flow control,
//! header parsing beyond its own routing keys, load balancing, name
//! resolution, TLS, persistence. Transports and listeners are trait objects
//! supplied by the embedder; see [`ServerTransport`] and [`Listener`].
//!
//! # Quick tour
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use confab::{CompletionQueue, Server, ServerConfig};
//!
//! let server = Server::create(ServerConfig::default());
//! let cq = CompletionQueue::new();
//! server.register_completion_queue(&cq);
//! let handle = server.register_method("/echo", None).unwrap();
//! server.start();
//!
//! // a transport binding would call server.setup_transport(...) here
//!
//! server.request_registered_call(&handle, &cq, &cq, 1).unwrap();
//! if let Some(event) = cq.next(Duration::from_secs(1)) {
//!     println!("tag {} success {}", event.tag, event.success);
//! }
//! ```

mod broadcast;
pub mod call;
pub mod channel;
pub mod config;
pub mod cq;
pub mod error;
pub mod intern;
mod matcher;
pub mod metadata;
mod registry;
pub mod server;
mod stack;
mod task;
pub mod transport;

pub use call::ServerCall;
pub use channel::Connection;
pub use config::ServerConfig;
pub use cq::{Completion, CompletionDetail, CompletionQueue, NewCall, Tag};
pub use error::CallError;
pub use intern::{MetadataContext, Symbol};
pub use metadata::{MetadataBatch, Metadatum};
pub use registry::MethodHandle;
pub use server::Server;
pub use task::Task;
pub use transport::{
    Connectivity, GoAway, Listener, ServerTransport, StreamDisposition, StreamSink, TransportOp,
};
