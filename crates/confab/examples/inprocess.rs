//! End-to-end walkthrough with an in-process transport: bind, request,
//! accept a stream, match, and shut down.
//!
//! Run with `cargo run --example inprocess`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use confab::{
    CompletionDetail, CompletionQueue, Connectivity, MetadataBatch, MetadataContext, Server,
    ServerConfig, ServerTransport, StreamDisposition, StreamSink, TransportOp,
};

/// Prints what the server asks of it; a real transport would translate ops
/// onto the wire.
struct LoopbackTransport;

impl ServerTransport for LoopbackTransport {
    fn perform(&self, op: TransportOp) {
        if op.bind_queue.is_some() {
            println!("transport: bound to a completion queue");
        }
        if let Some(goaway) = &op.goaway {
            println!(
                "transport: goaway {:?}",
                String::from_utf8_lossy(&goaway.message)
            );
        }
        if op.disconnect {
            println!("transport: disconnect");
        }
        if let Some(done) = op.on_consumed {
            done();
        }
    }
}

struct PrintSink;

impl StreamSink for PrintSink {
    fn recv_done(&self, success: bool) {
        println!("stream: receive delegated (success={success})");
    }

    fn closed(&self) {
        println!("stream: destroyed before activation");
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let server = Server::create(ServerConfig::from_env());
    let cq = CompletionQueue::new();
    server.register_completion_queue(&cq);
    server.start();

    let connection = server.setup_transport(Arc::new(LoopbackTransport), MetadataContext::new());

    // the application asks for the next call on any method
    server.request_call(&cq, &cq, 1)?;

    // the transport accepts a stream and delivers its routing headers
    let call = connection.accept_stream(Arc::new(PrintSink));
    let ctx = connection.context();
    let mut batch = MetadataBatch::new();
    batch.push(ctx.intern(":path"), ctx.intern("/greeter/hello"));
    batch.push(ctx.intern(":authority"), ctx.intern("localhost"));
    call.on_recv(Some(batch), None, StreamDisposition::Open, true);

    match cq.next(Duration::from_secs(1)) {
        Some(event) => match event.detail {
            CompletionDetail::NewCall(new_call) => println!(
                "matched call {} on host {} (tag {})",
                new_call.method.as_deref().unwrap_or("?"),
                new_call.host.as_deref().unwrap_or("?"),
                event.tag
            ),
            CompletionDetail::Empty => println!("request failed (tag {})", event.tag),
        },
        None => println!("nothing matched"),
    }

    server.shutdown_and_notify(&cq, 99);
    // the transport acknowledges the GOAWAY by tearing the connection down
    connection.connectivity_changed(Connectivity::FatalFailure);
    while let Some(event) = cq.next(Duration::from_millis(200)) {
        if event.tag == 99 {
            println!("shutdown published");
            break;
        }
    }
    Ok(())
}
