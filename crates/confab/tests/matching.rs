//! Matching engine scenarios: request-first, call-first, registered methods,
//! and arrival-order guarantees.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use confab::{CompletionQueue, MetadataContext, Server, ServerConfig, StreamDisposition};
use pretty_assertions::assert_eq;
use support::{expect_new_call, harness, headers, next, MockTransport, TestSink};

#[test]
fn request_first_then_stream_matches_immediately() {
    let h = harness();
    h.server.request_call(&h.cq, &h.cq, 1).unwrap();

    let sink = TestSink::new();
    let call = h.connection.accept_stream(sink.clone());
    call.on_recv(
        Some(headers(&h.connection, "/x", "h")),
        None,
        StreamDisposition::Open,
        true,
    );

    let event = next(&h.cq);
    assert_eq!(event.tag, 1);
    assert!(event.success);
    let new_call = expect_new_call(event);
    assert_eq!(new_call.method.as_deref(), Some("/x"));
    assert_eq!(new_call.host.as_deref(), Some("h"));
    assert_eq!(sink.recvs(), 1);
    assert_eq!(sink.closed(), 0);
}

#[test]
fn stream_first_parks_until_request_arrives() {
    let h = harness();
    let sink = TestSink::new();
    let call = h.connection.accept_stream(sink.clone());
    call.on_recv(
        Some(headers(&h.connection, "/y", "h")),
        None,
        StreamDisposition::Open,
        true,
    );
    assert!(h.cq.try_next().is_none());

    h.server.request_call(&h.cq, &h.cq, 2).unwrap();
    let event = next(&h.cq);
    assert_eq!(event.tag, 2);
    assert!(event.success);
    assert_eq!(expect_new_call(event).method.as_deref(), Some("/y"));
}

#[test]
fn registered_method_beats_the_unregistered_bucket() {
    let server = Server::create(ServerConfig::default());
    let cq = CompletionQueue::new();
    server.register_completion_queue(&cq);
    let handle = server.register_method("/z", None).expect("fresh method");
    server.start();
    let transport = Arc::new(MockTransport::default());
    let connection = server.setup_transport(transport, MetadataContext::new());

    server.request_call(&cq, &cq, 10).unwrap();
    server
        .request_registered_call(&handle, &cq, &cq, 11)
        .unwrap();

    let sink = TestSink::new();
    let call = connection.accept_stream(sink);
    call.on_recv(
        Some(headers(&connection, "/z", "h")),
        Some(Bytes::from_static(b"first message")),
        StreamDisposition::Open,
        true,
    );

    let event = next(&cq);
    assert_eq!(event.tag, 11, "registered bucket must win");
    let new_call = expect_new_call(event);
    // registered publications omit coordinates the app already knows
    assert_eq!(new_call.method, None);
    assert_eq!(new_call.payload.as_deref(), Some(&b"first message"[..]));

    // the batch request is still waiting
    assert!(cq.try_next().is_none());
}

#[test]
fn exact_host_registration_matches_only_that_host() {
    let server = Server::create(ServerConfig::default());
    let cq = CompletionQueue::new();
    server.register_completion_queue(&cq);
    let handle = server
        .register_method("/svc/m", Some("one.example"))
        .expect("fresh method");
    server.start();
    let transport = Arc::new(MockTransport::default());
    let connection = server.setup_transport(transport, MetadataContext::new());

    server
        .request_registered_call(&handle, &cq, &cq, 20)
        .unwrap();
    server.request_call(&cq, &cq, 21).unwrap();

    // wrong host: must fall through to the unregistered bucket
    let call = connection.accept_stream(TestSink::new());
    call.on_recv(
        Some(headers(&connection, "/svc/m", "two.example")),
        None,
        StreamDisposition::Open,
        true,
    );
    let event = next(&cq);
    assert_eq!(event.tag, 21);

    // right host: registered bucket
    let call = connection.accept_stream(TestSink::new());
    call.on_recv(
        Some(headers(&connection, "/svc/m", "one.example")),
        None,
        StreamDisposition::Open,
        true,
    );
    assert_eq!(next(&cq).tag, 20);
}

#[test]
fn parked_calls_activate_in_arrival_order() {
    let h = harness();
    for path in ["/first", "/second", "/third"] {
        let call = h.connection.accept_stream(TestSink::new());
        call.on_recv(
            Some(headers(&h.connection, path, "h")),
            None,
            StreamDisposition::Open,
            true,
        );
    }

    for (tag, expected) in [(1u64, "/first"), (2, "/second"), (3, "/third")] {
        h.server.request_call(&h.cq, &h.cq, tag).unwrap();
        let event = next(&h.cq);
        assert_eq!(event.tag, tag);
        assert_eq!(expect_new_call(event).method.as_deref(), Some(expected));
    }
}

#[test]
fn non_routing_headers_and_deadline_reach_the_application() {
    let h = harness();
    h.server.request_call(&h.cq, &h.cq, 7).unwrap();

    let ctx = h.connection.context();
    let mut batch = headers(&h.connection, "/m", "h");
    batch.push(ctx.intern("user-agent"), ctx.intern("confab-test/1"));
    let deadline = Instant::now() + Duration::from_secs(30);
    batch.deadline = Some(deadline);

    let call = h.connection.accept_stream(TestSink::new());
    call.on_recv(Some(batch), None, StreamDisposition::Open, true);

    let new_call = expect_new_call(next(&h.cq));
    assert_eq!(new_call.deadline, Some(deadline));
    assert_eq!(new_call.metadata.items.len(), 1);
    assert_eq!(new_call.metadata.items[0].key.text(), "user-agent");
    assert_eq!(new_call.metadata.items[0].value.text(), "confab-test/1");
    // the call handle reports its coordinates too
    assert_eq!(new_call.call.method().as_deref(), Some("/m"));
    assert_eq!(new_call.call.deadline(), Some(deadline));
}

#[test]
fn metadata_split_across_batches_routes_once_complete() {
    let h = harness();
    h.server.request_call(&h.cq, &h.cq, 9).unwrap();

    let ctx = h.connection.context();
    let call = h.connection.accept_stream(TestSink::new());

    let mut first = confab::MetadataBatch::new();
    first.push(ctx.intern(":path"), ctx.intern("/split"));
    call.on_recv(Some(first), None, StreamDisposition::Open, true);
    assert!(h.cq.try_next().is_none(), "half-routed call must not match");

    let mut second = confab::MetadataBatch::new();
    second.push(ctx.intern(":authority"), ctx.intern("h"));
    call.on_recv(Some(second), None, StreamDisposition::Open, true);

    let event = next(&h.cq);
    assert_eq!(event.tag, 9);
    assert_eq!(expect_new_call(event).method.as_deref(), Some("/split"));
}
