//! Streams that die before or while waiting: zombie transitions and the
//! delayed drop out of the matcher.

mod support;

use confab::StreamDisposition;
use support::{expect_new_call, harness, headers, next, TestSink};

#[test]
fn recv_closed_before_metadata_destroys_without_a_matcher() {
    let h = harness();
    let sink = TestSink::new();
    let call = h.connection.accept_stream(sink.clone());

    call.on_recv(None, None, StreamDisposition::RecvClosed, true);
    assert_eq!(sink.closed(), 1);
    assert_eq!(sink.recvs(), 1, "delegation still happens");

    // no matcher ever saw the call: a fresh request keeps waiting
    h.server.request_call(&h.cq, &h.cq, 1).unwrap();
    assert!(h.cq.try_next().is_none());
}

#[test]
fn closed_before_metadata_destroys_without_a_matcher() {
    let h = harness();
    let sink = TestSink::new();
    let call = h.connection.accept_stream(sink.clone());
    call.on_recv(None, None, StreamDisposition::Closed, false);
    assert_eq!(sink.closed(), 1);
}

#[test]
fn send_closed_does_not_kill_an_unstarted_call() {
    let h = harness();
    let sink = TestSink::new();
    let call = h.connection.accept_stream(sink.clone());
    call.on_recv(None, None, StreamDisposition::SendClosed, true);
    assert_eq!(sink.closed(), 0);

    // the call can still route and match
    h.server.request_call(&h.cq, &h.cq, 2).unwrap();
    call.on_recv(
        Some(headers(&h.connection, "/late", "h")),
        None,
        StreamDisposition::Open,
        true,
    );
    assert_eq!(next(&h.cq).tag, 2);
}

#[test]
fn half_close_after_routing_leaves_the_call_matchable() {
    // RECV_CLOSED means the client finished sending; a call that already
    // routed must still match a later request
    let h = harness();
    let sink = TestSink::new();
    let call = h.connection.accept_stream(sink.clone());
    call.on_recv(
        Some(headers(&h.connection, "/m", "h")),
        None,
        StreamDisposition::RecvClosed,
        true,
    );
    assert_eq!(sink.closed(), 0);

    h.server.request_call(&h.cq, &h.cq, 3).unwrap();
    let event = next(&h.cq);
    assert_eq!(event.tag, 3);
    assert!(event.success);
}

#[test]
fn pending_zombie_is_dropped_at_dequeue() {
    let h = harness();
    let sink = TestSink::new();
    let call = h.connection.accept_stream(sink.clone());

    // parks in the unregistered bucket
    call.on_recv(
        Some(headers(&h.connection, "/dead", "h")),
        None,
        StreamDisposition::Open,
        true,
    );
    // stream closes while parked: zombied in place, not yet destroyed
    call.on_recv(None, None, StreamDisposition::Closed, true);
    assert_eq!(sink.closed(), 0, "zombie stays linked until dequeue");

    // the request that would have matched it discards the zombie instead
    h.server.request_call(&h.cq, &h.cq, 4).unwrap();
    assert_eq!(sink.closed(), 1);
    assert!(h.cq.try_next().is_none(), "request keeps waiting");

    // and the kept request matches the next live stream
    let live = h.connection.accept_stream(TestSink::new());
    live.on_recv(
        Some(headers(&h.connection, "/alive", "h")),
        None,
        StreamDisposition::Open,
        true,
    );
    let event = next(&h.cq);
    assert_eq!(event.tag, 4);
    assert_eq!(expect_new_call(event).method.as_deref(), Some("/alive"));
}

#[test]
fn routing_and_closure_in_one_batch_parks_then_zombifies() {
    let h = harness();
    let sink = TestSink::new();
    let call = h.connection.accept_stream(sink.clone());
    call.on_recv(
        Some(headers(&h.connection, "/m", "h")),
        None,
        StreamDisposition::Closed,
        true,
    );
    // routed first, then the closed check zombified the parked call
    assert_eq!(sink.closed(), 0);

    h.server.request_call(&h.cq, &h.cq, 5).unwrap();
    assert_eq!(sink.closed(), 1);
    assert!(h.cq.try_next().is_none());
}
