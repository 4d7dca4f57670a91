//! The rendezvous between waiting calls and waiting application requests.
//!
//! Each method bucket (every registered method, plus the one unregistered
//! bucket) owns a matcher: a FIFO queue of parked calls and a LIFO stack of
//! request slot ids. Calls are served in arrival order to bound head-of-line
//! stalls; the most recently parked request is handed out first, which keeps
//! the hottest application thread busy.
//!
//! At any quiescent moment at most one of the two sides is non-empty: every
//! enqueue on either side attempts to match before parking. The
//! empty-to-non-empty edge reported by the request stack elects exactly one
//! thread to run the drain loop, and the parking path reruns the drain under
//! the pending lock, so a request and a call can never strand each other
//! across the unlocked window.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::call::{CallStage, ServerCall};
use crate::server::Server;
use crate::stack::IndexStack;
use crate::task::TaskList;

pub(crate) struct RequestMatcher {
    requests: IndexStack,
    pending: Mutex<VecDeque<Arc<ServerCall>>>,
}

impl RequestMatcher {
    /// `capacity` is the size of the server's slot pool; every slot id must
    /// be pushable.
    pub fn new(capacity: u32) -> Self {
        Self {
            requests: IndexStack::new(capacity),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// A routed call looks for a waiting request; otherwise it parks in
    /// PENDING state at the tail of the queue.
    pub fn match_or_park(&self, server: &Arc<Server>, call: &Arc<ServerCall>, tasks: &mut TaskList) {
        if let Some(slot) = self.requests.pop() {
            call.lock_state().stage = CallStage::Activated;
            let server = Arc::clone(server);
            let call = Arc::clone(call);
            tasks.add(move || server.begin_call(call, slot));
            return;
        }
        let mut pending = self.pending.lock().unwrap();
        call.lock_state().stage = CallStage::Pending;
        pending.push_back(Arc::clone(call));
        // A request may have landed between the failed pop and taking the
        // lock; its drain can have run against an empty queue. Rerun it here
        // so neither side strands the other.
        self.drain_locked(&mut pending, server, tasks);
    }

    /// An application request arrives, already copied into slot `slot`.
    /// Whoever pushes the empty-to-non-empty transition runs the match loop.
    pub fn enqueue_request(&self, server: &Arc<Server>, slot: u32, tasks: &mut TaskList) {
        if self.requests.push(slot) {
            let mut pending = self.pending.lock().unwrap();
            self.drain_locked(&mut pending, server, tasks);
        }
    }

    /// Fail every waiting request (shutdown path).
    pub fn kill_requests(&self, server: &Arc<Server>, tasks: &mut TaskList) {
        while let Some(slot) = self.requests.pop() {
            let server = Arc::clone(server);
            tasks.add(move || server.fail_request_slot(slot));
        }
    }

    /// Zombify every parked call (shutdown path).
    pub fn zombify_all_pending(&self, tasks: &mut TaskList) {
        let mut pending = self.pending.lock().unwrap();
        for call in pending.drain(..) {
            call.lock_state().stage = CallStage::Zombied;
            call.schedule_kill_zombie(tasks);
        }
    }

    /// Pair parked calls with stacked requests until one side runs dry.
    /// Zombied entries are discarded without consuming the slot in hand.
    fn drain_locked(
        &self,
        pending: &mut VecDeque<Arc<ServerCall>>,
        server: &Arc<Server>,
        tasks: &mut TaskList,
    ) {
        let mut held: Option<u32> = None;
        while !pending.is_empty() {
            if held.is_none() {
                held = self.requests.pop();
            }
            let Some(slot) = held else { break };
            let Some(call) = pending.pop_front() else { break };
            let mut state = call.lock_state();
            if state.stage == CallStage::Zombied {
                drop(state);
                call.schedule_kill_zombie(tasks);
                // slot stays in hand for the next parked call
            } else {
                debug_assert_eq!(state.stage, CallStage::Pending);
                state.stage = CallStage::Activated;
                drop(state);
                held = None;
                let server = Arc::clone(server);
                tasks.add(move || server.begin_call(call, slot));
            }
        }
        if let Some(slot) = held {
            // every parked call was a zombie; the request keeps waiting
            self.requests.push(slot);
        }
    }
}
