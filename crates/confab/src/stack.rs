//! Bounded lock-free stack of small integer ids.
//!
//! One instance doubles as the free-list of request slots, another per method
//! bucket holds the ids of waiting application requests. Ids must be smaller
//! than the capacity fixed at construction.
//!
//! `push` reports whether the stack was empty beforehand. That edge is the
//! synchronization point the matcher relies on: exactly one pusher observes
//! the empty-to-non-empty transition, so exactly one thread runs the match
//! loop per transition.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Sentinel id meaning "no entry below".
const NIL: u32 = u32::MAX;

/// Head word: low 32 bits hold the top id (or NIL), high 32 bits hold a
/// generation counter bumped on every successful exchange to defeat ABA.
fn pack(id: u32, generation: u32) -> u64 {
    ((generation as u64) << 32) | id as u64
}

fn unpack(word: u64) -> (u32, u32) {
    (word as u32, (word >> 32) as u32)
}

pub(crate) struct IndexStack {
    head: AtomicU64,
    next: Box<[AtomicU32]>,
}

impl IndexStack {
    /// Create a stack that can hold ids in `0..capacity`.
    pub fn new(capacity: u32) -> Self {
        let next = (0..capacity).map(|_| AtomicU32::new(NIL)).collect();
        Self {
            head: AtomicU64::new(pack(NIL, 0)),
            next,
        }
    }

    /// Push an id. Returns true when the stack was empty before this push.
    ///
    /// An id must not be pushed while it is already on the stack; the slot
    /// free-list discipline guarantees that for both uses in this crate.
    pub fn push(&self, id: u32) -> bool {
        debug_assert!((id as usize) < self.next.len());
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let (top, generation) = unpack(head);
            self.next[id as usize].store(top, Ordering::Relaxed);
            match self.head.compare_exchange_weak(
                head,
                pack(id, generation.wrapping_add(1)),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return top == NIL,
                Err(current) => head = current,
            }
        }
    }

    /// Pop the most recently pushed id, or None when the stack is empty.
    pub fn pop(&self) -> Option<u32> {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let (top, generation) = unpack(head);
            if top == NIL {
                return None;
            }
            let below = self.next[top as usize].load(Ordering::Relaxed);
            match self.head.compare_exchange_weak(
                head,
                pack(below, generation.wrapping_add(1)),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(top),
                Err(current) => head = current,
            }
        }
    }
}
