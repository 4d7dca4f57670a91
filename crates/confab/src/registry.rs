//! Registered methods and the per-connection routing table.
//!
//! The server keeps one [`RegisteredMethod`] per (method, host) pair the
//! application declared before start; each carries its own matcher. When a
//! transport is bound, the registry is frozen into a [`MethodTable`] for
//! that connection: open addressing with linear probing over `2 * N` slots,
//! every string re-interned into the connection's context so lookups are
//! identity compares. The worst insertion probe distance bounds every
//! lookup, and the table never changes after construction.

use std::sync::Arc;

use crate::intern::{kv_hash, MetadataContext, Symbol};
use crate::matcher::RequestMatcher;

pub(crate) struct RegisteredMethod {
    pub method: String,
    pub host: Option<String>,
    matcher: RequestMatcher,
}

impl RegisteredMethod {
    pub fn new(method: String, host: Option<String>, pool_capacity: u32) -> Self {
        Self {
            method,
            host,
            matcher: RequestMatcher::new(pool_capacity),
        }
    }

    pub fn matcher(&self) -> &RequestMatcher {
        &self.matcher
    }
}

/// Opaque handle returned by `register_method`, consumed by
/// `request_registered_call`.
#[derive(Clone)]
pub struct MethodHandle(pub(crate) Arc<RegisteredMethod>);

impl MethodHandle {
    pub fn method(&self) -> &str {
        &self.0.method
    }

    pub fn host(&self) -> Option<&str> {
        self.0.host.as_deref()
    }
}

struct TableEntry {
    /// None registers the wildcard host.
    host: Option<Symbol>,
    method: Symbol,
    registered: Arc<RegisteredMethod>,
}

pub(crate) struct MethodTable {
    slots: Box<[Option<TableEntry>]>,
    max_probes: u32,
}

impl MethodTable {
    /// Freeze the registry for one connection. Returns None when nothing is
    /// registered, in which case every call routes to the unregistered
    /// bucket.
    pub fn build(methods: &[Arc<RegisteredMethod>], context: &MetadataContext) -> Option<Self> {
        if methods.is_empty() {
            return None;
        }
        let capacity = methods.len() * 2;
        let mut slots: Vec<Option<TableEntry>> = (0..capacity).map(|_| None).collect();
        let mut max_probes = 0u32;
        for registered in methods {
            let method = context.intern(&registered.method);
            let host = registered.host.as_deref().map(|h| context.intern(h));
            let hash = kv_hash(host.as_ref().map_or(0, Symbol::hash), method.hash());
            let mut index = hash as usize % capacity;
            let mut probes = 0u32;
            while slots[index].is_some() {
                index = (index + 1) % capacity;
                probes += 1;
            }
            max_probes = max_probes.max(probes);
            slots[index] = Some(TableEntry {
                host,
                method,
                registered: Arc::clone(registered),
            });
        }
        Some(Self {
            slots: slots.into_boxed_slice(),
            max_probes,
        })
    }

    /// Two bounded passes: exact host first, wildcard second. Symbols must
    /// come from the same context the table was built with.
    pub fn lookup(&self, host: &Symbol, path: &Symbol) -> Option<Arc<RegisteredMethod>> {
        let capacity = self.slots.len();
        let hash = kv_hash(host.hash(), path.hash());
        for probe in 0..=self.max_probes as usize {
            let Some(entry) = &self.slots[(hash as usize + probe) % capacity] else {
                continue;
            };
            if let Some(entry_host) = &entry.host {
                if Symbol::same(entry_host, host) && Symbol::same(&entry.method, path) {
                    return Some(Arc::clone(&entry.registered));
                }
            }
        }
        let hash = kv_hash(0, path.hash());
        for probe in 0..=self.max_probes as usize {
            let Some(entry) = &self.slots[(hash as usize + probe) % capacity] else {
                continue;
            };
            if entry.host.is_none() && Symbol::same(&entry.method, path) {
                return Some(Arc::clone(&entry.registered));
            }
        }
        None
    }

    #[cfg(test)]
    fn probe_bound(&self) -> u32 {
        self.max_probes
    }
}
