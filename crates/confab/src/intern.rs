//! Per-connection metadata string interning.
//!
//! Every connection owns a [`MetadataContext`]. Interning the same string
//! twice in one context yields the same [`Symbol`], so routing comparisons
//! are pointer identity checks instead of byte compares. Symbols from
//! different contexts never compare equal, which is exactly the discipline
//! the registered-method table depends on: it re-interns every registered
//! (host, method) string into the connection's context at setup, and lookups
//! only ever see symbols from that same context.

use std::fmt;
use std::hash::Hasher;
use std::sync::Arc;

use dashmap::DashMap;

struct SymbolData {
    text: Box<str>,
    hash: u32,
}

/// An interned string with a cached 32-bit hash. Cheap to clone.
#[derive(Clone)]
pub struct Symbol(Arc<SymbolData>);

impl Symbol {
    pub fn text(&self) -> &str {
        &self.0.text
    }

    pub fn hash(&self) -> u32 {
        self.0.hash
    }

    /// Identity comparison. Only true for clones of the same interned entry,
    /// which implies the same context and the same text.
    pub fn same(a: &Symbol, b: &Symbol) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({:?})", self.text())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// String interning context, one per connection. Clones share the table.
#[derive(Clone, Default)]
pub struct MetadataContext {
    strings: Arc<DashMap<Box<str>, Symbol>>,
}

impl MetadataContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning the canonical symbol for this context.
    pub fn intern(&self, text: &str) -> Symbol {
        if let Some(existing) = self.strings.get(text) {
            return existing.clone();
        }
        let symbol = Symbol(Arc::new(SymbolData {
            text: text.into(),
            hash: str_hash(text),
        }));
        // entry() arbitrates a racing intern of the same string
        self.strings
            .entry(text.into())
            .or_insert(symbol)
            .clone()
    }
}

fn str_hash(text: &str) -> u32 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    hasher.write(text.as_bytes());
    let h = hasher.finish();
    (h as u32) ^ ((h >> 32) as u32)
}

/// Combine a host hash (0 for the wildcard host) with a method hash. Used
/// for both placement and lookup in the registered-method table.
pub(crate) fn kv_hash(host: u32, method: u32) -> u32 {
    host.rotate_left(5) ^ method
}
