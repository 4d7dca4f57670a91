//! Initial-metadata batches and the server-side routing filter.
//!
//! The transport interns incoming header keys and values into the owning
//! connection's [`MetadataContext`](crate::MetadataContext) before handing a
//! batch to the core. The core peels off the two routing headers it owns
//! (`:path`, `:authority`) by key identity and leaves everything else for
//! the application.

use std::time::Instant;

use crate::intern::Symbol;

/// One header: interned key and value.
#[derive(Clone, Debug)]
pub struct Metadatum {
    pub key: Symbol,
    pub value: Symbol,
}

/// The first batch of metadata on a stream, plus the deadline the transport
/// derived from it (when the client sent one).
#[derive(Default)]
pub struct MetadataBatch {
    pub items: Vec<Metadatum>,
    pub deadline: Option<Instant>,
}

impl MetadataBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: Symbol, value: Symbol) {
        self.items.push(Metadatum { key, value });
    }

    /// Remove and return the value of the header whose key is identical to
    /// `key`. Identity, not text equality: both sides must come from the
    /// same interning context.
    pub(crate) fn extract(&mut self, key: &Symbol) -> Option<Symbol> {
        let at = self
            .items
            .iter()
            .position(|m| Symbol::same(&m.key, key))?;
        Some(self.items.remove(at).value)
    }
}
